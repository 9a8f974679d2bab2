/// Regroups variable-sized microphone chunks into fixed-size frames.
#[derive(Debug)]
pub struct FrameBuffer {
    frame_len: usize,
    pending: Vec<f32>,
}

impl FrameBuffer {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len: frame_len.max(1),
            pending: Vec::with_capacity(frame_len),
        }
    }

    /// Buffers `samples` and returns every frame that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_len;
        if complete == 0 {
            return Vec::new();
        }
        let rest = self.pending.split_off(complete * self.frame_len);
        let full = std::mem::replace(&mut self.pending, rest);
        full.chunks(self.frame_len).map(<[f32]>::to_vec).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
