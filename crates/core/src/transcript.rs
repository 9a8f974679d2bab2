pub const DEFAULT_TRANSCRIPT_LIMIT: usize = 500;

/// Rolling window over the model's output transcription.
///
/// Holds at most `limit` characters; overflow is cut from the front so the
/// most recent text always survives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptBuffer {
    text: String,
    limit: usize,
}

impl Default for TranscriptBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSCRIPT_LIMIT)
    }
}

impl TranscriptBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
        }
    }

    /// Appends `fragment`, space-separated from what is already there.
    pub fn push(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(fragment);
        self.truncate_front();
    }

    fn truncate_front(&mut self) {
        let len = self.text.chars().count();
        if len <= self.limit {
            return;
        }
        let excess = len - self.limit;
        let cut = self
            .text
            .char_indices()
            .nth(excess)
            .map(|(idx, _)| idx)
            .unwrap_or(self.text.len());
        self.text.drain(..cut);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}
