#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    Connected,
    Closed,
}

/// Connection slot guarded by a generation counter.
///
/// Every `begin_connect` and `close` bumps the generation, so an attempt that
/// finishes after being replaced or cancelled can tell it lost the race and
/// must release what it built.
pub(crate) struct Lifecycle<C> {
    state: TransportState,
    generation: u64,
    active: Option<C>,
}

impl<C> Lifecycle<C> {
    pub(crate) fn new() -> Self {
        Self {
            state: TransportState::Idle,
            generation: 0,
            active: None,
        }
    }

    pub(crate) fn state(&self) -> TransportState {
        self.state
    }

    pub(crate) fn active(&self) -> Option<&C> {
        match self.state {
            TransportState::Connected => self.active.as_ref(),
            _ => None,
        }
    }

    /// Returns the new attempt's generation and the connection it replaces.
    pub(crate) fn begin_connect(&mut self) -> (u64, Option<C>) {
        self.generation += 1;
        self.state = TransportState::Connecting;
        (self.generation, self.active.take())
    }

    /// Installs `connection` if `generation` is still current; otherwise hands it back.
    pub(crate) fn complete(&mut self, generation: u64, connection: C) -> Result<(), C> {
        if generation != self.generation {
            return Err(connection);
        }
        self.state = TransportState::Connected;
        self.active = Some(connection);
        Ok(())
    }

    pub(crate) fn fail(&mut self, generation: u64) {
        if generation == self.generation {
            self.state = TransportState::Closed;
        }
    }

    pub(crate) fn close(&mut self) -> Option<C> {
        self.generation += 1;
        self.state = TransportState::Closed;
        self.active.take()
    }
}
