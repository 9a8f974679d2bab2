#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    total_tokens: i64,
    input_tokens: i64,
    output_tokens: i64,
    messages_received: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_message(&mut self) {
        self.messages_received += 1;
    }

    pub(crate) fn update_usage(&mut self, total: i64, input: i64, output: i64) {
        self.total_tokens += total;
        self.input_tokens += input;
        self.output_tokens += output;
    }

    pub fn total_tokens(&self) -> i64 {
        self.total_tokens
    }

    pub fn input_tokens(&self) -> i64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> i64 {
        self.output_tokens
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }
}
