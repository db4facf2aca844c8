//! Purpose: Capture everything the provisioning engine would print or ask.
//! Exports: `Ui`, `BufferUi`.
//! Role: Stand-in for an interactive console during request/response runs.
//! Invariants: Each engine run gets its own sink; sinks are never shared.
//! Invariants: Prompts are recorded and answered with the empty string.

/// Output channels an engine run may write to.
pub trait Ui {
    /// Records `query` and returns the operator's answer.
    fn ask(&mut self, query: &str) -> String;
    fn info(&mut self, message: &str);
    fn output(&mut self, message: &str);
    fn error(&mut self, message: &str);
}

/// Append-only buffers for the four channels; nothing reaches the terminal.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BufferUi {
    pub ask: String,
    pub info: String,
    pub output: String,
    pub error: String,
}

impl BufferUi {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ui for BufferUi {
    fn ask(&mut self, query: &str) -> String {
        self.ask.push_str(query);
        String::new()
    }

    fn info(&mut self, message: &str) {
        self.info.push_str(message);
    }

    fn output(&mut self, message: &str) {
        self.output.push_str(message);
    }

    fn error(&mut self, message: &str) {
        self.error.push_str(message);
    }
}
