//! Terminal log output that steps around the console prompt.

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use rustyline_async::SharedWriter;
use tracing_subscriber::fmt::MakeWriter;

/// Terminal sink for the fmt layer.
///
/// Lines go to stderr until the console attaches its prompt writer. From then
/// on they are printed above the prompt instead of splitting the input line.
#[derive(Clone, Default)]
pub struct PromptWriter {
    prompt: Arc<Mutex<Option<SharedWriter>>>,
}

impl PromptWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, prompt: SharedWriter) {
        *self.prompt.lock() = Some(prompt);
    }

    /// Back to stderr; the prompt is about to go away
    pub fn detach(&self) {
        self.prompt.lock().take();
    }

    pub fn is_attached(&self) -> bool {
        self.prompt.lock().is_some()
    }
}

/// Writer for a single event, bound to whatever was attached when it started
pub struct LogLine {
    prompt: Option<SharedWriter>,
}

impl Write for LogLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.prompt {
            Some(prompt) => prompt.write(buf),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.prompt {
            Some(prompt) => prompt.flush(),
            None => io::stderr().flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for PromptWriter {
    type Writer = LogLine;

    fn make_writer(&'a self) -> Self::Writer {
        LogLine {
            prompt: self.prompt.lock().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_lines_go_to_stderr() {
        let writer = PromptWriter::new();
        assert!(!writer.is_attached());

        let mut line = writer.make_writer();
        assert!(line.prompt.is_none());
        assert_eq!(line.write(b"starting\n").unwrap(), 9);
        line.flush().unwrap();

        // Clones share the attachment state
        let clone = writer.clone();
        clone.detach();
        assert!(!writer.is_attached());
    }
}
