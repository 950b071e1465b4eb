//! Line-oriented console for trial diagnostics.
//!
//! Trials on different pool threads share one console. Each call writes its
//! whole text under the lock, so lines (and multi-line dumps) never interleave.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing::warn;

pub struct Console {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Console {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(writer),
        }
    }

    /// Console on process stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Console that discards everything.
    pub fn sink() -> Self {
        Self::new(Box::new(io::sink()))
    }

    /// Console writing into memory, plus a handle to read what was written.
    pub fn capture() -> (Self, CapturedOutput) {
        let buf = CapturedOutput::default();
        (Self::new(Box::new(buf.clone())), buf)
    }

    /// Write `text` followed by a newline.
    pub fn line(&self, text: impl AsRef<str>) {
        self.write_raw(text.as_ref(), true);
    }

    /// Write `text` verbatim, without a trailing newline.
    pub fn text(&self, text: impl AsRef<str>) {
        self.write_raw(text.as_ref(), false);
    }

    fn write_raw(&self, text: &str, newline: bool) {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = write_text(&mut **out, text, newline) {
            warn!(error = %e, "Console write failed");
        }
    }
}

fn write_text(out: &mut dyn Write, text: &str, newline: bool) -> io::Result<()> {
    out.write_all(text.as_bytes())?;
    if newline {
        out.write_all(b"\n")?;
    }
    out.flush()
}

/// Shared in-memory buffer behind [`Console::capture`].
#[derive(Clone, Default)]
pub struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_lines() {
        let (console, out) = Console::capture();
        console.line("first");
        console.text("A: ");
        console.line("[1, 2]");
        assert_eq!(out.lines(), vec!["first", "A: [1, 2]"]);
    }

    #[test]
    fn test_concurrent_lines_do_not_interleave() {
        let (console, out) = Console::capture();
        let console = Arc::new(console);
        std::thread::scope(|s| {
            for t in 0..4 {
                let console = Arc::clone(&console);
                s.spawn(move || {
                    for i in 0..50 {
                        console.line(format!("thread {} line {}", t, i));
                    }
                });
            }
        });
        let lines = out.lines();
        assert_eq!(lines.len(), 200);
        assert!(lines.iter().all(|l| l.starts_with("thread ") && l.contains(" line ")));
    }

    #[test]
    fn test_sink_does_not_panic() {
        Console::sink().line("discarded");
    }
}
