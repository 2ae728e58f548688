//! Textual notification channel.
//!
//! This is the channel that always runs. It writes a fixed block of text to
//! stdout (or any writer the host supplies), so a due task is recorded even
//! when every richer channel failed.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use colored::Colorize;

use crate::domain::Task;

const RULE_WIDTH: usize = 60;

/// Writes structured due-task notices.
pub struct ConsoleNotifier {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::stdout()
    }
}

impl ConsoleNotifier {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }

    /// Print the due-task block: title, optional description, due time.
    pub fn notify(&self, task: &Task) -> io::Result<()> {
        let rule = "=".repeat(RULE_WIDTH);
        let mut out = self.writer();

        writeln!(out)?;
        writeln!(out, "{}", rule)?;
        writeln!(out, "{}", "🔔 TASK DUE NOTIFICATION".yellow().bold())?;
        writeln!(out, "{}", rule)?;
        writeln!(out, "Title: {}", task.title)?;
        if let Some(desc) = task.description() {
            writeln!(out, "Description: {}", desc)?;
        }
        writeln!(out, "Due: {}", task.formatted_due())?;
        writeln!(out, "{}", rule)?;
        writeln!(out)?;
        out.flush()
    }

    /// Stand-in for a sound when no audio mechanism worked.
    pub fn sound_indicator(&self) -> io::Result<()> {
        let mut out = self.writer();
        for _ in 0..3 {
            writeln!(out, "{}", "🔔 *NOTIFICATION SOUND* 🔔".bold())?;
        }
        out.flush()
    }

    /// One-line pulse printed by the ring effect when it cannot make noise.
    pub fn ring_indicator(&self, task: &Task, cycle: u32) -> io::Result<()> {
        let mut out = self.writer();
        writeln!(out, "🔔 RING {}: {}", cycle + 1, task.title)?;
        out.flush()
    }

    fn writer(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable in-memory writer; lets a host (or a test) read back what the
/// console channel printed.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        let bytes = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
