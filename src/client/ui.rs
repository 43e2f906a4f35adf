//! Presentation seams: where rendered lines go, where the status is shown
//! and where user input comes from. The terminal versions back the
//! `client` binary.

use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::common::ChatLine;

/// Consumes rendered lines. Called from the reader thread as well as the
/// foreground, so implementations must be thread-safe.
pub trait DisplaySink: Send + Sync {
    fn display(&self, line: &ChatLine);
}

/// Shows "Disconnected" or "Connected as <nickname>".
pub trait StatusIndicator: Send + Sync {
    fn set_status(&self, status: &str);
}

/// Produces the text the user submits.
pub trait InputSource {
    /// Ask one question up front (server address, nickname). `None` means
    /// the user dismissed the prompt.
    fn prompt(&mut self, title: &str, question: &str) -> Option<String>;

    /// Next submitted text; `None` once input is exhausted.
    fn take_input(&mut self) -> Option<String>;

    /// Clear the input field after a dispatch attempt.
    fn clear(&mut self);
}

/// Writes lines to stdout with a `[HH:MM:SS]` stamp; notices are starred.
#[derive(Debug, Default)]
pub struct TerminalSink;

impl DisplaySink for TerminalSink {
    fn display(&self, line: &ChatLine) {
        let stamp = line.at.format("%H:%M:%S");
        let marker = if line.is_notice() { "* " } else { "" };
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "[{}] {}{}", stamp, marker, line.render());
        let _ = out.flush();
    }
}

/// Prints status changes to stderr so they stay out of the chat stream.
#[derive(Default)]
pub struct TerminalStatus {
    current: Mutex<String>,
}

impl TerminalStatus {
    pub fn current(&self) -> String {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl StatusIndicator for TerminalStatus {
    fn set_status(&self, status: &str) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if *current != status {
            *current = status.to_string();
            eprintln!("-- {} --", status);
        }
    }
}

/// Reads stdin lines on a helper thread so the caller can wait with a
/// timeout and notice a session closing while the user is idle.
pub struct StdinInput {
    lines: Receiver<String>,
}

/// Result of waiting for the next line.
#[derive(Debug, PartialEq, Eq)]
pub enum Polled {
    Line(String),
    Idle,
    Closed,
}

impl StdinInput {
    pub fn spawn() -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        // Blocked in read_line until the process exits, so it is never joined.
        thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                let stdin = io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self { lines: rx })
    }

    pub fn poll(&self, timeout: Duration) -> Polled {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => Polled::Line(line.trim_end_matches(['\r', '\n']).to_string()),
            Err(RecvTimeoutError::Timeout) => Polled::Idle,
            Err(RecvTimeoutError::Disconnected) => Polled::Closed,
        }
    }
}

impl InputSource for StdinInput {
    fn prompt(&mut self, title: &str, question: &str) -> Option<String> {
        print!("[{}] {} ", title, question);
        let _ = io::stdout().flush();
        let answer = self.lines.recv().ok()?;
        let answer = answer.trim().to_string();
        if answer.is_empty() {
            None
        } else {
            Some(answer)
        }
    }

    fn take_input(&mut self) -> Option<String> {
        self.lines
            .recv()
            .ok()
            .map(|line| line.trim_end_matches(['\r', '\n']).to_string())
    }

    // Lines are consumed as they are read; nothing to clear.
    fn clear(&mut self) {}
}
