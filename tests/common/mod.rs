#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lanchat::client::ui::{DisplaySink, InputSource, StatusIndicator};
use lanchat::client::Session;
use lanchat::common::{Category, ChatLine};
use lanchat::config::ClientConfig;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<ChatLine>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<ChatLine> {
        self.lines.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.lines().into_iter().map(|line| line.text).collect()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.texts().iter().filter(|text| text.contains(needle)).count()
    }

    /// Poll until a line containing `needle` shows up.
    pub fn wait_for(&self, needle: &str, timeout: Duration) -> Option<ChatLine> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(line) = self.lines().into_iter().find(|line| line.text.contains(needle)) {
                return Some(line);
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }

    pub fn of_category(&self, category: Category) -> Vec<ChatLine> {
        self.lines()
            .into_iter()
            .filter(|line| line.category == category)
            .collect()
    }
}

impl DisplaySink for RecordingSink {
    fn display(&self, line: &ChatLine) {
        self.lines.lock().unwrap().push(line.clone());
    }
}

#[derive(Default)]
pub struct RecordingStatus {
    history: Mutex<Vec<String>>,
}

impl RecordingStatus {
    pub fn current(&self) -> Option<String> {
        self.history.lock().unwrap().last().cloned()
    }
}

impl StatusIndicator for RecordingStatus {
    fn set_status(&self, status: &str) {
        self.history.lock().unwrap().push(status.to_string());
    }
}

/// Input field fed from a fixed script.
#[derive(Default)]
pub struct ScriptedInput {
    pub answers: VecDeque<Option<String>>,
    pub submissions: VecDeque<String>,
    pub field: String,
    pub clears: usize,
}

impl ScriptedInput {
    pub fn with_submissions(lines: &[&str]) -> Self {
        Self {
            submissions: lines.iter().map(|line| line.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl InputSource for ScriptedInput {
    fn prompt(&mut self, _title: &str, _question: &str) -> Option<String> {
        self.answers.pop_front().flatten()
    }

    fn take_input(&mut self) -> Option<String> {
        let next = self.submissions.pop_front()?;
        self.field = next.clone();
        Some(next)
    }

    fn clear(&mut self) {
        self.field.clear();
        self.clears += 1;
    }
}

pub struct Harness {
    pub sink: Arc<RecordingSink>,
    pub status: Arc<RecordingStatus>,
    pub session: Session,
}

pub fn harness(config: ClientConfig) -> Harness {
    init_logging();
    let sink = Arc::new(RecordingSink::default());
    let status = Arc::new(RecordingStatus::default());
    let session = Session::new(config, sink.clone(), status.clone());
    Harness {
        sink,
        status,
        session,
    }
}

/// Loopback listener running `script` against the first connection.
pub fn mock_server<F>(script: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        script(stream);
    });
    (port, handle)
}

/// Read one chunk from the client as text.
pub fn read_text(stream: &mut TcpStream) -> String {
    let mut buf = [0u8; 1024];
    let n = stream.read(&mut buf).unwrap();
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

/// Run the raw handshake from the server side, accepting `expected`.
pub fn accept_handshake(stream: &mut TcpStream, expected: &str) {
    stream.write_all(b"NICK").unwrap();
    assert_eq!(read_text(stream), expected);
    stream.write_all(b"ACCEPTED").unwrap();
}
