//! One client's lifecycle: handshake, then a reader thread for inbound
//! traffic while the foreground sends.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::client::dispatcher::{self, Inbound};
use crate::client::ui::{DisplaySink, StatusIndicator};
use crate::common::{ChatLine, ConnectionState, Nickname};
use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::protocol::{ClientFrame, ServerFrame, WireFrame, EXIT_COMMAND, NICK};
use crate::transport::{FrameReader, Transport};

pub const STATUS_DISCONNECTED: &str = "Disconnected";
pub const DISCONNECTED_NOTICE: &str = "Disconnected from server";

/// Why a connected session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The user typed `/exit`.
    LocalExit,
    /// `close()` was called, e.g. on window or app teardown.
    LocalClose,
    /// The server sent `EXIT`.
    ServerExit,
    PeerClosed,
    ReadFailed(String),
    SendFailed(String),
}

/// Lifecycle events published to whoever owns the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected(Nickname),
    Closed(CloseReason),
}

/// State shared with the reader thread. Only transition methods touch it.
struct Shared {
    id: Uuid,
    state: Mutex<ConnectionState>,
    sink: Arc<dyn DisplaySink>,
    status: Arc<dyn StatusIndicator>,
    events: Mutex<Sender<SessionEvent>>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.lock_state();
        log::debug!("session {}: {} -> {}", self.id, *state, next);
        *state = next;
    }

    fn publish(&self, event: SessionEvent) {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        // The owner may have dropped the receiver already.
        let _ = events.send(event);
    }

    /// Move to `Closed`. Only the call that leaves `Connected` reports the
    /// disconnect; returns whether this call was that one.
    fn finish(&self, reason: CloseReason) -> bool {
        {
            let mut state = self.lock_state();
            match *state {
                ConnectionState::Closed => return false,
                ConnectionState::Connected => *state = ConnectionState::Closed,
                _ => {
                    *state = ConnectionState::Closed;
                    return false;
                }
            }
        }

        log::info!("session {} closed: {:?}", self.id, reason);
        self.status.set_status(STATUS_DISCONNECTED);
        if matches!(reason, CloseReason::SendFailed(_)) {
            self.sink.display(&ChatLine::system("Failed to send message"));
        }
        self.sink.display(&ChatLine::system(DISCONNECTED_NOTICE));
        self.publish(SessionEvent::Closed(reason));
        true
    }
}

/// A chat session with one server.
///
/// States run `Disconnected -> Handshaking -> Connected -> Closed`. A failed
/// connect leaves the session `Disconnected` so it can be retried; a failed
/// or rejected handshake closes it for good.
pub struct Session {
    config: ClientConfig,
    shared: Arc<Shared>,
    writer: Option<Transport>,
    reader: Option<JoinHandle<()>>,
    events: Receiver<SessionEvent>,
    nickname: Option<Nickname>,
}

impl Session {
    pub fn new(
        config: ClientConfig,
        sink: Arc<dyn DisplaySink>,
        status: Arc<dyn StatusIndicator>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        status.set_status(STATUS_DISCONNECTED);
        Self {
            config,
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                state: Mutex::new(ConnectionState::Disconnected),
                sink,
                status,
                events: Mutex::new(tx),
            }),
            writer: None,
            reader: None,
            events: rx,
            nickname: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn nickname(&self) -> Option<&Nickname> {
        self.nickname.as_ref()
    }

    /// Whether a reader thread is attached (running or not yet joined).
    pub fn has_reader(&self) -> bool {
        self.reader.is_some()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open the connection and run the nickname handshake.
    pub fn connect(&mut self, host: &str, port: u16, nickname: Nickname) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Disconnected {
            return Err(ChatError::InvalidState(state));
        }

        let mut transport = Transport::connect(host, port, self.config.connect_timeout())?;
        self.shared.set_state(ConnectionState::Handshaking);

        let addr = format!("{}:{}", host, port);
        let frames = match self.handshake(&mut transport, &nickname, &addr) {
            Ok(frames) => frames,
            Err(e) => {
                log::info!("session {}: handshake with {} failed: {}", self.id(), addr, e);
                transport.close();
                self.shared.set_state(ConnectionState::Closed);
                return Err(e);
            }
        };

        self.writer = Some(transport);
        self.nickname = Some(nickname.clone());
        self.shared.set_state(ConnectionState::Connected);
        self.shared.status.set_status(&format!("Connected as {}", nickname));
        self.shared.sink.display(&ChatLine::system(format!(
            "Connected as {}. Type {} to leave.",
            nickname, EXIT_COMMAND
        )));
        self.shared.publish(SessionEvent::Connected(nickname));

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("reader-{}", self.id().simple()))
            .spawn(move || read_loop(frames, shared));
        match spawned {
            Ok(handle) => {
                self.reader = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.teardown(CloseReason::ReadFailed(e.to_string()));
                Err(ChatError::Io(e))
            }
        }
    }

    fn handshake(
        &self,
        transport: &mut Transport,
        nickname: &Nickname,
        addr: &str,
    ) -> Result<FrameReader<ServerFrame>> {
        let link_error = |e: io::Error| ChatError::connection(addr, e);
        let framing = self.config.framing;

        transport
            .set_read_timeout(self.config.handshake_timeout())
            .map_err(link_error)?;
        let mut frames = FrameReader::new(
            transport.try_clone().map_err(link_error)?,
            framing,
            self.config.recv_chunk,
        );

        match next_handshake_frame(&mut frames, addr)? {
            ServerFrame::Nick => {}
            other => {
                return Err(ChatError::HandshakeRejected(format!(
                    "expected {}, got '{}'",
                    NICK,
                    other.raw_text()
                )))
            }
        }

        let reply = ClientFrame::Nickname(nickname.as_str().to_string());
        let bytes = framing.encode(&reply, framing.frame_limit(self.config.recv_chunk))?;
        transport.send(&bytes).map_err(link_error)?;

        match next_handshake_frame(&mut frames, addr)? {
            ServerFrame::Accepted => {}
            other => return Err(ChatError::HandshakeRejected(other.raw_text().to_string())),
        }

        transport.set_read_timeout(None).map_err(link_error)?;
        log::info!("session {}: joined {} as {}", self.id(), addr, nickname);
        Ok(frames)
    }

    /// Dispatch one line of user input; see [`dispatcher::dispatch`].
    pub fn dispatch(&mut self, text: &str) -> dispatcher::DispatchOutcome {
        dispatcher::dispatch(self, text)
    }

    pub(crate) fn send_message(&mut self, text: &str) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(ChatError::InvalidState(state));
        }
        let framing = self.config.framing;
        let limit = framing.frame_limit(self.config.recv_chunk);
        let writer = self.writer.as_mut().ok_or(ChatError::InvalidState(state))?;

        let bytes = framing.encode(&ClientFrame::Message(text.to_string()), limit)?;
        writer.send(&bytes)?;
        log::debug!("session {}: sent {} bytes", self.shared.id, bytes.len());
        Ok(())
    }

    /// Show a locally generated notice.
    pub(crate) fn notify(&self, text: &str) {
        self.shared.sink.display(&ChatLine::system(text));
    }

    /// Close the session: move to `Closed`, shut the socket and join the
    /// reader. Safe to repeat.
    pub(crate) fn teardown(&mut self, reason: CloseReason) {
        self.shared.finish(reason);
        if let Some(writer) = &self.writer {
            writer.close();
        }
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                log::warn!("session {}: reader thread panicked", self.shared.id);
            }
        }
    }

    /// Send a best-effort exit notice if still connected, then tear down.
    /// A second call does nothing visible.
    pub fn close(&mut self) {
        if self.is_connected() {
            if let Err(e) = self.send_message(EXIT_COMMAND) {
                log::debug!("session {}: exit notice not delivered: {}", self.shared.id, e);
            }
        }
        self.teardown(CloseReason::LocalClose);
    }

    pub fn try_event(&self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Wait up to `timeout` for the session to close, returning why.
    pub fn wait_closed(&self, timeout: Duration) -> Option<CloseReason> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(SessionEvent::Closed(reason)) => return Some(reason),
                Ok(SessionEvent::Connected(_)) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.is_connected() || self.reader.is_some() {
            self.close();
        }
    }
}

fn next_handshake_frame(frames: &mut FrameReader<ServerFrame>, addr: &str) -> Result<ServerFrame> {
    match frames.next_frame() {
        Ok(Some(frame)) => Ok(frame),
        Ok(None) => Err(ChatError::connection(
            addr,
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection during the handshake",
            ),
        )),
        Err(ChatError::Io(e)) => Err(ChatError::connection(addr, e)),
        Err(e) => Err(e),
    }
}

/// Receive loop run on the reader thread for as long as the session is
/// connected.
fn read_loop(mut frames: FrameReader<ServerFrame>, shared: Arc<Shared>) {
    let reason = loop {
        if shared.state() != ConnectionState::Connected {
            break None;
        }
        match frames.next_frame() {
            Ok(Some(frame)) => match dispatcher::render(frame) {
                Inbound::Line(line) => shared.sink.display(&line),
                Inbound::Terminate => break Some(CloseReason::ServerExit),
            },
            Ok(None) => break Some(CloseReason::PeerClosed),
            Err(e) => break Some(CloseReason::ReadFailed(e.to_string())),
        }
    };
    if let Some(reason) = reason {
        shared.finish(reason);
    }
    frames.close();
    log::debug!("session {}: reader finished", shared.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Shutdown, TcpListener, TcpStream};

    use crate::client::dispatcher::DispatchOutcome;
    use crate::protocol::Framing;

    #[derive(Default)]
    struct Lines(Mutex<Vec<String>>);

    impl DisplaySink for Lines {
        fn display(&self, line: &ChatLine) {
            self.0.lock().unwrap().push(line.text.clone());
        }
    }

    #[derive(Default)]
    struct Status(Mutex<String>);

    impl StatusIndicator for Status {
        fn set_status(&self, status: &str) {
            *self.0.lock().unwrap() = status.to_string();
        }
    }

    #[test]
    fn failed_send_reports_once_and_joins_the_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_peer, _) = listener.accept().unwrap();
        let raw = stream.try_clone().unwrap();

        let sink = Arc::new(Lines::default());
        let status = Arc::new(Status::default());
        let mut session = Session::new(ClientConfig::default(), sink.clone(), status.clone());

        let writer = Transport::from_stream(stream);
        let frames = FrameReader::new(writer.try_clone().unwrap(), Framing::Raw, 1024);
        session.writer = Some(writer);
        session.shared.set_state(ConnectionState::Connected);
        let shared = Arc::clone(&session.shared);
        session.reader = Some(thread::spawn(move || read_loop(frames, shared)));

        // Writes now fail while the reader stays parked in receive.
        raw.shutdown(Shutdown::Write).unwrap();

        assert_eq!(session.dispatch("hello"), DispatchOutcome::SendFailed);
        assert_eq!(session.state(), ConnectionState::Closed);
        assert!(!session.has_reader());
        assert_eq!(*status.0.lock().unwrap(), STATUS_DISCONNECTED);

        let lines = sink.0.lock().unwrap().clone();
        assert_eq!(lines, vec!["Failed to send message", DISCONNECTED_NOTICE]);
        assert!(matches!(
            session.try_event(),
            Some(SessionEvent::Closed(CloseReason::SendFailed(_)))
        ));
    }
}
