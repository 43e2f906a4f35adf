use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::common::Nickname;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::protocol::{ClientFrame, ServerFrame, EXIT_COMMAND, REJECTED};
use crate::server::performance_monitor;
use crate::server::state::{MuteOutcome, ServerState, SharedWriter};
use crate::transport::{FrameReader, Transport};

/// Accepts clients and runs one handler thread per connection.
pub struct ChatServer {
    config: ServerConfig,
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl ChatServer {
    pub fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.address())?;
        let state = Arc::new(ServerState::new(config.framing, config.recv_chunk));
        log::info!(
            "listening on {} ({:?} framing)",
            listener.local_addr()?,
            config.framing
        );
        Ok(Self {
            config,
            listener,
            state,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Serve until the state is shut down.
    pub fn run(self) -> Result<()> {
        if self.config.stats_interval_secs > 0 {
            performance_monitor::spawn(
                Arc::clone(&self.state),
                Duration::from_secs(self.config.stats_interval_secs),
            )?;
        }

        for stream in self.listener.incoming() {
            if !self.state.is_running() {
                break;
            }
            match stream {
                Ok(stream) => {
                    let state = Arc::clone(&self.state);
                    let config = self.config.clone();
                    let spawned = thread::Builder::new()
                        .name("client-handler".to_string())
                        .spawn(move || {
                            if let Err(e) = handle_client(stream, state, config) {
                                log::warn!("client error: {}", e);
                            }
                        });
                    if let Err(e) = spawned {
                        log::error!("could not spawn client handler: {}", e);
                    }
                }
                Err(e) => log::warn!("accept failed: {}", e),
            }
        }
        log::info!("accept loop stopped");
        Ok(())
    }

    /// Run the server on a background thread.
    pub fn spawn(self) -> io::Result<ServerHandle> {
        let addr = self.local_addr()?;
        let state = self.state();
        let thread = thread::Builder::new()
            .name("accept-loop".to_string())
            .spawn(move || {
                if let Err(e) = self.run() {
                    log::error!("server stopped: {}", e);
                }
            })?;
        Ok(ServerHandle {
            addr,
            state,
            thread: Some(thread),
        })
    }
}

/// A server running on its own thread.
pub struct ServerHandle {
    addr: SocketAddr,
    state: Arc<ServerState>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Close every client, wake the accept loop and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.state.shut_down();
        let Some(thread) = self.thread.take() else {
            return;
        };
        let mut wake = self.addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(std::net::Ipv4Addr::LOCALHOST.into());
        }
        // A throwaway connection unblocks `accept`.
        let _ = TcpStream::connect_timeout(&wake, Duration::from_secs(1));
        if thread.join().is_err() {
            log::warn!("accept loop panicked");
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A line of client input, as the server sees it.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Exit,
    Mute(Option<&'a str>),
    Unmute(Option<&'a str>),
    Users,
    Unknown(&'a str),
    Chat,
}

fn parse_command(text: &str) -> Command<'_> {
    if text.starts_with(EXIT_COMMAND) {
        return Command::Exit;
    }
    if !text.starts_with('/') {
        return Command::Chat;
    }
    let mut parts = text.splitn(2, ' ');
    let command = parts.next().unwrap_or_default();
    let argument = parts.next().map(str::trim).filter(|arg| !arg.is_empty());
    match command {
        "/mute" => Command::Mute(argument),
        "/unmute" => Command::Unmute(argument),
        "/users" => Command::Users,
        other => Command::Unknown(other),
    }
}

fn mute_reply(outcome: MuteOutcome, target: &str) -> String {
    match outcome {
        MuteOutcome::Muted => format!("Muted {}", target),
        MuteOutcome::Unmuted => format!("Unmuted {}", target),
        MuteOutcome::NotFound => format!("User {} not found", target),
        MuteOutcome::NotMuted => format!("User {} was not muted", target),
        MuteOutcome::SelfTarget => format!("User {} cannot mute themselves", target),
    }
}

fn handle_client(stream: TcpStream, state: Arc<ServerState>, config: ServerConfig) -> Result<()> {
    let transport = Transport::from_stream(stream);
    let peer = transport.peer().to_string();
    let mut frames =
        FrameReader::<ClientFrame>::new(transport.try_clone()?, config.framing, config.recv_chunk);
    let writer: SharedWriter = Arc::new(Mutex::new(transport));
    log::info!("{} connected", peer);

    state.send(&writer, &ServerFrame::Nick)?;
    let Some(reply) = frames.next_frame()? else {
        log::info!("{} left during the handshake", peer);
        return Ok(());
    };
    let candidate = reply.into_text();
    let candidate = candidate.trim_end_matches(['\r', '\n']);

    let accepted =
        Nickname::new(candidate).is_ok() && state.register(candidate, Arc::clone(&writer))?;
    if !accepted {
        log::info!("{} rejected nickname '{}'", peer, candidate);
        state.send(&writer, &ServerFrame::Rejected(REJECTED.to_string()))?;
        frames.close();
        return Ok(());
    }
    let nickname = candidate.to_string();
    state.announce(&format!("{} joined the chat", nickname), Some(&nickname));

    let result = serve(&nickname, &mut frames, &writer, &state);

    state.unregister(&nickname);
    state.announce(&format!("{} left the chat", nickname), None);
    frames.close();
    log::info!("{} ({}) disconnected", nickname, peer);
    result
}

fn serve(
    nickname: &str,
    frames: &mut FrameReader<ClientFrame>,
    writer: &SharedWriter,
    state: &ServerState,
) -> Result<()> {
    loop {
        let Some(frame) = frames.next_frame()? else {
            return Ok(());
        };
        let text = frame.into_text();
        let reply = match parse_command(&text) {
            Command::Exit => {
                state.send(writer, &ServerFrame::Exit)?;
                return Ok(());
            }
            Command::Chat => {
                state.relay_chat(nickname, &text);
                continue;
            }
            Command::Mute(Some(target)) => mute_reply(state.mute(nickname, target), target),
            Command::Unmute(Some(target)) => mute_reply(state.unmute(nickname, target), target),
            Command::Mute(None) => "Unknown usage: /mute <nickname>".to_string(),
            Command::Unmute(None) => "Unknown usage: /unmute <nickname>".to_string(),
            Command::Users => format!("Users online: {}", state.nicknames().join(", ")),
            Command::Unknown(command) => format!("Unknown command: {}", command),
        };
        state.send(writer, &ServerFrame::Notice(reply))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Category;
    use crate::protocol::classify;

    #[test]
    fn parse_commands() {
        assert_eq!(parse_command("/exit"), Command::Exit);
        assert_eq!(parse_command("/mute bob"), Command::Mute(Some("bob")));
        assert_eq!(parse_command("/mute"), Command::Mute(None));
        assert_eq!(parse_command("/mute   "), Command::Mute(None));
        assert_eq!(parse_command("/unmute bob"), Command::Unmute(Some("bob")));
        assert_eq!(parse_command("/users"), Command::Users);
        assert_eq!(parse_command("/dance"), Command::Unknown("/dance"));
        assert_eq!(parse_command("hello /mute"), Command::Chat);
    }

    #[test]
    fn every_reply_reads_as_a_notice() {
        let replies = [
            mute_reply(MuteOutcome::Muted, "bob"),
            mute_reply(MuteOutcome::Unmuted, "bob"),
            mute_reply(MuteOutcome::NotFound, "bob"),
            mute_reply(MuteOutcome::NotMuted, "bob"),
            mute_reply(MuteOutcome::SelfTarget, "bob"),
            "Unknown usage: /mute <nickname>".to_string(),
            "Users online: alice, bob".to_string(),
            "Unknown command: /dance".to_string(),
        ];
        for reply in replies {
            assert_eq!(classify(&reply), Category::SystemNotice, "{}", reply);
        }
    }
}
