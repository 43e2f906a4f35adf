use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::common::ServerStats;
use crate::error::Result;
use crate::protocol::{Framing, ServerFrame};
use crate::transport::Transport;

/// Write half of a client connection; the mutex serialises sends from the
/// client's own handler and from broadcasts.
pub type SharedWriter = Arc<Mutex<Transport>>;

struct ClientEntry {
    id: Uuid,
    writer: SharedWriter,
    /// Nicknames this client no longer wants to hear from.
    muted: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteOutcome {
    Muted,
    Unmuted,
    NotFound,
    NotMuted,
    SelfTarget,
}

/// Registry of connected clients, shared by every handler thread.
pub struct ServerState {
    clients: Mutex<HashMap<String, ClientEntry>>,
    framing: Framing,
    frame_limit: usize,
    total_messages: AtomicUsize,
    started_at: DateTime<Utc>,
    running: AtomicBool,
}

impl ServerState {
    pub fn new(framing: Framing, recv_chunk: usize) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            framing,
            frame_limit: framing.frame_limit(recv_chunk),
            total_messages: AtomicUsize::new(0),
            started_at: Utc::now(),
            running: AtomicBool::new(true),
        }
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<String, ClientEntry>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Encode and write one frame to a single client.
    pub fn send(&self, writer: &SharedWriter, frame: &ServerFrame) -> Result<()> {
        let bytes = self.framing.encode(frame, self.frame_limit)?;
        let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.send(&bytes)?;
        Ok(())
    }

    /// Claim `nickname` and send `ACCEPTED`. The acceptance goes out before
    /// the client becomes visible to broadcasts, so it is always the first
    /// frame after the handshake. Returns `Ok(false)` if the name is taken.
    pub fn register(&self, nickname: &str, writer: SharedWriter) -> Result<bool> {
        let mut clients = self.clients();
        if clients.contains_key(nickname) {
            return Ok(false);
        }
        self.send(&writer, &ServerFrame::Accepted)?;
        let id = Uuid::new_v4();
        clients.insert(
            nickname.to_string(),
            ClientEntry {
                id,
                writer,
                muted: HashSet::new(),
            },
        );
        log::info!("registered {} ({}), {} online", nickname, id, clients.len());
        Ok(true)
    }

    pub fn unregister(&self, nickname: &str) -> bool {
        let mut clients = self.clients();
        let Some(entry) = clients.remove(nickname) else {
            return false;
        };
        for other in clients.values_mut() {
            other.muted.remove(nickname);
        }
        log::info!("unregistered {} ({}), {} online", nickname, entry.id, clients.len());
        true
    }

    pub fn is_registered(&self, nickname: &str) -> bool {
        self.clients().contains_key(nickname)
    }

    pub fn connected(&self) -> usize {
        self.clients().len()
    }

    pub fn nicknames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn mute(&self, by: &str, target: &str) -> MuteOutcome {
        if by == target {
            return MuteOutcome::SelfTarget;
        }
        let mut clients = self.clients();
        if !clients.contains_key(target) {
            return MuteOutcome::NotFound;
        }
        match clients.get_mut(by) {
            Some(entry) => {
                entry.muted.insert(target.to_string());
                MuteOutcome::Muted
            }
            None => MuteOutcome::NotFound,
        }
    }

    pub fn unmute(&self, by: &str, target: &str) -> MuteOutcome {
        match self.clients().get_mut(by) {
            Some(entry) => {
                if entry.muted.remove(target) {
                    MuteOutcome::Unmuted
                } else {
                    MuteOutcome::NotMuted
                }
            }
            None => MuteOutcome::NotFound,
        }
    }

    /// Relay chat from `from` to every client that has not muted them,
    /// the sender included.
    pub fn relay_chat(&self, from: &str, text: &str) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        let targets: Vec<SharedWriter> = self
            .clients()
            .values()
            .filter(|entry| !entry.muted.contains(from))
            .map(|entry| Arc::clone(&entry.writer))
            .collect();
        self.deliver(targets, &ServerFrame::Chat(format!("{}: {}", from, text)));
    }

    /// Send an informational line to everyone except `except`.
    pub fn announce(&self, text: &str, except: Option<&str>) {
        let targets: Vec<SharedWriter> = self
            .clients()
            .iter()
            .filter(|(name, _)| Some(name.as_str()) != except)
            .map(|(_, entry)| Arc::clone(&entry.writer))
            .collect();
        self.deliver(targets, &ServerFrame::Chat(text.to_string()));
    }

    // Sends happen after the registry lock is released.
    fn deliver(&self, targets: Vec<SharedWriter>, frame: &ServerFrame) {
        for writer in targets {
            if let Err(e) = self.send(&writer, frame) {
                log::warn!("broadcast delivery failed: {}", e);
            }
        }
    }

    pub fn total_messages(&self) -> usize {
        self.total_messages.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats::new(self.connected(), self.total_messages(), self.started_at)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting work and close every client connection.
    pub fn shut_down(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for entry in self.clients().values() {
            entry
                .writer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .close();
        }
        log::info!("server state shut down");
    }
}
