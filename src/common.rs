use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Nickname chosen once per session. Uniqueness is the server's business.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nickname(String);

impl Nickname {
    pub fn new(name: impl Into<String>) -> Result<Self, ChatError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ChatError::InvalidNickname("nickname must not be empty".to_string()));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nickname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of one client connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Connected,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How an inbound message is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    SystemNotice,
    PlainChat,
    SessionTerminate,
}

/// One rendered line handed to the display sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLine {
    pub sender: Option<String>,
    pub text: String,
    pub category: Category,
    pub at: DateTime<Local>,
}

impl ChatLine {
    /// Server notice about a command outcome; never labelled.
    pub fn notice(text: impl Into<String>) -> Self {
        Self::build(None, text, Category::SystemNotice)
    }

    /// Locally generated notice, labelled "System".
    pub fn system(text: impl Into<String>) -> Self {
        Self::build(Some("System".to_string()), text, Category::SystemNotice)
    }

    pub fn chat(text: impl Into<String>) -> Self {
        Self::build(None, text, Category::PlainChat)
    }

    fn build(sender: Option<String>, text: impl Into<String>, category: Category) -> Self {
        Self {
            sender,
            text: text.into(),
            category,
            at: Local::now(),
        }
    }

    pub fn is_notice(&self) -> bool {
        self.category == Category::SystemNotice
    }

    /// "sender: text" when labelled, the bare text otherwise.
    pub fn render(&self) -> String {
        match &self.sender {
            Some(sender) => format!("{}: {}", sender, self.text),
            None => self.text.clone(),
        }
    }
}

/// Snapshot of the server's activity, logged periodically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStats {
    pub timestamp: DateTime<Utc>,
    pub connected_clients: usize,
    pub total_messages: usize,
    pub uptime_secs: i64,
}

impl ServerStats {
    pub fn new(connected_clients: usize, total_messages: usize, started_at: DateTime<Utc>) -> Self {
        let timestamp = Utc::now();
        Self {
            timestamp,
            connected_clients,
            total_messages,
            uptime_secs: (timestamp - started_at).num_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nickname_must_not_be_blank() {
        assert!(Nickname::new("").is_err());
        assert!(Nickname::new("   ").is_err());
        assert_eq!(Nickname::new("bob").unwrap().as_str(), "bob");
    }

    #[test]
    fn render_labels_only_when_sender_present() {
        assert_eq!(ChatLine::chat("hello everyone").render(), "hello everyone");
        assert_eq!(ChatLine::notice("Muted alice").render(), "Muted alice");
        assert_eq!(
            ChatLine::system("Disconnected from server").render(),
            "System: Disconnected from server"
        );
    }
}
