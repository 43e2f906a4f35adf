//! Wire protocol shared by client and server.
//!
//! Two framings are supported:
//!
//! * `Raw`: plain UTF-8 with no delimiter. One receive chunk is one message,
//!   and server frames are recognised by their text (`NICK`, `ACCEPTED`,
//!   `EXIT`, notice prefixes). Chat text that happens to collide with a
//!   control token is misread; that ambiguity is part of the format.
//! * `Envelope`: one JSON object per line, `{"type": ..., "payload": ...}`.
//!   Both ends must opt in.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::Category;

pub const NICK: &str = "NICK";
pub const ACCEPTED: &str = "ACCEPTED";
pub const EXIT: &str = "EXIT";
/// Sent by the server when it refuses a nickname.
pub const REJECTED: &str = "REJECTED";
/// Local command announcing a graceful disconnect.
pub const EXIT_COMMAND: &str = "/exit";

/// Prefixes of server notices about command outcomes.
pub const NOTICE_PREFIXES: [&str; 4] = ["Muted", "Unmuted", "User", "Unknown"];

/// Default upper bound of one receive chunk.
pub const DEFAULT_CHUNK: usize = 1024;

/// Longest envelope line accepted before the peer is considered broken.
pub const MAX_ENVELOPE_FRAME: usize = 64 * 1024;

pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("malformed envelope: {0}")]
    Envelope(#[from] serde_json::Error),
}

/// Classify inbound text by token and prefix.
pub fn classify(text: &str) -> Category {
    if text == EXIT {
        Category::SessionTerminate
    } else if NOTICE_PREFIXES.iter().any(|prefix| text.starts_with(prefix)) {
        Category::SystemNotice
    } else {
        Category::PlainChat
    }
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    Nick,
    Accepted,
    Rejected(String),
    Exit,
    Notice(String),
    Chat(String),
}

/// Client → server frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    Nickname(String),
    Message(String),
}

impl ClientFrame {
    pub fn into_text(self) -> String {
        match self {
            ClientFrame::Nickname(text) | ClientFrame::Message(text) => text,
        }
    }
}

/// A frame that can travel in either framing.
pub trait WireFrame: Serialize + DeserializeOwned + Sized {
    /// Recover a frame from raw text.
    fn from_raw(text: String) -> Self;

    /// Raw text of the frame.
    fn raw_text(&self) -> &str;
}

impl WireFrame for ServerFrame {
    fn from_raw(text: String) -> Self {
        match text.as_str() {
            NICK => ServerFrame::Nick,
            ACCEPTED => ServerFrame::Accepted,
            _ => match classify(&text) {
                Category::SessionTerminate => ServerFrame::Exit,
                Category::SystemNotice => ServerFrame::Notice(text),
                Category::PlainChat => ServerFrame::Chat(text),
            },
        }
    }

    fn raw_text(&self) -> &str {
        match self {
            ServerFrame::Nick => NICK,
            ServerFrame::Accepted => ACCEPTED,
            ServerFrame::Exit => EXIT,
            ServerFrame::Rejected(text) | ServerFrame::Notice(text) | ServerFrame::Chat(text) => {
                text
            }
        }
    }
}

impl WireFrame for ClientFrame {
    /// Raw text carries no role; the server reinterprets it during the handshake.
    fn from_raw(text: String) -> Self {
        ClientFrame::Message(text)
    }

    fn raw_text(&self) -> &str {
        match self {
            ClientFrame::Nickname(text) | ClientFrame::Message(text) => text,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    #[default]
    Raw,
    Envelope,
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Framing::Raw),
            "envelope" | "json" => Ok(Framing::Envelope),
            other => Err(format!("unknown framing '{}'", other)),
        }
    }
}

impl Framing {
    /// Largest encoded frame the peer can take in, given its receive chunk.
    pub fn frame_limit(self, chunk: usize) -> usize {
        match self {
            Framing::Raw => chunk,
            Framing::Envelope => MAX_ENVELOPE_FRAME,
        }
    }

    /// Encode one frame. Frames longer than `max` are refused rather than
    /// split across receive chunks.
    pub fn encode<F: WireFrame>(self, frame: &F, max: usize) -> ProtocolResult<Vec<u8>> {
        let bytes = match self {
            Framing::Raw => frame.raw_text().as_bytes().to_vec(),
            Framing::Envelope => {
                let mut bytes = serde_json::to_vec(frame)?;
                bytes.push(b'\n');
                bytes
            }
        };
        if bytes.len() > max {
            return Err(ProtocolError::FrameTooLarge {
                len: bytes.len(),
                max,
            });
        }
        Ok(bytes)
    }
}

/// Turns received byte chunks into frames.
#[derive(Debug)]
pub struct Decoder {
    framing: Framing,
    max_frame: usize,
    pending: Vec<u8>,
}

impl Decoder {
    pub fn new(framing: Framing, max_frame: usize) -> Self {
        Self {
            framing,
            max_frame,
            pending: Vec::new(),
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Feed one received chunk, returning every frame it completes.
    pub fn decode<F: WireFrame>(&mut self, chunk: &[u8]) -> ProtocolResult<Vec<F>> {
        match self.framing {
            Framing::Raw => {
                if chunk.is_empty() {
                    return Ok(Vec::new());
                }
                let text = match std::str::from_utf8(chunk) {
                    Ok(text) => text.to_string(),
                    Err(e) => {
                        log::warn!("invalid UTF-8 in received chunk ({}), replacing", e);
                        String::from_utf8_lossy(chunk).into_owned()
                    }
                };
                Ok(vec![F::from_raw(text)])
            }
            Framing::Envelope => {
                self.pending.extend_from_slice(chunk);
                let mut frames = Vec::new();
                while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = self.pending.drain(..=pos).collect();
                    let line = line.trim_ascii();
                    if line.is_empty() {
                        continue;
                    }
                    frames.push(serde_json::from_slice(line)?);
                }
                if self.pending.len() > self.max_frame {
                    let len = self.pending.len();
                    self.pending.clear();
                    return Err(ProtocolError::FrameTooLarge {
                        len,
                        max: self.max_frame,
                    });
                }
                Ok(frames)
            }
        }
    }
}
