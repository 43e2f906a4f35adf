//! Routes user input to the server and inbound frames to the display.

use crate::client::session::{CloseReason, Session};
use crate::client::ui::InputSource;
use crate::common::{Category, ChatLine};
use crate::error::ChatError;
use crate::protocol::{self, ProtocolError, ServerFrame, WireFrame, EXIT_COMMAND};

/// What a line of user input means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outgoing {
    Empty,
    /// Sent verbatim, then the session is torn down.
    LocalExit,
    /// Relayed verbatim.
    Relay,
}

pub fn classify_outgoing(text: &str) -> Outgoing {
    if text.is_empty() {
        Outgoing::Empty
    } else if text.starts_with(EXIT_COMMAND) {
        Outgoing::LocalExit
    } else {
        Outgoing::Relay
    }
}

pub fn classify_inbound(text: &str) -> Category {
    protocol::classify(text)
}

pub fn categorize(frame: &ServerFrame) -> Category {
    match frame {
        ServerFrame::Exit => Category::SessionTerminate,
        ServerFrame::Notice(_) | ServerFrame::Rejected(_) => Category::SystemNotice,
        ServerFrame::Nick | ServerFrame::Accepted | ServerFrame::Chat(_) => Category::PlainChat,
    }
}

/// An inbound frame after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Line(ChatLine),
    Terminate,
}

/// Notices and chat are both shown without a sender label; the server
/// writes the sender into chat text itself.
pub fn render(frame: ServerFrame) -> Inbound {
    match categorize(&frame) {
        Category::SessionTerminate => Inbound::Terminate,
        Category::SystemNotice => Inbound::Line(ChatLine::notice(frame.raw_text())),
        Category::PlainChat => Inbound::Line(ChatLine::chat(frame.raw_text())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Empty input, nothing sent.
    Skipped,
    Sent,
    /// `/exit` went out (or was attempted) and the session is closed.
    Exited,
    NotConnected,
    /// Refused locally; the session stays up.
    TooLong,
    /// The write failed and the session is closed.
    SendFailed,
}

/// Dispatch one line of user input on `session`. `/exit` always ends with
/// the session closed, whether or not the notice could be sent.
pub fn dispatch(session: &mut Session, text: &str) -> DispatchOutcome {
    match classify_outgoing(text) {
        Outgoing::Empty => DispatchOutcome::Skipped,
        Outgoing::LocalExit => {
            if let Err(e) = session.send_message(text) {
                log::debug!("exit notice not delivered: {}", e);
            }
            session.teardown(CloseReason::LocalExit);
            DispatchOutcome::Exited
        }
        Outgoing::Relay if !session.is_connected() => {
            session.notify("Not connected");
            DispatchOutcome::NotConnected
        }
        Outgoing::Relay => match session.send_message(text) {
            Ok(()) => DispatchOutcome::Sent,
            Err(e) => {
                let (outcome, notice) = send_failure(&e);
                if let Some(notice) = notice {
                    session.notify(&notice);
                }
                if outcome == DispatchOutcome::SendFailed {
                    log::warn!("send failed: {}", e);
                    session.teardown(CloseReason::SendFailed(e.to_string()));
                }
                outcome
            }
        },
    }
}

/// Outcome and local notice for a relay that could not be sent. Only
/// `SendFailed` tears the session down.
fn send_failure(err: &ChatError) -> (DispatchOutcome, Option<String>) {
    match err {
        ChatError::Protocol(ProtocolError::FrameTooLarge { len, max }) => (
            DispatchOutcome::TooLong,
            Some(format!("Message too long ({} bytes, limit {})", len, max)),
        ),
        // The reader may close the session between the check and the send.
        ChatError::InvalidState(_) => (DispatchOutcome::NotConnected, Some("Not connected".into())),
        _ => (DispatchOutcome::SendFailed, None),
    }
}

/// Dispatch `text` and clear the input field, whatever the outcome.
pub fn submit(session: &mut Session, source: &mut dyn InputSource, text: &str) -> DispatchOutcome {
    let outcome = dispatch(session, text);
    source.clear();
    outcome
}

/// Pull the next submitted text from `source` and dispatch it. `None` once
/// the source is exhausted.
pub fn dispatch_from(
    session: &mut Session,
    source: &mut dyn InputSource,
) -> Option<DispatchOutcome> {
    let text = source.take_input()?;
    Some(submit(session, source, &text))
}
