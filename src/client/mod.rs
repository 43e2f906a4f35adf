pub mod dispatcher;
pub mod session;
pub mod ui;

pub use dispatcher::{DispatchOutcome, Inbound, Outgoing};
pub use session::{CloseReason, Session, SessionEvent};
pub use ui::{DisplaySink, InputSource, StatusIndicator};
