pub mod performance_monitor;
pub mod server;
pub mod state;

pub use server::{ChatServer, ServerHandle};
pub use state::{MuteOutcome, ServerState};
