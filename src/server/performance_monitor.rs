use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::common::ServerStats;
use crate::server::state::ServerState;

const TICK: Duration = Duration::from_secs(1);

/// Log a stats line every `interval` until the server shuts down.
pub fn spawn(state: Arc<ServerState>, interval: Duration) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("performance-monitor".to_string())
        .spawn(move || {
            let mut last_log = Instant::now();
            while state.is_running() {
                thread::sleep(TICK.min(interval));
                if last_log.elapsed() >= interval {
                    log_stats(&state.stats());
                    last_log = Instant::now();
                }
            }
        })
}

fn log_stats(stats: &ServerStats) {
    match serde_json::to_string(stats) {
        Ok(line) => log::info!(target: "lanchat::stats", "{}", line),
        Err(e) => log::warn!("could not serialise server stats: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Framing;

    #[test]
    fn monitor_stops_with_the_server() {
        let state = Arc::new(ServerState::new(Framing::Raw, 1024));
        let handle = spawn(Arc::clone(&state), Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(30));
        state.shut_down();
        handle.join().unwrap();
    }

    #[test]
    fn stats_serialise_as_json() {
        let state = ServerState::new(Framing::Raw, 1024);
        let json = serde_json::to_value(state.stats()).unwrap();
        assert_eq!(json["connected_clients"], 0);
        assert_eq!(json["total_messages"], 0);
        assert!(json["timestamp"].is_string());
    }
}
