use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use lanchat::client::dispatcher::{self, DispatchOutcome};
use lanchat::client::ui::{InputSource, Polled, StdinInput, TerminalSink, TerminalStatus};
use lanchat::client::Session;
use lanchat::common::Nickname;
use lanchat::config::ClientConfig;
use lanchat::ChatError;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    println!("🦀 LAN Chat Client");
    println!("==================");

    match run() {
        Ok(()) => println!("👋 Goodbye!"),
        Err(ChatError::UserAbort) => println!("Connection cancelled."),
        Err(e) => {
            eprintln!("❌ {}", e);
            process::exit(1);
        }
    }
}

fn run() -> Result<(), ChatError> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ClientConfig::resolve(config_path.as_deref())?;
    let mut input = StdinInput::spawn()?;

    let sink = Arc::new(TerminalSink);
    let status = Arc::new(TerminalStatus::default());
    let port = config.port;

    // Failed attempts go back to the prompts unless everything was configured.
    let mut session = loop {
        let host = match config.host.clone() {
            Some(host) => host,
            None => input
                .prompt("Server", "Enter server IP:")
                .ok_or(ChatError::UserAbort)?,
        };
        let nickname = match config.nickname.clone() {
            Some(nickname) => nickname,
            None => input
                .prompt("Nickname", "Choose a nickname:")
                .ok_or(ChatError::UserAbort)?,
        };
        let retryable = config.host.is_none() || config.nickname.is_none();

        let attempt = Nickname::new(nickname).and_then(|nickname| {
            let mut session = Session::new(config.clone(), sink.clone(), status.clone());
            println!("🔌 Connecting to {}:{}...", host, port);
            session.connect(&host, port, nickname).map(|()| session)
        });
        match attempt {
            Ok(session) => break session,
            Err(
                e @ (ChatError::Connection { .. }
                | ChatError::HandshakeRejected(_)
                | ChatError::InvalidNickname(_)),
            ) if retryable => {
                eprintln!("❌ {}", e);
                println!("Try again, or leave the answer empty to quit.");
            }
            Err(e) => return Err(e),
        }
    };

    loop {
        match input.poll(POLL_INTERVAL) {
            Polled::Line(text) => {
                match dispatcher::submit(&mut session, &mut input, &text) {
                    DispatchOutcome::Exited | DispatchOutcome::SendFailed => break,
                    DispatchOutcome::NotConnected => break,
                    DispatchOutcome::Skipped
                    | DispatchOutcome::Sent
                    | DispatchOutcome::TooLong => {}
                }
            }
            Polled::Idle => {
                if !session.is_connected() {
                    break;
                }
            }
            Polled::Closed => break,
        }
    }

    session.close();
    Ok(())
}
