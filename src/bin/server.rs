use std::path::PathBuf;
use std::process;

use lanchat::config::ServerConfig;
use lanchat::server::ChatServer;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    println!("🦀 LAN Chat Server");
    println!("==================");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let result = ServerConfig::resolve(config_path.as_deref())
        .and_then(ChatServer::bind)
        .and_then(|server| {
            if let Ok(addr) = server.local_addr() {
                println!("✅ Server listening on {}", addr);
            }
            server.run()
        });

    if let Err(e) = result {
        eprintln!("❌ {}", e);
        process::exit(1);
    }
}
