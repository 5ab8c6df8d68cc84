// CLI entry point for the Tabula session relay.
//
// Starts a standalone relay for game clients to connect to. The relay pairs
// players into named sessions, arbitrates turns, and forwards moves and
// chat; it never runs a rule-engine. See server.rs for the networking
// architecture and session.rs for the session state machine.

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tabula_relay::server::{ServerConfig, start_server};

fn main() {
    // Log level comes from RUST_LOG when set.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = parse_args();

    let (_handle, addr) = match start_server(config) {
        Ok(started) => started,
        Err(e) => {
            eprintln!("Failed to start relay: {e}");
            std::process::exit(1);
        }
    };

    info!("relay listening on {addr}");

    // Runs until the process is killed. The OS reclaims the socket and all
    // relay threads with it.
    loop {
        std::thread::sleep(Duration::from_millis(500));
    }
}

/// Plain `std::env::args()` matching. Four flags do not need a CLI crate.
fn parse_args() -> ServerConfig {
    let mut config = ServerConfig::default();
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                i += 1;
                config.host = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--host requires a value");
                    std::process::exit(1);
                });
            }
            "--port" => {
                i += 1;
                config.port = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--port requires a valid port number");
                    std::process::exit(1);
                });
            }
            "--backlog" => {
                i += 1;
                config.backlog = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--backlog requires a number");
                    std::process::exit(1);
                });
            }
            "--turn-timeout-secs" => {
                i += 1;
                let secs: u64 = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--turn-timeout-secs requires a number of seconds");
                    std::process::exit(1);
                });
                config.turn_timeout = Some(Duration::from_secs(secs));
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config
}

fn print_usage() {
    println!("Usage: relay [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --host <ADDR>            Bind address (default: 127.0.0.1)");
    println!("  --port <PORT>            Listen port (default: 7171)");
    println!("  --backlog <N>            Listen queue depth (default: 128)");
    println!("  --turn-timeout-secs <N>  Forfeit a turn after N silent seconds (default: off)");
    println!("  --help, -h               Show this help");
}
