//! Signaling server backed by the in-memory relay
//!
//! Run with: cargo run --example signaling_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example signaling_server                   # binds to 0.0.0.0:3001
//!   cargo run --example signaling_server localhost         # binds to 127.0.0.1:3001
//!   cargo run --example signaling_server 127.0.0.1:3005    # binds to 127.0.0.1:3005
//!
//! Without an argument the address comes from `BIND_ADDR` / `PORT`. STUN and
//! TURN come from `STUN_ADDRESS`, `STUN_PORT`, `TURN_URL`, `DISABLE_STUN`
//! and `DISABLE_TURN`.
//!
//! ## Trying it out
//!
//! With websocat, in two terminals:
//!   websocat ws://localhost:3001
//!   {"type":"join","roomId":"r1","role":"caller"}
//!   {"type":"offer","roomId":"r1","role":"caller","sdp":"v=0\r\n"}
//!
//! The in-memory relay answers any offer starting with `v=0` and emits two
//! synthetic host candidates per endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use room_signal::relay::memory::MemoryRelay;
use room_signal::{Coordinator, ServerConfig, SignalingServer, TraversalConfig};

fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 3001;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: signaling_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: $BIND_ADDR:$PORT or 0.0.0.0:3001)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let mut config = ServerConfig::from_env();
    if let Some(addr_str) = args.get(1) {
        match parse_bind_addr(addr_str) {
            Ok(addr) => config = config.bind(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("room_signal=debug".parse()?)
                .add_directive("signaling_server=debug".parse()?),
        )
        .init();

    let traversal = TraversalConfig::from_env();
    tracing::info!(traversal = ?traversal.network_traversal(), "Network traversal");

    let relay = Arc::new(MemoryRelay::new().with_latency(Duration::from_millis(20)));
    let coordinator = Arc::new(Coordinator::new(relay, traversal));
    let server = SignalingServer::new(config, Arc::clone(&coordinator));

    println!("Starting signaling server on ws://{}", server.bind_addr());

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    let stats = coordinator.stats().await;
    println!(
        "Stats: connections={} rooms_released={} pairs={} live_pipelines={}",
        stats.total_connections,
        stats.rooms_released,
        stats.connected_pairs,
        stats.live_pipelines(),
    );

    Ok(())
}
