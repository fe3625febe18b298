//! Trace replay example
//!
//! Feeds a captured notification trace through a session without any
//! Bluetooth hardware, printing every decoded packet and the commands the
//! session answers with.
//!
//! Run with: cargo run --example replay_trace -- [trace-file]
//!
//! The trace file holds one notification per line in hex; `#` starts a
//! comment. Without a file a built-in weigh-in is replayed.

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use weighscale_rust_ble::utils::{hex_spaced, parse_hex};
use weighscale_rust_ble::{Error, MemoryChannel, Result, ScaleSession};

const BUILTIN_TRACE: &str = "
# handshake
12 11 15 00 2a 00 00 00 00 00 00 00 00 00 00 00 62
14 0b 15 00 4f 00 00 00 00 00 a9
# converging
10 0b 15 05 dc 00 00 00 00 00 1a
10 0b 15 1b 58 00 00 00 00 00 c1
# final
10 0b 15 1c 20 01 00 00 00 00 8b
";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("weighscale_rust_ble=debug")),
        )
        .init();

    let trace = match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(&path).map_err(|e| Error::InvalidParameter {
            name: "trace".to_string(),
            value: format!("{}: {}", path, e),
        })?,
        None => BUILTIN_TRACE.to_string(),
    };

    let channel = Arc::new(MemoryChannel::new());
    let session = ScaleSession::new(channel.clone());

    session.on_data(|packet| println!("<- {}", packet));
    session.on_live_update(|kg| println!("   live {:.2} kg", kg));
    session.on_measurement(|kg| println!("   final {:.2} kg", kg));
    session.on_timeout(|| println!("   timeout"));

    for line in trace.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        channel.feed(&parse_hex(line)?);
    }
    channel.close_notifications();

    session.start_listening(Duration::from_secs(1)).await?;
    session.closed().await;

    println!("\nCommands written:");
    for write in channel.writes() {
        println!("-> {}", hex_spaced(&write));
    }

    Ok(())
}
