//! Continuous weight monitor example
//!
//! Keeps reconnecting to a scale and prints every weigh-in until Ctrl-C.
//!
//! Run with: cargo run --example monitor -- <address>

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use weighscale_rust_ble::{
    BtleplugConnector, Error, Result, SessionSupervisor, SupervisorConfig, SupervisorState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("weighscale_rust_ble=info,btleplug=warn")),
        )
        .init();

    let address = std::env::args().nth(1).ok_or_else(|| Error::InvalidParameter {
        name: "address".to_string(),
        value: "missing".to_string(),
    })?;

    println!("Weight Monitor");
    println!("==============\n");
    println!("Watching scale {} (Ctrl-C to exit)\n", address);

    let connector = Arc::new(BtleplugConnector::new().await?);
    let config = SupervisorConfig::new(address)
        .with_session_timeout(Duration::from_secs(60))
        .with_retry_delay(Duration::from_secs(5));
    let supervisor = SessionSupervisor::new(connector, config);

    let mut states = supervisor.subscribe();
    tokio::spawn(async move {
        while let Ok(state) = states.recv().await {
            if state == SupervisorState::ActiveSession {
                println!("Scale connected");
            }
        }
    });

    let run = supervisor.run(|session| {
        session.on_live_update(|kg| println!("  {:>6.2} kg", kg));
        session.on_measurement(|kg| {
            println!(
                "[{}] {:.2} kg\n",
                chrono::Local::now().format("%H:%M:%S"),
                kg
            )
        });
        session.on_timeout(|| println!("Scale went quiet, reconnecting...\n"));
    });

    tokio::select! {
        result = run => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
    }

    Ok(())
}
