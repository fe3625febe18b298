//! Single weigh-in example
//!
//! Connects to a scale, waits for one final reading, then exits.
//!
//! Run with: cargo run --example weigh_once -- <address>
//!
//! Options:
//!   --timeout <secs>   Session inactivity timeout (default 30)

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use weighscale_rust_ble::{
    BtleplugConnector, Error, Result, SessionOutcome, SessionSupervisor, SupervisorConfig,
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

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let address = args
        .iter()
        .skip(1)
        .find(|arg| !arg.starts_with("--") && arg.contains(':'))
        .cloned()
        .ok_or_else(|| Error::InvalidParameter {
            name: "address".to_string(),
            value: "missing".to_string(),
        })?;
    let timeout = args
        .iter()
        .position(|arg| arg == "--timeout")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30));

    println!("Single Weigh-in");
    println!("===============\n");
    println!("Step on the scale at {}...\n", address);

    let connector = Arc::new(BtleplugConnector::new().await?);
    let config = SupervisorConfig::new(address)
        .with_session_timeout(timeout)
        .with_run_once(true);

    let supervisor = SessionSupervisor::new(connector, config);
    let outcome = supervisor
        .run(|session| {
            session.on_live_update(|kg| println!("  ... {:.2} kg", kg));
        })
        .await?;

    match outcome {
        SessionOutcome::Measured(m) => {
            println!("\nWeight: {} ({:.1} lb)", m, m.weight_lb());
            println!("Taken at {}", m.taken_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        SessionOutcome::TimedOut => println!("\nNo reading: the scale went quiet."),
        SessionOutcome::Stopped => println!("\nSession stopped."),
    }

    Ok(())
}
