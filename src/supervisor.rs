//! Reconnect loop around scale sessions.
//!
//! The supervisor acquires a channel to the scale, runs one [`ScaleSession`]
//! on it, tears everything down and either stops (run-once mode) or goes
//! back to connecting.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::ble::transport::{ScaleChannel, ScaleConnector};
use crate::data::Measurement;
use crate::error::{Error, Result};
use crate::session::ScaleSession;

/// Supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SupervisorConfig {
    /// Hardware address of the scale.
    pub address: String,
    /// Inactivity timeout of each session.
    pub session_timeout: Duration,
    /// Delay after a failed connection attempt.
    pub retry_delay: Duration,
    /// Delay between a finished session and the next connection attempt.
    pub reconnect_delay: Duration,
    /// Stop after the first measurement or timeout.
    pub run_once: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            session_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            run_once: false,
        }
    }
}

impl SupervisorConfig {
    /// Create a configuration for the scale at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Set the session inactivity timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the delay after a failed connection attempt.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the delay before reconnecting after a session.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Stop after the first terminal outcome.
    pub fn with_run_once(mut self, run_once: bool) -> Self {
        self.run_once = run_once;
        self
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for an empty address or a zero
    /// duration.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::InvalidParameter {
                name: "address".to_string(),
                value: format!("{:?}", self.address),
            });
        }

        for (name, value) in [
            ("session_timeout", self.session_timeout),
            ("retry_delay", self.retry_delay),
            ("reconnect_delay", self.reconnect_delay),
        ] {
            if value.is_zero() {
                return Err(Error::InvalidParameter {
                    name: name.to_string(),
                    value: format!("{:?}", value),
                });
            }
        }

        Ok(())
    }
}

/// Supervisor loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SupervisorState {
    /// Acquiring a channel to the scale.
    #[default]
    Connecting,
    /// A session is listening.
    ActiveSession,
    /// `run` has returned.
    Stopped,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::ActiveSession => write!(f, "ActiveSession"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// How a session finished.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// The scale reported a final weight.
    Measured(Measurement),
    /// No packet arrived within the session timeout.
    TimedOut,
    /// The session closed without a measurement or timeout.
    Stopped,
}

impl SessionOutcome {
    /// Check if this outcome ends a run-once supervisor.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Measured(_) | Self::TimedOut)
    }

    /// Get the measurement, if any.
    pub fn measurement(&self) -> Option<&Measurement> {
        match self {
            Self::Measured(m) => Some(m),
            _ => None,
        }
    }
}

/// Runs sessions against one scale, reconnecting between them.
pub struct SessionSupervisor {
    connector: Arc<dyn ScaleConnector>,
    config: SupervisorConfig,
    state: RwLock<SupervisorState>,
    state_tx: broadcast::Sender<SupervisorState>,
}

impl SessionSupervisor {
    /// Create a supervisor.
    pub fn new(connector: Arc<dyn ScaleConnector>, config: SupervisorConfig) -> Self {
        let (state_tx, _) = broadcast::channel(16);

        Self {
            connector,
            config,
            state: RwLock::new(SupervisorState::Connecting),
            state_tx,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Get the current loop state.
    pub fn state(&self) -> SupervisorState {
        *self.state.read()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// Run the connect/session loop.
    ///
    /// `on_connected` is called with every new session before it starts
    /// listening, so callers can register their own handlers.
    ///
    /// In run-once mode this returns the first measurement or timeout;
    /// otherwise it only returns on error and is meant to be cancelled by
    /// dropping the future.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration, including an address
    /// the connector rejects. Connection failures are logged and retried.
    pub async fn run<F>(&self, mut on_connected: F) -> Result<SessionOutcome>
    where
        F: FnMut(&ScaleSession) + Send,
    {
        self.config.validate()?;

        loop {
            self.set_state(SupervisorState::Connecting);

            let channel = match self.connector.connect(&self.config.address).await {
                Ok(channel) => channel,
                Err(e) if !e.is_connect_failure() => {
                    error!("Cannot connect to {}: {}", self.config.address, e);
                    self.set_state(SupervisorState::Stopped);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "Failed to connect to {}: {}, retrying in {:?}",
                        self.config.address, e, self.config.retry_delay
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                    continue;
                }
            };

            self.set_state(SupervisorState::ActiveSession);

            let outcome = self.run_session(channel.clone(), &mut on_connected).await;

            if let Err(e) = channel.disconnect().await {
                warn!("Failed to disconnect from {}: {}", self.config.address, e);
            }

            debug!("Session finished: {:?}", outcome);

            if self.config.run_once && outcome.is_terminal() {
                self.set_state(SupervisorState::Stopped);
                return Ok(outcome);
            }

            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// Run one session to completion and tear it down.
    async fn run_session<F>(
        &self,
        channel: Arc<dyn ScaleChannel>,
        on_connected: &mut F,
    ) -> SessionOutcome
    where
        F: FnMut(&ScaleSession) + Send,
    {
        let session = ScaleSession::new(channel);
        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = Arc::new(Mutex::new(Some(done_tx)));

        let tx = done_tx.clone();
        session.on_measurement(move |kg| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(SessionOutcome::Measured(Measurement::new(kg)));
            }
        });

        let tx = done_tx;
        session.on_timeout(move || {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(SessionOutcome::TimedOut);
            }
        });

        on_connected(&session);

        if let Err(e) = session
            .start_listening(self.config.session_timeout)
            .await
        {
            warn!("Failed to start session: {}", e);
            session.destroy();
            session.closed().await;
            return SessionOutcome::Stopped;
        }

        let outcome = tokio::select! {
            biased;

            Ok(outcome) = done_rx => outcome,
            _ = session.closed() => SessionOutcome::Stopped,
        };

        if let SessionOutcome::Measured(m) = &outcome {
            info!("Measured {} at {}", m, m.taken_at);
        }

        session.destroy();
        session.closed().await;

        outcome
    }

    fn set_state(&self, new_state: SupervisorState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!("Supervisor state changed: {} -> {}", old_state, new_state);
            let _ = self.state_tx.send(new_state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::MockScaleConnector;
    use crate::ble::MemoryChannel;
    use crate::protocol::STOP_MEASUREMENT;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FINAL_72: [u8; 8] = [0x10, 0x08, 0x15, 0x1c, 0x20, 0x01, 0x00, 0x00];

    fn config() -> SupervisorConfig {
        SupervisorConfig::new("34:03:DE:08:C7:B9")
            .with_session_timeout(Duration::from_secs(5))
            .with_retry_delay(Duration::from_secs(2))
            .with_reconnect_delay(Duration::from_secs(1))
    }

    #[test]
    fn test_config_defaults() {
        let config = SupervisorConfig::new("34:03:DE:08:C7:B9");
        assert_eq!(config.session_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert!(!config.run_once);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(matches!(
            SupervisorConfig::default().validate(),
            Err(Error::InvalidParameter { ref name, .. }) if name == "address"
        ));
        assert!(matches!(
            config().with_retry_delay(Duration::ZERO).validate(),
            Err(Error::InvalidParameter { ref name, .. }) if name == "retry_delay"
        ));
        assert!(matches!(
            config().with_session_timeout(Duration::ZERO).validate(),
            Err(Error::InvalidParameter { ref name, .. }) if name == "session_timeout"
        ));
    }

    #[test]
    fn test_outcome_is_terminal() {
        assert!(SessionOutcome::Measured(Measurement::new(72.0)).is_terminal());
        assert!(SessionOutcome::TimedOut.is_terminal());
        assert!(!SessionOutcome::Stopped.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_returns_error() {
        let mut connector = MockScaleConnector::new();
        connector.expect_connect().never();

        let supervisor = SessionSupervisor::new(Arc::new(connector), SupervisorConfig::default());
        assert!(supervisor.run(|_| {}).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_returns_measurement_after_retry() {
        let channel = Arc::new(MemoryChannel::new());
        channel.feed(&FINAL_72);

        let attempts = Arc::new(AtomicUsize::new(0));
        let mut connector = MockScaleConnector::new();
        {
            let attempts = attempts.clone();
            let channel = channel.clone();
            connector.expect_connect().times(2).returning(move |_| {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::ConnectionFailed {
                        reason: "out of range".to_string(),
                    })
                } else {
                    let channel: Arc<dyn ScaleChannel> = channel.clone();
                    Ok(channel)
                }
            });
        }

        let supervisor = SessionSupervisor::new(Arc::new(connector), config().with_run_once(true));
        let connected = Arc::new(AtomicUsize::new(0));
        let counter = connected.clone();

        let outcome = supervisor
            .run(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert_eq!(outcome.measurement().map(|m| m.weight_kg), Some(72.0));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(connected.load(Ordering::SeqCst), 1);
        assert_eq!(channel.writes(), vec![STOP_MEASUREMENT.to_vec()]);
        assert_eq!(channel.unsubscribe_count(), 1);
        assert_eq!(channel.disconnect_count(), 1);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_returns_timeout() {
        let channel = Arc::new(MemoryChannel::new());

        let mut connector = MockScaleConnector::new();
        {
            let channel = channel.clone();
            connector.expect_connect().times(1).returning(move |_| {
                let channel: Arc<dyn ScaleChannel> = channel.clone();
                Ok(channel)
            });
        }

        let supervisor = SessionSupervisor::new(Arc::new(connector), config().with_run_once(true));
        let outcome = supervisor.run(|_| {}).await.unwrap();

        assert_eq!(outcome, SessionOutcome::TimedOut);
        assert_eq!(channel.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_mode_reconnects() {
        let connects = Arc::new(AtomicUsize::new(0));
        let mut connector = MockScaleConnector::new();
        {
            let connects = connects.clone();
            connector.expect_connect().returning(move |_| {
                connects.fetch_add(1, Ordering::SeqCst);
                let channel: Arc<dyn ScaleChannel> = Arc::new(MemoryChannel::new());
                Ok(channel)
            });
        }

        let supervisor = SessionSupervisor::new(Arc::new(connector), config());

        // Each cycle is a 5 s timeout plus a 1 s reconnect delay.
        let result =
            tokio::time::timeout(Duration::from_secs(20), supervisor.run(|_| {})).await;

        assert!(result.is_err());
        assert!(connects.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_connected_can_register_handlers() {
        let channel = Arc::new(MemoryChannel::new());
        channel.feed(&FINAL_72);

        let mut connector = MockScaleConnector::new();
        {
            let channel = channel.clone();
            connector.expect_connect().returning(move |_| {
                let channel: Arc<dyn ScaleChannel> = channel.clone();
                Ok(channel)
            });
        }

        let supervisor = SessionSupervisor::new(Arc::new(connector), config().with_run_once(true));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        supervisor
            .run(move |session| {
                let sink = sink.clone();
                session.on_measurement(move |kg| sink.lock().push(kg));
            })
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec![72.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_changes_are_broadcast() {
        let mut connector = MockScaleConnector::new();
        connector.expect_connect().returning(|_| {
            let channel: Arc<dyn ScaleChannel> = Arc::new(MemoryChannel::new());
            Ok(channel)
        });

        let supervisor = SessionSupervisor::new(Arc::new(connector), config().with_run_once(true));
        let mut rx = supervisor.subscribe();

        supervisor.run(|_| {}).await.unwrap();

        assert_eq!(rx.try_recv().unwrap(), SupervisorState::ActiveSession);
        assert_eq!(rx.try_recv().unwrap(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_address_ends_run() {
        let mut connector = MockScaleConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|address: &str| {
                Err(Error::InvalidParameter {
                    name: "address".to_string(),
                    value: address.to_string(),
                })
            });

        let config = SupervisorConfig::new("not-an-address").with_run_once(true);
        let supervisor = SessionSupervisor::new(Arc::new(connector), config);

        let result =
            tokio::time::timeout(Duration::from_secs(3600), supervisor.run(|_| {})).await;

        assert!(matches!(
            result,
            Ok(Err(Error::InvalidParameter { ref name, .. })) if name == "address"
        ));
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_subscription_disconnects_and_reconnects() {
        let channel = Arc::new(MemoryChannel::new());
        channel.set_fail_subscribe(true);

        let connects = Arc::new(AtomicUsize::new(0));
        let mut connector = MockScaleConnector::new();
        {
            let connects = connects.clone();
            let channel = channel.clone();
            connector.expect_connect().returning(move |_| {
                connects.fetch_add(1, Ordering::SeqCst);
                let channel: Arc<dyn ScaleChannel> = channel.clone();
                Ok(channel)
            });
        }

        let supervisor = SessionSupervisor::new(Arc::new(connector), config().with_run_once(true));
        let sessions = Arc::new(AtomicUsize::new(0));
        let counter = sessions.clone();

        // A stopped session is not terminal, so run-once keeps going: one
        // attempt at 0 s, then one after each 1 s reconnect delay.
        let result = tokio::time::timeout(
            Duration::from_millis(3500),
            supervisor.run(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(connects.load(Ordering::SeqCst), 4);
        assert_eq!(sessions.load(Ordering::SeqCst), 4);
        assert_eq!(channel.disconnect_count(), 4);
        assert_eq!(channel.subscribe_count(), 0);
        assert_eq!(channel.unsubscribe_count(), 0);
    }
}
