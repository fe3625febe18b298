//! Scale session.
//!
//! A session owns one connected notify/command channel pair. Once listening,
//! a driver task decodes every notification, answers the handshake, raises
//! events and supervises inactivity. The session ends on timeout or on
//! [`ScaleSession::destroy`], whichever comes first, and never restarts.

use futures::stream::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::ble::transport::{NotificationStream, ScaleChannel, SubscriptionHandle};
use crate::error::{Error, Result};
use crate::events::{EventEmitter, EventKind, ListenerId, ScaleEvent};
use crate::protocol::{decide, Action, Packet};
use crate::utils::hex_spaced;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Created, not yet listening.
    #[default]
    Idle,
    /// Subscribed, inactivity timer armed.
    Listening,
    /// Timed out or destroyed. Absorbing.
    Ended,
}

impl SessionState {
    /// Check if the session has ended.
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Listening => write!(f, "Listening"),
            Self::Ended => write!(f, "Ended"),
        }
    }
}

/// State shared between the session handle(s) and the driver task.
struct SessionShared {
    /// The channel pair the session talks over.
    channel: Arc<dyn ScaleChannel>,
    /// Registered listeners.
    events: EventEmitter,
    /// Lifecycle state.
    state: watch::Sender<SessionState>,
    /// Set once the subscription has been released.
    torn_down: watch::Sender<bool>,
    /// Whether the final measurement has been raised.
    measurement_raised: AtomicBool,
}

impl SessionShared {
    fn is_ended(&self) -> bool {
        self.state.borrow().is_ended()
    }

    /// Move to `Ended`, returning the previous state if this call ended it.
    fn end(&self) -> Option<SessionState> {
        let mut previous = None;
        self.state.send_if_modified(|state| {
            if state.is_ended() {
                false
            } else {
                previous = Some(*state);
                *state = SessionState::Ended;
                true
            }
        });
        previous
    }

    fn finish_teardown(&self) {
        self.events.clear();
        self.torn_down.send_replace(true);
    }

    /// End the session on inactivity and raise `timeout`.
    fn expire(&self, timeout: Duration) {
        if self.end().is_some() {
            info!("No packets for {:?}, session timed out", timeout);
            self.events.emit(&ScaleEvent::Timeout);
        }
    }

    /// Decode one notification buffer and raise `data`.
    ///
    /// Returns `None` for a malformed buffer, which does not count as activity.
    fn receive(&self, data: &[u8]) -> Option<Action> {
        let packet = match Packet::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping notification: {}", e);
                return None;
            }
        };

        trace!("Received {}", packet);

        let action = decide(&packet);
        self.events.emit(&ScaleEvent::Data(packet));
        Some(action)
    }

    /// Carry out the reaction to a decoded packet.
    ///
    /// Command writes race the inactivity deadline and `destroy()`.
    async fn apply(
        &self,
        action: Action,
        deadline: Instant,
        state_rx: &mut watch::Receiver<SessionState>,
    ) -> Applied {
        match action {
            Action::NoOp => {}
            Action::SendBytes(command) => {
                match self.write_before(command, deadline, state_rx).await {
                    Written::Done(Ok(())) => {}
                    Written::Done(Err(e)) => {
                        warn!("Failed to write command [{}]: {}", hex_spaced(command), e);
                    }
                    Written::Expired => return Applied::Expired,
                    Written::Interrupted => return Applied::Interrupted,
                }
            }
            Action::RaiseEvent(event) => {
                self.events.emit(&event);
            }
            Action::SendAndRaise(command, event) => {
                if self.measurement_raised.load(Ordering::SeqCst) {
                    debug!("Ignoring repeated final reading");
                    return Applied::Done;
                }

                match self.write_before(command, deadline, state_rx).await {
                    Written::Done(Ok(())) => {}
                    Written::Done(Err(e)) => {
                        warn!("Failed to write stop command: {}", e);
                        return Applied::Done;
                    }
                    Written::Expired => return Applied::Expired,
                    Written::Interrupted => return Applied::Interrupted,
                }

                self.measurement_raised.store(true, Ordering::SeqCst);
                if let Some(kg) = event.weight_kg() {
                    info!("Final weight {:.2} kg", kg);
                }
                self.events.emit(&event);
            }
        }

        Applied::Done
    }

    async fn write_before(
        &self,
        command: &[u8],
        deadline: Instant,
        state_rx: &mut watch::Receiver<SessionState>,
    ) -> Written {
        tokio::select! {
            biased;

            _ = state_rx.changed() => Written::Interrupted,
            result = self.channel.write_command(command) => Written::Done(result),
            _ = tokio::time::sleep_until(deadline) => {
                warn!(
                    "Command [{}] did not complete before the inactivity deadline",
                    hex_spaced(command)
                );
                Written::Expired
            }
        }
    }
}

/// Result of reacting to a decoded packet.
enum Applied {
    Done,
    /// The inactivity deadline passed while a command was pending.
    Expired,
    /// The session was destroyed while a command was pending.
    Interrupted,
}

enum Written {
    Done(Result<()>),
    Expired,
    Interrupted,
}

/// One listening lifetime on a connected scale.
///
/// Cloning yields another handle to the same session, so handlers can capture
/// a clone and call [`destroy`](Self::destroy) from inside an event.
#[derive(Clone)]
pub struct ScaleSession {
    shared: Arc<SessionShared>,
}

impl ScaleSession {
    /// Create an idle session over a connected channel.
    pub fn new(channel: Arc<dyn ScaleChannel>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (torn_down, _) = watch::channel(false);

        Self {
            shared: Arc::new(SessionShared {
                channel,
                events: EventEmitter::new(),
                state,
                torn_down,
                measurement_raised: AtomicBool::new(false),
            }),
        }
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Check if the session has ended.
    pub fn is_ended(&self) -> bool {
        self.shared.is_ended()
    }

    /// Check if the final measurement has been raised.
    pub fn has_measurement(&self) -> bool {
        self.shared.measurement_raised.load(Ordering::SeqCst)
    }

    /// Register a handler for one event kind.
    ///
    /// Handlers run on the session's driver task, in registration order, and
    /// must not block.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&ScaleEvent) + Send + Sync + 'static,
    {
        self.shared.events.on(kind, handler)
    }

    /// Remove a handler.
    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.events.off(id)
    }

    /// Register a callback for every decoded packet.
    pub fn on_data<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        self.on(EventKind::Data, move |event| {
            if let ScaleEvent::Data(packet) = event {
                callback(packet);
            }
        })
    }

    /// Register a callback for in-progress weights (kg).
    pub fn on_live_update<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.on(EventKind::LiveUpdate, move |event| {
            if let ScaleEvent::LiveUpdate(kg) = event {
                callback(*kg);
            }
        })
    }

    /// Register a callback for the final weight (kg).
    pub fn on_measurement<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.on(EventKind::Measurement, move |event| {
            if let ScaleEvent::Measurement(kg) = event {
                callback(*kg);
            }
        })
    }

    /// Register a callback for the inactivity timeout.
    pub fn on_timeout<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::Timeout, move |_| callback())
    }

    /// Subscribe to notifications and start the inactivity timer.
    ///
    /// Calling this on a session that is already listening does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionEnded`] on an ended session, and the transport
    /// error if subscribing fails (the session is ended in that case).
    pub async fn start_listening(&self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(Error::InvalidParameter {
                name: "timeout".to_string(),
                value: format!("{:?}", timeout),
            });
        }

        let claimed = self.shared.state.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Listening;
                true
            } else {
                false
            }
        });

        if !claimed {
            return match self.state() {
                SessionState::Ended => Err(Error::SessionEnded),
                _ => {
                    debug!("Already listening");
                    Ok(())
                }
            };
        }

        let state_rx = self.shared.state.subscribe();

        let (handle, notifications) = match self.shared.channel.subscribe_notifications().await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("Failed to subscribe to notifications: {}", e);
                self.shared.end();
                self.shared.finish_teardown();
                return Err(e);
            }
        };

        debug!("Listening for packets, timeout {:?}", timeout);

        tokio::spawn(drive(
            self.shared.clone(),
            handle,
            notifications,
            state_rx,
            timeout,
        ));

        Ok(())
    }

    /// End the session.
    ///
    /// Idempotent and safe from any state, including from inside an event
    /// handler. The timer is cancelled and the subscription released by the
    /// driver; await [`closed`](Self::closed) to wait for that.
    pub fn destroy(&self) {
        match self.shared.end() {
            None => trace!("Session already ended"),
            Some(SessionState::Idle) => {
                debug!("Destroying idle session");
                self.shared.finish_teardown();
            }
            Some(previous) => debug!("Destroying session (was {})", previous),
        }
    }

    /// Wait until the session has ended and released its subscription.
    pub async fn closed(&self) {
        let mut torn_down = self.shared.torn_down.subscribe();
        loop {
            let done = *torn_down.borrow_and_update();
            if done {
                return;
            }
            if torn_down.changed().await.is_err() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for ScaleSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScaleSession")
            .field("state", &self.state())
            .field("has_measurement", &self.has_measurement())
            .finish()
    }
}

/// Notification loop for one listening session.
async fn drive(
    shared: Arc<SessionShared>,
    handle: SubscriptionHandle,
    mut notifications: NotificationStream,
    mut state_rx: watch::Receiver<SessionState>,
    timeout: Duration,
) {
    let inactivity = tokio::time::sleep(timeout);
    tokio::pin!(inactivity);
    let mut stream_open = true;

    while !shared.is_ended() {
        tokio::select! {
            biased;

            // Listening only ever moves to Ended.
            _ = state_rx.changed() => {
                debug!("Session destroyed, stopping notification handling");
                break;
            }
            _ = &mut inactivity => {
                shared.expire(timeout);
                break;
            }
            next = notifications.next(), if stream_open => match next {
                Some(data) => {
                    let action = match shared.receive(&data) {
                        Some(action) => action,
                        None => continue,
                    };
                    inactivity.as_mut().reset(Instant::now() + timeout);

                    // A data handler may have destroyed the session.
                    if shared.is_ended() {
                        break;
                    }

                    match shared.apply(action, inactivity.deadline(), &mut state_rx).await {
                        Applied::Done => {}
                        Applied::Expired => {
                            shared.expire(timeout);
                            break;
                        }
                        Applied::Interrupted => {
                            debug!("Session destroyed during a command write");
                            break;
                        }
                    }
                }
                None => {
                    debug!("Notification stream closed, waiting for timeout");
                    stream_open = false;
                }
            },
        }
    }

    if let Err(e) = shared.channel.unsubscribe(handle).await {
        warn!("Failed to unsubscribe from notifications: {}", e);
    }
    drop(notifications);

    shared.finish_teardown();
    debug!("Session torn down");
}
