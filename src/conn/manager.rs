//! Connection manager: owns the transport and its reconnection policy.
//!
//! The manager runs as a driver task that dials the [`Transport`],
//! pumps inbound frames up to the store, and retries lost connections
//! with bounded exponential backoff. Every lifecycle transition is
//! observable through a `watch` channel and the link-event stream; no
//! transition is silently dropped.
//!
//! Each successful connect bumps a monotonically increasing epoch.
//! Subscription handles carry the epoch they were minted under, so
//! nothing issued on a dead link can deliver or acknowledge anything.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};

use crate::domain::{ConnectionState, RoomId};
use crate::error::ChatError;
use crate::transport::{ServerFrame, SubscriptionId, Transport, TransportLink};

/// Reconnect backoff parameters.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Delay before the first retry; doubles per failed attempt.
    pub base_delay: Duration,
    /// Upper bound on the retry delay.
    pub max_delay: Duration,
    /// Consecutive failures after which the connection parks in
    /// [`ConnectionState::Failed`].
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Returns the undithered delay for the given zero-based attempt:
    /// `min(base * 2^attempt, cap)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// A subscription minted on a specific connection epoch.
///
/// Stale handles (epoch older than the current connection) are inert:
/// the registry refuses frames tagged with them and the manager ignores
/// unsubscribes for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    /// Transport-level subscription id.
    pub id: SubscriptionId,
    /// Connection epoch the subscription was opened on.
    pub epoch: u64,
}

/// Events pumped from the driver task up to the store core.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    /// A lifecycle transition, with the epoch current at that moment.
    State {
        /// The new state.
        state: ConnectionState,
        /// Current connection epoch.
        epoch: u64,
    },
    /// An inbound envelope frame.
    Inbound {
        /// Epoch of the link the frame arrived on.
        epoch: u64,
        /// The frame itself.
        frame: ServerFrame,
    },
    /// Resolution of a subscribe request.
    ///
    /// Delivered on the same ordered stream as [`LinkEvent::Inbound`],
    /// so the registry always records a handle before the first frame
    /// on it is processed.
    SubscribeResult {
        /// The room used as correlation tag by the requester.
        room_id: RoomId,
        /// Epoch the request resolved under.
        epoch: u64,
        /// The minted handle, or why the request failed.
        result: Result<SubscriptionHandle, ChatError>,
    },
}

/// Commands accepted by the driver task.
enum ConnCommand {
    Open,
    Close,
    Subscribe {
        topic: String,
        room_id: RoomId,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
    },
    Publish {
        destination: &'static str,
        body: serde_json::Value,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
}

/// Handle to the connection driver task.
///
/// Cheap to clone; all clones talk to the same driver. The transport is
/// owned by the driver alone: other components observe the state and
/// send commands, never touching the link directly.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<ConnCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Spawns the driver task and returns the handle plus the stream of
    /// link events for the store core.
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let driver = ConnectionDriver {
            transport,
            policy,
            cmd_rx,
            event_tx,
            state_tx,
            epoch: 0,
        };
        tokio::spawn(driver.run());

        (Self { cmd_tx, state_rx }, event_rx)
    }

    /// Begins connection attempts. A no-op while already connecting or
    /// connected.
    pub fn open(&self) {
        let _ = self.cmd_tx.send(ConnCommand::Open);
    }

    /// Tears the connection down and stops retrying until the next
    /// [`Self::open`].
    pub fn close(&self) {
        let _ = self.cmd_tx.send(ConnCommand::Close);
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Requests a subscription on the live link. The outcome arrives as
    /// a [`LinkEvent::SubscribeResult`] on the link-event stream,
    /// ordered before any frame delivered on the new subscription.
    pub(crate) fn request_subscribe(&self, topic: String, room_id: RoomId) {
        let _ = self.cmd_tx.send(ConnCommand::Subscribe { topic, room_id });
    }

    /// Closes a subscription. Stale handles are ignored.
    pub(crate) fn unsubscribe(&self, handle: SubscriptionHandle) {
        let _ = self.cmd_tx.send(ConnCommand::Unsubscribe { handle });
    }

    /// Publishes a payload to an application destination.
    ///
    /// # Errors
    ///
    /// [`ChatError::NotConnected`] when no link is up,
    /// [`ChatError::Transport`] when the frame cannot be sent, or
    /// [`ChatError::ChannelClosed`] after shutdown.
    pub(crate) async fn publish(
        &self,
        destination: &'static str,
        body: serde_json::Value,
    ) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ConnCommand::Publish {
                destination,
                body,
                reply,
            })
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)?
    }
}

/// Why a connect-retry loop ended.
enum LoopEnd {
    /// Transitioned to an idle state (`Disconnected` or `Failed`).
    Idle,
    /// The command channel closed; the owning client is gone.
    Shutdown,
}

/// Why a live link ended.
enum LinkEnd {
    Lost,
    Closed,
    Shutdown,
}

/// Outcome of one cancellable connect attempt.
enum Attempt {
    Connected(Box<dyn TransportLink>),
    Failed(ChatError),
    Cancelled,
    Shutdown,
}

struct ConnectionDriver {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    cmd_rx: mpsc::UnboundedReceiver<ConnCommand>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    state_tx: watch::Sender<ConnectionState>,
    epoch: u64,
}

impl ConnectionDriver {
    async fn run(mut self) {
        // Idle until opened; Close in idle is a no-op.
        loop {
            let Some(cmd) = self.cmd_rx.recv().await else {
                return;
            };
            match cmd {
                ConnCommand::Open => {
                    if matches!(self.connect_loop().await, LoopEnd::Shutdown) {
                        return;
                    }
                }
                ConnCommand::Close => self.set_state(ConnectionState::Disconnected),
                ConnCommand::Subscribe { room_id, .. } => self.refuse_subscribe(room_id),
                ConnCommand::Publish { reply, .. } => {
                    let _ = reply.send(Err(ChatError::NotConnected));
                }
                ConnCommand::Unsubscribe { .. } => {}
            }
        }
    }

    /// Connects, runs the link, and reconnects on loss until an idle
    /// transition or shutdown.
    async fn connect_loop(&mut self) -> LoopEnd {
        let mut attempts: u32 = 0;
        self.set_state(ConnectionState::Connecting);

        loop {
            match self.try_connect().await {
                Attempt::Connected(link) => {
                    attempts = 0;
                    self.epoch += 1;
                    tracing::info!(epoch = self.epoch, "connected to messaging backend");
                    self.set_state(ConnectionState::Connected);
                    match self.run_link(link).await {
                        LinkEnd::Lost => self.set_state(ConnectionState::Reconnecting),
                        LinkEnd::Closed => {
                            self.set_state(ConnectionState::Disconnected);
                            return LoopEnd::Idle;
                        }
                        LinkEnd::Shutdown => return LoopEnd::Shutdown,
                    }
                }
                Attempt::Failed(error) => {
                    attempts += 1;
                    if attempts > self.policy.max_attempts {
                        tracing::warn!(
                            attempts,
                            error = %error,
                            "retry budget exhausted, parking connection"
                        );
                        self.set_state(ConnectionState::Failed);
                        return LoopEnd::Idle;
                    }
                    let delay = with_jitter(self.policy.delay_for(attempts - 1));
                    tracing::debug!(attempts, delay_ms = delay.as_millis() as u64, %error, "connect failed, retrying");
                    match self.wait_retry(delay).await {
                        RetryWait::Elapsed => self.set_state(ConnectionState::Reconnecting),
                        RetryWait::Cancelled => {
                            self.set_state(ConnectionState::Disconnected);
                            return LoopEnd::Idle;
                        }
                        RetryWait::Shutdown => return LoopEnd::Shutdown,
                    }
                }
                Attempt::Cancelled => {
                    self.set_state(ConnectionState::Disconnected);
                    return LoopEnd::Idle;
                }
                Attempt::Shutdown => return LoopEnd::Shutdown,
            }
        }
    }

    /// One connect attempt, remaining responsive to commands.
    async fn try_connect(&mut self) -> Attempt {
        let transport = Arc::clone(&self.transport);
        let connect = transport.connect();
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(link) => Attempt::Connected(link),
                        Err(error) => Attempt::Failed(error),
                    };
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => return Attempt::Shutdown,
                        Some(ConnCommand::Close) => return Attempt::Cancelled,
                        Some(ConnCommand::Open) => {}
                        Some(ConnCommand::Subscribe { room_id, .. }) => {
                            self.refuse_subscribe(room_id);
                        }
                        Some(ConnCommand::Publish { reply, .. }) => {
                            let _ = reply.send(Err(ChatError::NotConnected));
                        }
                        Some(ConnCommand::Unsubscribe { .. }) => {}
                    }
                }
            }
        }
    }

    /// Sleeps out a retry delay, remaining responsive to commands.
    async fn wait_retry(&mut self, delay: Duration) -> RetryWait {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return RetryWait::Elapsed,
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => return RetryWait::Shutdown,
                        Some(ConnCommand::Close) => return RetryWait::Cancelled,
                        Some(ConnCommand::Open) => {}
                        Some(ConnCommand::Subscribe { room_id, .. }) => {
                            self.refuse_subscribe(room_id);
                        }
                        Some(ConnCommand::Publish { reply, .. }) => {
                            let _ = reply.send(Err(ChatError::NotConnected));
                        }
                        Some(ConnCommand::Unsubscribe { .. }) => {}
                    }
                }
            }
        }
    }

    /// Pumps one live link until it dies or is closed.
    async fn run_link(&mut self, mut link: Box<dyn TransportLink>) -> LinkEnd {
        loop {
            tokio::select! {
                frame = link.next_frame() => {
                    match frame {
                        Some(Ok(frame)) => {
                            let _ = self.event_tx.send(LinkEvent::Inbound {
                                epoch: self.epoch,
                                frame,
                            });
                        }
                        Some(Err(error)) => {
                            tracing::warn!(category = error.category(), %error, "discarding malformed inbound frame");
                        }
                        None => {
                            tracing::info!(epoch = self.epoch, "link lost");
                            link.close().await;
                            return LinkEnd::Lost;
                        }
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => {
                            link.close().await;
                            return LinkEnd::Shutdown;
                        }
                        Some(ConnCommand::Close) => {
                            link.close().await;
                            return LinkEnd::Closed;
                        }
                        Some(ConnCommand::Open) => {}
                        Some(ConnCommand::Subscribe { topic, room_id }) => {
                            match link.subscribe(&topic).await {
                                Ok(id) => {
                                    let handle = SubscriptionHandle { id, epoch: self.epoch };
                                    tracing::debug!(%id, epoch = self.epoch, %topic, "subscribed");
                                    let _ = self.event_tx.send(LinkEvent::SubscribeResult {
                                        room_id,
                                        epoch: self.epoch,
                                        result: Ok(handle),
                                    });
                                }
                                Err(error) => {
                                    let _ = self.event_tx.send(LinkEvent::SubscribeResult {
                                        room_id,
                                        epoch: self.epoch,
                                        result: Err(error),
                                    });
                                    link.close().await;
                                    return LinkEnd::Lost;
                                }
                            }
                        }
                        Some(ConnCommand::Unsubscribe { handle }) => {
                            if handle.epoch == self.epoch
                                && link.unsubscribe(handle.id).await.is_err()
                            {
                                link.close().await;
                                return LinkEnd::Lost;
                            }
                        }
                        Some(ConnCommand::Publish { destination, body, reply }) => {
                            match link.publish(destination, body).await {
                                Ok(()) => {
                                    let _ = reply.send(Ok(()));
                                }
                                Err(error) => {
                                    let _ = reply.send(Err(error));
                                    link.close().await;
                                    return LinkEnd::Lost;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn refuse_subscribe(&self, room_id: RoomId) {
        let _ = self.event_tx.send(LinkEvent::SubscribeResult {
            room_id,
            epoch: self.epoch,
            result: Err(ChatError::NotConnected),
        });
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.state_tx.borrow() == state {
            return;
        }
        self.state_tx.send_replace(state);
        tracing::info!(state = state.as_str(), "connection state changed");
        let _ = self.event_tx.send(LinkEvent::State {
            state,
            epoch: self.epoch,
        });
    }
}

/// Why a retry wait ended.
enum RetryWait {
    Elapsed,
    Cancelled,
    Shutdown,
}

/// Adds up to 25% random extra delay to spread reconnecting clients.
fn with_jitter(delay: Duration) -> Duration {
    let max_extra = u64::try_from(delay.as_millis() / 4).unwrap_or(u64::MAX);
    if max_extra == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max_extra))
}
