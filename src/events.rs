//! Notifications raised by the link for external collaborators.
//!
//! The reader task must never wait on an observer, so every notification goes through a
//! `tokio::sync::broadcast` channel: publishing is a non-blocking enqueue, and each
//! subscriber drains its own receiver on its own task. A subscriber that falls further
//! behind than the queue depth loses the oldest notifications (and is told how many);
//! the telemetry itself is never lost because it is stored in the channel buffers
//! before the notification is published.
//!
//! Ordering between independent subscribers is not guaranteed. Each single receiver
//! sees notifications in publish order.

use std::future::Future;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Everything the link reports.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// First telemetry line for a previously unseen channel code
    ChannelCreated(u8),
    /// A channel's series storage was reallocated, trimmed or cleared
    LayoutChanged(u8),
    /// One telemetry point, after it has been stored
    Sample {
        /// Channel code
        channel: u8,
        /// Value as received
        value: f64,
        /// Host receive time, seconds since the Unix epoch
        timestamp: f64,
    },
    /// A line that is neither telemetry nor a protocol signature
    Terminal(String),
    /// A line ending in the error designator, verbatim
    DeviceError(String),
    /// A telemetry line that failed to parse
    DataError {
        /// The offending line
        line: String,
        /// Parser message
        cause: String,
    },
    /// The completion signature arrived
    CommandCompleted,
    /// `ACQ.` arrived
    AcquisitionStarted,
    /// `END.` arrived, whether requested or not
    AcquisitionFinished,
    /// The device announced itself
    Connected,
    /// The link closed; `unexpected` when the device or transport ended it
    Disconnected {
        /// Not requested by the host
        unexpected: bool,
    },
    /// Open/close/write failure on the transport
    TransportError(String),
}

/// Fan-out point for [`DeviceEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DeviceEvent>,
}

impl EventBus {
    /// `capacity` is the per-subscriber queue depth; must be non-zero.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Enqueue a notification. Never blocks; having no subscribers is not an error.
    pub fn publish(&self, event: DeviceEvent) {
        let _ = self.tx.send(event);
    }

    /// New receiver; sees notifications published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.tx.subscribe()
    }

    /// Current receiver count; used to skip work nobody listens to.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Deliver every notification to `handler` on a dedicated task.
    ///
    /// The task ends when the bus is dropped. Lagging is logged and skipped.
    pub fn spawn_handler<F, Fut>(&self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(DeviceEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event subscriber lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
