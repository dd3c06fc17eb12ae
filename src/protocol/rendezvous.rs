//! Command/completion rendezvous.
//!
//! The device acknowledges every command with a single completion line and has no
//! sequence numbers, so at most one command may be outstanding. [`Rendezvous::send`]
//! waits for the previous command to complete, marks a new one outstanding, writes it
//! and waits for the state machine to clear the flag again. Both waits are bounded by
//! the completion timeout.
//!
//! When the first wait expires the command is sent anyway. Concurrent senders are
//! therefore serialised on the flag but not ordered: whichever observes the clear
//! first goes next.

use super::command::Command;
use super::framer::LINE_TERMINATOR;
use super::state::LinkShared;
use crate::error::{AppResult, DaqError};
use crate::events::{DeviceEvent, EventBus};
use crate::transport::DynWriter;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Serialises commands on one link and waits for each to complete.
pub struct Rendezvous {
    link: Arc<LinkShared>,
    writer: Mutex<Option<DynWriter>>,
    events: EventBus,
    timeout: Duration,
}

impl Rendezvous {
    /// `timeout` bounds every wait for a completion line.
    pub fn new(link: Arc<LinkShared>, events: EventBus, timeout: Duration) -> Self {
        Self {
            link,
            writer: Mutex::new(None),
            events,
            timeout,
        }
    }

    /// Per-command completion timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Install the write half of a freshly opened link.
    pub async fn attach(&self, writer: DynWriter) {
        *self.writer.lock().await = Some(writer);
    }

    /// Drop the write half, shutting it down first.
    pub async fn detach(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Writer shutdown failed");
            }
        }
    }

    /// Whether a writer is currently attached.
    pub async fn is_attached(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Send `command` and wait for its completion.
    ///
    /// Returns `false` if the write failed or the device did not complete in time.
    /// Write failures are also published as [`DeviceEvent::TransportError`].
    pub async fn send(&self, command: &Command) -> bool {
        match self.send_command(command).await {
            Ok(()) => true,
            Err(e) => {
                warn!(command = %command, error = %e, "Command failed");
                false
            }
        }
    }

    /// [`Self::send`] with the failure reason.
    pub async fn send_command(&self, command: &Command) -> AppResult<()> {
        if !self.link.wait_command_clear(self.timeout).await {
            warn!(
                command = %command,
                timeout_ms = self.timeout.as_millis() as u64,
                "Previous command still outstanding, sending anyway"
            );
        }

        self.link.set_outstanding(true);
        let line = command.to_wire();
        debug!(command = %line, "Sending command");

        if let Err(e) = self.write_line(&line).await {
            self.link.set_outstanding(false);
            self.events.publish(DeviceEvent::TransportError(e.to_string()));
            return Err(e);
        }

        if self.link.wait_command_clear(self.timeout).await {
            Ok(())
        } else {
            Err(DaqError::Timeout {
                operation: "command completion",
                timeout: self.timeout,
            })
        }
    }

    async fn write_line(&self, line: &str) -> AppResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| DaqError::Transport("link is not open".into()))?;

        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(LINE_TERMINATOR);

        writer
            .write_all(&bytes)
            .await
            .map_err(|e| DaqError::Transport(format!("write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| DaqError::Transport(format!("flush failed: {e}")))
    }

    /// Wait for the device to announce itself.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let connected = self.link.wait_connected(timeout).await;
        if !connected {
            warn!(timeout_ms = timeout.as_millis() as u64, "Link did not connect");
        }
        connected
    }
}
