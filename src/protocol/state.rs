//! Connection/acquisition state for one physical link.
//!
//! `Disconnected -> Connected <-> Acquiring`, plus an orthogonal "command outstanding"
//! flag. Both live in `tokio::sync::watch` cells: reads are whole-value snapshots, and
//! waiters are woken by the write instead of polling.
//!
//! The state machine is the only writer of the acquisition state and the outstanding
//! flag's clear edge. It also marks the link connected when the device announces
//! itself; an open port alone is not a connection.

use std::time::Duration;
use tokio::sync::watch;

/// Where the link is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No device on the other end, or it has not announced itself
    Disconnected,
    /// Device announced itself; idle
    Connected,
    /// Telemetry is streaming
    Acquiring,
}

impl LinkState {
    /// `true` for every state but [`LinkState::Disconnected`].
    pub fn is_connected(self) -> bool {
        !matches!(self, LinkState::Disconnected)
    }
}

/// Shared link flags. Hold it in an `Arc`; one instance per link.
#[derive(Debug)]
pub struct LinkShared {
    state: watch::Sender<LinkState>,
    outstanding: watch::Sender<bool>,
}

impl Default for LinkShared {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkShared {
    /// A disconnected link with no command outstanding.
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(LinkState::Disconnected),
            outstanding: watch::Sender::new(false),
        }
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Connected or acquiring.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Telemetry is streaming.
    pub fn is_acquiring(&self) -> bool {
        self.state() == LinkState::Acquiring
    }

    /// Connected and not acquiring.
    pub fn ready_for_acquisition(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Whether a sent command still awaits its completion line.
    pub fn command_outstanding(&self) -> bool {
        *self.outstanding.borrow()
    }

    /// Watch receiver that sees every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Called when the device's ready line arrives.
    ///
    /// Has no effect on a link that is already connected or acquiring.
    pub fn mark_connected(&self) {
        self.state.send_if_modified(|state| {
            if *state == LinkState::Disconnected {
                *state = LinkState::Connected;
                true
            } else {
                false
            }
        });
    }

    /// Reset everything: link down, no acquisition, nothing outstanding.
    pub fn mark_disconnected(&self) {
        self.state.send_replace(LinkState::Disconnected);
        self.outstanding.send_replace(false);
    }

    /// Returns the previous state.
    pub(crate) fn set_state(&self, next: LinkState) -> LinkState {
        self.state.send_replace(next)
    }

    pub(crate) fn set_outstanding(&self, outstanding: bool) {
        self.outstanding.send_replace(outstanding);
    }

    /// Wait until no command is outstanding. Returns `false` on timeout.
    pub async fn wait_command_clear(&self, timeout: Duration) -> bool {
        let mut rx = self.outstanding.subscribe();
        let cleared = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|outstanding| !*outstanding)).await,
            Ok(Ok(_))
        );
        cleared
    }

    /// Wait until the link reports connected. Returns `false` on timeout.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        self.wait_for_state(LinkState::is_connected, timeout).await
    }

    /// Wait until `predicate` holds for the current state. Returns `false` on timeout.
    pub async fn wait_for_state(
        &self,
        predicate: impl Fn(LinkState) -> bool,
        timeout: Duration,
    ) -> bool {
        let mut rx = self.state.subscribe();
        let reached = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|state| predicate(*state))).await,
            Ok(Ok(_))
        );
        reached
    }
}
