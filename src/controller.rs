//! Controller: one physical link and everything attached to it.
//!
//! The controller owns the link state, the event bus, the channel registry, the
//! register map and the command rendezvous, and runs the reader task that feeds the
//! line framer and protocol state machine. Callers get boolean results for link and
//! acquisition operations; details go out as [`DeviceEvent`]s and log records.
//!
//! # Example
//! ```no_run
//! use adc_control::{config::AppConfig, controller::Controller};
//!
//! # async fn run() -> adc_control::error::AppResult<()> {
//! let controller = Controller::new(AppConfig::load()?)?;
//! if controller.connect().await && controller.start_acquisition().await {
//!     // telemetry now flows into controller.registry()
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::AppConfig;
use crate::data::{now_seconds, ChannelRegistry};
use crate::error::{AppResult, DaqError};
use crate::events::{DeviceEvent, EventBus};
use crate::protocol::{Command, LineFramer, LinkShared, LinkState, ProtocolMachine, Rendezvous};
use crate::register::{DeviceLayout, DeviceValue, RegisterMap, RegisterSpace};
use crate::transport::{self, SerialPortIO};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

const READ_CHUNK: usize = 1024;

/// Host side of one controller link.
pub struct Controller {
    config: AppConfig,
    link: Arc<LinkShared>,
    events: EventBus,
    registry: Arc<ChannelRegistry>,
    registers: RwLock<RegisterMap>,
    rendezvous: Arc<Rendezvous>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Controller {
    /// Validate `config` and build an unconnected controller.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let events = EventBus::new(config.link.event_capacity);
        let link = Arc::new(LinkShared::new());
        let registry = Arc::new(ChannelRegistry::new(
            events.clone(),
            &config.acquisition,
            config.channel_mappings()?,
            now_seconds(),
        )?);
        let rendezvous = Arc::new(Rendezvous::new(
            link.clone(),
            events.clone(),
            config.link.completion_timeout(),
        ));

        Ok(Self {
            config,
            link,
            events,
            registry,
            registers: RwLock::new(RegisterMap::configuration()?),
            rendezvous,
            reader: Mutex::new(None),
        })
    }

    /// The validated configuration this controller was built with.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The bus notifications go out on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// New receiver for device notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Telemetry channels seen on this link.
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Current link state.
    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Connected or acquiring.
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Acquisition is running.
    pub fn is_acquiring(&self) -> bool {
        self.link.is_acquiring()
    }

    /// Open the configured serial port and attach to it.
    pub async fn connect(&self) -> bool {
        match transport::open_port(&self.config.link).await {
            Ok(port) => self.attach(port).await,
            Err(e) => {
                error!(port = %self.config.link.port, error = %e, "Failed to open link");
                self.events.publish(DeviceEvent::TransportError(e.to_string()));
                false
            }
        }
    }

    /// Take over an already opened byte stream.
    ///
    /// Any previous link is closed first. Returns whether the device announced
    /// itself within the connection timeout; if it stays silent the stream is
    /// closed again.
    pub async fn attach<S>(&self, io: S) -> bool
    where
        S: SerialPortIO + 'static,
    {
        let attached = self.reader.lock().is_some();
        if attached {
            self.disconnect().await;
        }

        let (reader, writer) = tokio::io::split(io);
        self.rendezvous.attach(Box::new(writer)).await;

        let machine = ProtocolMachine::new(
            self.link.clone(),
            self.registry.clone(),
            self.events.clone(),
        );
        let handle = tokio::spawn(read_loop(
            reader,
            machine,
            self.link.clone(),
            self.rendezvous.clone(),
            self.events.clone(),
        ));
        *self.reader.lock() = Some(handle);

        let connected = self
            .rendezvous
            .wait_connected(self.config.link.connection_timeout())
            .await;
        if connected {
            info!("Link connected");
            self.events.publish(DeviceEvent::Connected);
        } else {
            self.disconnect().await;
        }
        connected
    }

    /// Close the link. Returns `false` if it was not connected.
    pub async fn disconnect(&self) -> bool {
        let reader = self.reader.lock().take();
        if let Some(handle) = reader {
            handle.abort();
            let _ = handle.await;
        }
        self.rendezvous.detach().await;

        let was_connected = self.link.is_connected();
        self.link.mark_disconnected();
        if was_connected {
            info!("Link disconnected");
            self.events
                .publish(DeviceEvent::Disconnected { unexpected: false });
        }
        was_connected
    }

    /// Send an arbitrary command and wait for its completion.
    pub async fn send(&self, command: &Command) -> bool {
        self.rendezvous.send(command).await
    }

    /// Start acquisition. Only valid while connected and idle.
    ///
    /// With `acquisition.duration_secs` configured the duration travels with the
    /// command and the device ends the run itself; its `END.` line returns the link
    /// to connected.
    pub async fn start_acquisition(&self) -> bool {
        if !self.link.ready_for_acquisition() {
            warn!(state = ?self.link.state(), "Not ready for acquisition");
            return false;
        }
        let command = Command::start_acquisition(self.config.acquisition.duration_secs);
        toggle_acquisition(&self.link, &self.rendezvous, &command, LinkState::Acquiring).await
    }

    /// Stop acquisition. Only valid while acquiring.
    pub async fn stop_acquisition(&self) -> bool {
        if !self.link.is_acquiring() {
            warn!(state = ?self.link.state(), "No acquisition to stop");
            return false;
        }
        toggle_acquisition(
            &self.link,
            &self.rendezvous,
            &Command::toggle_acquisition(),
            LinkState::Connected,
        )
        .await
    }

    /// Change the averaging window for all channels.
    pub fn set_averaging_window(&self, window: usize, recalculate: bool) {
        self.registry.set_window(window, recalculate);
    }

    /// Read access to the current register map.
    pub fn registers(&self) -> RwLockReadGuard<'_, RegisterMap> {
        self.registers.read()
    }

    /// Rebuild the register map for a device with `layout`.
    pub fn configure_registers(&self, layout: &DeviceLayout) -> AppResult<()> {
        let map = RegisterMap::standard(layout)?;
        *self.registers.write() = map;
        Ok(())
    }

    /// Store words reported by the device for one register.
    pub fn load_register(&self, space: RegisterSpace, name: &str, words: &[u16]) -> AppResult<()> {
        let mut map = self.registers.write();
        let register = map
            .get_mut(space, name)
            .ok_or_else(|| DaqError::RegisterNotFound(format!("{space}:{name}")))?;
        register.set_words(words)
    }

    /// Store `value` in a holding register and send it to the device.
    ///
    /// Unknown registers, input registers and type mismatches are errors; the
    /// boolean is the command result.
    #[instrument(skip(self, space, value), fields(space = %space))]
    pub async fn write_register(
        &self,
        space: RegisterSpace,
        name: &str,
        value: DeviceValue,
    ) -> AppResult<bool> {
        if space == RegisterSpace::Input {
            return Err(DaqError::Configuration(format!(
                "Register '{name}' is read-only"
            )));
        }

        let command = {
            let mut map = self.registers.write();
            let register = map.set_value(space, name, value)?;
            Command::write_registers(register.address(), &register.to_words())?
        };
        Ok(self.rendezvous.send(&command).await)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
    }
}

/// Send a toggle and wait for the link to reach `target`.
async fn toggle_acquisition(
    link: &LinkShared,
    rendezvous: &Rendezvous,
    command: &Command,
    target: LinkState,
) -> bool {
    match rendezvous.send_command(command).await {
        Ok(()) | Err(DaqError::Timeout { .. }) => {}
        Err(e) => {
            warn!(error = %e, "Acquisition toggle failed");
            return false;
        }
    }
    let reached = link
        .wait_for_state(|state| state == target, rendezvous.timeout())
        .await;
    if !reached {
        warn!(target = ?target, "Device did not change acquisition state");
    }
    reached
}

/// Drive framer and state machine until the stream ends.
async fn read_loop<R>(
    mut reader: R,
    machine: ProtocolMachine,
    link: Arc<LinkShared>,
    rendezvous: Arc<Rendezvous>,
    events: EventBus,
) where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                warn!("Link closed by device");
                break;
            }
            Ok(n) => {
                for line in framer.feed(&chunk[..n]) {
                    machine.handle_line(&line);
                }
            }
            Err(e) => {
                error!(error = %e, "Link read failed");
                events.publish(DeviceEvent::TransportError(e.to_string()));
                break;
            }
        }
    }

    rendezvous.detach().await;
    link.mark_disconnected();
    events.publish(DeviceEvent::Disconnected { unexpected: true });
}
