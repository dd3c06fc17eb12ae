//! Channel registry: the set of telemetry channels seen on the link.
//!
//! Channels are created the first time a telemetry line names an unseen code and live
//! until the registry is dropped; a reset clears their contents but keeps them. Each
//! channel has its own lock, so a reader snapshotting one channel never stalls the
//! writer on another.

use super::channel::{ChannelBuffer, Point};
use super::expression::ChannelExpression;
use crate::config::{AcquisitionConfig, ChannelMappings};
use crate::error::AppResult;
use crate::events::{DeviceEvent, EventBus};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Display metadata for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMeta {
    /// Shown in place of the hex code
    pub name: String,
    /// Hidden channels still record
    pub enabled: bool,
    /// Plot color, if one was configured
    pub color: Option<String>,
}

/// One channel: its buffer plus display metadata, each behind its own lock.
#[derive(Debug)]
pub struct TelemetryChannel {
    code: u8,
    buffer: Mutex<ChannelBuffer>,
    meta: Mutex<ChannelMeta>,
}

impl TelemetryChannel {
    /// Channel code from the telemetry line.
    pub fn code(&self) -> u8 {
        self.code
    }

    /// Copy of the display metadata.
    pub fn meta(&self) -> ChannelMeta {
        self.meta.lock().clone()
    }

    /// Display name.
    pub fn name(&self) -> String {
        self.meta.lock().name.clone()
    }

    /// Rename for display.
    pub fn set_name(&self, name: impl Into<String>) {
        self.meta.lock().name = name.into();
    }

    /// Whether the channel is shown.
    pub fn is_enabled(&self) -> bool {
        self.meta.lock().enabled
    }

    /// Show or hide the channel; recording is unaffected.
    pub fn set_enabled(&self, enabled: bool) {
        self.meta.lock().enabled = enabled;
    }

    /// Plot color; `None` lets the renderer choose.
    pub fn set_color(&self, color: Option<String>) {
        self.meta.lock().color = color;
    }

    /// Run `f` against a consistent view of the buffer.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&ChannelBuffer) -> R) -> R {
        f(&self.buffer.lock())
    }

    /// Points stored so far.
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// No points stored.
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Owned copy of both series for export or rendering.
    pub fn snapshot(&self) -> ChannelSnapshot {
        let meta = self.meta();
        let buffer = self.buffer.lock();
        ChannelSnapshot {
            code: self.code,
            name: meta.name,
            enabled: meta.enabled,
            color: meta.color,
            raw: buffer.raw().to_vec(),
            calculated: buffer.calculated().to_vec(),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut ChannelBuffer) -> R) -> R {
        f(&mut self.buffer.lock())
    }
}

/// Owned copy of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    /// Channel code
    pub code: u8,
    /// Display name
    pub name: String,
    /// Visibility
    pub enabled: bool,
    /// Plot color
    pub color: Option<String>,
    /// Samples as received
    pub raw: Vec<Point>,
    /// Derived points, same length as `raw`
    pub calculated: Vec<Point>,
}

#[derive(Debug)]
struct Settings {
    initial_capacity: usize,
    window: usize,
    start_time: f64,
}

/// Every channel seen on the link, keyed by code.
#[derive(Debug)]
pub struct ChannelRegistry {
    channels: RwLock<BTreeMap<u8, Arc<TelemetryChannel>>>,
    settings: RwLock<Settings>,
    mappings: ChannelMappings,
    expressions: BTreeMap<u8, ChannelExpression>,
    events: EventBus,
}

impl ChannelRegistry {
    /// Fails if a configured channel expression does not parse.
    pub fn new(
        events: EventBus,
        acquisition: &AcquisitionConfig,
        mappings: ChannelMappings,
        start_time: f64,
    ) -> AppResult<Self> {
        let expressions = mappings
            .expressions
            .iter()
            .map(|(code, source)| Ok((*code, ChannelExpression::parse(source)?)))
            .collect::<AppResult<BTreeMap<_, _>>>()?;

        Ok(Self {
            channels: RwLock::new(BTreeMap::new()),
            settings: RwLock::new(Settings {
                initial_capacity: acquisition.channel_capacity(),
                window: acquisition.averaging_window.max(1),
                start_time,
            }),
            mappings,
            expressions,
            events,
        })
    }

    /// Store one telemetry point, creating the channel on first sight.
    ///
    /// The point is stored before any notification is published.
    pub fn record(&self, code: u8, value: f64, timestamp: f64) {
        let (channel, created) = self.get_or_create(code);
        if created {
            info!(channel = code, "New telemetry channel");
            self.events.publish(DeviceEvent::ChannelCreated(code));
        }

        if channel.update(|buffer| buffer.add_sample(value, timestamp)) {
            debug!(channel = code, "Channel storage grew");
            self.events.publish(DeviceEvent::LayoutChanged(code));
        }

        self.events.publish(DeviceEvent::Sample {
            channel: code,
            value,
            timestamp,
        });
    }

    fn get_or_create(&self, code: u8) -> (Arc<TelemetryChannel>, bool) {
        if let Some(channel) = self.channels.read().get(&code) {
            return (channel.clone(), false);
        }

        let mut channels = self.channels.write();
        if let Some(channel) = channels.get(&code) {
            return (channel.clone(), false);
        }
        let channel = Arc::new(self.build_channel(code));
        channels.insert(code, channel.clone());
        (channel, true)
    }

    fn build_channel(&self, code: u8) -> TelemetryChannel {
        let settings = self.settings.read();
        let mut buffer =
            ChannelBuffer::new(settings.initial_capacity, settings.window, settings.start_time);
        buffer.set_expression(self.expressions.get(&code).cloned());

        let meta = ChannelMeta {
            name: self
                .mappings
                .names
                .get(&code)
                .cloned()
                .unwrap_or_else(|| format!("{code:X}")),
            enabled: self.mappings.enabled.get(&code).copied().unwrap_or(true),
            color: self.mappings.colors.get(&code).cloned(),
        };

        TelemetryChannel {
            code,
            buffer: Mutex::new(buffer),
            meta: Mutex::new(meta),
        }
    }

    /// Channel with `code`, if it has been seen.
    pub fn channel(&self, code: u8) -> Option<Arc<TelemetryChannel>> {
        self.channels.read().get(&code).cloned()
    }

    /// Known channel codes in ascending order.
    pub fn codes(&self) -> Vec<u8> {
        self.channels.read().keys().copied().collect()
    }

    /// Number of known channels.
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// No telemetry seen yet.
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    /// Owned copies of every channel in code order.
    pub fn snapshots(&self) -> Vec<ChannelSnapshot> {
        self.all().iter().map(|c| c.snapshot()).collect()
    }

    fn all(&self) -> Vec<Arc<TelemetryChannel>> {
        self.channels.read().values().cloned().collect()
    }

    /// Averaging window applied to new samples.
    pub fn window(&self) -> usize {
        self.settings.read().window
    }

    /// Change the averaging window of every channel and of channels created later.
    ///
    /// With `recalculate` the derived series are rebuilt from the raw samples;
    /// otherwise only future samples see the new window.
    pub fn set_window(&self, window: usize, recalculate: bool) {
        let window = window.max(1);
        self.settings.write().window = window;
        for channel in self.all() {
            channel.update(|buffer| {
                buffer.set_window(window);
                if recalculate {
                    buffer.recalculate();
                }
            });
            if recalculate {
                self.events.publish(DeviceEvent::LayoutChanged(channel.code));
            }
        }
    }

    /// Replace one channel's math. `None` removes it. Existing points are rebuilt.
    pub fn set_expression(&self, code: u8, source: Option<&str>) -> AppResult<()> {
        let expression = source.map(ChannelExpression::parse).transpose()?;
        if let Some(channel) = self.channel(code) {
            channel.update(|buffer| {
                buffer.set_expression(expression);
                buffer.recalculate();
            });
            self.events.publish(DeviceEvent::LayoutChanged(code));
        }
        Ok(())
    }

    /// Start time for channels created from now on.
    pub fn set_start_time(&self, start_time: f64) {
        self.settings.write().start_time = start_time;
    }

    /// Empty every channel, keeping the channels themselves.
    pub fn clear(&self) {
        for channel in self.all() {
            channel.update(ChannelBuffer::clear);
            self.events.publish(DeviceEvent::LayoutChanged(channel.code));
        }
    }

    /// Release unused capacity on every channel.
    pub fn trim(&self) {
        for channel in self.all() {
            if channel.update(ChannelBuffer::trim) {
                self.events.publish(DeviceEvent::LayoutChanged(channel.code));
            }
        }
    }
}
