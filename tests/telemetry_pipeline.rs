//! Byte stream to channel buffers, without a transport.
//!
//! Feeds the framer and state machine directly so chunking and timing are under the
//! test's control.

use adc_control::config::{AcquisitionConfig, ChannelMappings};
use adc_control::data::ChannelRegistry;
use adc_control::protocol::{LineFramer, LineKind, LinkShared, LinkState, ProtocolMachine};
use adc_control::{DeviceEvent, EventBus};
use std::sync::Arc;

const SESSION: &[u8] =
    b"READY...\r\nACQ.\r\n0A: 1.000000\r\n0A: 2.000000\r\n0B:-4.5\r\n0A: 3.000000\r\nxx:1\r\nEND.\r\nPARSED.\r\n";

struct Pipeline {
    link: Arc<LinkShared>,
    registry: Arc<ChannelRegistry>,
    machine: ProtocolMachine,
    framer: LineFramer,
    clock: f64,
}

impl Pipeline {
    fn new(events: &EventBus, window: usize) -> Self {
        let link = Arc::new(LinkShared::new());
        link.mark_connected();
        let acquisition = AcquisitionConfig {
            averaging_window: window,
            initial_capacity: 2,
            ..AcquisitionConfig::default()
        };
        let registry = Arc::new(
            ChannelRegistry::new(events.clone(), &acquisition, ChannelMappings::default(), 0.0)
                .unwrap(),
        );
        let machine = ProtocolMachine::new(link.clone(), registry.clone(), events.clone());
        Self {
            link,
            registry,
            machine,
            framer: LineFramer::new(),
            clock: 100.0,
        }
    }

    fn feed(&mut self, chunk: &[u8]) -> Vec<LineKind> {
        let mut kinds = Vec::new();
        for line in self.framer.feed(chunk) {
            self.clock += 1.0;
            kinds.push(self.machine.handle_line_at(&line, self.clock));
        }
        kinds
    }

    fn series(&self, code: u8) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
        self.registry.channel(code).unwrap().with_buffer(|b| {
            (
                b.raw().iter().map(|p| (p.x, p.y)).collect(),
                b.calculated().iter().map(|p| (p.x, p.y)).collect(),
            )
        })
    }
}

// =============================================================================
// Whole session
// =============================================================================

#[test]
fn test_session_classification() {
    let events = EventBus::default();
    let mut pipeline = Pipeline::new(&events, 2);

    let kinds = pipeline.feed(SESSION);
    assert_eq!(kinds.len(), 9);
    assert_eq!(kinds[0], LineKind::Terminal);
    assert_eq!(kinds[1], LineKind::AcquisitionStart);
    assert_eq!(
        kinds[2],
        LineKind::Telemetry {
            channel: 0x0A,
            value: 1.0
        }
    );
    assert!(matches!(kinds[6], LineKind::MalformedTelemetry(_)));
    assert_eq!(kinds[7], LineKind::AcquisitionEnd);
    assert_eq!(kinds[8], LineKind::Completion);

    assert_eq!(pipeline.link.state(), LinkState::Connected);
    assert_eq!(pipeline.registry.codes(), vec![0x0A, 0x0B]);
}

#[test]
fn test_averaged_series_relative_to_acquisition_start() {
    let events = EventBus::default();
    let mut pipeline = Pipeline::new(&events, 2);
    pipeline.feed(SESSION);

    // ACQ. is line 2 (t=102), channel 0A samples arrive at t=103, 104, 106
    let (raw, calculated) = pipeline.series(0x0A);
    assert_eq!(raw, vec![(103.0, 1.0), (104.0, 2.0), (106.0, 3.0)]);
    assert_eq!(calculated, vec![(1.0, 1.0), (2.0, 1.5), (4.0, 2.5)]);
}

#[test]
fn test_chunking_does_not_change_result() {
    let events = EventBus::default();
    let mut whole = Pipeline::new(&events, 3);
    whole.feed(SESSION);

    for chunk_size in [1, 2, 5, 7, 64] {
        let mut split = Pipeline::new(&events, 3);
        for chunk in SESSION.chunks(chunk_size) {
            split.feed(chunk);
        }
        assert_eq!(split.series(0x0A), whole.series(0x0A), "chunk size {chunk_size}");
        assert_eq!(split.series(0x0B), whole.series(0x0B), "chunk size {chunk_size}");
        assert!(split.framer.pending().is_empty());
    }
}

#[test]
fn test_telemetry_outside_acquisition_is_terminal() {
    let events = EventBus::default();
    let mut pipeline = Pipeline::new(&events, 1);

    let kinds = pipeline.feed(b"0A: 1.0\n");
    assert_eq!(kinds, vec![LineKind::Terminal]);
    assert!(pipeline.registry.is_empty());
}

#[test]
fn test_event_order_for_first_sample() {
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let mut pipeline = Pipeline::new(&events, 1);

    pipeline.feed(b"ACQ.\n0C:0.25\n0C:0.5\n0C:0.75\nE!\n");

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen[0], DeviceEvent::AcquisitionStarted);
    assert_eq!(seen[1], DeviceEvent::ChannelCreated(0x0C));
    assert!(matches!(seen[2], DeviceEvent::Sample { channel: 0x0C, .. }));
    // Initial capacity 2: the third sample grows the buffer
    assert!(seen.contains(&DeviceEvent::LayoutChanged(0x0C)));
    assert_eq!(seen.last(), Some(&DeviceEvent::DeviceError("E!".into())));
    assert_eq!(
        seen.iter()
            .filter(|e| matches!(e, DeviceEvent::ChannelCreated(_)))
            .count(),
        1
    );
}
