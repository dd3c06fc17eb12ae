//! Integration tests for the controller over an in-memory link.
//!
//! A task on the far end of a `tokio::io::duplex` plays the firmware: it announces
//! itself, toggles acquisition on `A`, streams a few telemetry lines and acknowledges
//! every command with the completion signature. `A<seconds>` starts a timed run that
//! the device ends on its own.

use adc_control::config::AppConfig;
use adc_control::protocol::command::Command;
use adc_control::protocol::LinkState;
use adc_control::register::layout::{DeviceLayout, REGULATOR_SETPOINT};
use adc_control::register::{DeviceValue, RegisterSpace};
use adc_control::{Controller, DaqError, DeviceEvent};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.link.port = "sim".into();
    config.link.completion_timeout_ms = 500;
    config.link.connection_timeout_ms = 500;
    config.acquisition.initial_capacity = 4;
    config
}

/// Returns every command line the device received, once the host closes the link.
fn simulated_device(device: DuplexStream) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let (rd, mut wr) = tokio::io::split(device);
        let mut lines = BufReader::new(rd).lines();
        let mut received = Vec::new();
        let mut acquiring = false;
        let mut deadline: Option<Instant> = None;

        wr.write_all(b"READY...\r\n").await.unwrap();
        loop {
            let expiry = deadline;
            let timer = async move {
                match expiry {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                line = lines.next_line() => {
                    let Ok(Some(line)) = line else { break };
                    received.push(line.clone());
                    if let Some(argument) = line.strip_prefix('A') {
                        if acquiring {
                            wr.write_all(b"END.\n").await.unwrap();
                            deadline = None;
                        } else {
                            wr.write_all(b"ACQ.\n1A: 3.500000\n02: -1.250000\nbad line\n")
                                .await
                                .unwrap();
                            deadline = argument
                                .parse::<u64>()
                                .ok()
                                .map(|secs| Instant::now() + Duration::from_secs(secs));
                        }
                        acquiring = !acquiring;
                    }
                    wr.write_all(b"PARSED.\n").await.unwrap();
                }
                () = timer => {
                    wr.write_all(b"END.\n").await.unwrap();
                    acquiring = false;
                    deadline = None;
                }
            }
        }
        received
    })
}

fn drain(rx: &mut broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn wait_for(
    rx: &mut broadcast::Receiver<DeviceEvent>,
    predicate: impl Fn(&DeviceEvent) -> bool,
) -> bool {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return true,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    })
    .await
    .unwrap_or(false)
}

#[tokio::test]
async fn test_acquisition_round_trip() {
    let (host, device) = tokio::io::duplex(1024);
    let device_task = simulated_device(device);

    let controller = Controller::new(test_config()).unwrap();
    let mut rx = controller.subscribe();

    assert!(controller.attach(host).await);
    assert_eq!(controller.link_state(), LinkState::Connected);

    assert!(controller.start_acquisition().await);
    assert!(controller.is_acquiring());

    // Telemetry precedes the completion line, so it is stored by now
    let registry = controller.registry();
    assert_eq!(registry.codes(), vec![0x02, 0x1A]);
    let value = registry
        .channel(0x1A)
        .unwrap()
        .with_buffer(|b| b.raw()[0].y);
    assert_eq!(value, 3.5);

    assert!(controller.stop_acquisition().await);
    assert_eq!(controller.link_state(), LinkState::Connected);

    assert!(controller.disconnect().await);
    assert!(!controller.is_connected());

    let received = device_task.await.unwrap();
    assert_eq!(received, vec!["A", "A"]);

    let events = drain(&mut rx);
    assert!(events.contains(&DeviceEvent::Connected));
    assert!(events.contains(&DeviceEvent::Terminal("READY...".into())));
    assert!(events.contains(&DeviceEvent::AcquisitionStarted));
    assert!(events.contains(&DeviceEvent::ChannelCreated(0x1A)));
    assert!(events.contains(&DeviceEvent::AcquisitionFinished));
    assert!(events.contains(&DeviceEvent::Disconnected { unexpected: false }));
    assert!(events
        .iter()
        .any(|e| matches!(e, DeviceEvent::DataError { line, .. } if line == "bad line")));
}

#[tokio::test]
async fn test_attach_to_silent_device_fails() {
    let (host, mut device) = tokio::io::duplex(256);
    let mut config = test_config();
    config.link.connection_timeout_ms = 50;
    let controller = Controller::new(config).unwrap();
    let mut rx = controller.subscribe();

    assert!(!controller.attach(host).await);
    assert_eq!(controller.link_state(), LinkState::Disconnected);
    assert!(!controller.start_acquisition().await);

    // The stream was handed back, so the device side sees end of file
    let mut buf = [0u8; 8];
    assert_eq!(device.read(&mut buf).await.unwrap(), 0);

    let events = drain(&mut rx);
    assert!(!events.contains(&DeviceEvent::Connected));
    assert!(!events
        .iter()
        .any(|e| matches!(e, DeviceEvent::Disconnected { .. })));
}

#[tokio::test]
async fn test_acquisition_requires_connection() {
    let controller = Controller::new(test_config()).unwrap();
    assert!(!controller.start_acquisition().await);
    assert!(!controller.stop_acquisition().await);
    assert!(!controller.disconnect().await);
}

#[tokio::test]
async fn test_unexpected_disconnect() {
    let (host, mut device) = tokio::io::duplex(256);
    let controller = Controller::new(test_config()).unwrap();
    let mut rx = controller.subscribe();

    device.write_all(b"READY...\n").await.unwrap();
    assert!(controller.attach(host).await);
    drop(device);

    assert!(wait_for(&mut rx, |e| *e == DeviceEvent::Disconnected { unexpected: true }).await);
    assert_eq!(controller.link_state(), LinkState::Disconnected);
    assert!(!controller.send(&Command::toggle_acquisition()).await);
}

#[tokio::test]
async fn test_acquisition_duration_is_enforced_by_device() {
    let (host, device) = tokio::io::duplex(1024);
    let device_task = simulated_device(device);

    let mut config = test_config();
    config.acquisition.duration_secs = Some(1);
    let controller = Controller::new(config).unwrap();
    let mut rx = controller.subscribe();

    assert!(controller.attach(host).await);
    assert!(controller.start_acquisition().await);
    assert!(controller.is_acquiring());
    assert!(wait_for(&mut rx, |e| *e == DeviceEvent::AcquisitionFinished).await);
    assert_eq!(controller.link_state(), LinkState::Connected);

    controller.disconnect().await;
    // The host sent the duration once and never a stop
    assert_eq!(device_task.await.unwrap(), vec!["A1"]);
}

#[tokio::test]
async fn test_write_register_sends_address_and_words() {
    let (host, device) = tokio::io::duplex(1024);
    let device_task = simulated_device(device);

    let controller = Controller::new(test_config()).unwrap();
    controller
        .configure_registers(&DeviceLayout {
            max_adc_modules: 1,
            adc_channels_per_chip: 2,
            present_adc_channels: 2,
            max_dac_modules: 1,
            present_dac_modules: 1,
            aio_num: 1,
            motors_num: 1,
        })
        .unwrap();
    assert!(controller.attach(host).await);

    let written = controller
        .write_register(RegisterSpace::Holding, REGULATOR_SETPOINT, DeviceValue::F32(1.5))
        .await
        .unwrap();
    assert!(written);

    let expected = {
        let registers = controller.registers();
        let register = registers
            .get(RegisterSpace::Holding, REGULATOR_SETPOINT)
            .unwrap();
        assert_eq!(register.value(), &DeviceValue::F32(1.5));
        Command::write_registers(register.address(), &register.to_words())
            .unwrap()
            .to_wire()
    };
    assert!(expected.starts_with("W06"));

    controller.disconnect().await;
    assert_eq!(device_task.await.unwrap(), vec![expected]);
}

#[tokio::test]
async fn test_write_register_rejects_bad_requests() {
    let controller = Controller::new(test_config()).unwrap();
    controller
        .configure_registers(&DeviceLayout::default())
        .unwrap();

    let input = controller
        .write_register(RegisterSpace::Input, "TEMP", DeviceValue::F32(1.0))
        .await;
    assert!(matches!(input, Err(DaqError::Configuration(_))));

    let mismatch = controller
        .write_register(RegisterSpace::Holding, REGULATOR_SETPOINT, DeviceValue::U16(1))
        .await;
    assert!(matches!(mismatch, Err(DaqError::RegisterType { .. })));

    let missing = controller
        .write_register(RegisterSpace::Holding, "NOPE", DeviceValue::F32(1.0))
        .await;
    assert!(matches!(missing, Err(DaqError::RegisterNotFound(_))));
}

#[tokio::test]
async fn test_device_error_reported_in_any_state() {
    let (host, mut device) = tokio::io::duplex(256);
    let controller = Controller::new(test_config()).unwrap();
    let mut rx = controller.subscribe();

    device.write_all(b"READY...\n").await.unwrap();
    assert!(controller.attach(host).await);
    device.write_all(b"ERR!\n").await.unwrap();

    assert!(wait_for(&mut rx, |e| *e == DeviceEvent::DeviceError("ERR!".into())).await);
    assert_eq!(controller.link_state(), LinkState::Connected);
}

#[tokio::test]
async fn test_averaging_window_change_recalculates() {
    let (host, mut device) = tokio::io::duplex(1024);
    let controller = Controller::new(test_config()).unwrap();
    let mut rx = controller.subscribe();
    device.write_all(b"READY...\n").await.unwrap();
    assert!(controller.attach(host).await);

    device
        .write_all(b"ACQ.\n01:2.0\n01:4.0\n01:6.0\nEND.\n")
        .await
        .unwrap();
    assert!(wait_for(&mut rx, |e| *e == DeviceEvent::AcquisitionFinished).await);

    controller.set_averaging_window(2, true);
    let averages: Vec<f64> = controller
        .registry()
        .channel(1)
        .unwrap()
        .with_buffer(|b| b.calculated().iter().map(|p| p.y).collect());
    assert_eq!(averages, vec![2.0, 3.0, 5.0]);
}
