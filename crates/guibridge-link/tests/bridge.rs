use std::future::Future;
use std::time::Duration;

use guibridge_frame::{Frame, Samples};
use guibridge_link::{
    Bridge, BridgeConfig, ControlMessage, DeviceConfig, DeviceConnection, DiagnosticKind,
    ElementType, HandshakeConfig, LinkError, ReconnectPolicy, SendStatus, SessionState,
};
use guibridge_transport::{MemoryConnector, MemoryListener};
use tokio::io::DuplexStream;
use tokio::task::LocalSet;

fn test_config(host: &str) -> BridgeConfig {
    BridgeConfig {
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            ..ReconnectPolicy::default()
        },
        ping_interval: None,
        ..BridgeConfig::for_host(host)
    }
}

async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

async fn eventually(mut check: impl FnMut() -> bool) {
    within(async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
}

async fn accept_device(listener: &mut MemoryListener) -> DeviceConnection<DuplexStream> {
    let (stream, _) = within(listener.accept()).await.unwrap();
    within(DeviceConnection::accept_stream(stream, &DeviceConfig::default()))
        .await
        .unwrap()
}

async fn open_bridge(host: &str) -> (Bridge, DeviceConnection<DuplexStream>, MemoryListener) {
    let (connector, mut listener) = MemoryConnector::pair();
    let bridge = Bridge::with_connector(test_config(host), connector).unwrap();
    let device = accept_device(&mut listener).await;
    within(bridge.wait_open()).await.unwrap();
    (bridge, device, listener)
}

#[tokio::test]
async fn float_buffer_reaches_device_on_data_channel() {
    LocalSet::new()
        .run_until(async {
            let (connector, mut listener) = MemoryConnector::pair();
            let bridge = Bridge::with_connector(test_config("192.168.7.2"), connector).unwrap();

            let (stream, addr) = within(listener.accept()).await.unwrap();
            assert_eq!(addr.to_string(), "192.168.7.2:5555");
            let mut device = within(DeviceConnection::accept_stream(stream, &DeviceConfig::default()))
                .await
                .unwrap();
            within(bridge.wait_open()).await.unwrap();

            let status = bridge.send_buffer(0, ElementType::Float32, &[0.6, 0.5, 1.0]);
            assert_eq!(status, SendStatus::Queued);

            let frame = within(device.recv()).await.unwrap().unwrap();
            assert_eq!(frame.channel, "gui_data");
            assert_eq!(frame.index, 0);
            assert_eq!(
                frame.samples().unwrap(),
                Samples::Float32(vec![0.6, 0.5, 1.0])
            );
        })
        .await;
}

#[tokio::test]
async fn inbound_buffer_is_readable_after_update() {
    LocalSet::new()
        .run_until(async {
            let (bridge, mut device, _listener) = open_bridge("127.0.0.1").await;
            assert!(bridge.buffers()[0].is_none());
            assert!(bridge.buffers().scalar(0).is_nan());

            let (_, sent) = within(async {
                let samples = Samples::Int32(vec![3]);
                tokio::join!(
                    bridge.updated(),
                    device.send_samples(0, &samples)
                )
            })
            .await;
            sent.unwrap();

            assert_eq!(bridge.buffers()[0], Some(Samples::Int32(vec![3])));
            assert_eq!(bridge.buffers().scalar(0), 3.0);
            assert_eq!(bridge.read_latest(0), Some(Samples::Int32(vec![3])));
            assert_eq!(bridge.buffers().generation(0), 1);
        })
        .await;
}

#[tokio::test]
async fn sends_while_disconnected_are_never_replayed() {
    LocalSet::new()
        .run_until(async {
            let (connector, mut listener) = MemoryConnector::pair();
            let bridge = Bridge::with_connector(test_config("127.0.0.1"), connector).unwrap();
            assert_eq!(bridge.state(), SessionState::Connecting);

            for i in 0..10 {
                let status = bridge.send_buffer(0, ElementType::Int32, &[f64::from(i)]);
                assert_eq!(status, SendStatus::Disconnected);
            }

            let mut device = accept_device(&mut listener).await;
            within(bridge.wait_open()).await.unwrap();

            assert!(bridge.send_buffer(1, ElementType::Int32, &[99.0]).is_queued());
            let first = within(device.recv()).await.unwrap().unwrap();
            assert_eq!(first.index, 1);
            assert_eq!(first.samples().unwrap(), Samples::Int32(vec![99]));
            assert_eq!(bridge.stats().session.frames_dropped, 10);
        })
        .await;
}

#[tokio::test]
async fn reconnects_after_device_drop() {
    LocalSet::new()
        .run_until(async {
            let (bridge, device, mut listener) = open_bridge("127.0.0.1").await;
            drop(device);

            let mut device = accept_device(&mut listener).await;
            within(bridge.wait_open()).await.unwrap();
            assert_eq!(bridge.stats().session.reconnects(), 1);

            assert!(bridge.send_buffer(2, ElementType::Char, &[65.0]).is_queued());
            let frame = within(device.recv()).await.unwrap().unwrap();
            assert_eq!(frame.samples().unwrap(), Samples::Char(vec![b'A']));
        })
        .await;
}

#[tokio::test]
async fn frames_queued_before_a_drop_are_not_replayed() {
    LocalSet::new()
        .run_until(async {
            let (bridge, device, mut listener) = open_bridge("127.0.0.1").await;
            drop(device);

            // The session has not seen the drop yet, so these are accepted
            // under the first connection's epoch.
            for i in 0..10 {
                let status = bridge.send_buffer(0, ElementType::Int32, &[f64::from(i)]);
                assert_eq!(status, SendStatus::Queued);
            }

            let mut device = accept_device(&mut listener).await;
            within(bridge.wait_open()).await.unwrap();
            assert_eq!(bridge.stats().session.connects, 2);

            assert!(bridge.send_buffer(1, ElementType::Int32, &[99.0]).is_queued());
            let first = within(device.recv()).await.unwrap().unwrap();
            assert_eq!(first.index, 1);
            assert_eq!(first.samples().unwrap(), Samples::Int32(vec![99]));
            assert_eq!(bridge.stats().session.frames_dropped, 10);
        })
        .await;
}

#[tokio::test]
async fn unreachable_device_fails_with_default_policy() {
    LocalSet::new()
        .run_until(async {
            let (connector, listener) = MemoryConnector::pair();
            drop(listener);
            let bridge = Bridge::with_connector(test_config("127.0.0.1"), connector).unwrap();

            let opened = within(bridge.wait_open()).await;
            assert!(matches!(
                opened,
                Err(LinkError::ReconnectExhausted { attempts: 5 })
            ));
            assert_eq!(bridge.state(), SessionState::Closed);
        })
        .await;
}

#[tokio::test]
async fn protocol_mismatch_closes_with_failure() {
    LocalSet::new()
        .run_until(async {
            let (connector, mut listener) = MemoryConnector::pair();
            let bridge = Bridge::with_connector(test_config("127.0.0.1"), connector).unwrap();

            let (stream, _) = within(listener.accept()).await.unwrap();
            let config = DeviceConfig {
                handshake: HandshakeConfig {
                    protocol_version: "2.0".to_string(),
                    timeout: Duration::from_millis(200),
                    ..HandshakeConfig::default()
                },
                ..DeviceConfig::default()
            };
            let device = DeviceConnection::accept_stream(stream, &config);

            let (device, opened) = within(async { tokio::join!(device, bridge.wait_open()) }).await;
            assert!(device.is_err());
            assert!(matches!(opened, Err(LinkError::HandshakeFailed(_))));
            assert_eq!(bridge.state(), SessionState::Closed);
            assert_eq!(
                bridge.send_buffer(0, ElementType::Float32, &[1.0]),
                SendStatus::Closed
            );
        })
        .await;
}

#[tokio::test]
async fn close_is_terminal() {
    LocalSet::new()
        .run_until(async {
            let (bridge, mut device, _listener) = open_bridge("127.0.0.1").await;
            bridge.close();

            assert_eq!(bridge.state(), SessionState::Closed);
            assert_eq!(
                bridge.send_buffer(0, ElementType::Float32, &[1.0]),
                SendStatus::Closed
            );
            assert!(matches!(
                within(bridge.wait_open()).await,
                Err(LinkError::Closed)
            ));
            assert!(within(device.recv()).await.unwrap().is_none());
        })
        .await;
}

#[tokio::test]
async fn outbound_type_change_is_rejected() {
    LocalSet::new()
        .run_until(async {
            let (bridge, _device, _listener) = open_bridge("127.0.0.1").await;

            assert!(bridge.send_buffer(0, ElementType::Float32, &[1.0]).is_queued());
            assert_eq!(
                bridge.send_buffer(0, ElementType::Int32, &[1.0]),
                SendStatus::Rejected
            );

            bridge.reset_buffer(0).unwrap();
            assert!(bridge.send_buffer(0, ElementType::Int32, &[1.0]).is_queued());
        })
        .await;
}

#[tokio::test]
async fn send_queue_applies_backpressure() {
    LocalSet::new()
        .run_until(async {
            let (connector, mut listener) = MemoryConnector::pair();
            let config = BridgeConfig {
                send_queue_capacity: 1,
                ..test_config("127.0.0.1")
            };
            let bridge = Bridge::with_connector(config, connector).unwrap();
            let _device = accept_device(&mut listener).await;
            within(bridge.wait_open()).await.unwrap();

            assert!(bridge.send_buffer(0, ElementType::Float32, &[1.0]).is_queued());
            assert_eq!(
                bridge.send_buffer(0, ElementType::Float32, &[2.0]),
                SendStatus::Backpressure
            );
        })
        .await;
}

#[tokio::test]
async fn buffer_changes_fail_while_a_view_is_held() {
    LocalSet::new()
        .run_until(async {
            let (bridge, _device, _listener) = open_bridge("127.0.0.1").await;
            assert!(bridge.send_buffer(0, ElementType::Float32, &[1.0]).is_queued());

            let view = bridge.buffers();
            assert!(matches!(bridge.reset_buffer(0), Err(LinkError::Busy)));
            assert!(matches!(
                bridge.declare_buffer(0, ElementType::Float32, Some(4)),
                Err(LinkError::Busy)
            ));
            assert!(view[0].is_none());
            drop(view);

            bridge.reset_buffer(0).unwrap();
            assert!(bridge.send_buffer(0, ElementType::Int32, &[1.0]).is_queued());
        })
        .await;
}

#[tokio::test]
async fn frames_arriving_under_a_held_view_are_applied_later() {
    LocalSet::new()
        .run_until(async {
            let (bridge, mut device, _listener) = open_bridge("127.0.0.1").await;

            let view = bridge.buffers();
            device
                .send_samples(0, &Samples::Int32(vec![3]))
                .await
                .unwrap();
            eventually(|| bridge.stats().inbound_deferred == 1).await;
            assert!(view[0].is_none());
            drop(view);

            within(bridge.updated()).await;
            assert_eq!(bridge.buffers()[0], Some(Samples::Int32(vec![3])));
            assert_eq!(bridge.stats().inbound_overflow, 0);
        })
        .await;
}

#[tokio::test]
async fn unbound_and_mistyped_frames_are_discarded() {
    LocalSet::new()
        .run_until(async {
            let (bridge, mut device, _listener) = open_bridge("127.0.0.1").await;

            device
                .send_frame(Frame::from_samples("scope_data", 0, &Samples::Int32(vec![5])))
                .await
                .unwrap();
            device
                .send_samples(0, &Samples::Float32(vec![0.5]))
                .await
                .unwrap();
            // Wrong type for index 0 once it holds floats.
            device
                .send_samples(0, &Samples::Int32(vec![7]))
                .await
                .unwrap();
            device
                .send_samples(1, &Samples::Int32(vec![1]))
                .await
                .unwrap();
            eventually(|| bridge.read_latest(1).is_some()).await;

            let diagnostics = bridge.diagnostics();
            assert_eq!(diagnostics.count(DiagnosticKind::UnboundChannel), 1);
            assert_eq!(diagnostics.count(DiagnosticKind::TypeMismatch), 1);
            assert_eq!(bridge.buffers()[0], Some(Samples::Float32(vec![0.5])));
            assert!(bridge.control_buffers()[0].is_none());
        })
        .await;
}

#[tokio::test]
async fn declared_capacity_trims_inbound_buffers() {
    LocalSet::new()
        .run_until(async {
            let (bridge, mut device, _listener) = open_bridge("127.0.0.1").await;
            bridge
                .declare_buffer(0, ElementType::Float32, Some(2))
                .unwrap();

            let (_, sent) = within(async {
                let samples = Samples::Float32(vec![1.0, 2.0, 3.0]);
                tokio::join!(
                    bridge.updated(),
                    device.send_samples(0, &samples)
                )
            })
            .await;
            sent.unwrap();

            assert_eq!(bridge.read_latest(0), Some(Samples::Float32(vec![1.0, 2.0])));
            assert_eq!(bridge.diagnostics().count(DiagnosticKind::Trimmed), 1);
        })
        .await;
}

#[tokio::test]
async fn control_events_are_collected() {
    LocalSet::new()
        .run_until(async {
            let (bridge, mut device, _listener) = open_bridge("127.0.0.1").await;

            let mut event = ControlMessage::pong(None);
            event.event = "param".to_string();
            event.payload = Some(serde_json::json!({ "gain": 0.5 }));
            device.send_event(&event).await.unwrap();

            let (_, sent) = within(async {
                let samples = Samples::Int32(vec![1]);
                tokio::join!(
                    bridge.updated(),
                    device.send_control_samples(0, &samples)
                )
            })
            .await;
            sent.unwrap();

            let events = bridge.take_events();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].event, "param");
            assert_eq!(bridge.control_buffers().scalar(0), 1.0);
            assert!(bridge.take_events().is_empty());
        })
        .await;
}

#[tokio::test]
async fn rejects_invalid_config_synchronously() {
    let (connector, _listener) = MemoryConnector::pair();
    let config = BridgeConfig {
        port: 0,
        ..BridgeConfig::default()
    };
    assert!(matches!(
        Bridge::with_connector(config, connector),
        Err(LinkError::InvalidConfig(_))
    ));
}
