//! Bridge and mock device in one process over an in-memory pipe.
//!
//! Run with:
//!   cargo run --example loopback
//!
//! The device sends a level on data buffer 0 and echoes whatever the bridge
//! sends back on the same index.

use std::time::Duration;

use guibridge::frame::{ElementType, Samples};
use guibridge::link::{Bridge, BridgeConfig, DeviceConfig, DeviceConnection};
use guibridge::transport::MemoryConnector;
use tokio::task::LocalSet;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    LocalSet::new().run_until(run()).await
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let (connector, mut listener) = MemoryConnector::pair();
    let bridge = Bridge::with_connector(BridgeConfig::for_host("loopback"), connector)?;

    let (stream, addr) = listener.accept().await.ok_or("bridge never connected")?;
    let device_config = DeviceConfig {
        project_name: Some("loopback".to_string()),
        ..DeviceConfig::default()
    };
    let mut device = DeviceConnection::accept_stream(stream, &device_config).await?;
    bridge.wait_open().await?;
    eprintln!("Connected to {addr}");

    let device_task = tokio::task::spawn_local(async move {
        device
            .send_samples(0, &Samples::Float32(vec![0.25]))
            .await?;
        while let Some(frame) = device.recv().await? {
            eprintln!(
                "Device received {} bytes for {}[{}]",
                frame.payload.len(),
                frame.channel,
                frame.index
            );
            device.send_frame(frame).await?;
        }
        Ok::<_, guibridge::link::LinkError>(())
    });

    bridge.updated().await;
    eprintln!("Level from device: {}", bridge.buffers().scalar(0));

    bridge.send_buffer(1, ElementType::Int32, &[1.0, 2.0, 3.0]);
    while bridge.read_latest(1).is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    eprintln!("Echoed: {:?}", bridge.read_latest(1));

    bridge.shutdown().await;
    device_task.await??;
    Ok(())
}
