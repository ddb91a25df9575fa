use std::time::Duration;

use guibridge::frame::{Frame, Samples, TypeTag};
use guibridge::link::{ControlMessage, DeviceConfig, DeviceConnection, DeviceListener, LinkError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cmd::{block_on_local, parse_duration, DeviceArgs};
use crate::exit::{link_error, CliResult, SUCCESS};
use crate::output::{print_buffer, print_event, OutputFormat};

pub fn run(args: DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let counter = args.counter.as_deref().map(parse_duration).transpose()?;
    block_on_local(serve(args, counter, format))?
}

enum Served {
    ClientLeft,
    Interrupted,
}

async fn serve(args: DeviceArgs, counter: Option<Duration>, format: OutputFormat) -> CliResult<i32> {
    let config = DeviceConfig {
        address: args.address.clone(),
        project_name: args.project.clone(),
        ..DeviceConfig::default()
    };
    let listener = DeviceListener::bind(&args.listen, config)
        .await
        .map_err(|err| link_error("bind failed", err))?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let conn = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => accepted,
        };
        let conn = match conn {
            Ok(conn) => conn,
            // A client that fails the handshake does not stop the device.
            Err(err) => {
                warn!(error = %err, "client rejected");
                continue;
            }
        };
        info!(peer = ?conn.peer(), "client connected");

        match session(conn, &args, counter, format, &mut shutdown).await {
            Ok(Served::Interrupted) => break,
            Ok(Served::ClientLeft) => info!("client disconnected"),
            Err(err) => warn!(error = %err, "client session ended"),
        }
        if args.once {
            break;
        }
    }

    Ok(SUCCESS)
}

async fn session<S, F>(
    mut conn: DeviceConnection<S>,
    args: &DeviceArgs,
    counter: Option<Duration>,
    format: OutputFormat,
    shutdown: &mut std::pin::Pin<&mut F>,
) -> Result<Served, LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: std::future::Future,
{
    let mut ticker = counter.map(|period| {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let mut count: i32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.as_mut() => return Ok(Served::Interrupted),
            received = conn.recv() => {
                let Some(frame) = received? else {
                    return Ok(Served::ClientLeft);
                };
                show(&frame, format);
                if args.echo {
                    conn.send_frame(frame).await?;
                }
            }
            _ = tick(&mut ticker) => {
                count = count.wrapping_add(1);
                conn.send_samples(0, &Samples::Int32(vec![count])).await?;
                debug!(count, "counter sent");
            }
        }
    }
}

fn show(frame: &Frame, format: OutputFormat) {
    if frame.tag == TypeTag::Json {
        match ControlMessage::from_frame(frame) {
            Some(Ok(message)) => print_event(&frame.channel, &message, format),
            _ => warn!(channel = %frame.channel, "unreadable control event"),
        }
        return;
    }
    match frame.samples() {
        Ok(samples) => print_buffer(&frame.channel, frame.index, &samples, format),
        Err(err) => warn!(channel = %frame.channel, index = frame.index, error = %err, "undecodable buffer"),
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use guibridge::frame::ElementType;
    use guibridge::link::{Bridge, BridgeConfig};
    use guibridge::transport::MemoryConnector;
    use tokio::task::LocalSet;

    use super::*;

    fn args(echo: bool) -> DeviceArgs {
        DeviceArgs {
            listen: "127.0.0.1:0".to_string(),
            address: "gui".to_string(),
            project: None,
            counter: None,
            echo,
            once: true,
        }
    }

    #[tokio::test]
    async fn echoes_buffers_and_counts() {
        LocalSet::new()
            .run_until(async {
                let (connector, mut listener) = MemoryConnector::pair();
                let config = BridgeConfig {
                    ping_interval: None,
                    ..BridgeConfig::default()
                };
                let bridge = Bridge::with_connector(config, connector).unwrap();

                let (stream, _) = listener.accept().await.unwrap();
                let conn = DeviceConnection::accept_stream(stream, &DeviceConfig::default())
                    .await
                    .unwrap();
                bridge.wait_open().await.unwrap();

                let shutdown = std::future::pending::<()>();
                tokio::pin!(shutdown);
                let args = args(true);
                let device = session(
                    conn,
                    &args,
                    Some(Duration::from_millis(10)),
                    OutputFormat::Raw,
                    &mut shutdown,
                );

                let checks = async {
                    assert!(bridge.send_buffer(1, ElementType::Float32, &[0.5]).is_queued());
                    loop {
                        let echoed = bridge.read_latest(1) == Some(Samples::Float32(vec![0.5]));
                        let counted = bridge.buffers().scalar(0) >= 2.0;
                        if echoed && counted {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                };

                tokio::time::timeout(Duration::from_secs(5), async {
                    tokio::select! {
                        result = device => panic!("device session ended early: {:?}", result.err()),
                        _ = checks => {}
                    }
                })
                .await
                .expect("timed out");
            })
            .await;
    }

    #[tokio::test]
    async fn client_disconnect_ends_session() {
        let (connector, mut listener) = MemoryConnector::pair();
        LocalSet::new()
            .run_until(async move {
                let bridge = Bridge::with_connector(BridgeConfig::default(), connector).unwrap();
                let (stream, _) = listener.accept().await.unwrap();
                let conn = DeviceConnection::accept_stream(stream, &DeviceConfig::default())
                    .await
                    .unwrap();
                bridge.wait_open().await.unwrap();
                bridge.close();

                let shutdown = std::future::pending::<()>();
                tokio::pin!(shutdown);
                let served = session(conn, &args(false), None, OutputFormat::Raw, &mut shutdown)
                    .await
                    .unwrap();
                assert!(matches!(served, Served::ClientLeft));
            })
            .await;
    }
}
