use std::time::Duration;

use guibridge::link::{Bridge, BridgeConfig, HandshakeResult};
use serde::Serialize;

use crate::cmd::{block_on_local, parse_duration, InfoArgs};
use crate::exit::{link_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::OutputFormat;

/// How long to wait for a pong after the session opens.
const PING_WAIT: Duration = Duration::from_millis(500);

#[derive(Serialize)]
struct InfoOutput {
    schema_id: &'static str,
    device: String,
    project_name: Option<String>,
    protocol_version: String,
    data_channel: String,
    control_channel: String,
    ping_latency_ms: Option<f64>,
    connected: bool,
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let config = BridgeConfig {
        connect_timeout: timeout,
        ping_interval: Some(Duration::from_millis(100)),
        ..args.target.bridge_config()
    };
    let out = block_on_local(query_device(config, timeout))??;
    print_info(&out, format);
    Ok(SUCCESS)
}

async fn query_device(config: BridgeConfig, timeout: Duration) -> CliResult<InfoOutput> {
    let bridge = Bridge::connect(config).map_err(|err| link_error("invalid target", err))?;

    // Refused connections are retried by the bridge until the deadline.
    match tokio::time::timeout(timeout, bridge.wait_open()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(link_error("connect failed", err)),
        Err(_) => {
            return Err(CliError::new(
                TIMEOUT,
                format!("connect timed out after {timeout:?}"),
            ))
        }
    }

    let rtt = tokio::time::timeout(PING_WAIT, async {
        loop {
            if let Some(rtt) = bridge.stats().session.last_rtt {
                return rtt;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .ok();

    let handshake: Option<HandshakeResult> = bridge.handshake();

    let out = InfoOutput {
        schema_id: "guibridge/cli/v1/connection-info",
        device: bridge.config().device_addr().to_string(),
        project_name: handshake.as_ref().and_then(|h| h.project_name.clone()),
        protocol_version: handshake.map(|h| h.protocol_version).unwrap_or_default(),
        data_channel: bridge.data_channel().name().to_string(),
        control_channel: bridge.control_channel().name().to_string(),
        ping_latency_ms: rtt.map(|d| (d.as_secs_f64() * 1000.0 * 100.0).round() / 100.0),
        connected: true,
    };
    bridge.close();
    Ok(out)
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Connection Info:");
            println!("  Device:           {}", out.device);
            println!(
                "  Project:          {}",
                out.project_name.as_deref().unwrap_or("unnamed")
            );
            println!("  Protocol:         guibridge {}", out.protocol_version);
            println!(
                "  Channels:         {}, {}",
                out.data_channel, out.control_channel
            );
            match out.ping_latency_ms {
                Some(ms) => println!("  Ping:             {ms:.2}ms"),
                None => println!("  Ping:             unavailable"),
            }
        }
        OutputFormat::Raw => {
            println!("{}", out.device);
        }
    }
}
