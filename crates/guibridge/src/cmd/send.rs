use std::time::Duration;

use guibridge::frame::Samples;
use guibridge::link::{Bridge, SendStatus};
use tracing::debug;

use crate::cmd::{block_on_local, parse_duration, SendArgs};
use crate::exit::{link_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS, TIMEOUT};

pub fn run(args: SendArgs) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let samples = Samples::coerce(args.element, &args.values);
    block_on_local(send_one(args, samples, timeout))?
}

async fn send_one(args: SendArgs, samples: Samples, timeout: Duration) -> CliResult<i32> {
    let config = args.target.bridge_config();
    let bridge = Bridge::connect(config).map_err(|err| link_error("invalid target", err))?;

    match tokio::time::timeout(timeout, bridge.wait_open()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(link_error("connect failed", err)),
        Err(_) => {
            return Err(CliError::new(
                TIMEOUT,
                format!("device did not answer within {timeout:?}"),
            ))
        }
    }

    let status = if args.control {
        bridge.send_control(args.index, args.element, &args.values)
    } else {
        bridge.send_samples(args.index, &samples)
    };
    status_result(status)?;
    debug!(index = args.index, len = samples.len(), element = %samples.element_type(), "buffer queued");

    bridge.shutdown().await;
    Ok(SUCCESS)
}

fn status_result(status: SendStatus) -> CliResult<()> {
    match status {
        SendStatus::Queued => Ok(()),
        SendStatus::Rejected => Err(CliError::new(
            DATA_INVALID,
            "send rejected: buffer is too large or does not match the index type",
        )),
        other => Err(CliError::new(FAILURE, format!("send failed: {other:?}"))),
    }
}
