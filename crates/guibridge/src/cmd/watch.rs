use std::collections::HashMap;
use std::time::Duration;

use guibridge::frame::Samples;
use guibridge::link::{Bridge, Buffers, SessionState};
use tracing::{info, warn};

use crate::cmd::{block_on_local, WatchArgs};
use crate::exit::{link_error, CliResult, SUCCESS};
use crate::output::{print_buffer, print_event, OutputFormat};

/// Control events are not signalled, so they are polled at this period.
const EVENT_POLL: Duration = Duration::from_millis(100);

pub fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    block_on_local(watch(args, format))?
}

async fn watch(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let bridge = Bridge::connect(args.target.bridge_config())
        .map_err(|err| link_error("invalid target", err))?;
    let data = bridge.data_channel().name().to_string();
    let control = bridge.control_channel().name().to_string();

    let mut seen_data = HashMap::new();
    let mut seen_control = HashMap::new();
    let mut printed = 0usize;
    let mut poll = tokio::time::interval(EVENT_POLL);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted");
                break;
            }
            opened = bridge.wait_open(), if bridge.state() != SessionState::Open => {
                if let Err(err) = opened {
                    return Err(link_error("connection lost", err));
                }
                info!(addr = %bridge.config().device_addr(), "watching");
                continue;
            }
            _ = bridge.updated() => {}
            _ = poll.tick() => {}
        }

        let mut updates = changed(&bridge.buffers(), &mut seen_data, false);
        if args.control {
            updates.extend(changed(&bridge.control_buffers(), &mut seen_control, true));
        }

        for (index, samples, on_control) in updates {
            let channel = if on_control { &control } else { &data };
            print_buffer(channel, index, &samples, format);
            printed += 1;
            if args.count.is_some_and(|count| printed >= count) {
                bridge.close();
                return Ok(SUCCESS);
            }
        }

        for event in bridge.take_events() {
            if args.control {
                print_event(&control, &event, format);
            }
        }
    }

    let stats = bridge.stats();
    if stats.discarded > 0 {
        warn!(discarded = stats.discarded, "some inbound frames were discarded");
    }
    bridge.close();
    Ok(SUCCESS)
}

/// Buffers whose generation moved since the last call.
fn changed(
    view: &Buffers<'_>,
    seen: &mut HashMap<u32, u64>,
    on_control: bool,
) -> Vec<(u32, Samples, bool)> {
    let mut out = Vec::new();
    for (index, samples) in view.iter() {
        let generation = view.generation(index as usize);
        if seen.insert(index, generation) != Some(generation) {
            out.push((index, samples.clone(), on_control));
        }
    }
    out
}
