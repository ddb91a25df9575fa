use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use guibridge::frame::Samples;
use guibridge::link::ControlMessage;
use serde::Serialize;

/// Values shown before a buffer preview is elided.
const PREVIEW_LEN: usize = 16;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct BufferOutput<'a> {
    schema_id: &'a str,
    channel: &'a str,
    index: u32,
    element: &'a str,
    len: usize,
    values: Vec<f64>,
    timestamp: String,
}

pub fn print_buffer(channel: &str, index: u32, samples: &Samples, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = BufferOutput {
                schema_id: "guibridge/cli/v1/buffer-update",
                channel,
                index,
                element: samples.element_type().name(),
                len: samples.len(),
                values: samples.to_f64_vec(),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "INDEX", "TYPE", "LEN", "VALUES"])
                .add_row(vec![
                    channel.to_string(),
                    index.to_string(),
                    samples.element_type().name().to_string(),
                    samples.len().to_string(),
                    values_preview(samples),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} index={} type={} len={} values={}",
                channel,
                index,
                samples.element_type(),
                samples.len(),
                values_preview(samples)
            );
        }
        OutputFormat::Raw => {
            let line = samples
                .to_f64_vec()
                .iter()
                .map(f64::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            print_raw(format!("{line}\n").as_bytes());
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    schema_id: &'a str,
    channel: &'a str,
    message: &'a ControlMessage,
    timestamp: String,
}

pub fn print_event(channel: &str, message: &ControlMessage, format: OutputFormat) {
    let body = serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string());
    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                schema_id: "guibridge/cli/v1/control-event",
                channel,
                message,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "EVENT", "MESSAGE"])
                .add_row(vec![channel.to_string(), message.event.clone(), body]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("channel={} event={} message={}", channel, message.event, body);
        }
        OutputFormat::Raw => {
            print_raw(format!("{body}\n").as_bytes());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn values_preview(samples: &Samples) -> String {
    let values = samples.to_f64_vec();
    let mut shown = values
        .iter()
        .take(PREVIEW_LEN)
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    if values.len() > PREVIEW_LEN {
        shown.push_str(&format!(", ... (+{})", values.len() - PREVIEW_LEN));
    }
    format!("[{shown}]")
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
