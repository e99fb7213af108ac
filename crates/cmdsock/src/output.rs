use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

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

/// One received command, ready for printing.
#[derive(Debug, Clone, Copy)]
pub struct Received<'a> {
    pub command_id: u32,
    pub payload: &'a [u8],
    /// Which end sent it: a client id on the server, `server` on a client.
    pub source: &'a str,
}

#[derive(Serialize)]
struct CommandOutput<'a> {
    command_id: u32,
    payload_size: usize,
    payload: String,
    source: &'a str,
    timestamp: String,
}

pub fn print_command(received: &Received<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = CommandOutput {
                command_id: received.command_id,
                payload_size: received.payload.len(),
                payload: payload_preview(received.payload),
                source: received.source,
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
                .set_header(vec!["COMMAND", "SIZE", "FROM", "PAYLOAD"])
                .add_row(vec![
                    received.command_id.to_string(),
                    received.payload.len().to_string(),
                    received.source.to_string(),
                    payload_preview(received.payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "command={} size={} from={} payload={}",
                received.command_id,
                received.payload.len(),
                received.source,
                payload_preview(received.payload)
            );
        }
        OutputFormat::Raw => {
            print_raw(received.payload);
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
