// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// DNC transfer client for CNC controllers
mod cancel;
mod chunk;
mod error;
mod events;
mod protocol;
mod receiver;
mod sanitize;
mod sender;
mod session;
mod transport;

use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use events::{ChannelEvents, OperationKind, SessionEvent, SessionState};
use protocol::{ControlCodes, DEFAULT_PORT, SessionConfig, TransferOptions};
use session::Session;

#[derive(Parser)]
#[command(name = "dnclink")]
#[command(about = "DNC program transfer to and from CNC controllers over TCP", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Controller host name or address
    #[arg(long)]
    host: String,

    /// Controller DNC port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Bytes per socket read and per outbound chunk
    #[arg(short, long, default_value = "960", value_name = "BYTES")]
    buffer_size: usize,

    /// Delay in milliseconds between outbound chunks
    #[arg(long, default_value = "1000", value_name = "MS")]
    send_delay: u64,

    /// Socket read/write timeout in milliseconds
    #[arg(long, default_value = "5000", value_name = "MS")]
    timeout: u64,

    /// Sleep in milliseconds while waiting for the controller to send
    #[arg(long, default_value = "500", value_name = "MS")]
    idle_poll: u64,

    /// Clear-to-send control code (decimal or 0x hex)
    #[arg(long, default_value = "0x11", value_name = "CODE")]
    clear_code: String,

    /// Pause control code (decimal or 0x hex)
    #[arg(long, default_value = "0x13", value_name = "CODE")]
    pause_code: String,

    /// Enter-block control code (decimal or 0x hex)
    #[arg(long, default_value = "0x12", value_name = "CODE")]
    enter_code: String,

    /// End-block control code (decimal or 0x hex)
    #[arg(long, default_value = "0x14", value_name = "CODE")]
    end_code: String,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send an NC program to the controller
    Send {
        /// Program file to send
        file: PathBuf,

        /// Send the file exactly as it is
        #[arg(long)]
        raw: bool,

        /// Do not trim to the first program number or prepend '%'
        #[arg(long)]
        no_start_block: bool,

        /// Do not cut the file after its last '%'
        #[arg(long)]
        no_end_block: bool,
    },
    /// Receive an NC program punched out by the controller
    Receive {
        /// File to write the program to (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep everything read from the socket
        #[arg(long)]
        raw: bool,

        /// Convert LF line endings to CR+LF
        #[arg(long)]
        fix_newline: bool,

        /// Do not frame on DC2/DC4; receive until the connection closes
        #[arg(long)]
        ignore_control_codes: bool,
    },
}

fn parse_code(code: &str) -> Result<u8, String> {
    let parsed = match code.strip_prefix("0x").or_else(|| code.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => code.parse::<u8>(),
    };
    match parsed {
        Ok(value) if value.is_ascii() => Ok(value),
        _ => Err(format!("Invalid control code: {}. Must be 0-127 or 0x00-0x7F", code)),
    }
}

fn parse_codes(cli: &Cli) -> Result<ControlCodes, String> {
    let codes = ControlCodes {
        clear_to_send: parse_code(&cli.clear_code)?,
        enter_block: parse_code(&cli.enter_code)?,
        pause: parse_code(&cli.pause_code)?,
        end_block: parse_code(&cli.end_code)?,
    };

    codes.validate().map_err(|e| e.to_string())?;
    Ok(codes)
}

fn parse_config(cli: &Cli) -> Result<SessionConfig, String> {
    if cli.buffer_size == 0 {
        return Err("Invalid buffer size: 0. Must be at least 1".to_string());
    }

    Ok(SessionConfig {
        io_timeout: Duration::from_millis(cli.timeout),
        idle_poll: Duration::from_millis(cli.idle_poll),
        ..SessionConfig::new(cli.buffer_size, cli.send_delay)
    })
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let codes = match parse_codes(&cli) {
        Ok(codes) => codes,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let config = match parse_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let (events, rx) = ChannelEvents::new();
    let session = Session::new(config, codes, events);

    eprintln!("Connecting to {}:{}", cli.host, cli.port);
    eprintln!(
        "Settings: {} byte buffer, {:?} send delay, {:?} timeout",
        session.config().buffer_size,
        session.config().send_delay,
        session.config().io_timeout
    );

    if session.connect(&cli.host, cli.port) != SessionState::Idle {
        eprintln!("Failed to connect to {}:{}", cli.host, cli.port);
        std::process::exit(1);
    }

    let result = match cli.command {
        Commands::Send { file, raw, no_start_block, no_end_block } => {
            eprintln!("\nSending file: {}", file.display());
            let options = TransferOptions {
                raw_mode: raw,
                no_start_block,
                no_end_block,
                ..Default::default()
            };
            send_file(&session, &rx, file, options)
        }
        Commands::Receive { output, raw, fix_newline, ignore_control_codes } => {
            let options = TransferOptions {
                raw_mode: raw,
                fix_newline,
                ignore_control_codes,
                ..Default::default()
            };
            receive_file(&session, &rx, output, options)
        }
    };

    session.close();

    if let Err(e) = result {
        eprintln!("Transfer failed: {}", e);
        std::process::exit(1);
    }
}

fn send_file(
    session: &Session,
    rx: &std::sync::mpsc::Receiver<SessionEvent>,
    file: PathBuf,
    options: TransferOptions,
) -> Result<(), String> {
    let payload = std::fs::read(&file)
        .map_err(|e| format!("Cannot read {}: {}", file.display(), e))?;
    let payload = String::from_utf8_lossy(&payload);

    session.write_out(&payload, options).map_err(|e| e.to_string())?;

    wait_for_outcome(rx, OperationKind::Send, |event| match event {
        SessionEvent::ChunkSent(percent) => eprint!("\rSending..... {:5.1}%", percent),
        SessionEvent::StateChanged(SessionState::Waiting) => eprint!("\rWaiting for controller"),
        _ => {}
    })?;

    eprintln!("\nFile sent successfully!");
    Ok(())
}

fn receive_file(
    session: &Session,
    rx: &std::sync::mpsc::Receiver<SessionEvent>,
    output: Option<PathBuf>,
    options: TransferOptions,
) -> Result<(), String> {
    let mut sink: Box<dyn Write> = match &output {
        Some(path) => {
            eprintln!("\nReceiving to: {}", path.display());
            let file = File::create(path)
                .map_err(|e| format!("Cannot create {}: {}", path.display(), e))?;
            Box::new(file)
        }
        None => Box::new(std::io::stdout()),
    };

    session.read_in(options).map_err(|e| e.to_string())?;

    let mut write_error = None;
    wait_for_outcome(rx, OperationKind::Receive, |event| match event {
        SessionEvent::ChunkReceived(data) if write_error.is_none() => {
            if let Err(e) = sink.write_all(data.as_bytes()) {
                write_error = Some(e);
            }
        }
        SessionEvent::BadChunkReceived(data) => {
            eprintln!("Bad block received ({} bytes), skipped", data.len());
        }
        _ => {}
    })?;

    if let Some(e) = write_error {
        return Err(format!("Cannot write output: {}", e));
    }
    sink.flush().map_err(|e| format!("Cannot write output: {}", e))?;

    eprintln!("\nProgram received successfully!");
    Ok(())
}

fn wait_for_outcome(
    rx: &std::sync::mpsc::Receiver<SessionEvent>,
    kind: OperationKind,
    mut on_event: impl FnMut(&SessionEvent),
) -> Result<(), String> {
    loop {
        let event = rx
            .recv()
            .map_err(|_| "Session stopped without reporting an outcome".to_string())?;

        match event {
            SessionEvent::Completed(done) if done == kind => return Ok(()),
            SessionEvent::Cancelled(_) => return Err("Operation cancelled".to_string()),
            SessionEvent::Fault(e) => return Err(e),
            other => on_event(&other),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
