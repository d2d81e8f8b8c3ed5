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

// Xorlink checksummed serial file transfer
mod checksum;
mod error;
mod progress;
mod protocol;
mod sender;
mod receiver;
mod serial;

use clap::{Parser, Subcommand};
use serialport::{DataBits, Parity, StopBits};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use serial::RealSerialPort;

#[derive(Parser)]
#[command(name = "xorlink")]
#[command(about = "Send a file to a device over a serial link with XOR checksum handshakes", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long, env = "DEVICE", default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "2", value_name="BITS")]
    stop_bits: u8,

    /// Read timeout in milliseconds for acknowledgments and data
    #[arg(long, default_value = "1000", value_name = "MS")]
    timeout: u64,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    /// Hide the progress line
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file to the device
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Act as the device end and store one incoming file
    Receive {
        /// Where to write the received file
        #[arg(short, long, default_value = "received.bin")]
        output: PathBuf,
    },
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let data_bits = match parse_data_bits(cli.data_bits) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let parity = match parse_parity(&cli.parity) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let stop_bits = match parse_stop_bits(cli.stop_bits) {
        Ok(sb) => sb,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let timeout = Duration::from_millis(cli.timeout);

    println!("Opening serial port: {}", cli.port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let mut serial_port = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits, timeout) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Send { file } => {
            println!("\nSending file: {}", file.display());
            match sender::send_file(&mut serial_port, file, timeout, !cli.quiet) {
                Ok(bytes) => println!("\nTransfer succeeded: {} bytes written.", bytes),
                Err(e) => {
                    eprintln!("Transfer failed: {}", e);
                    if let Some(diagnostic) = e.diagnostic() {
                        eprintln!("{}", diagnostic);
                    }
                    std::process::exit(1);
                }
            }
        }
        Commands::Receive { output } => {
            println!("\nReceiving file to: {}", output.display());
            match receiver::receive_file(&mut serial_port, output, timeout) {
                Ok(received) if received.result == protocol::RESULT_OK => {
                    println!("\nReceived {} bytes.", received.bytes);
                }
                Ok(received) => {
                    eprintln!("Receive failed: reported result code {} after {} bytes", received.result, received.bytes);
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Receive failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serial_settings() {
        assert!(matches!(parse_data_bits(7), Ok(DataBits::Seven)));
        assert!(parse_data_bits(9).is_err());
        assert!(matches!(parse_parity("EVEN"), Ok(Parity::Even)));
        assert!(parse_parity("mark").is_err());
        assert!(matches!(parse_stop_bits(2), Ok(StopBits::Two)));
        assert!(parse_stop_bits(3).is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["xorlink", "--port", "/dev/ttyS1", "send", "image.bin"]).unwrap();
        assert_eq!(cli.port, "/dev/ttyS1");
        assert_eq!(cli.baud, 115200);
        assert_eq!(cli.stop_bits, 2);
        assert_eq!(cli.timeout, 1000);
        assert!(matches!(cli.command, Commands::Send { ref file } if file == &PathBuf::from("image.bin")));
    }

    #[test]
    fn test_cli_receive_output() {
        let cli = Cli::try_parse_from(["xorlink", "-p", "COM3", "receive", "-o", "out.bin"]).unwrap();
        assert!(matches!(cli.command, Commands::Receive { ref output } if output == &PathBuf::from("out.bin")));
    }
}
