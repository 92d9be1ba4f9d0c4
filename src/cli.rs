//! CLI argument parsing

use clap::{Parser, Subcommand};
use nandprog_serial::{HostConfig, OpArgs, WireProtocol};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

#[derive(Parser)]
#[command(name = "nandprog")]
#[command(author, version, about = "Raw NAND flash programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Host configuration file (TOML); ./nandprog.toml is used when present
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Extra chip definitions (a .ron file or a directory of them)
    #[arg(long, global = true)]
    pub chip_db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Connection and transfer options shared by the device commands
///
/// Every flag left unset keeps the value from the configuration file.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConnArgs {
    /// Programmer: dev=/dev/ttyACM0[:baud], ip=host:port, or a bare port / host:port
    #[arg(short, long)]
    pub programmer: Option<String>,

    /// Chip to select when the device cannot identify it
    #[arg(short, long)]
    pub chip: Option<String>,

    /// Speak the legacy text protocol
    #[arg(long)]
    pub legacy: bool,

    /// Send pages without run-length encoding
    #[arg(long)]
    pub no_compress: bool,

    /// Send blank pages in full
    #[arg(long)]
    pub no_skip_blank: bool,

    /// Skip the read-back after program and erase
    #[arg(long)]
    pub no_verify: bool,

    /// Longest device silence tolerated, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

/// Block range of an operation
#[derive(clap::Args, Debug, Clone, Copy, Default)]
pub struct RangeArgs {
    /// First block (hex or decimal)
    #[arg(long, default_value = "0", value_parser = parse_hex_u32)]
    pub start: u32,

    /// Number of blocks, 0 for the rest of the chip
    #[arg(long, default_value = "0", value_parser = parse_hex_u32)]
    pub count: u32,

    /// Continue from the checkpoint the device offers
    #[arg(long)]
    pub resume: bool,
}

impl ConnArgs {
    /// Lay the flags that were given over `config`
    pub fn apply(&self, config: &mut HostConfig) {
        if let Some(programmer) = &self.programmer {
            config.port = Some(programmer.clone());
        }
        if let Some(chip) = &self.chip {
            config.chip = Some(chip.clone());
        }
        if self.legacy {
            config.protocol = WireProtocol::Legacy;
        }
        if self.no_compress {
            config.compress = false;
        }
        if self.no_skip_blank {
            config.skip_blank = false;
        }
        if self.no_verify {
            config.verify = false;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
    }
}

impl RangeArgs {
    pub fn op_args(&self) -> OpArgs {
        OpArgs {
            start_block: self.start,
            block_count: self.count,
            resume: self.resume,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the selected chip, supply voltage and any resumable operation
    Status {
        #[command(flatten)]
        conn: ConnArgs,
    },

    /// List known chips
    ListChips {
        /// Filter by vendor
        #[arg(long)]
        vendor: Option<String>,
    },

    /// Read blocks to a file (main area and OOB of every page)
    Read {
        #[command(flatten)]
        conn: ConnArgs,

        #[command(flatten)]
        range: RangeArgs,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Program blocks from a file (main area and OOB of every page)
    Write {
        #[command(flatten)]
        conn: ConnArgs,

        #[command(flatten)]
        range: RangeArgs,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Erase blocks
    Erase {
        #[command(flatten)]
        conn: ConnArgs,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Serve an emulated programmer over TCP
    Emulate {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:4455")]
        listen: String,

        /// Emulated chip (defaults to a small 64-byte-page part)
        #[arg(short, long)]
        chip: Option<String>,

        /// Keep checkpoints in this file instead of memory
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Reported supply voltage in millivolts
        #[arg(long, default_value_t = 5000)]
        millivolts: u32,

        /// Stop after the first host disconnects
        #[arg(long)]
        once: bool,
    },
}
