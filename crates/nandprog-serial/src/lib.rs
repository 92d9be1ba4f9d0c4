//! nandprog-serial - Host-side driver for the NAND programmer protocol
//!
//! This crate talks to a programmer running the nandprog device session,
//! over a serial port or a TCP socket (the emulator, or a network bridge).
//!
//! # Supported Transports
//!
//! - Serial port: `/dev/ttyACM0`, `COM3`, etc.
//! - TCP socket: `host:port`
//!
//! # Example
//!
//! ```no_run
//! use nandprog_serial::{open, Connection, HostConfig, OpArgs, Control};
//!
//! let config = HostConfig::default();
//! let mut programmer = open(&Connection::parse("dev=/dev/ttyACM0")?, &config)?;
//! let status = programmer.status()?;
//! println!("chip: {:?}, {} mV", status.model, status.millivolts);
//!
//! let pages = programmer.read(OpArgs::blocks(0, 1), |_| Control::Continue)?;
//! println!("read {} pages", pages.pages);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod programmer;
pub mod transport;

pub use config::{HostConfig, WireProtocol};
pub use error::{Result, SerialError};
pub use programmer::{ChipEntry, Control, DeviceStatus, Detection, OpArgs, OpEvent, Programmer, ReadOutcome};
pub use transport::serial::SerialTransport;
pub use transport::tcp::TcpTransport;
pub use transport::Transport;

/// Where the programmer is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    /// Serial port connection
    Serial {
        /// Device path (e.g., "/dev/ttyACM0" or "COM3")
        device: String,
        /// Baud rate (None for the configured default)
        baud: Option<u32>,
    },
    /// TCP socket connection
    Tcp {
        /// Hostname or IP address
        host: String,
        /// Port number
        port: u16,
    },
}

impl Connection {
    /// Parse a connection string
    ///
    /// Formats:
    /// - `dev=/dev/ttyACM0` - Serial with the default baud
    /// - `dev=/dev/ttyACM0:921600` - Serial with the given baud
    /// - `ip=host:port` - TCP connection
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        if let Some(dev) = s.strip_prefix("dev=") {
            match dev.rsplit_once(':') {
                Some((device, baud_str)) if !device.is_empty() && !baud_str.contains(['/', '\\']) => {
                    let baud = baud_str
                        .parse()
                        .map_err(|_| format!("Invalid baud rate: {}", baud_str))?;
                    Ok(Connection::Serial {
                        device: device.to_string(),
                        baud: Some(baud),
                    })
                }
                _ => Ok(Connection::Serial {
                    device: dev.to_string(),
                    baud: None,
                }),
            }
        } else if let Some(ip) = s.strip_prefix("ip=") {
            let (host, port_str) = ip
                .rsplit_once(':')
                .ok_or_else(|| "Missing port in ip= parameter".to_string())?;
            let port = port_str
                .parse()
                .map_err(|_| format!("Invalid port: {}", port_str))?;
            Ok(Connection::Tcp {
                host: host.to_string(),
                port,
            })
        } else {
            Err(format!("Invalid connection string: {}. Use dev=... or ip=...", s))
        }
    }
}

/// Open a connection and wrap it in a [`Programmer`]
pub fn open(connection: &Connection, config: &HostConfig) -> Result<Programmer<Box<dyn Transport>>> {
    let transport: Box<dyn Transport> = match connection {
        Connection::Serial { device, baud } => {
            Box::new(SerialTransport::open(device, Some(baud.unwrap_or(config.baud)))?)
        }
        Connection::Tcp { host, port } => Box::new(TcpTransport::connect(host, *port)?),
    };
    Ok(Programmer::new(transport, config))
}
