//! Byte transports between the host and the programmer
//!
//! This module provides a unified interface for serial and TCP transports.

use crate::error::Result;

/// Transport trait for reading and writing bytes
pub trait Transport {
    /// Write all bytes
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read what is available, waiting up to `timeout_ms`
    ///
    /// Returns the number of bytes read, or 0 on timeout.
    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize>;

    /// Flush any buffered data
    fn flush(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize> {
        (**self).read_timeout(buf, timeout_ms)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

pub mod serial {
    //! Serial port transport implementation

    use super::*;
    use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{ErrorKind, Read, Write};
    use std::time::Duration;

    /// Baud rate used when none is given
    pub const DEFAULT_BAUD: u32 = 115_200;

    /// Serial port transport
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
    }

    impl SerialTransport {
        /// Open a serial port, 8N1 without flow control
        pub fn open(device: &str, baud: Option<u32>) -> Result<Self> {
            let baud_rate = baud.unwrap_or(DEFAULT_BAUD);

            let port = serialport::new(device, baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(Duration::from_secs(5))
                .open()?;

            log::info!("Opened serial port {} at {} baud", device, baud_rate);

            Ok(Self { port })
        }
    }

    impl Transport for SerialTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.port.write_all(data)?;
            Ok(())
        }

        fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize> {
            self.port.set_timeout(Duration::from_millis(timeout_ms))?;
            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(e.into()),
            }
        }

        fn flush(&mut self) -> Result<()> {
            self.port.flush()?;
            Ok(())
        }
    }
}

pub mod tcp {
    //! TCP socket transport implementation

    use super::*;
    use crate::error::SerialError;
    use std::io::{ErrorKind, Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    /// TCP socket transport
    pub struct TcpTransport {
        stream: TcpStream,
    }

    impl TcpTransport {
        /// Connect to a programmer (or the emulator) at `host:port`
        pub fn connect(host: &str, port: u16) -> Result<Self> {
            let addr = format!("{}:{}", host, port);
            log::info!("Connecting to programmer at {}", addr);

            let stream = TcpStream::connect(&addr).map_err(|e| SerialError::ConnectionFailed(e.to_string()))?;
            stream.set_nodelay(true).map_err(|e| {
                SerialError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e))
            })?;
            stream
                .set_write_timeout(Some(Duration::from_secs(5)))
                .map_err(|e| SerialError::ConnectionFailed(format!("Failed to set write timeout: {}", e)))?;

            log::info!("Connected to programmer at {}", addr);

            Ok(Self { stream })
        }
    }

    impl Transport for TcpTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.stream.write_all(data)?;
            Ok(())
        }

        fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize> {
            self.stream
                .set_read_timeout(Some(Duration::from_millis(timeout_ms.max(1))))?;
            match self.stream.read(buf) {
                Ok(0) => Err(SerialError::ConnectionFailed("connection closed by peer".into())),
                Ok(n) => Ok(n),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
                Err(e) => Err(e.into()),
            }
        }

        fn flush(&mut self) -> Result<()> {
            self.stream.flush()?;
            Ok(())
        }
    }
}
