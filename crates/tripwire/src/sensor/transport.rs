//! Sensor transports
//!
//! A transport knows how to open a link to the sensor; a link hands over
//! whatever bytes are already waiting without blocking. Opening may block and
//! is done off the session loop.

use bytes::BytesMut;
use std::fmt;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::ConnectionError;

/// Default baud rate of the reference sensor firmware
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// How long a TCP connect may take before the attempt counts as failed
const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens links to a sensor device
pub trait SensorTransport: Send + Sync {
    /// Human-readable description of where the sensor is
    fn endpoint(&self) -> String;

    /// Open a new link. May block for the duration of device I/O.
    fn open(&self) -> Result<Box<dyn SensorLink>, ConnectionError>;
}

/// An open, readable connection to a sensor
pub trait SensorLink: Send {
    /// Append every byte currently available to `buf` and return how many
    /// were read. Must not block; returns `Ok(0)` when nothing is waiting.
    fn read_available(&mut self, buf: &mut BytesMut) -> Result<usize, ConnectionError>;
}

/// Where to find the sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorEndpoint {
    /// Serial device path (e.g. `/dev/ttyACM0`, `COM7`)
    Serial { path: String, baud_rate: u32 },
    /// Line stream over TCP (e.g. a ser2net bridge), written `tcp://host:port`
    Tcp { addr: String },
}

impl SensorEndpoint {
    /// Build the transport for this endpoint
    pub fn transport(&self) -> anyhow::Result<std::sync::Arc<dyn SensorTransport>> {
        match self {
            SensorEndpoint::Tcp { addr } => Ok(std::sync::Arc::new(TcpTransport::new(addr))),
            #[cfg(feature = "serial")]
            SensorEndpoint::Serial { path, baud_rate } => {
                Ok(std::sync::Arc::new(SerialTransport::new(path, *baud_rate)))
            }
            #[cfg(not(feature = "serial"))]
            SensorEndpoint::Serial { path, .. } => anyhow::bail!(
                "Serial sensor {} requested but serial support is not enabled. Rebuild with --features serial",
                path
            ),
        }
    }

    /// Replace the baud rate of a serial endpoint; TCP endpoints are unchanged
    pub fn with_baud_rate(self, baud: u32) -> Self {
        match self {
            SensorEndpoint::Serial { path, .. } => SensorEndpoint::Serial {
                path,
                baud_rate: baud,
            },
            other => other,
        }
    }
}

impl FromStr for SensorEndpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("Empty sensor endpoint");
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            if addr.rsplit_once(':').is_none() {
                anyhow::bail!("TCP sensor endpoint needs host:port, got {:?}", addr);
            }
            return Ok(SensorEndpoint::Tcp {
                addr: addr.to_string(),
            });
        }
        Ok(SensorEndpoint::Serial {
            path: s.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        })
    }
}

impl fmt::Display for SensorEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorEndpoint::Serial { path, baud_rate } => {
                write!(f, "{} @ {} baud", path, baud_rate)
            }
            SensorEndpoint::Tcp { addr } => write!(f, "tcp://{}", addr),
        }
    }
}

// --- TCP ---

/// Sensor line stream over TCP
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: String,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    fn open_error(&self, source: io::Error) -> ConnectionError {
        ConnectionError::Open {
            endpoint: self.endpoint(),
            source,
        }
    }
}

impl SensorTransport for TcpTransport {
    fn endpoint(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    fn open(&self) -> Result<Box<dyn SensorLink>, ConnectionError> {
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|e| self.open_error(e))?
            .collect();

        let mut last_err =
            io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, TCP_CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_nonblocking(true).map_err(|e| self.open_error(e))?;
                    debug!("Connected to sensor bridge at {}", addr);
                    return Ok(Box::new(TcpLink {
                        endpoint: self.endpoint(),
                        stream,
                    }));
                }
                Err(e) => last_err = e,
            }
        }

        Err(self.open_error(last_err))
    }
}

struct TcpLink {
    endpoint: String,
    stream: TcpStream,
}

impl SensorLink for TcpLink {
    fn read_available(&mut self, buf: &mut BytesMut) -> Result<usize, ConnectionError> {
        let mut chunk = [0u8; 512];
        let mut total = 0;
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(ConnectionError::Closed {
                        endpoint: self.endpoint.clone(),
                    })
                }
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(ConnectionError::Read {
                        endpoint: self.endpoint.clone(),
                        source,
                    })
                }
            }
        }
    }
}

// --- Serial ---

/// Serial-port sensor (the reference Arduino-style rangefinder)
#[cfg(feature = "serial")]
#[derive(Debug, Clone)]
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
}

#[cfg(feature = "serial")]
impl SerialTransport {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

#[cfg(feature = "serial")]
impl SensorTransport for SerialTransport {
    fn endpoint(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud_rate)
    }

    fn open(&self) -> Result<Box<dyn SensorLink>, ConnectionError> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| ConnectionError::Open {
                endpoint: self.endpoint(),
                source: io::Error::from(e),
            })?;

        Ok(Box::new(SerialLink {
            endpoint: self.endpoint(),
            port,
        }))
    }
}

#[cfg(feature = "serial")]
struct SerialLink {
    endpoint: String,
    port: Box<dyn serialport::SerialPort>,
}

#[cfg(feature = "serial")]
impl SerialLink {
    fn read_error(&self, source: io::Error) -> ConnectionError {
        ConnectionError::Read {
            endpoint: self.endpoint.clone(),
            source,
        }
    }
}

#[cfg(feature = "serial")]
impl SensorLink for SerialLink {
    fn read_available(&mut self, buf: &mut BytesMut) -> Result<usize, ConnectionError> {
        // A vanished device shows up as an error here rather than as EOF
        let waiting = self
            .port
            .bytes_to_read()
            .map_err(|e| self.read_error(io::Error::from(e)))? as usize;
        if waiting == 0 {
            return Ok(0);
        }

        let mut chunk = vec![0u8; waiting];
        match self.port.read(&mut chunk) {
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(self.read_error(e)),
        }
    }
}
