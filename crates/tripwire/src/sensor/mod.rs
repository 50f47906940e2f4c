//! Proximity sensor stream
//!
//! Turns a reconnecting, line-oriented byte channel into distance readings.
//! One reading per newline-terminated line of UTF-8 text. Lines that do not
//! parse as a finite number are sensor chatter and are dropped without error.

pub mod transport;

use bytes::BytesMut;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::error::ConnectionError;

pub use transport::{SensorEndpoint, SensorLink, SensorTransport, TcpTransport};
#[cfg(feature = "serial")]
pub use transport::SerialTransport;

/// Longest partial line kept while waiting for its newline
pub const MAX_LINE_LEN: usize = 1024;

/// One distance sample, in whatever unit the sensor reports
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub distance: f64,
}

impl Reading {
    pub fn new(distance: f64) -> Self {
        Self { distance }
    }

    /// Parse one line of sensor output. Returns `None` for anything that is
    /// not a finite number.
    pub fn parse(line: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(line).ok()?.trim();
        if text.is_empty() {
            return None;
        }
        let distance: f64 = text.parse().ok()?;
        distance.is_finite().then_some(Self { distance })
    }
}

/// Sensor connection plus the bytes received but not yet split into lines
pub struct SensorStream {
    transport: Arc<dyn SensorTransport>,
    link: Option<Box<dyn SensorLink>>,
    pending: BytesMut,
    /// Link failure held back until the lines read before it are delivered
    failure: Option<ConnectionError>,
}

impl SensorStream {
    /// Create a disconnected stream over `transport`
    pub fn new(transport: Arc<dyn SensorTransport>) -> Self {
        Self {
            transport,
            link: None,
            pending: BytesMut::with_capacity(256),
            failure: None,
        }
    }

    /// Human-readable endpoint, for logs and events
    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    /// Transport used to open links, so callers can open one off-thread and
    /// hand it back through [`attach`](Self::attach).
    pub fn transport(&self) -> Arc<dyn SensorTransport> {
        Arc::clone(&self.transport)
    }

    /// Open the transport (blocking) and start reading from it
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        let link = self.transport.open()?;
        self.attach(link);
        Ok(())
    }

    /// Install a freshly opened link, replacing any previous one
    pub fn attach(&mut self, link: Box<dyn SensorLink>) {
        self.pending.clear();
        self.failure = None;
        self.link = Some(link);
        info!("Sensor connected: {}", self.transport.endpoint());
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Drop the current link, if any
    pub fn disconnect(&mut self) {
        if self.link.take().is_some() {
            debug!("Sensor link dropped: {}", self.transport.endpoint());
        }
        self.pending.clear();
        self.failure = None;
    }

    /// Drain every complete line currently available without blocking.
    ///
    /// A transport failure disconnects the stream and is returned once; while
    /// disconnected this returns an empty list. Lines that arrived before the
    /// failure are returned first and the failure is reported on the next call.
    pub fn try_read_readings(&mut self) -> Result<Vec<Reading>, ConnectionError> {
        if let Some(err) = self.failure.take() {
            return Err(self.fail(err));
        }
        let Some(link) = self.link.as_mut() else {
            return Ok(Vec::new());
        };

        match link.read_available(&mut self.pending) {
            Ok(_) => Ok(self.drain_lines()),
            Err(err) => {
                let readings = self.drain_lines();
                if readings.is_empty() {
                    return Err(self.fail(err));
                }
                debug!("Sensor link failed after {} readings", readings.len());
                self.failure = Some(err);
                Ok(readings)
            }
        }
    }

    fn fail(&mut self, err: ConnectionError) -> ConnectionError {
        self.disconnect();
        warn!("Sensor read failed: {}", err);
        err
    }

    /// Split buffered bytes into readings, keeping any trailing partial line
    fn drain_lines(&mut self) -> Vec<Reading> {
        let mut readings = Vec::new();

        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line = self.pending.split_to(newline + 1);
            match Reading::parse(&line[..newline]) {
                Some(reading) => {
                    trace!(distance = reading.distance, "Sensor reading");
                    readings.push(reading);
                }
                None => trace!("Ignoring sensor chatter: {:?}", String::from_utf8_lossy(&line)),
            }
        }

        if self.pending.len() > MAX_LINE_LEN {
            debug!(
                "Discarding {} bytes of unterminated sensor output",
                self.pending.len()
            );
            self.pending.clear();
        }

        readings
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{ScriptedTransport, Step};
    use super::*;

    fn connected(steps: Vec<Step>) -> (SensorStream, ScriptedTransport) {
        let transport = ScriptedTransport::with_steps(steps);
        let mut stream = SensorStream::new(Arc::new(transport.clone()));
        stream.connect().unwrap();
        (stream, transport)
    }

    fn distances(readings: &[Reading]) -> Vec<f64> {
        readings.iter().map(|r| r.distance).collect()
    }

    #[test]
    fn parse_accepts_numbers_and_rejects_chatter() {
        assert_eq!(Reading::parse(b"18.5"), Some(Reading::new(18.5)));
        assert_eq!(Reading::parse(b"  42 \r"), Some(Reading::new(42.0)));
        assert_eq!(Reading::parse(b"-3"), Some(Reading::new(-3.0)));
        assert_eq!(Reading::parse(b"Distance: 12cm"), None);
        assert_eq!(Reading::parse(b""), None);
        assert_eq!(Reading::parse(b"NaN"), None);
        assert_eq!(Reading::parse(b"-inf"), None);
        assert_eq!(Reading::parse(&[0xff, 0xfe, b'1']), None);
    }

    #[test]
    fn disconnected_stream_yields_nothing() {
        let mut stream = SensorStream::new(Arc::new(ScriptedTransport::default()));
        assert!(!stream.is_connected());
        assert!(stream.try_read_readings().unwrap().is_empty());
    }

    #[test]
    fn failed_open_leaves_stream_disconnected() {
        let transport = ScriptedTransport::default().failing_opens(1);
        let mut stream = SensorStream::new(Arc::new(transport.clone()));

        let err = stream.connect().unwrap_err();
        assert!(matches!(err, ConnectionError::Open { .. }));
        assert!(!stream.is_connected());

        stream.connect().unwrap();
        assert!(stream.is_connected());
        assert_eq!(transport.open_count(), 2);
    }

    #[test]
    fn returns_every_complete_line_and_skips_chatter() {
        let (mut stream, _) = connected(vec![Step::Data(
            b"45.0\r\nhello\n18.5\n\n3.0\n".to_vec(),
        )]);

        let readings = stream.try_read_readings().unwrap();
        assert_eq!(distances(&readings), vec![45.0, 18.5, 3.0]);
    }

    #[test]
    fn partial_lines_are_reassembled_across_polls() {
        let (mut stream, _) = connected(vec![
            Step::Data(b"12".to_vec()),
            Step::Data(b".5\n7".to_vec()),
            Step::Data(b"\n".to_vec()),
        ]);

        assert!(stream.try_read_readings().unwrap().is_empty());
        assert_eq!(distances(&stream.try_read_readings().unwrap()), vec![12.5]);
        assert_eq!(distances(&stream.try_read_readings().unwrap()), vec![7.0]);
    }

    #[test]
    fn oversized_unterminated_output_is_dropped() {
        let (mut stream, _) = connected(vec![
            Step::Data(vec![b'x'; MAX_LINE_LEN + 1]),
            Step::Data(b"9\n".to_vec()),
        ]);

        assert!(stream.try_read_readings().unwrap().is_empty());
        assert_eq!(distances(&stream.try_read_readings().unwrap()), vec![9.0]);
    }

    #[test]
    fn read_failure_is_reported_once_then_stream_is_disconnected() {
        let (mut stream, _) = connected(vec![
            Step::Data(b"30".to_vec()),
            Step::Fail,
            Step::Data(b"5\n".to_vec()),
        ]);

        assert!(stream.try_read_readings().unwrap().is_empty());
        let err = stream.try_read_readings().unwrap_err();
        assert!(matches!(err, ConnectionError::Read { .. }));
        assert!(!stream.is_connected());

        // Subsequent polls behave as disconnected
        assert!(stream.try_read_readings().unwrap().is_empty());
        assert!(stream.try_read_readings().unwrap().is_empty());
    }

    #[test]
    fn lines_read_before_a_failure_are_delivered_first() {
        let (mut stream, _) = connected(vec![Step::DataThenFail(b"40\n12.0\n7".to_vec())]);

        assert_eq!(distances(&stream.try_read_readings().unwrap()), vec![40.0, 12.0]);
        assert!(stream.is_connected());

        let err = stream.try_read_readings().unwrap_err();
        assert!(matches!(err, ConnectionError::Read { .. }));
        assert!(!stream.is_connected());
        assert!(stream.try_read_readings().unwrap().is_empty());
    }

    #[test]
    fn failure_with_only_a_partial_line_is_reported_at_once() {
        let (mut stream, _) = connected(vec![Step::DataThenFail(b"12".to_vec())]);

        assert!(stream.try_read_readings().is_err());
        assert!(!stream.is_connected());
    }

    #[test]
    fn reconnect_discards_partial_line_from_dead_link() {
        let (mut stream, _) = connected(vec![
            Step::Data(b"99".to_vec()),
            Step::Fail,
            Step::Data(b"1\n".to_vec()),
        ]);

        assert!(stream.try_read_readings().unwrap().is_empty());
        assert!(stream.try_read_readings().is_err());
        stream.connect().unwrap();

        // "99" from the old link must not merge with "1"
        assert_eq!(distances(&stream.try_read_readings().unwrap()), vec![1.0]);
    }
}
