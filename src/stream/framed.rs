//! Length-prefixed record framing over byte streams.
//!
//! Each frame is `key_len: u32 LE`, `key`, `payload_len: u32 LE`, `payload`.
//! Used by the `serve` command to read records from stdin and write hashes
//! to stdout.

use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use tracing::{debug, warn};

use crate::stream::adapter::{
    InboundRecord, OutboundRecord, RecordSink, RecordSource, StreamError,
};
use crate::stream::channel::ChannelSource;

/// Largest accepted key or payload, in bytes.
const MAX_FIELD_BYTES: usize = 64 * 1024 * 1024;

/// Record source reading frames from a byte stream.
///
/// Reads block until a full frame or end of stream arrives, so the poll
/// timeout is not applied. End of stream at a frame boundary disconnects.
pub struct FramedSource<R: Read> {
    reader: BufReader<R>,
    exhausted: bool,
}

impl<R: Read> FramedSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            exhausted: false,
        }
    }

    /// Reads a length prefix, or `None` on a clean end of stream.
    fn read_len(&mut self) -> io::Result<Option<usize>> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        let len = u32::from_le_bytes(buf) as usize;
        if len > MAX_FIELD_BYTES {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("frame field of {len} bytes exceeds {MAX_FIELD_BYTES}"),
            ));
        }
        Ok(Some(len))
    }

    fn read_field(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut field = vec![0u8; len];
        self.reader.read_exact(&mut field)?;
        Ok(field)
    }

    fn read_frame(&mut self) -> io::Result<Option<InboundRecord>> {
        let Some(key_len) = self.read_len()? else {
            return Ok(None);
        };
        let key = self.read_field(key_len)?;
        let payload_len = self.read_len()?.ok_or(ErrorKind::UnexpectedEof)?;
        let payload = self.read_field(payload_len)?;
        Ok(Some(InboundRecord { key, payload }))
    }
}

impl<R: Read + Send + 'static> FramedSource<R> {
    /// Moves frame reading onto a background thread and returns a source
    /// that honors the poll timeout.
    ///
    /// A blocked read no longer holds up the hashing loop, so it can flush
    /// on idle polls and notice shutdown. The thread ends when the stream
    /// does or when the returned source is dropped and the next frame
    /// arrives.
    pub fn spawn_reader(mut self, capacity: usize) -> Result<ChannelSource, StreamError> {
        let (tx, rx) = bounded(capacity.max(1));
        thread::Builder::new()
            .name("frame-reader".to_string())
            .spawn(move || {
                loop {
                    match self.poll(Duration::ZERO) {
                        Ok(Some(record)) => {
                            if tx.send(record).is_err() {
                                break;
                            }
                        }
                        Ok(None) => continue,
                        Err(StreamError::Disconnected) => break,
                        Err(e) => warn!(error = %e, "frame reader error"),
                    }
                }
                debug!("frame reader finished");
            })?;
        Ok(ChannelSource::new(rx))
    }
}

impl<R: Read> RecordSource for FramedSource<R> {
    fn poll(&mut self, _timeout: Duration) -> Result<Option<InboundRecord>, StreamError> {
        if self.exhausted {
            return Err(StreamError::Disconnected);
        }

        match self.read_frame() {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => {
                self.exhausted = true;
                Err(StreamError::Disconnected)
            }
            Err(e) => {
                // A broken frame leaves the stream unaligned.
                self.exhausted = true;
                Err(StreamError::Transport(format!("unreadable frame: {e}")))
            }
        }
    }
}

/// Record sink writing frames to a byte stream.
pub struct FramedSink<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FramedSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    fn write_field(&mut self, field: &[u8]) -> Result<(), StreamError> {
        let len = u32::try_from(field.len())
            .map_err(|_| StreamError::Transport(format!("field of {} bytes", field.len())))?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(field)?;
        Ok(())
    }
}

impl<W: Write> RecordSink for FramedSink<W> {
    fn send(&mut self, record: OutboundRecord) -> Result<(), StreamError> {
        self.write_field(&record.key)?;
        self.write_field(&record.payload)
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Encodes one frame; the inverse of what [`FramedSource`] reads.
///
/// Fails if a field does not fit a `u32` length prefix.
pub fn encode_frame(key: &[u8], payload: &[u8]) -> Result<Vec<u8>, StreamError> {
    let mut frame = Vec::with_capacity(8 + key.len() + payload.len());
    for field in [key, payload] {
        let len = u32::try_from(field.len())
            .map_err(|_| StreamError::Transport(format!("field of {} bytes", field.len())))?;
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(field);
    }
    Ok(frame)
}
