//! Contracts between the hashing core and a message transport.
//!
//! A transport supplies records through [`RecordSource`] and accepts hashed
//! records through [`RecordSink`]. [`run_hasher`] drives the loop: it polls
//! with a timeout, hashes each record against an already-published model and
//! forwards the result. The sink is flushed every `flush_records` records,
//! whenever a poll comes back empty, and on every exit path, including early
//! returns on error.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::error::LshError;
use crate::lsh::{HyperplaneSet, LshEngine};
use crate::stream::codec::{HashEncoding, decode_vector};

/// A keyed vector payload received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

/// A keyed hash payload handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Errors raised at the streaming boundary.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record source disconnected")]
    Disconnected,

    #[error("Record '{key}' rejected: {source}")]
    Rejected {
        key: String,
        #[source]
        source: LshError,
    },

    #[error(transparent)]
    Core(#[from] LshError),
}

/// Source of inbound records.
pub trait RecordSource {
    /// Waits up to `timeout` for the next record.
    ///
    /// Returns `Ok(None)` when nothing arrived in time and
    /// `Err(StreamError::Disconnected)` once the source is exhausted.
    fn poll(&mut self, timeout: Duration) -> Result<Option<InboundRecord>, StreamError>;
}

/// Destination for outbound records.
pub trait RecordSink {
    fn send(&mut self, record: OutboundRecord) -> Result<(), StreamError>;

    /// Pushes every pending record to the transport.
    fn flush(&mut self) -> Result<(), StreamError>;
}

/// What the loop does with a record that cannot be hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Log the record and keep consuming.
    #[default]
    Skip,

    /// Stop the loop and return the error.
    Fail,
}

/// Runtime options for [`run_hasher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub poll_timeout: Duration,
    pub malformed_policy: MalformedPolicy,
    pub encoding: HashEncoding,

    /// Records sent between forced flushes
    pub flush_records: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            malformed_policy: MalformedPolicy::default(),
            encoding: HashEncoding::default(),
            flush_records: 64,
        }
    }
}

impl From<&StreamConfig> for StreamOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            malformed_policy: config.malformed_policy,
            encoding: config.encoding,
            flush_records: config.flush_records.max(1),
        }
    }
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub hashed: u64,
    pub skipped: u64,
    pub empty_polls: u64,
    pub poll_errors: u64,
}

/// Sink wrapper that flushes on drop unless [`FlushOnDrop::finish`] ran.
pub struct FlushOnDrop<'a, K: RecordSink> {
    sink: &'a mut K,
    finished: bool,
}

impl<'a, K: RecordSink> FlushOnDrop<'a, K> {
    pub fn new(sink: &'a mut K) -> Self {
        Self {
            sink,
            finished: false,
        }
    }

    /// Flushes and reports the flush result.
    pub fn finish(mut self) -> Result<(), StreamError> {
        self.finished = true;
        self.sink.flush()
    }
}

impl<K: RecordSink> Deref for FlushOnDrop<'_, K> {
    type Target = K;

    fn deref(&self) -> &K {
        self.sink
    }
}

impl<K: RecordSink> DerefMut for FlushOnDrop<'_, K> {
    fn deref_mut(&mut self) -> &mut K {
        self.sink
    }
}

impl<K: RecordSink> Drop for FlushOnDrop<'_, K> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.sink.flush() {
                error!(error = %e, "failed to flush pending records on exit");
            }
        }
    }
}

/// Hashes one inbound record into an outbound record.
pub fn hash_record(
    model: &HyperplaneSet,
    record: &InboundRecord,
    encoding: HashEncoding,
) -> Result<OutboundRecord, LshError> {
    let vector = decode_vector(&record.payload)?;
    let code = model.hash(&vector)?;

    debug!(
        key = %String::from_utf8_lossy(&record.key),
        dimension = vector.len(),
        bits = code.len(),
        set_fraction = code.set_fraction(),
        "hashed record"
    );

    Ok(OutboundRecord {
        key: record.key.clone(),
        payload: encoding.encode(&code),
    })
}

/// Consumes `source` until it disconnects or `shutdown` is set, writing one
/// hashed record to `sink` per well-formed input.
///
/// The engine must already hold a model; otherwise this returns
/// `ModelNotFitted` before polling anything. Poll errors are logged and
/// the loop continues. Records that fail to decode or hash are handled per
/// `options.malformed_policy`.
pub fn run_hasher<S, K>(
    engine: &LshEngine,
    source: &mut S,
    sink: &mut K,
    options: &StreamOptions,
    shutdown: &AtomicBool,
) -> Result<StreamStats, StreamError>
where
    S: RecordSource,
    K: RecordSink,
{
    let model = engine.model().ok_or(LshError::ModelNotFitted)?;
    let mut sink = FlushOnDrop::new(sink);
    let mut stats = StreamStats::default();
    let flush_records = options.flush_records.max(1);
    let mut unflushed = 0usize;

    info!(
        bits = model.bits().get(),
        dimension = model.dimension().get(),
        encoding = ?options.encoding,
        "hashing stream started"
    );

    while !shutdown.load(Ordering::Acquire) {
        let record = match source.poll(options.poll_timeout) {
            Ok(Some(record)) => record,
            Ok(None) => {
                stats.empty_polls += 1;
                if unflushed > 0 {
                    sink.flush()?;
                    unflushed = 0;
                }
                continue;
            }
            Err(StreamError::Disconnected) => {
                debug!("record source disconnected");
                break;
            }
            Err(e) => {
                warn!(error = %e, "poll failed");
                stats.poll_errors += 1;
                continue;
            }
        };

        match hash_record(&model, &record, options.encoding) {
            Ok(out) => {
                sink.send(out)?;
                stats.hashed += 1;
                unflushed += 1;
                if unflushed >= flush_records {
                    sink.flush()?;
                    unflushed = 0;
                }
            }
            Err(e) => {
                let key = String::from_utf8_lossy(&record.key).into_owned();
                match options.malformed_policy {
                    MalformedPolicy::Skip => {
                        warn!(key = %key, code = e.status_code(), error = %e, "skipping record");
                        stats.skipped += 1;
                    }
                    MalformedPolicy::Fail => {
                        return Err(StreamError::Rejected { key, source: e });
                    }
                }
            }
        }
    }

    sink.finish()?;
    info!(
        hashed = stats.hashed,
        skipped = stats.skipped,
        poll_errors = stats.poll_errors,
        "hashing stream stopped"
    );
    Ok(stats)
}
