//! In-process transport over `crossbeam-channel`.
//!
//! Lets a producer thread feed vectors to a hashing thread and collect the
//! results without any external broker.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::stream::adapter::{
    InboundRecord, OutboundRecord, RecordSink, RecordSource, StreamError,
};

/// Record source reading from a channel.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Receiver<InboundRecord>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<InboundRecord>) -> Self {
        Self { rx }
    }
}

impl RecordSource for ChannelSource {
    fn poll(&mut self, timeout: Duration) -> Result<Option<InboundRecord>, StreamError> {
        match self.rx.recv_timeout(timeout) {
            Ok(record) => Ok(Some(record)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(StreamError::Disconnected),
        }
    }
}

/// Record sink that buffers records and forwards them to a channel in
/// batches of `batch_size`, or whenever it is flushed.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<OutboundRecord>,
    pending: Vec<OutboundRecord>,
    batch_size: usize,
}

impl ChannelSink {
    pub fn new(tx: Sender<OutboundRecord>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            tx,
            pending: Vec::with_capacity(batch_size),
            batch_size,
        }
    }

    /// Number of records sent but not yet forwarded.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl RecordSink for ChannelSink {
    fn send(&mut self, record: OutboundRecord) -> Result<(), StreamError> {
        self.pending.push(record);
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        for record in self.pending.drain(..) {
            self.tx
                .send(record)
                .map_err(|_| StreamError::Transport("output channel closed".to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};

    #[test]
    fn test_source_timeout_and_disconnect() {
        let (tx, rx) = bounded(1);
        let mut source = ChannelSource::new(rx);

        assert!(
            source
                .poll(Duration::from_millis(1))
                .unwrap()
                .is_none()
        );

        tx.send(InboundRecord {
            key: b"k".to_vec(),
            payload: vec![0; 4],
        })
        .unwrap();
        assert!(source.poll(Duration::from_millis(1)).unwrap().is_some());

        drop(tx);
        assert!(matches!(
            source.poll(Duration::from_millis(1)),
            Err(StreamError::Disconnected)
        ));
    }

    #[test]
    fn test_sink_batches_until_flush() {
        let (tx, rx) = unbounded();
        let mut sink = ChannelSink::new(tx, 2);
        let record = |k: u8| OutboundRecord {
            key: vec![k],
            payload: vec![1],
        };

        sink.send(record(1)).unwrap();
        assert_eq!(sink.pending(), 1);
        assert!(rx.try_recv().is_err());

        sink.send(record(2)).unwrap();
        assert_eq!(sink.pending(), 0);
        assert_eq!(rx.try_iter().count(), 2);

        sink.send(record(3)).unwrap();
        sink.flush().unwrap();
        assert_eq!(rx.try_recv().unwrap().key, vec![3]);
    }

    #[test]
    fn test_sink_reports_closed_channel() {
        let (tx, rx) = unbounded();
        let mut sink = ChannelSink::new(tx, 1);
        drop(rx);
        assert!(matches!(
            sink.send(OutboundRecord {
                key: vec![],
                payload: vec![]
            }),
            Err(StreamError::Transport(_))
        ));
    }
}
