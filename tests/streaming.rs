//! The hashing loop driven over real transports.

use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded};
use planehash::stream::{
    ChannelSink, ChannelSource, FramedSink, FramedSource, HashEncoding, InboundRecord,
    MalformedPolicy, RecordSource, StreamError, StreamOptions, StreamStats, encode_frame,
    encode_vector, run_hasher,
};
use planehash::{HashBits, LshEngine};

fn fitted_engine(d: usize, bits: usize) -> LshEngine {
    let data: Vec<Vec<f32>> = (0..bits * 4)
        .map(|i| {
            (0..d)
                .map(|j| ((i * 31 + j * 17) % 23) as f32 - 11.0)
                .collect()
        })
        .collect();
    let engine = LshEngine::new(HashBits::new(bits).unwrap(), 865);
    engine.fit(&data).unwrap();
    engine
}

fn options() -> StreamOptions {
    StreamOptions {
        poll_timeout: Duration::from_millis(5),
        ..StreamOptions::default()
    }
}

#[test]
fn channel_transport_hashes_every_record_from_a_producer_thread() {
    let engine = fitted_engine(8, 16);
    let (in_tx, in_rx) = bounded(4);
    let (out_tx, out_rx) = unbounded();

    let vectors: Vec<Vec<f32>> = (0..50)
        .map(|i| (0..8).map(|j| (i + j) as f32 * 0.25 - 3.0).collect())
        .collect();

    let producer = {
        let vectors = vectors.clone();
        thread::spawn(move || {
            for (i, vector) in vectors.iter().enumerate() {
                in_tx
                    .send(InboundRecord {
                        key: format!("vec-{i}").into_bytes(),
                        payload: encode_vector(vector),
                    })
                    .unwrap();
            }
            // Dropping the sender disconnects the source.
        })
    };

    let mut source = ChannelSource::new(in_rx);
    let mut sink = ChannelSink::new(out_tx, 8);
    let stats = run_hasher(
        &engine,
        &mut source,
        &mut sink,
        &options(),
        &AtomicBool::new(false),
    )
    .unwrap();
    producer.join().unwrap();

    assert_eq!(stats.hashed, 50);
    assert_eq!(stats.skipped, 0);
    assert_eq!(sink.pending(), 0);

    let outputs: Vec<_> = out_rx.try_iter().collect();
    assert_eq!(outputs.len(), 50);
    for (i, out) in outputs.iter().enumerate() {
        assert_eq!(out.key, format!("vec-{i}").into_bytes());
        let expected = engine.hash(&vectors[i]).unwrap();
        assert_eq!(out.payload, expected.as_bytes());
    }
}

#[test]
fn shutdown_flag_stops_an_idle_loop_and_flushes() {
    let engine = Arc::new(fitted_engine(4, 4));
    let (in_tx, in_rx) = bounded::<InboundRecord>(1);
    let (out_tx, out_rx) = unbounded();
    let shutdown = Arc::new(AtomicBool::new(false));

    let worker = {
        let engine = Arc::clone(&engine);
        let shutdown = Arc::clone(&shutdown);
        thread::spawn(move || {
            let mut source = ChannelSource::new(in_rx);
            // Large batch so forwarding depends on the loop's flushes.
            let mut sink = ChannelSink::new(out_tx, 1000);
            run_hasher(&engine, &mut source, &mut sink, &options(), &shutdown)
        })
    };

    in_tx
        .send(InboundRecord {
            key: b"only".to_vec(),
            payload: encode_vector(&[1.0, 2.0, 3.0, 4.0]),
        })
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    shutdown.store(true, Ordering::Release);

    let stats = worker.join().unwrap().unwrap();
    assert_eq!(stats.hashed, 1);
    assert_eq!(out_rx.try_iter().count(), 1);
    drop(in_tx);
}

#[test]
fn framed_transport_round_trip_with_packed_codes() {
    let engine = fitted_engine(4, 12);
    let good = [0.5, -1.0, 2.0, 0.0];

    let mut input = encode_frame(b"good", &encode_vector(&good)).unwrap();
    input.extend(encode_frame(b"torn", &[0u8; 7]).unwrap());
    input.extend(encode_frame(b"again", &encode_vector(&good)).unwrap());

    let mut output = Vec::new();
    {
        let mut source = FramedSource::new(Cursor::new(input));
        let mut sink = FramedSink::new(&mut output);
        let options = StreamOptions {
            encoding: HashEncoding::Packed,
            malformed_policy: MalformedPolicy::Skip,
            ..options()
        };
        let stats = run_hasher(
            &engine,
            &mut source,
            &mut sink,
            &options,
            &AtomicBool::new(false),
        )
        .unwrap();
        assert_eq!(stats.hashed, 2);
        assert_eq!(stats.skipped, 1);
    }

    let packed = engine.hash(&good).unwrap().packed();
    assert_eq!(packed.len(), HashEncoding::Packed.encoded_len(12));

    let mut replies = FramedSource::new(Cursor::new(output));
    let first = replies.poll(Duration::ZERO).unwrap().unwrap();
    assert_eq!(first.key, b"good");
    assert_eq!(first.payload, packed);
    let second = replies.poll(Duration::ZERO).unwrap().unwrap();
    assert_eq!(second.key, b"again");
    assert!(matches!(
        replies.poll(Duration::ZERO),
        Err(StreamError::Disconnected)
    ));
}

#[test]
fn fail_policy_reports_the_offending_key() {
    let engine = fitted_engine(4, 4);
    let input = encode_frame(b"torn", &[0u8; 7]).unwrap();

    let mut output = Vec::new();
    let mut source = FramedSource::new(Cursor::new(input));
    let mut sink = FramedSink::new(&mut output);
    let options = StreamOptions {
        malformed_policy: MalformedPolicy::Fail,
        ..options()
    };

    let err = run_hasher(
        &engine,
        &mut source,
        &mut sink,
        &options,
        &AtomicBool::new(false),
    )
    .unwrap_err();
    assert!(matches!(err, StreamError::Rejected { ref key, .. } if key == "torn"));
}

/// Serves its bytes, then blocks until released, like a pipe whose writer
/// is still open.
struct OpenPipe {
    data: Cursor<Vec<u8>>,
    release: crossbeam_channel::Receiver<()>,
}

impl Read for OpenPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.data.read(buf)?;
        if n == 0 {
            let _ = self.release.recv();
        }
        Ok(n)
    }
}

#[derive(Clone, Default)]
struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn framed_output_is_visible_before_input_closes_and_on_shutdown() {
    let engine = Arc::new(fitted_engine(4, 8));
    let vectors = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, -2.0, 1.0, 3.0],
        [0.5, 0.5, 0.5, 0.5],
    ];
    let mut input = Vec::new();
    for (i, vector) in vectors.iter().enumerate() {
        input.extend(encode_frame(format!("k{i}").as_bytes(), &encode_vector(vector)).unwrap());
    }

    let (release_tx, release_rx) = bounded::<()>(0);
    let output = SharedOutput::default();
    let shutdown = Arc::new(AtomicBool::new(false));

    let worker = {
        let engine = Arc::clone(&engine);
        let shutdown = Arc::clone(&shutdown);
        let output = output.clone();
        thread::spawn(move || -> Result<StreamStats, StreamError> {
            let pipe = OpenPipe {
                data: Cursor::new(input),
                release: release_rx,
            };
            let mut source = FramedSource::new(pipe).spawn_reader(16)?;
            let mut sink = FramedSink::new(output);
            run_hasher(&engine, &mut source, &mut sink, &options(), &shutdown)
        })
    };

    // Three frames of 4 + 2 + 4 + 8 bytes. The default flush batch is larger
    // than three records, so they can only arrive through the idle flush.
    let expected_len = 3 * 18;
    let deadline = Instant::now() + Duration::from_secs(5);
    while output.bytes().len() < expected_len && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(output.bytes().len(), expected_len);
    assert!(!worker.is_finished());

    shutdown.store(true, Ordering::Release);
    let stats = worker.join().unwrap().unwrap();
    assert_eq!(stats.hashed, 3);

    let mut replies = FramedSource::new(Cursor::new(output.bytes()));
    for (i, vector) in vectors.iter().enumerate() {
        let reply = replies.poll(Duration::ZERO).unwrap().unwrap();
        assert_eq!(reply.key, format!("k{i}").into_bytes());
        assert_eq!(reply.payload, engine.hash(vector).unwrap().as_bytes());
    }
    drop(release_tx);
}
