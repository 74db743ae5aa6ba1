//! Streaming boundary between the hashing core and a message transport.
//!
//! The core never talks to a broker. Transports implement [`RecordSource`]
//! and [`RecordSink`]; [`run_hasher`] connects them to a published model.
//! Two transports ship here: an in-process channel pair and length-prefixed
//! framing over byte streams.

mod adapter;
mod channel;
mod codec;
mod framed;

pub use adapter::{
    FlushOnDrop, InboundRecord, MalformedPolicy, OutboundRecord, RecordSink, RecordSource,
    StreamError, StreamOptions, StreamStats, hash_record, run_hasher,
};
pub use channel::{ChannelSink, ChannelSource};
pub use codec::{BYTES_PER_ELEMENT, HashEncoding, decode_vector, encode_vector};
pub use framed::{FramedSink, FramedSource, encode_frame};
