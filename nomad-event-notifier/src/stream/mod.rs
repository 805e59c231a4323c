//! Nomad event stream subscription.
//!
//! [`NomadEventSource`] owns the streaming connection, its reconnect/backoff
//! loop and the resume position. Consumers only see [`RawEvent`]s or a clean
//! end of stream.

mod codec;
pub mod event;
pub mod source;
pub mod transport;

pub use event::{RawEvent, Topic};
pub use source::{EventSource, NomadEventSource, SourceItem, StreamConfig};
pub use transport::{ByteStream, EventTransport, HttpTransport, SubscribeRequest, TopicFilter};
