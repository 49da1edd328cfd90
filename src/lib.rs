//! Buffered HTTP event sink
//!
//! This library batches structured records from an upstream producer, wraps
//! each batch in an envelope and POSTs it to a remote collector, with a
//! configurable tolerance for delivery failures.

pub mod config;
pub mod collector;
pub mod envelope;
pub mod errors;
pub mod filter;
pub mod policy;
pub mod record;
pub mod serializer;
pub mod sink;
pub mod transport;

pub use config::{ErrorThreshold, Settings, SinkConfig};
pub use collector::{CollectorStats, LineCollector};
pub use envelope::{Envelope, Events};
pub use errors::{Result, SinkError};
pub use filter::{EventFilter, Selector, Subscription};
pub use record::{Record, Value};
pub use sink::{EventSink, SinkState, SinkStats};
pub use transport::{HttpTransport, Transport, TransportError, TransportRequest, TransportResponse};
