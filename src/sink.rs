//! Buffered, threshold-driven event sink
//!
//! The sink owns the buffer and the failure counter. Every lifecycle method
//! takes `&mut self`, so a producer cannot issue a new `accept` while a flush
//! triggered by the previous one is still in flight: the returned future is
//! the backpressure signal.

use crate::config::Settings;
use crate::envelope;
use crate::errors::{Result, SinkError};
use crate::policy::{FailurePolicy, Verdict};
use crate::record::Record;
use crate::transport::{HttpTransport, Transport, TransportError, TransportRequest};
use chrono::Utc;
use reqwest::Method;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Accepting records
    Idle,
    /// A transport call is in flight
    Flushing,
    /// `close` has run; no further records are accepted
    Closed,
}

/// Delivery counters since the sink was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub flush_attempts: u64,
    pub successful_flushes: u64,
    pub failed_flushes: u64,
    pub delivered_records: u64,
    pub dropped_records: u64,
}

pub struct EventSink<T: Transport> {
    settings: Settings,
    policy: FailurePolicy,
    transport: T,
    buffer: Vec<Record>,
    failures: u32,
    state: SinkState,
    stats: SinkStats,
}

impl EventSink<HttpTransport> {
    /// Create a sink delivering over HTTP with the configured timeout
    pub fn connect(settings: Settings) -> Result<Self> {
        let transport = HttpTransport::new(settings.transport.timeout)?;
        Ok(Self::new(settings, transport))
    }
}

impl<T: Transport> EventSink<T> {
    pub fn new(settings: Settings, transport: T) -> Self {
        let policy = FailurePolicy::from(settings.error_threshold);

        Self {
            settings,
            policy,
            transport,
            buffer: Vec::new(),
            failures: 0,
            state: SinkState::Idle,
            stats: SinkStats::default(),
        }
    }

    /// Buffer a record, flushing once the threshold is reached.
    ///
    /// Resolves only after any flush it triggered has resolved. Returns the
    /// transport failure when the error policy decides to report it.
    pub async fn accept(&mut self, record: Record) -> Result<()> {
        if self.state == SinkState::Closed {
            return Err(SinkError::SinkClosed);
        }

        self.buffer.push(record);
        debug!("Buffered record, current size: {}", self.buffer.len());

        if self.buffer.len() >= self.settings.threshold {
            self.flush().await
        } else {
            Ok(())
        }
    }

    /// Send whatever is buffered, under the configured error policy.
    pub async fn flush(&mut self) -> Result<()> {
        if self.state == SinkState::Closed {
            return Err(SinkError::SinkClosed);
        }

        if self.buffer.is_empty() {
            return Ok(());
        }

        let batch_id = Uuid::new_v4();
        let count = self.buffer.len();

        match self.send_buffer(batch_id).await {
            Ok(()) => {
                self.policy.on_success(&mut self.failures);
                self.record_delivery(count);
                info!("Delivered batch {} with {} records", batch_id, count);
                Ok(())
            }
            Err(err) => {
                self.stats.failed_flushes += 1;

                match self.policy.on_failure(&mut self.failures) {
                    Verdict::Retain => {
                        warn!(
                            "Failed to deliver batch {} (failure {} of {}), keeping {} records for retry: {}",
                            batch_id,
                            self.failures,
                            self.policy.threshold(),
                            count,
                            err
                        );
                        Ok(())
                    }
                    Verdict::Drop { report } => {
                        self.buffer.clear();
                        self.stats.dropped_records += count as u64;

                        if report {
                            error!(
                                "Dropped batch {} with {} records: {}",
                                batch_id, count, err
                            );
                            Err(SinkError::Transport(err))
                        } else {
                            warn!(
                                "Silently dropped batch {} with {} records: {}",
                                batch_id, count, err
                            );
                            Ok(())
                        }
                    }
                }
            }
        }
    }

    /// Make one last best-effort flush and stop accepting records.
    ///
    /// The outcome of the final flush is logged, never returned. Calling
    /// `close` twice is a no-op.
    pub async fn close(&mut self) {
        if self.state == SinkState::Closed {
            return;
        }

        if !self.buffer.is_empty() {
            let batch_id = Uuid::new_v4();
            let count = self.buffer.len();

            match self.send_buffer(batch_id).await {
                Ok(()) => {
                    self.record_delivery(count);
                    info!("Delivered final batch {} with {} records", batch_id, count);
                }
                Err(err) => {
                    self.stats.failed_flushes += 1;
                    self.stats.dropped_records += count as u64;
                    warn!(
                        "Final batch {} with {} records was not delivered: {}",
                        batch_id, count, err
                    );
                }
            }

            self.buffer.clear();
            self.failures = 0;
        }

        self.state = SinkState::Closed;
        info!(
            "Sink closed - {} flushes, {} records delivered, {} dropped",
            self.stats.flush_attempts, self.stats.delivered_records, self.stats.dropped_records
        );
    }

    /// Build the envelope for the current buffer and hand it to the
    /// transport. The buffer itself is left untouched.
    async fn send_buffer(&mut self, batch_id: Uuid) -> std::result::Result<(), TransportError> {
        let envelope = envelope::build(&self.buffer, &self.settings, Utc::now());

        let request = TransportRequest {
            method: Method::POST,
            url: self.settings.endpoint.to_string(),
            body: envelope.to_payload(),
            headers: self.settings.transport.headers.clone(),
        };

        debug!(
            "Sending batch {} with {} records to {}",
            batch_id,
            envelope.len(),
            request.url
        );

        self.state = SinkState::Flushing;
        self.stats.flush_attempts += 1;

        let result = self.transport.send(request).await;

        self.state = SinkState::Idle;
        result.map(|_| ())
    }

    fn record_delivery(&mut self, count: usize) {
        self.buffer.clear();
        self.stats.successful_flushes += 1;
        self.stats.delivered_records += count as u64;
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    /// Number of records waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
