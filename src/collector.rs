//! NDJSON producer feeding the event sink

use crate::errors::{Result, SinkError};
use crate::filter::EventFilter;
use crate::record::Record;
use crate::sink::EventSink;
use crate::transport::Transport;

use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, instrument, warn};

/// Reads one JSON record per line and forwards matching records to a sink
#[derive(Debug, Clone, Default)]
pub struct LineCollector {
    filter: EventFilter,
}

/// Collector counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStats {
    pub lines_read: u64,
    pub records_accepted: u64,
    pub records_filtered: u64,
    pub lines_rejected: u64,
    pub delivery_errors: u64,
}

impl LineCollector {
    pub fn new(filter: EventFilter) -> Self {
        Self { filter }
    }

    /// Pump lines until end of input or until `shutdown` resolves, then close
    /// the sink. A flush in progress is never interrupted by `shutdown`.
    #[instrument(skip_all)]
    pub async fn run<R, T, S>(
        &self,
        reader: R,
        sink: &mut EventSink<T>,
        shutdown: S,
    ) -> Result<CollectorStats>
    where
        R: AsyncBufRead + Unpin,
        T: Transport,
        S: Future<Output = ()>,
    {
        let mut lines = reader.lines();
        let mut stats = CollectorStats::default();
        tokio::pin!(shutdown);

        loop {
            let line = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, closing sink");
                    break;
                }
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("End of input after {} lines", stats.lines_read);
                    break;
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    sink.close().await;
                    return Err(SinkError::Io(e));
                }
            };

            stats.lines_read += 1;
            self.process_line(&line, sink, &mut stats).await?;
        }

        sink.close().await;

        info!(
            "Collector finished - {} lines, {} accepted, {} filtered, {} rejected, {} delivery errors",
            stats.lines_read,
            stats.records_accepted,
            stats.records_filtered,
            stats.lines_rejected,
            stats.delivery_errors
        );

        Ok(stats)
    }

    async fn process_line<T: Transport>(
        &self,
        line: &str,
        sink: &mut EventSink<T>,
        stats: &mut CollectorStats,
    ) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("Skipping unparsable line {}: {}", stats.lines_read, e);
                stats.lines_rejected += 1;
                return Ok(());
            }
        };

        let record = match Record::try_from(value) {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping line {}: {}", stats.lines_read, e);
                stats.lines_rejected += 1;
                return Ok(());
            }
        };

        if !self.filter.matches(&record) {
            debug!("Filtered out {} event", record.event());
            stats.records_filtered += 1;
            return Ok(());
        }

        match sink.accept(record).await {
            Ok(()) => {
                stats.records_accepted += 1;
                Ok(())
            }
            Err(SinkError::Transport(e)) => {
                // The record was buffered; its batch was dropped by the policy
                stats.records_accepted += 1;
                stats.delivery_errors += 1;
                error!("Batch delivery failed: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ErrorThreshold, Settings, SinkConfig};
    use crate::filter::Selector;
    use crate::sink::SinkState;
    use crate::transport::mock::ScriptedTransport;
    use std::sync::Arc;

    fn sink(
        threshold: usize,
        error_threshold: ErrorThreshold,
        transport: Arc<ScriptedTransport>,
    ) -> EventSink<Arc<ScriptedTransport>> {
        let settings = Settings::resolve(SinkConfig {
            endpoint: Some("http://localhost:31337".to_string()),
            host: Some("test-host".to_string()),
            threshold: Some(threshold),
            error_threshold: Some(error_threshold),
            ..Default::default()
        })
        .unwrap();

        EventSink::new(settings, transport)
    }

    #[tokio::test]
    async fn test_pumps_lines_and_closes_at_eof() {
        let transport = ScriptedTransport::with_outcomes([]);
        let mut sink = sink(2, ErrorThreshold::Bounded(0), transport.clone());

        let input = concat!(
            "{\"event\":\"log\",\"id\":1}\n",
            "\n",
            "not json\n",
            "{\"id\":2}\n",
            "{\"event\":\"log\",\"id\":3}\n",
            "{\"event\":\"log\",\"id\":4}\n",
        );

        let stats = LineCollector::default()
            .run(input.as_bytes(), &mut sink, std::future::pending())
            .await
            .unwrap();

        assert_eq!(stats.lines_read, 6);
        assert_eq!(stats.records_accepted, 3);
        assert_eq!(stats.lines_rejected, 2);
        assert_eq!(sink.state(), SinkState::Closed);

        let payloads = transport.payloads();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0]["events"].as_array().unwrap().len(), 2);
        assert_eq!(payloads[1]["events"][0]["id"], serde_json::json!(4));
    }

    #[tokio::test]
    async fn test_filter_drops_unsubscribed_events() {
        let transport = ScriptedTransport::with_outcomes([]);
        let mut sink = sink(10, ErrorThreshold::Bounded(0), transport.clone());
        let collector = LineCollector::new(EventFilter::new().subscribe("log", Selector::Any));

        let input = concat!(
            "{\"event\":\"log\",\"id\":1}\n",
            "{\"event\":\"request\",\"id\":2}\n",
            "{\"event\":\"log\",\"id\":3}\n",
        );

        let stats = collector
            .run(input.as_bytes(), &mut sink, std::future::pending())
            .await
            .unwrap();

        assert_eq!(stats.records_accepted, 2);
        assert_eq!(stats.records_filtered, 1);

        let payloads = transport.payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["events"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delivery_errors_do_not_stop_the_pump() {
        let transport = ScriptedTransport::failing(1);
        let mut sink = sink(1, ErrorThreshold::Bounded(0), transport.clone());

        let input = "{\"event\":\"log\",\"id\":1}\n{\"event\":\"log\",\"id\":2}\n";

        let stats = LineCollector::default()
            .run(input.as_bytes(), &mut sink, std::future::pending())
            .await
            .unwrap();

        assert_eq!(stats.records_accepted, 2);
        assert_eq!(stats.delivery_errors, 1);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_closes_sink() {
        let transport = ScriptedTransport::with_outcomes([]);
        let mut sink = sink(10, ErrorThreshold::Bounded(0), transport.clone());

        let stats = LineCollector::default()
            .run(
                "{\"event\":\"log\"}\n".as_bytes(),
                &mut sink,
                std::future::ready(()),
            )
            .await
            .unwrap();

        assert_eq!(stats.lines_read, 0);
        assert_eq!(sink.state(), SinkState::Closed);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_closed_sink_is_an_error() {
        let transport = ScriptedTransport::with_outcomes([]);
        let mut sink = sink(10, ErrorThreshold::Bounded(0), transport);
        sink.close().await;

        let result = LineCollector::default()
            .run(
                "{\"event\":\"log\"}\n".as_bytes(),
                &mut sink,
                std::future::pending(),
            )
            .await;

        assert!(matches!(result, Err(SinkError::SinkClosed)));
    }
}
