//! Event sink binary: NDJSON on stdin (or a file) to an HTTP collector

use clap::Parser;
use good_http_sink::{
    ErrorThreshold, EventFilter, EventSink, LineCollector, Result, Settings, SinkConfig,
    Subscription,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(version, about = "Batch NDJSON records and POST them to an HTTP collector")]
struct Args {
    /// JSON configuration file
    #[arg(long, env = "GOOD_HTTP_CONFIG")]
    config: Option<PathBuf>,

    /// Collector URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Host name written into envelopes
    #[arg(long)]
    host: Option<String>,

    /// Records per batch; 0 sends every record on its own
    #[arg(long)]
    threshold: Option<usize>,

    /// Consecutive failures tolerated before a batch is dropped, or "unbounded"
    #[arg(long)]
    error_threshold: Option<ErrorThreshold>,

    #[arg(long)]
    schema: Option<String>,

    /// Group events by type and sort them by timestamp; `--group-events=false`
    /// overrides the config file and environment
    #[arg(
        long,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    group_events: Option<bool>,

    /// Request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Extra request header, NAME=VALUE (repeatable)
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Event subscription, TYPE=* or TYPE=tag1,tag2 (repeatable)
    #[arg(long = "events")]
    events: Vec<Subscription>,

    /// Input file; stdin when omitted
    input: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> SinkConfig {
        let mut config = SinkConfig {
            endpoint: self.endpoint,
            host: self.host,
            threshold: self.threshold,
            error_threshold: self.error_threshold,
            schema: self.schema,
            group_events: self.group_events,
            events: self.events.into_iter().collect::<EventFilter>(),
            ..Default::default()
        };
        config.transport.timeout_ms = self.timeout_ms;
        config.transport.headers = self.headers.into_iter().collect::<BTreeMap<_, _>>();
        config
    }
}

fn parse_header(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("header '{}' must look like NAME=VALUE", s))
}

#[tokio::main]
async fn main() {
    initialize_tracing();

    info!("Starting good-http-sink v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(Args::parse()).await {
        error!("Sink failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(mut args: Args) -> Result<()> {
    let input = args.input.take();

    let file_config = match &args.config {
        Some(path) => SinkConfig::from_file(path)?,
        None => SinkConfig::default(),
    };

    let config = file_config
        .merge(SinkConfig::from_env())
        .merge(args.into_config());

    let filter = config.events.clone();
    let settings = Settings::resolve(config)?;

    info!(
        "Sink configuration - Endpoint: {}, Host: {}, Threshold: {}, Error threshold: {}, Grouped: {}",
        settings.endpoint,
        settings.host,
        settings.threshold,
        settings.error_threshold,
        settings.group_events
    );

    let mut sink = EventSink::connect(settings)?;
    let collector = LineCollector::new(filter);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to wait for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let stats = match input {
        Some(path) => {
            let file = tokio::fs::File::open(&path).await?;
            collector
                .run(BufReader::new(file), &mut sink, shutdown)
                .await?
        }
        None => {
            collector
                .run(BufReader::new(tokio::io::stdin()), &mut sink, shutdown)
                .await?
        }
    };

    let sink_stats = sink.stats();
    info!(
        "Final sink metrics - {} records delivered in {} flushes, {} dropped, {} rejected lines",
        sink_stats.delivered_records,
        sink_stats.successful_flushes,
        sink_stats.dropped_records,
        stats.lines_rejected
    );

    Ok(())
}

/// Initialize structured logging
fn initialize_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_events_flag() {
        let parse = |flags: &[&str]| {
            Args::try_parse_from(std::iter::once("good-http-sink").chain(flags.iter().copied()))
                .unwrap()
                .into_config()
                .group_events
        };

        assert_eq!(parse(&[]), None);
        assert_eq!(parse(&["--group-events"]), Some(true));
        assert_eq!(parse(&["--group-events=false"]), Some(false));
        assert_eq!(parse(&["--group-events", "events.ndjson"]), Some(true));
    }

    #[test]
    fn test_group_events_flag_overrides_file() {
        let file = SinkConfig {
            group_events: Some(true),
            ..Default::default()
        };
        let flags = Args::try_parse_from(["good-http-sink", "--group-events=false"])
            .unwrap()
            .into_config();

        assert_eq!(file.merge(flags).group_events, Some(false));
    }
}
