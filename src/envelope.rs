//! Outbound envelope assembly

use crate::config::Settings;
use crate::record::Record;
use crate::serializer;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json, json};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Batch contents, flat or grouped by event type
#[derive(Debug, Clone)]
pub enum Events {
    /// Accept order
    Flat(Vec<Record>),
    /// Event type to records sorted by timestamp
    Grouped(BTreeMap<String, Vec<Record>>),
}

impl Events {
    pub fn len(&self) -> usize {
        match self {
            Events::Flat(records) => records.len(),
            Events::Grouped(groups) => groups.values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_json(&self) -> Json {
        match self {
            Events::Flat(records) => Json::Array(render(records)),
            Events::Grouped(groups) => Json::Object(
                groups
                    .iter()
                    .map(|(event, records)| (event.clone(), Json::Array(render(records))))
                    .collect::<Map<String, Json>>(),
            ),
        }
    }
}

fn render(records: &[Record]) -> Vec<Json> {
    records
        .iter()
        .map(|record| serializer::sanitize(record.value()))
        .collect()
}

/// The payload of a single transport call
#[derive(Debug, Clone)]
pub struct Envelope {
    pub host: String,
    pub schema: String,
    /// Build time in milliseconds since the Unix epoch
    pub time_stamp: i64,
    pub events: Events,
}

impl Envelope {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn to_json(&self) -> Json {
        json!({
            "host": self.host,
            "schema": self.schema,
            "timeStamp": self.time_stamp,
            "events": self.events.to_json(),
        })
    }

    /// Wire form of the envelope. Cycles in records are already cut, so this
    /// cannot fail.
    pub fn to_payload(&self) -> String {
        self.to_json().to_string()
    }
}

/// Wrap a batch into an envelope stamped with `now`
pub fn build(batch: &[Record], settings: &Settings, now: DateTime<Utc>) -> Envelope {
    let events = if settings.group_events {
        Events::Grouped(group_by_event(batch))
    } else {
        Events::Flat(batch.to_vec())
    };

    Envelope {
        host: settings.host.clone(),
        schema: settings.schema.clone(),
        time_stamp: now.timestamp_millis(),
        events,
    }
}

/// Partition by event type, then stable-sort each partition by timestamp.
///
/// Tags and timestamps are read from the values as they are at build time.
/// Records without a timestamp sort before timestamped ones; equal
/// timestamps keep accept order.
pub fn group_by_event(batch: &[Record]) -> BTreeMap<String, Vec<Record>> {
    let mut groups: BTreeMap<String, Vec<(Option<f64>, Record)>> = BTreeMap::new();

    for record in batch {
        groups
            .entry(record.current_event())
            .or_default()
            .push((record.current_timestamp(), record.clone()));
    }

    groups
        .into_iter()
        .map(|(event, mut records)| {
            records.sort_by(|(a, _), (b, _)| by_timestamp(*a, *b));
            let records: Vec<Record> = records.into_iter().map(|(_, record)| record).collect();
            (event, records)
        })
        .collect()
}

fn by_timestamp(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
