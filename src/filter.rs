//! Event type subscriptions

use crate::record::Record;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Which records of a subscribed event type are let through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every record of the type (`"*"`)
    Any,
    /// Only records whose `tags` share at least one of these
    Tags(BTreeSet<String>),
}

impl Selector {
    fn admits(&self, record: &Record) -> bool {
        match self {
            Selector::Any => true,
            Selector::Tags(wanted) => record.tags().iter().any(|tag| wanted.contains(tag)),
        }
    }
}

impl FromStr for Selector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(Selector::Any);
        }

        let tags: BTreeSet<String> = s
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect();

        if tags.is_empty() {
            return Err("selector must be '*' or a list of tags".to_string());
        }

        Ok(Selector::Tags(tags))
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Selector::Any => serializer.serialize_str("*"),
            Selector::Tags(tags) => {
                let mut seq = serializer.serialize_seq(Some(tags.len()))?;
                for tag in tags {
                    seq.serialize_element(tag)?;
                }
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SelectorVisitor;

        impl<'de> Visitor<'de> for SelectorVisitor {
            type Value = Selector;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("\"*\", a tag, or a list of tags")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Selector, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Selector, A::Error> {
                let mut tags = BTreeSet::new();
                while let Some(tag) = seq.next_element::<String>()? {
                    if tag == "*" {
                        return Ok(Selector::Any);
                    }
                    tags.insert(tag);
                }
                Ok(Selector::Tags(tags))
            }
        }

        deserializer.deserialize_any(SelectorVisitor)
    }
}

/// One `type=selector` entry, as written on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub event: String,
    pub selector: Selector,
}

impl FromStr for Subscription {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (event, selector) = match s.split_once('=') {
            Some((event, selector)) => (event.trim(), selector.parse()?),
            None => (s.trim(), Selector::Any),
        };

        if event.is_empty() {
            return Err(format!("subscription '{}' has no event type", s));
        }

        Ok(Self {
            event: event.to_string(),
            selector,
        })
    }
}

/// Event subscriptions keyed by event type. An empty filter lets everything
/// through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventFilter {
    subscriptions: BTreeMap<String, Selector>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(mut self, event: impl Into<String>, selector: Selector) -> Self {
        self.subscriptions.insert(event.into(), selector);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Whether the record should be forwarded to the sink
    pub fn matches(&self, record: &Record) -> bool {
        if self.subscriptions.is_empty() {
            return true;
        }

        self.subscriptions
            .get(record.event())
            .is_some_and(|selector| selector.admits(record))
    }

    /// Overlay `other`; its subscriptions replace ours for the same type.
    pub fn merge(mut self, other: EventFilter) -> Self {
        self.subscriptions.extend(other.subscriptions);
        self
    }
}

impl FromIterator<Subscription> for EventFilter {
    fn from_iter<I: IntoIterator<Item = Subscription>>(iter: I) -> Self {
        Self {
            subscriptions: iter
                .into_iter()
                .map(|subscription| (subscription.event, subscription.selector))
                .collect(),
        }
    }
}
