//! The observation data model.
//!
//! An [`Observation`] is an immutable fact about a data item at a point in
//! time. Observations are created by the SHDR decoder (or by internal
//! injectors such as availability-on-disconnect), appended exactly once to
//! the sequenced buffer, and destroyed only by capacity-driven eviction. The
//! buffer owns storage via `Arc<Observation>`; the state table holds clones
//! of the same `Arc`s and never mutates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Data item category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Sample,
    Event,
    Condition,
}

impl Category {
    /// Parse the wire/config form. Static table, no runtime reflection.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SAMPLE" => Some(Category::Sample),
            "EVENT" => Some(Category::Event),
            "CONDITION" => Some(Category::Condition),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Sample => "SAMPLE",
            Category::Event => "EVENT",
            Category::Condition => "CONDITION",
        }
    }
}

/// How a data item's value is shaped on the wire and in documents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Representation {
    #[default]
    Value,
    DataSet,
    Table,
    TimeSeries,
    Discrete,
}

impl Representation {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VALUE" => Some(Representation::Value),
            "DATA_SET" => Some(Representation::DataSet),
            "TABLE" => Some(Representation::Table),
            "TIME_SERIES" => Some(Representation::TimeSeries),
            "DISCRETE" => Some(Representation::Discrete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Representation::Value => "VALUE",
            Representation::DataSet => "DATA_SET",
            Representation::Table => "TABLE",
            Representation::TimeSeries => "TIME_SERIES",
            Representation::Discrete => "DISCRETE",
        }
    }
}

/// Condition severity level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionLevel {
    Unavailable,
    Normal,
    Warning,
    Fault,
}

impl ConditionLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "UNAVAILABLE" => Some(ConditionLevel::Unavailable),
            "NORMAL" => Some(ConditionLevel::Normal),
            "WARNING" => Some(ConditionLevel::Warning),
            "FAULT" => Some(ConditionLevel::Fault),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionLevel::Unavailable => "UNAVAILABLE",
            ConditionLevel::Normal => "NORMAL",
            ConditionLevel::Warning => "WARNING",
            ConditionLevel::Fault => "FAULT",
        }
    }
}

/// One active (or clearing) condition entry. Multiple entries may be active
/// simultaneously for the same data item, distinguished by `native_code`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub level: ConditionLevel,
    pub native_code: Option<String>,
    pub native_severity: Option<String>,
    pub qualifier: Option<String>,
    pub message: Option<String>,
}

impl Condition {
    pub fn normal() -> Self {
        Condition {
            level: ConditionLevel::Normal,
            native_code: None,
            native_severity: None,
            qualifier: None,
            message: None,
        }
    }

    pub fn unavailable() -> Self {
        Condition {
            level: ConditionLevel::Unavailable,
            native_code: None,
            native_severity: None,
            qualifier: None,
            message: None,
        }
    }
}

/// The decoded value payload of an observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ObservationValues {
    /// Single raw value (plain samples and events).
    Value(String),
    /// Key/value entries. `reset` marks that prior entries were discarded
    /// rather than merged into.
    DataSet {
        entries: Vec<(String, String)>,
        reset: bool,
    },
    /// Fixed-rate numeric waveform.
    TimeSeries {
        sample_count: usize,
        sample_rate: Option<f64>,
        samples: Vec<f64>,
    },
    /// MESSAGE event: optional native code plus text.
    Message {
        native_code: Option<String>,
        text: String,
    },
    Condition(Condition),
    /// The data item's value is not currently known.
    Unavailable,
}

impl ObservationValues {
    /// Render the ordered (key, value) pairs transports embed in documents.
    pub fn kv_pairs(&self) -> Vec<(String, String)> {
        match self {
            ObservationValues::Value(v) => vec![("value".into(), v.clone())],
            ObservationValues::DataSet { entries, .. } => entries.clone(),
            ObservationValues::TimeSeries {
                sample_count,
                sample_rate,
                samples,
            } => {
                let mut pairs = vec![("sampleCount".into(), sample_count.to_string())];
                if let Some(rate) = sample_rate {
                    pairs.push(("sampleRate".into(), rate.to_string()));
                }
                let joined = samples
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                pairs.push(("samples".into(), joined));
                pairs
            }
            ObservationValues::Message { native_code, text } => {
                let mut pairs = Vec::new();
                if let Some(code) = native_code {
                    pairs.push(("nativeCode".into(), code.clone()));
                }
                pairs.push(("value".into(), text.clone()));
                pairs
            }
            ObservationValues::Condition(c) => {
                let mut pairs = vec![("level".into(), c.level.as_str().to_string())];
                if let Some(code) = &c.native_code {
                    pairs.push(("nativeCode".into(), code.clone()));
                }
                if let Some(sev) = &c.native_severity {
                    pairs.push(("nativeSeverity".into(), sev.clone()));
                }
                if let Some(q) = &c.qualifier {
                    pairs.push(("qualifier".into(), q.clone()));
                }
                if let Some(m) = &c.message {
                    pairs.push(("value".into(), m.clone()));
                }
                pairs
            }
            ObservationValues::Unavailable => {
                vec![("value".into(), "UNAVAILABLE".into())]
            }
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, ObservationValues::Unavailable)
    }
}

/// An observation bound for the buffer: everything except the sequence
/// number, which the buffer assigns at append time.
#[derive(Clone, Debug)]
pub struct ObservationInput {
    pub data_item: crate::catalog::DataItemRef,
    pub timestamp: DateTime<Utc>,
    pub values: ObservationValues,
}

impl ObservationInput {
    pub fn new(
        data_item: crate::catalog::DataItemRef,
        timestamp: DateTime<Utc>,
        values: ObservationValues,
    ) -> Self {
        ObservationInput {
            data_item,
            timestamp,
            values,
        }
    }
}

/// An immutable recorded fact: one data item value at one point in the
/// buffer's sequence ordering.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Observation {
    pub device_uuid: String,
    pub data_item_id: String,
    pub category: Category,
    #[serde(rename = "type")]
    pub type_: String,
    pub sub_type: Option<String>,
    pub composition_id: Option<String>,
    pub representation: Representation,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    pub values: ObservationValues,
}

impl Observation {
    pub fn condition(&self) -> Option<&Condition> {
        match &self.values {
            ObservationValues::Condition(c) => Some(c),
            _ => None,
        }
    }

    pub fn kv_pairs(&self) -> Vec<(String, String)> {
        self.values.kv_pairs()
    }

    /// Serialize for transport collaborators embedding observations in
    /// their own document formats.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Selects a subset of observations or data items for queries. Path
/// expression evaluation is the catalog collaborator's concern; this filter
/// works on its resolved output (a device and/or an id set).
#[derive(Clone, Debug, Default)]
pub struct ObservationFilter {
    pub device_uuid: Option<String>,
    pub data_item_ids: Option<HashSet<String>>,
}

impl ObservationFilter {
    pub fn all() -> Self {
        ObservationFilter::default()
    }

    pub fn for_device(device_uuid: impl Into<String>) -> Self {
        ObservationFilter {
            device_uuid: Some(device_uuid.into()),
            data_item_ids: None,
        }
    }

    pub fn matches(&self, observation: &Observation) -> bool {
        self.matches_ids(&observation.device_uuid, &observation.data_item_id)
    }

    pub fn matches_ids(&self, device_uuid: &str, data_item_id: &str) -> bool {
        if let Some(device) = &self.device_uuid {
            if device != device_uuid {
                return false;
            }
        }
        if let Some(ids) = &self.data_item_ids {
            if !ids.contains(data_item_id) {
                return false;
            }
        }
        true
    }
}
