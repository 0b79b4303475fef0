//! The SHDR line decoder.
//!
//! Grammar (newline-terminated ASCII/UTF-8):
//!
//! ```text
//! [timestamp|]dataItemKey|value[|dataItemKey|value...]
//! [timestamp|]conditionKey|level|nativeCode|nativeSeverity|qualifier|message
//! * PING
//! * PONG <heartbeat-ms>
//! * key: value
//! ```
//!
//! Field consumption depends on the resolved data item's category and
//! representation, so several key/value groups can share one line; group
//! order is preserved left to right since later groups for the same data
//! item supersede earlier ones. A malformed or unknown group is dropped and
//! logged; its siblings still decode.

use crate::catalog::DeviceCatalog;
use crate::observation::{
    Category, Condition, ConditionLevel, ObservationInput, ObservationValues, Representation,
};
use crate::shdr::units::convert_native_units;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Decoder behavior switches, sourced from the adapter's configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecoderOptions {
    pub ignore_timestamps: bool,
    pub relative_time: bool,
    pub convert_units: bool,
}

/// Agent command carried on a `* key: value` control line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdapterCommand {
    ShdrVersion(String),
    Device(String),
    Other { key: String, value: String },
}

/// Result of decoding one line.
#[derive(Clone, Debug)]
pub enum DecodedLine {
    Observations(Vec<ObservationInput>),
    Ping,
    Pong(Option<Duration>),
    Command(AdapterCommand),
    Empty,
}

enum TimeBase {
    /// Offsets in milliseconds, anchored at the first line's receipt time.
    Offset { anchor: DateTime<Utc>, first_ms: f64 },
    /// Full timestamps, re-anchored at the first line's receipt time.
    Clock {
        anchor: DateTime<Utc>,
        first: DateTime<Utc>,
    },
}

/// Per-connection SHDR decoder. Holds the relative-time anchor and the
/// accumulated data-set entries, both of which are connection-scoped.
pub struct ShdrDecoder {
    catalog: Arc<dyn DeviceCatalog>,
    device_key: String,
    options: DecoderOptions,
    time_base: Option<TimeBase>,
    data_sets: HashMap<String, Vec<(String, String)>>,
}

impl ShdrDecoder {
    pub fn new(catalog: Arc<dyn DeviceCatalog>, device_key: impl Into<String>, options: DecoderOptions) -> Self {
        ShdrDecoder {
            catalog,
            device_key: device_key.into(),
            options,
            time_base: None,
            data_sets: HashMap::new(),
        }
    }

    /// The device this connection feeds; `* device:` commands switch it.
    pub fn device_key(&self) -> &str {
        &self.device_key
    }

    pub fn set_device_key(&mut self, key: impl Into<String>) {
        self.device_key = key.into();
    }

    /// Decode one received line. Never fails; undecodable content is
    /// dropped with a log line.
    pub fn decode_line(&mut self, line: &str, received_at: DateTime<Utc>) -> DecodedLine {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return DecodedLine::Empty;
        }
        if let Some(control) = line.strip_prefix('*') {
            return self.decode_control(control.trim());
        }

        let fields: Vec<&str> = line.split('|').collect();
        let (timestamp, start) = self.resolve_timestamp(&fields, received_at);

        let mut observations = Vec::new();
        let mut i = start;
        while i < fields.len() {
            let key = fields[i].trim();
            i += 1;
            if key.is_empty() {
                continue;
            }
            let Some(item) = self.catalog.resolve(&self.device_key, key) else {
                warn!(device = %self.device_key, key, "dropping group for unknown data item");
                i += 1;
                continue;
            };
            let consumed = match (item.category, item.representation) {
                (Category::Condition, _) => {
                    let group = &fields[i..fields.len().min(i + 5)];
                    if let Some(values) = decode_condition(group) {
                        observations.push(ObservationInput::new(item, timestamp, values));
                    } else {
                        warn!(key, "dropping malformed condition group");
                    }
                    group.len().max(1)
                }
                (_, Representation::TimeSeries) => {
                    let group = &fields[i..fields.len().min(i + 3)];
                    match decode_time_series(group, self.options.convert_units, &item) {
                        Some(values) => {
                            observations.push(ObservationInput::new(item, timestamp, values))
                        }
                        None => warn!(key, "dropping malformed time series group"),
                    }
                    group.len().max(1)
                }
                (_, Representation::DataSet | Representation::Table) => {
                    let raw = fields.get(i).copied().unwrap_or("");
                    match self.decode_data_set(&item.id, raw) {
                        Some(values) => {
                            observations.push(ObservationInput::new(item, timestamp, values))
                        }
                        None => warn!(key, "dropping malformed data set group"),
                    }
                    1
                }
                _ if item.is_message() => {
                    let group = &fields[i..fields.len().min(i + 2)];
                    match decode_message(group) {
                        Some(values) => {
                            observations.push(ObservationInput::new(item, timestamp, values))
                        }
                        None => warn!(key, "dropping malformed message group"),
                    }
                    group.len().max(1)
                }
                _ => {
                    let raw = fields.get(i).map(|f| f.trim()).unwrap_or("");
                    if raw.is_empty() {
                        debug!(key, "dropping empty value group");
                    } else {
                        let values = decode_value(raw, self.options.convert_units, &item);
                        observations.push(ObservationInput::new(item, timestamp, values));
                    }
                    1
                }
            };
            i += consumed;
        }

        if observations.is_empty() {
            DecodedLine::Empty
        } else {
            DecodedLine::Observations(observations)
        }
    }

    fn decode_control(&self, body: &str) -> DecodedLine {
        if body.eq_ignore_ascii_case("PING") {
            return DecodedLine::Ping;
        }
        if let Some(rest) = body.strip_prefix("PONG") {
            let heartbeat = rest.trim().parse::<u64>().ok().map(Duration::from_millis);
            return DecodedLine::Pong(heartbeat);
        }
        if let Some((key, value)) = body.split_once(':') {
            let key = key.trim();
            let value = value.trim().to_string();
            let command = match key {
                "shdrVersion" => AdapterCommand::ShdrVersion(value),
                "device" => AdapterCommand::Device(value),
                _ => {
                    debug!(key, %value, "ignoring unrecognized adapter command");
                    AdapterCommand::Other {
                        key: key.to_string(),
                        value,
                    }
                }
            };
            return DecodedLine::Command(command);
        }
        debug!(line = body, "ignoring unrecognized control line");
        DecodedLine::Empty
    }

    /// Work out the observation timestamp and the index of the first data
    /// field. The timestamp field is optional; when absent, or when
    /// `ignore_timestamps` is set, the receipt time substitutes.
    fn resolve_timestamp(
        &mut self,
        fields: &[&str],
        received_at: DateTime<Utc>,
    ) -> (DateTime<Utc>, usize) {
        let first = fields.first().map(|f| f.trim()).unwrap_or("");
        if self.options.relative_time {
            if let Ok(offset_ms) = first.parse::<f64>() {
                let timestamp = match &self.time_base {
                    Some(TimeBase::Offset { anchor, first_ms }) => {
                        offset_timestamp(*anchor, offset_ms - first_ms)
                    }
                    _ => {
                        self.time_base = Some(TimeBase::Offset {
                            anchor: received_at,
                            first_ms: offset_ms,
                        });
                        received_at
                    }
                };
                return (timestamp, 1);
            }
        }
        if let Some(parsed) = parse_timestamp(first) {
            if self.options.ignore_timestamps {
                return (received_at, 1);
            }
            if self.options.relative_time {
                let timestamp = match &self.time_base {
                    Some(TimeBase::Clock { anchor, first }) => {
                        let delta_ms = (parsed - *first).num_microseconds().unwrap_or(0) as f64 / 1_000.0;
                        offset_timestamp(*anchor, delta_ms)
                    }
                    _ => {
                        self.time_base = Some(TimeBase::Clock {
                            anchor: received_at,
                            first: parsed,
                        });
                        received_at
                    }
                };
                return (timestamp, 1);
            }
            return (parsed, 1);
        }
        (received_at, 0)
    }

    /// Merge one data-set field into the accumulated entries for the item.
    /// An empty field or a leading `RESET` token clears prior entries; a
    /// token with an empty value removes that key.
    fn decode_data_set(&mut self, item_id: &str, raw: &str) -> Option<ObservationValues> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("UNAVAILABLE") {
            self.data_sets.remove(item_id);
            return Some(ObservationValues::Unavailable);
        }
        let (reset, body) = if raw.is_empty() || raw == "RESET" {
            (true, "")
        } else if let Some(rest) = raw.strip_prefix("RESET ") {
            (true, rest.trim_start())
        } else {
            (false, raw)
        };
        let tokens = parse_set_tokens(body)?;
        let mut entries = if reset {
            Vec::new()
        } else {
            self.data_sets.get(item_id).cloned().unwrap_or_default()
        };
        for (key, value) in tokens {
            if value.is_empty() {
                entries.retain(|(k, _)| k != &key);
            } else if let Some(slot) = entries.iter_mut().find(|(k, _)| k == &key) {
                slot.1 = value;
            } else {
                entries.push((key, value));
            }
        }
        self.data_sets.insert(item_id.to_string(), entries.clone());
        Some(ObservationValues::DataSet { entries, reset })
    }
}

fn offset_timestamp(anchor: DateTime<Utc>, delta_ms: f64) -> DateTime<Utc> {
    anchor + chrono::Duration::microseconds((delta_ms * 1_000.0) as i64)
}

fn parse_timestamp(field: &str) -> Option<DateTime<Utc>> {
    // Adapters may append a duration annotation after '@'.
    let ts = field.split('@').next().unwrap_or(field);
    if let Ok(parsed) = DateTime::parse_from_rfc3339(ts) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn decode_condition(group: &[&str]) -> Option<ObservationValues> {
    let level = ConditionLevel::parse(group.first()?.trim())?;
    let field = |idx: usize| -> Option<String> {
        group
            .get(idx)
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(str::to_string)
    };
    Some(ObservationValues::Condition(Condition {
        level,
        native_code: field(1),
        native_severity: field(2),
        qualifier: field(3),
        message: field(4),
    }))
}

fn decode_message(group: &[&str]) -> Option<ObservationValues> {
    let text = group.get(1).or_else(|| group.first())?.trim();
    let native_code = if group.len() >= 2 {
        Some(group[0].trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    } else {
        None
    };
    if text.eq_ignore_ascii_case("UNAVAILABLE") {
        return Some(ObservationValues::Unavailable);
    }
    Some(ObservationValues::Message {
        native_code,
        text: text.to_string(),
    })
}

fn decode_time_series(
    group: &[&str],
    convert_units: bool,
    item: &crate::catalog::DataItemRef,
) -> Option<ObservationValues> {
    if group.first().map(|f| f.trim())?.eq_ignore_ascii_case("UNAVAILABLE") {
        return Some(ObservationValues::Unavailable);
    }
    if group.len() < 3 {
        return None;
    }
    let sample_count: usize = group[0].trim().parse().ok()?;
    let rate_field = group[1].trim();
    let sample_rate = if rate_field.is_empty() {
        None
    } else {
        Some(rate_field.parse::<f64>().ok()?)
    };
    let mut samples = Vec::with_capacity(sample_count);
    for token in group[2].split_whitespace() {
        let mut value: f64 = token.parse().ok()?;
        if convert_units {
            if let Some(units) = &item.native_units {
                if let Some(converted) = convert_native_units(units, value) {
                    value = converted;
                }
            }
        }
        samples.push(value);
    }
    if samples.len() != sample_count {
        return None;
    }
    Some(ObservationValues::TimeSeries {
        sample_count,
        sample_rate,
        samples,
    })
}

fn decode_value(
    raw: &str,
    convert_units: bool,
    item: &crate::catalog::DataItemRef,
) -> ObservationValues {
    if raw.eq_ignore_ascii_case("UNAVAILABLE") {
        return ObservationValues::Unavailable;
    }
    if convert_units && item.category == Category::Sample {
        if let Some(units) = &item.native_units {
            if let Ok(value) = raw.parse::<f64>() {
                if let Some(converted) = convert_native_units(units, value) {
                    return ObservationValues::Value(converted.to_string());
                }
            }
        }
    }
    ObservationValues::Value(raw.to_string())
}

/// Split a data-set field into `key=value` tokens. Values may be brace
/// quoted (`k={a b c}`); a bare key or `key=` marks removal. Returns `None`
/// on unbalanced braces.
fn parse_set_tokens(body: &str) -> Option<Vec<(String, String)>> {
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        let mut value = String::new();
        if chars.next_if(|&c| c == '=').is_some() {
            if chars.next_if(|&c| c == '{').is_some() {
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    value.push(c);
                }
                if !closed {
                    return None;
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }
        }
        if key.is_empty() {
            return None;
        }
        tokens.push((key, value));
    }
    Some(tokens)
}
