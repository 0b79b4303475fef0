//! # MTConnect Agent Core Library
//!
//! This crate implements the core of an MTConnect agent: it ingests real-time
//! equipment telemetry over the SHDR line protocol, assigns every observation
//! a durable position in a bounded, sequenced buffer, and serves the result
//! through Current and Sample query semantics. Document rendering (XML/JSON)
//! and transport framing (HTTP/MQTT) are external collaborators that consume
//! the interfaces exposed here.
//!
//! ## Crate Structure
//!
//! - **`adapter`**: Per-adapter TCP client with the connect/heartbeat/reconnect
//!   state machine. Each connection runs as an independent task and feeds
//!   decoded observations into the agent's write path.
//! - **`agent`**: The central ingest hub. Serializes all writes so sequence
//!   assignment is unique and gapless, applies duplicate filtering and the
//!   condition-set algebra, and exposes availability injection for adapters.
//! - **`buffer`**: The sequenced circular buffer: the single ordered, bounded
//!   log of observations that all queries read from.
//! - **`catalog`**: The device/data-item catalog collaborator surface, with a
//!   configuration-backed in-memory implementation.
//! - **`config`**: TOML configuration loading and validation. Configuration
//!   errors are the only startup-fatal condition.
//! - **`error`**: The `AgentError` enum used across the crate.
//! - **`observation`**: The immutable observation data model shared by the
//!   decoder, buffer, state table, and queries.
//! - **`query`**: Current and Sample queries, including long-poll streaming
//!   with heartbeat batches.
//! - **`shdr`**: The SHDR line decoder: tokenization, timestamp handling,
//!   representation dispatch, and control lines.
//! - **`state`**: The per-data-item latest-value and active-condition state
//!   table backing Current queries and duplicate suppression.
//! - **`trace`**: Structured logging setup via `tracing`.

pub mod adapter;
pub mod agent;
pub mod buffer;
pub mod catalog;
pub mod config;
pub mod error;
pub mod observation;
pub mod query;
pub mod shdr;
pub mod state;
pub mod trace;

pub use agent::{Agent, AgentSink};
pub use buffer::{BufferHeader, ObservationBuffer, SampleSet};
pub use catalog::{DataItemRef, DeviceCatalog, StaticCatalog};
pub use error::{AgentError, AgentResult};
pub use observation::{
    Category, Condition, ConditionLevel, Observation, ObservationFilter, ObservationInput,
    ObservationValues, Representation,
};
pub use query::{CurrentSnapshot, QueryEngine, SampleBatch, SampleRequest, SampleStream};
