//! The agent: the single ingest hub in front of the buffer and state table.
//!
//! All writes funnel through one gate so sequence assignment stays unique
//! and gapless across any number of adapters, and so the buffer append and
//! the state-table update for one observation are never interleaved with
//! another writer's. Reads never take the gate; they go straight to the
//! buffer and state table's own read locks.

use crate::adapter::ObservationSink;
use crate::buffer::{BufferHeader, ObservationBuffer};
use crate::catalog::{DataItemRef, DeviceCatalog};
use crate::error::{AgentError, AgentResult};
use crate::observation::{Category, Condition, ObservationInput, ObservationValues};
use crate::state::StateTable;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

pub struct Agent {
    buffer: Arc<ObservationBuffer>,
    state: Arc<StateTable>,
    catalog: Arc<dyn DeviceCatalog>,
    write_gate: Mutex<()>,
}

impl Agent {
    pub fn new(buffer_size: usize, catalog: Arc<dyn DeviceCatalog>) -> AgentResult<Self> {
        let buffer = Arc::new(ObservationBuffer::new(buffer_size)?);
        info!(
            buffer_size,
            instance_id = buffer.instance_id(),
            "observation buffer ready"
        );
        Ok(Agent {
            buffer,
            state: Arc::new(StateTable::new()),
            catalog,
            write_gate: Mutex::new(()),
        })
    }

    pub fn buffer(&self) -> &Arc<ObservationBuffer> {
        &self.buffer
    }

    pub fn state(&self) -> &Arc<StateTable> {
        &self.state
    }

    pub fn catalog(&self) -> &Arc<dyn DeviceCatalog> {
        &self.catalog
    }

    /// Header fields transports embed in their own document formats.
    pub fn header(&self) -> BufferHeader {
        self.buffer.snapshot()
    }

    /// Ingest one observation. With `filter_duplicates`, a non-condition
    /// value identical to the item's current value produces no buffer entry
    /// at all and `None` is returned.
    pub fn add_observation(
        &self,
        input: ObservationInput,
        filter_duplicates: bool,
    ) -> AgentResult<Option<u64>> {
        let _gate = self
            .write_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if filter_duplicates
            && input.data_item.category != Category::Condition
            && self
                .state
                .is_duplicate(&input.data_item.device_uuid, &input.data_item.id, &input.values)
        {
            debug!(data_item = %input.data_item.id, "duplicate observation suppressed");
            return Ok(None);
        }
        let (sequence, observation) = self.buffer.append(input);
        self.state.apply(&observation);
        Ok(Some(sequence))
    }

    /// Ingest a condition entry for a condition data item.
    pub fn add_condition(
        &self,
        data_item: DataItemRef,
        timestamp: chrono::DateTime<Utc>,
        condition: Condition,
    ) -> AgentResult<Option<u64>> {
        self.add_observation(
            ObservationInput::new(data_item, timestamp, ObservationValues::Condition(condition)),
            false,
        )
    }

    /// Mark a device's availability AVAILABLE (adapter connected).
    pub fn device_available(&self, device_key: &str) -> AgentResult<Option<u64>> {
        let item = self.availability_of(device_key)?;
        self.add_observation(
            ObservationInput::new(item, Utc::now(), ObservationValues::Value("AVAILABLE".into())),
            true,
        )
    }

    /// Mark a device's availability UNAVAILABLE (adapter lost). With
    /// `mark_items`, every other data item of the device is also marked
    /// UNAVAILABLE, conditions included.
    pub fn device_unavailable(&self, device_key: &str, mark_items: bool) -> AgentResult<()> {
        let availability = self.availability_of(device_key)?;
        let timestamp = Utc::now();
        self.add_observation(
            ObservationInput::new(availability.clone(), timestamp, ObservationValues::Unavailable),
            true,
        )?;
        if !mark_items {
            return Ok(());
        }
        let device_uuid = availability.device_uuid;
        for item in self.catalog.data_items() {
            if item.device_uuid != device_uuid || item.is_availability() {
                continue;
            }
            let values = match item.category {
                Category::Condition => ObservationValues::Condition(Condition::unavailable()),
                _ => ObservationValues::Unavailable,
            };
            self.add_observation(ObservationInput::new(item, timestamp, values), true)?;
        }
        Ok(())
    }

    fn availability_of(&self, device_key: &str) -> AgentResult<DataItemRef> {
        self.catalog
            .availability_item(device_key)
            .ok_or_else(|| AgentError::UnknownDataItem {
                device: device_key.to_string(),
                key: "AVAILABILITY".to_string(),
            })
    }
}

/// Binds an [`Agent`] to one adapter's ingest policy so connections stay
/// ignorant of configuration.
pub struct AgentSink {
    agent: Arc<Agent>,
    filter_duplicates: bool,
    mark_items_unavailable: bool,
}

impl AgentSink {
    pub fn new(agent: Arc<Agent>, filter_duplicates: bool, mark_items_unavailable: bool) -> Self {
        AgentSink {
            agent,
            filter_duplicates,
            mark_items_unavailable,
        }
    }
}

#[async_trait]
impl ObservationSink for AgentSink {
    async fn accept(&self, input: ObservationInput) -> AgentResult<Option<u64>> {
        self.agent.add_observation(input, self.filter_duplicates)
    }

    async fn device_connected(&self, device_key: &str) -> AgentResult<()> {
        self.agent.device_available(device_key)?;
        Ok(())
    }

    async fn device_disconnected(&self, device_key: &str) -> AgentResult<()> {
        self.agent
            .device_unavailable(device_key, self.mark_items_unavailable)
    }
}
