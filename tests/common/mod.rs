//! Shared fixtures for integration tests: a small device catalog and agent
//! wiring that mirrors the binary's setup.

#![allow(dead_code)]

use mtc_agent::agent::Agent;
use mtc_agent::catalog::{DeviceCatalog, StaticCatalog};
use mtc_agent::config::{AdapterSettings, DataItemSettings, DeviceSettings};
use mtc_agent::observation::{Category, ObservationValues, Representation};
use std::sync::Arc;
use std::time::Duration;

pub const DEVICE_UUID: &str = "test-dev-uuid";

fn item(
    id: &str,
    name: Option<&str>,
    category: Category,
    type_: &str,
    representation: Representation,
) -> DataItemSettings {
    DataItemSettings {
        id: id.to_string(),
        name: name.map(str::to_string),
        category,
        r#type: type_.to_string(),
        sub_type: None,
        composition_id: None,
        representation,
        native_units: None,
    }
}

pub fn device_settings() -> DeviceSettings {
    DeviceSettings {
        uuid: DEVICE_UUID.to_string(),
        data_items: vec![
            item("avail", Some("avail"), Category::Event, "AVAILABILITY", Representation::Value),
            item("x1", Some("Xact"), Category::Sample, "POSITION", Representation::Value),
            item("mode1", Some("mode"), Category::Event, "CONTROLLER_MODE", Representation::Value),
            item("clogic", Some("cmp"), Category::Condition, "LOGIC_PROGRAM", Representation::Value),
            item("vars1", Some("vars"), Category::Event, "VARIABLE", Representation::DataSet),
        ],
    }
}

pub fn catalog() -> Arc<dyn DeviceCatalog> {
    let mut catalog = StaticCatalog::new();
    catalog
        .add_device("mill-1", &device_settings())
        .expect("test device");
    Arc::new(catalog)
}

pub fn agent(buffer_size: usize) -> Arc<Agent> {
    Arc::new(Agent::new(buffer_size, catalog()).expect("agent"))
}

pub fn adapter_settings(port: u16) -> AdapterSettings {
    AdapterSettings {
        host: "127.0.0.1".to_string(),
        port,
        device: "mill-1".to_string(),
        heartbeat: Duration::from_millis(100),
        connection_timeout: Duration::from_secs(2),
        reconnect_interval: Duration::from_millis(50),
        ignore_timestamps: false,
        relative_time: false,
        convert_units: false,
        filter_duplicates: false,
        available_on_connection: true,
        ignore_heartbeat_on_change: false,
        mark_items_unavailable_on_disconnect: false,
    }
}

/// Poll the state table until the item's current value satisfies the
/// predicate, or panic after `timeout`.
pub async fn wait_for_current(
    agent: &Agent,
    data_item_id: &str,
    timeout: Duration,
    predicate: impl Fn(&ObservationValues) -> bool,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(entry) = agent.state().current_of(DEVICE_UUID, data_item_id) {
            if entry
                .observations
                .first()
                .map(|o| predicate(&o.values))
                .unwrap_or(false)
            {
                return;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for current value of {data_item_id}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
