//! The device/data-item catalog collaborator surface.
//!
//! The static device model (components, hierarchy, schema) is an external
//! collaborator; the core only needs to resolve an adapter's data-item key to
//! a typed [`DataItemRef`] and to enumerate the data items of a device. The
//! [`StaticCatalog`] implementation is built from configuration and backs the
//! binary and the tests.

use crate::config::{DeviceSettings, Settings};
use crate::error::{AgentError, AgentResult};
use crate::observation::{Category, Representation};
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only reference to a declared data item. Never owned or mutated by
/// the core.
#[derive(Clone, Debug, PartialEq)]
pub struct DataItemRef {
    pub id: String,
    pub name: Option<String>,
    pub device_uuid: String,
    pub category: Category,
    pub type_: String,
    pub sub_type: Option<String>,
    pub composition_id: Option<String>,
    pub representation: Representation,
    /// Units the adapter reports in, when they differ from MTConnect units.
    pub native_units: Option<String>,
}

impl DataItemRef {
    pub fn is_availability(&self) -> bool {
        self.type_ == "AVAILABILITY"
    }

    pub fn is_message(&self) -> bool {
        self.type_ == "MESSAGE"
    }
}

/// Catalog lookup consumed by the decoder and by query filtering.
pub trait DeviceCatalog: Send + Sync {
    /// Resolve an adapter's data-item key (id or name) for a device. The
    /// device key may be the configured device name or its UUID.
    fn resolve(&self, device_key: &str, data_item_key: &str) -> Option<DataItemRef>;

    /// The device's AVAILABILITY data item, if one is declared.
    fn availability_item(&self, device_key: &str) -> Option<DataItemRef>;

    /// All declared data items, across devices.
    fn data_items(&self) -> Vec<DataItemRef>;

    /// All device UUIDs.
    fn device_uuids(&self) -> Vec<String>;

    /// The UUID for a device key (name or UUID).
    fn device_uuid(&self, device_key: &str) -> Option<String>;
}

struct DeviceEntry {
    uuid: String,
    by_id: HashMap<String, DataItemRef>,
    name_to_id: HashMap<String, String>,
    availability_id: Option<String>,
}

/// In-memory catalog built from configuration.
#[derive(Default)]
pub struct StaticCatalog {
    devices: HashMap<String, DeviceEntry>,
    uuid_to_key: HashMap<String, String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        StaticCatalog::default()
    }

    /// Build the catalog from the `[devices.*]` configuration tables.
    pub fn from_settings(settings: &Settings) -> AgentResult<Self> {
        let mut catalog = StaticCatalog::new();
        for (key, device) in &settings.devices {
            catalog.add_device(key, device)?;
        }
        Ok(catalog)
    }

    pub fn add_device(&mut self, key: &str, device: &DeviceSettings) -> AgentResult<()> {
        let mut entry = DeviceEntry {
            uuid: device.uuid.clone(),
            by_id: HashMap::new(),
            name_to_id: HashMap::new(),
            availability_id: None,
        };
        for item in &device.data_items {
            let item_ref = DataItemRef {
                id: item.id.clone(),
                name: item.name.clone(),
                device_uuid: device.uuid.clone(),
                category: item.category,
                type_: item.r#type.clone(),
                sub_type: item.sub_type.clone(),
                composition_id: item.composition_id.clone(),
                representation: item.representation,
                native_units: item.native_units.clone(),
            };
            if entry.by_id.contains_key(&item.id) {
                return Err(AgentError::Configuration(format!(
                    "duplicate data item id '{}' on device '{key}'",
                    item.id
                )));
            }
            if item_ref.is_availability() {
                entry.availability_id = Some(item.id.clone());
            }
            if let Some(name) = &item.name {
                entry.name_to_id.insert(name.clone(), item.id.clone());
            }
            entry.by_id.insert(item.id.clone(), item_ref);
        }
        self.uuid_to_key.insert(device.uuid.clone(), key.to_string());
        self.devices.insert(key.to_string(), entry);
        Ok(())
    }

    pub fn into_shared(self) -> Arc<dyn DeviceCatalog> {
        Arc::new(self)
    }

    fn device(&self, device_key: &str) -> Option<&DeviceEntry> {
        self.devices.get(device_key).or_else(|| {
            self.uuid_to_key
                .get(device_key)
                .and_then(|key| self.devices.get(key))
        })
    }
}

impl DeviceCatalog for StaticCatalog {
    fn resolve(&self, device_key: &str, data_item_key: &str) -> Option<DataItemRef> {
        let device = self.device(device_key)?;
        if let Some(item) = device.by_id.get(data_item_key) {
            return Some(item.clone());
        }
        let id = device.name_to_id.get(data_item_key)?;
        device.by_id.get(id).cloned()
    }

    fn availability_item(&self, device_key: &str) -> Option<DataItemRef> {
        let device = self.device(device_key)?;
        let id = device.availability_id.as_ref()?;
        device.by_id.get(id).cloned()
    }

    fn data_items(&self) -> Vec<DataItemRef> {
        let mut items: Vec<DataItemRef> = self
            .devices
            .values()
            .flat_map(|d| d.by_id.values().cloned())
            .collect();
        items.sort_by(|a, b| (&a.device_uuid, &a.id).cmp(&(&b.device_uuid, &b.id)));
        items
    }

    fn device_uuids(&self) -> Vec<String> {
        let mut uuids: Vec<String> = self.devices.values().map(|d| d.uuid.clone()).collect();
        uuids.sort();
        uuids
    }

    fn device_uuid(&self, device_key: &str) -> Option<String> {
        self.device(device_key).map(|d| d.uuid.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataItemSettings;

    fn device() -> DeviceSettings {
        DeviceSettings {
            uuid: "uuid-1".into(),
            data_items: vec![
                DataItemSettings {
                    id: "avail".into(),
                    name: Some("avail".into()),
                    category: Category::Event,
                    r#type: "AVAILABILITY".into(),
                    sub_type: None,
                    composition_id: None,
                    representation: Representation::Value,
                    native_units: None,
                },
                DataItemSettings {
                    id: "x1".into(),
                    name: Some("Xact".into()),
                    category: Category::Sample,
                    r#type: "POSITION".into(),
                    sub_type: Some("ACTUAL".into()),
                    composition_id: None,
                    representation: Representation::Value,
                    native_units: None,
                },
            ],
        }
    }

    #[test]
    fn resolves_by_id_name_and_uuid() {
        let mut catalog = StaticCatalog::new();
        catalog.add_device("mill-1", &device()).unwrap();

        assert_eq!(catalog.resolve("mill-1", "x1").unwrap().id, "x1");
        assert_eq!(catalog.resolve("mill-1", "Xact").unwrap().id, "x1");
        assert_eq!(catalog.resolve("uuid-1", "Xact").unwrap().id, "x1");
        assert!(catalog.resolve("mill-1", "nope").is_none());
        assert!(catalog.resolve("other", "x1").is_none());
    }

    #[test]
    fn finds_availability_item() {
        let mut catalog = StaticCatalog::new();
        catalog.add_device("mill-1", &device()).unwrap();
        assert_eq!(catalog.availability_item("mill-1").unwrap().id, "avail");
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut settings = device();
        settings.data_items.push(settings.data_items[1].clone());
        let mut catalog = StaticCatalog::new();
        assert!(catalog.add_device("mill-1", &settings).is_err());
    }
}
