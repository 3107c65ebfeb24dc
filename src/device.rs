//! Simulated devices.
//! The top-level simulation owns every device through a `DeviceRegistry`.
//! Cores never own their device; they keep a `DeviceId` and resolve it
//! through the registry when they need it.

use crate::config::CoreConfig;

/// Identifies a device in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub usize);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gpu{}", self.0)
    }
}

/// A simulated device: a name and the configuration shared by its cores.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub config: CoreConfig,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    pub fn register(&mut self, name: &str, config: CoreConfig) -> DeviceId {
        let id = DeviceId(self.devices.len());
        log::debug!("registered device {} ({}): {} cores", id, name, config.num_cores);
        self.devices.push(Device {
            id,
            name: name.to_string(),
            config,
        });
        id
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn register_and_resolve() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.is_empty());
        let a = registry.register("h100", CoreConfig::h100());
        let b = registry.register("a100", CoreConfig::a100());
        assert_eq!(registry.len(), 2);
        assert_ne!(a, b);
        assert_eq!(registry.get(b).map(|d| d.name.as_str()), Some("a100"));
        assert_eq!(registry.get(a).map(|d| d.config.num_cores), Some(132));
        assert!(registry.get(DeviceId(7)).is_none());
        assert_eq!(a.to_string(), "gpu0");
        assert_eq!(registry.iter().count(), 2);
    }
}
