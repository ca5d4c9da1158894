use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

use super::{mock::mock_device, Device, DeviceError};
use crate::config::DeviceSettings;
use crate::storage::Repository;

type Factory = Box<dyn Fn(&DeviceSettings, Arc<dyn Repository>) -> Result<Arc<dyn Device>> + Send + Sync>;

/// Registry of available device kinds
pub struct DeviceRegistry {
    factories: HashMap<String, Factory>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in kinds: `mock`, and `avatar` when built
    /// with serial support.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("mock", |settings, repository| {
            Ok(Arc::new(mock_device(
                settings.name.clone(),
                repository,
                settings.mock.clone(),
            )) as Arc<dyn Device>)
        });
        #[cfg(feature = "serial")]
        registry.register("avatar", |settings, repository| {
            Ok(Arc::new(super::AvatarDevice::serial(
                settings.name.clone(),
                repository,
                settings.port.clone(),
                settings.baud_rate,
            )) as Arc<dyn Device>)
        });
        registry
    }

    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&DeviceSettings, Arc<dyn Repository>) -> Result<Arc<dyn Device>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    /// Build the device described by `settings.kind`.
    pub fn create(
        &self,
        settings: &DeviceSettings,
        repository: Arc<dyn Repository>,
    ) -> Result<Arc<dyn Device>, DeviceError> {
        let factory = self
            .factories
            .get(&settings.kind)
            .ok_or_else(|| DeviceError::UnknownKind(settings.kind.clone()))?;
        factory(settings, repository).map_err(DeviceError::Driver)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
