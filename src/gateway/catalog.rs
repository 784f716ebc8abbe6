//! Registry of configured providers and the models they declare

use crate::config::ProviderSettings;
use crate::domain::{ModelName, ProviderName};

#[derive(Debug, Clone)]
struct CatalogEntry {
    name: ProviderName,
    models: Vec<ModelName>,
}

impl CatalogEntry {
    fn serves(&self, model: &ModelName) -> bool {
        self.models.is_empty() || self.models.contains(model)
    }
}

/// Providers in registration order
#[derive(Debug, Clone, Default)]
pub struct ProviderCatalog {
    entries: Vec<CatalogEntry>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(providers: &[ProviderSettings]) -> Self {
        let mut catalog = Self::new();
        for provider in providers {
            catalog.register(provider.name.clone(), provider.models.clone());
        }
        catalog
    }

    /// Register a provider, replacing the model list if it already exists
    ///
    /// An empty model list means the provider accepts any model.
    pub fn register(&mut self, name: ProviderName, models: Vec<ModelName>) {
        match self.entries.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => entry.models = models,
            None => self.entries.push(CatalogEntry { name, models }),
        }
    }

    pub fn contains(&self, name: &ProviderName) -> bool {
        self.entries.iter().any(|entry| &entry.name == name)
    }

    pub fn provider_names(&self) -> Vec<ProviderName> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }

    /// Providers able to serve `model`
    pub fn providers_for(&self, model: &ModelName) -> Vec<ProviderName> {
        self.entries
            .iter()
            .filter(|entry| entry.serves(model))
            .map(|entry| entry.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
