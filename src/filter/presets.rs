use chrono::Utc;
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use crate::filter::storage::KeyValueStore;
use crate::models::filter::FilterSpec;
use crate::models::preset::{FilterPreset, PresetScope};
use crate::utils::error::{AppError, AppResult};

/// Named filter presets, stored per agent or globally.
///
/// An agent without presets of its own sees the global ones. Those are only
/// ever read through the agent scope, never copied into it.
#[derive(Clone)]
pub struct FilterPresetStore {
    backend: Arc<dyn KeyValueStore>,
    /// Held across every read-modify-write of a preset list
    writes: Arc<Mutex<()>>,
}

impl FilterPresetStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Save a preset and return its id. An existing preset with the same
    /// name in the same scope is replaced by the new one.
    pub fn save(&self, scope: &PresetScope, name: &str, spec: FilterSpec) -> AppResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Preset name must not be empty".to_string()));
        }

        let _guard = self.writes.lock();
        let mut presets = self.read(scope)?;
        presets.retain(|p| p.name != name);

        let preset = FilterPreset {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            scope: scope.clone(),
            spec,
            created_at: Utc::now(),
        };
        let id = preset.id.clone();
        presets.push(preset);
        self.write(scope, &presets)?;

        info!("Saved filter preset '{}' ({}) in scope {}", name, id, scope);
        Ok(id)
    }

    pub fn list(&self, scope: &PresetScope) -> AppResult<Vec<FilterPreset>> {
        let own = self.read(scope)?;
        if own.is_empty() && *scope != PresetScope::Global {
            return self.read(&PresetScope::Global);
        }
        Ok(own)
    }

    pub fn get(&self, scope: &PresetScope, id: &str) -> AppResult<FilterPreset> {
        self.list(scope)?
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Preset {} not found", id)))
    }

    /// Delete one of the scope's own presets
    pub fn delete(&self, scope: &PresetScope, id: &str) -> AppResult<()> {
        let _guard = self.writes.lock();
        let mut presets = self.read(scope)?;
        let before = presets.len();
        presets.retain(|p| p.id != id);
        if presets.len() == before {
            return Err(AppError::NotFound(format!("Preset {} not found in scope {}", id, scope)));
        }
        if presets.is_empty() {
            // an emptied agent scope falls back to the global presets again
            self.backend.remove(&scope.storage_key())?;
        } else {
            self.write(scope, &presets)?;
        }
        info!("Deleted filter preset {} from scope {}", id, scope);
        Ok(())
    }

    fn read(&self, scope: &PresetScope) -> AppResult<Vec<FilterPreset>> {
        let key = scope.storage_key();
        match self.backend.get(&key)? {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                warn!("Stored presets under '{}' are unreadable: {}", key, e);
                AppError::Storage(format!("Stored presets under '{}' are unreadable", key))
            }),
            None => Ok(Vec::new()),
        }
    }

    fn write(&self, scope: &PresetScope, presets: &[FilterPreset]) -> AppResult<()> {
        self.backend.set(&scope.storage_key(), serde_json::to_string(presets)?)
    }
}
