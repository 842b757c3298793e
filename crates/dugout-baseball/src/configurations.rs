// Named lineup/field snapshots the coach can save and recall.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dugout_core::store::{load_collection, save_collection, Collection, DocumentStore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DugoutError, Result};
use crate::lineup::{FieldAssignment, LineupSlot, LineupSnapshot};

pub const CONFIG_NAME_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfiguration {
    pub id: String,
    pub name: String,
    pub lineup: Vec<LineupSlot>,
    pub field_positions: Vec<FieldAssignment>,
    #[serde(default)]
    pub use_dh: bool,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub last_used_timestamp: Option<DateTime<Utc>>,
}

impl GameConfiguration {
    pub fn snapshot(&self) -> LineupSnapshot {
        LineupSnapshot {
            lineup: self.lineup.clone(),
            field_positions: self.field_positions.clone(),
            use_dh: self.use_dh,
        }
    }
}

/// Body of a save request. Tables left out are taken from the current
/// engine state by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct NewConfiguration {
    pub name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub lineup: Option<Vec<LineupSlot>>,
    #[serde(default)]
    pub field_positions: Option<Vec<FieldAssignment>>,
    #[serde(default)]
    pub use_dh: Option<bool>,
}

fn validate_config_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    let chars = name.chars().count();
    if chars == 0 {
        return Err(DugoutError::validation(
            "name",
            "Configuration name cannot be empty or just whitespace",
        ));
    }
    if chars > CONFIG_NAME_MAX_CHARS {
        return Err(DugoutError::validation(
            "name",
            format!("Configuration name must be at most {CONFIG_NAME_MAX_CHARS} characters"),
        ));
    }
    Ok(name.to_string())
}

pub struct ConfigurationBook {
    store: Arc<dyn DocumentStore>,
    configs: Vec<GameConfiguration>,
}

impl ConfigurationBook {
    pub fn load(store: Arc<dyn DocumentStore>) -> Result<Self> {
        let configs =
            load_collection(store.as_ref(), Collection::Configurations)?.unwrap_or_default();
        Ok(Self { store, configs })
    }

    pub fn list(&self) -> &[GameConfiguration] {
        &self.configs
    }

    pub fn get(&self, id: &str) -> Option<&GameConfiguration> {
        self.configs.iter().find(|c| c.id == id)
    }

    pub fn require(&self, id: &str) -> Result<&GameConfiguration> {
        self.get(id)
            .ok_or_else(|| DugoutError::not_found("Configuration", id))
    }

    /// Save a snapshot under a name. An existing configuration with the same
    /// name is overwritten in place and keeps its id.
    pub fn save(
        &mut self,
        name: &str,
        notes: String,
        snapshot: LineupSnapshot,
    ) -> Result<GameConfiguration> {
        let name = validate_config_name(name)?;
        let snapshot = snapshot.normalized()?;

        let previous = self.configs.clone();
        let existing = self.configs.iter_mut().find(|c| c.name == name);
        let saved = match existing {
            Some(config) => {
                config.lineup = snapshot.lineup;
                config.field_positions = snapshot.field_positions;
                config.use_dh = snapshot.use_dh;
                config.notes = notes;
                config.clone()
            }
            None => {
                let config = GameConfiguration {
                    id: uuid::Uuid::new_v4().to_string(),
                    name,
                    lineup: snapshot.lineup,
                    field_positions: snapshot.field_positions,
                    use_dh: snapshot.use_dh,
                    notes,
                    last_used_timestamp: None,
                };
                self.configs.push(config.clone());
                config
            }
        };
        self.persist(previous)?;

        info!(config_id = %saved.id, name = %saved.name, "configuration saved");
        Ok(saved)
    }

    /// Mark a configuration as used now and return it for the engine.
    pub fn load_config(&mut self, id: &str) -> Result<GameConfiguration> {
        let previous = self.configs.clone();
        let config = self
            .configs
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| DugoutError::not_found("Configuration", id))?;
        config.last_used_timestamp = Some(Utc::now());
        let loaded = config.clone();
        self.persist(previous)?;
        Ok(loaded)
    }

    pub fn delete(&mut self, id: &str) -> Result<GameConfiguration> {
        let index = self
            .configs
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| DugoutError::not_found("Configuration", id))?;
        let previous = self.configs.clone();
        let removed = self.configs.remove(index);
        self.persist(previous)?;
        Ok(removed)
    }

    /// Clear a deleted player out of every saved configuration.
    pub fn purge_player(&mut self, player_id: &str) -> Result<()> {
        let previous = self.configs.clone();
        let mut changed = false;
        for config in &mut self.configs {
            for slot in &mut config.lineup {
                if slot.player_id.as_deref() == Some(player_id) {
                    slot.player_id = None;
                    slot.position = None;
                    changed = true;
                }
            }
            for field in &mut config.field_positions {
                if field.player_id.as_deref() == Some(player_id) {
                    field.player_id = None;
                    changed = true;
                }
            }
        }
        if changed {
            self.persist(previous)?;
        }
        Ok(())
    }

    fn persist(&mut self, previous: Vec<GameConfiguration>) -> Result<()> {
        if let Err(e) = save_collection(self.store.as_ref(), Collection::Configurations, &self.configs)
        {
            warn!("failed to save configurations, rolling back: {e}");
            self.configs = previous;
            return Err(e.into());
        }
        Ok(())
    }
}
