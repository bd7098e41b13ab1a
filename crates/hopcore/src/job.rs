use crate::{EntryConfig, EntryKey, Hop};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type JobId = Uuid;

/// Serialized job definition, as loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: JobId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub entries: Vec<EntrySpec>,
    #[serde(default)]
    pub hops: Vec<HopSpec>,
    #[serde(default)]
    pub settings: JobSettings,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            entries: Vec::new(),
            hops: Vec::new(),
            settings: JobSettings::default(),
        }
    }

    pub fn add_entry(&mut self, entry: EntrySpec) -> EntryKey {
        let key = entry.key();
        self.entries.push(entry);
        key
    }

    pub fn connect(&mut self, from: &EntryKey, to: &EntryKey, hop: Hop) {
        self.hops.push(HopSpec {
            from: from.name.clone(),
            from_copy: from.copy_nr,
            to: to.name.clone(),
            to_copy: to.copy_nr,
            enabled: hop.enabled,
            unconditional: hop.unconditional,
            on_success: hop.passes_on_success,
        });
    }

    pub fn find_entry(&self, key: &EntryKey) -> Option<&EntrySpec> {
        self.entries.iter().find(|e| e.key() == *key)
    }
}

/// Entry specification in a job definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySpec {
    pub name: String,
    #[serde(default)]
    pub copy_nr: u32,
    pub entry_type: String,
    #[serde(default)]
    pub config: EntryConfig,
    #[serde(default)]
    pub start: bool,
    #[serde(default)]
    pub dummy: bool,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub checkpoint: bool,
    /// Overrides the entry type's default when set
    #[serde(default)]
    pub evaluates: Option<bool>,
    /// Overrides the entry type's default when set
    #[serde(default)]
    pub reset_errors: Option<bool>,
}

impl EntrySpec {
    pub fn new(name: impl Into<String>, entry_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            copy_nr: 0,
            entry_type: entry_type.into(),
            config: EntryConfig::new(),
            start: false,
            dummy: false,
            repeat: false,
            parallel: false,
            checkpoint: false,
            evaluates: None,
            reset_errors: None,
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.name.clone(), self.copy_nr)
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_copy_nr(mut self, copy_nr: u32) -> Self {
        self.copy_nr = copy_nr;
        self
    }

    pub fn as_start(mut self) -> Self {
        self.start = true;
        self
    }

    pub fn as_checkpoint(mut self) -> Self {
        self.checkpoint = true;
        self
    }

    pub fn in_parallel(mut self) -> Self {
        self.parallel = true;
        self
    }
}

/// Hop specification; endpoints are entry names plus copy numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopSpec {
    pub from: String,
    #[serde(default)]
    pub from_copy: u32,
    pub to: String,
    #[serde(default)]
    pub to_copy: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub unconditional: bool,
    #[serde(default = "default_true")]
    pub on_success: bool,
}

impl HopSpec {
    pub fn from_key(&self) -> EntryKey {
        EntryKey::new(self.from.clone(), self.from_copy)
    }

    pub fn to_key(&self) -> EntryKey {
        EntryKey::new(self.to.clone(), self.to_copy)
    }

    pub fn hop(&self) -> Hop {
        Hop {
            enabled: self.enabled,
            unconditional: self.unconditional,
            passes_on_success: self.on_success,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Job-wide settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSettings {
    /// Run database-touching entries in one shared transaction group
    #[serde(default)]
    pub unique_connections: bool,
    /// Checkpointing is active when this is set and the runner has a store
    #[serde(default)]
    pub checkpoints: Option<CheckpointPolicy>,
}

/// How checkpoints of a job are looked up, validated and restored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    /// Variable whose value partitions checkpoints; `-` when unset
    #[serde(default)]
    pub namespace_parameter: Option<String>,
    /// Maximum minutes between the first attempt's start and a restart
    #[serde(default)]
    pub retry_period_minutes: Option<i64>,
    /// Maximum number of attempts, the first one included
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_true")]
    pub save_parameters: bool,
    #[serde(default)]
    pub save_result_rows: bool,
    #[serde(default)]
    pub save_result_files: bool,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            namespace_parameter: None,
            retry_period_minutes: None,
            max_attempts: None,
            save_parameters: true,
            save_result_rows: false,
            save_result_files: false,
        }
    }
}
