//! Row policy, quota and settings profile entities.
//!
//! Only identity and naming matter to storages; the remaining fields are
//! carried opaquely so backends can persist them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Row filter attached to one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowPolicy {
    pub name: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    /// Filter expression kept as text.
    #[serde(default)]
    pub filter: Option<String>,
}

impl RowPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database: None,
            table: None,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub name: String,
    #[serde(default)]
    pub interval_seconds: u64,
    #[serde(default)]
    pub max_queries: Option<u64>,
}

impl Quota {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interval_seconds: 3600,
            max_queries: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsProfile {
    pub name: String,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl SettingsProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: BTreeMap::new(),
        }
    }
}
