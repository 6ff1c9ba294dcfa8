//! Read-only map template catalog.
//!
//! The world node validates hand-off requests against this store; the core
//! only ever calls [`MapCatalog::lookup`]. Templates load once at boot from a
//! YAML list and are immutable afterwards.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default spawn point used when a character snapshot carries no position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct EntryPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub o: f32,
}

/// One map template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapEntry {
    pub map_id: u16,
    pub name: String,

    /// Instanced maps get a fresh instance per request; global maps share
    /// one live instance.
    #[serde(default)]
    pub instanced: bool,

    #[serde(default)]
    pub zone_id: u16,

    #[serde(default)]
    pub entry_point: EntryPoint,
}

/// Id-keyed template store.
#[derive(Debug, Default)]
pub struct MapCatalog {
    by_id: HashMap<u16, MapEntry>,
}

impl MapCatalog {
    pub fn from_entries(entries: Vec<MapEntry>) -> Self {
        Self {
            by_id: entries.into_iter().map(|e| (e.map_id, e)).collect(),
        }
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        let entries: Vec<MapEntry> =
            serde_yaml::from_str(contents).context("Failed to parse map catalog YAML")?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read map catalog: {}", path.display()))?;
        Self::from_str(&contents)
    }

    pub fn lookup(&self, map_id: u16) -> Option<&MapEntry> {
        self.by_id.get(&map_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
- map_id: 0
  name: Eastern Vale
  zone_id: 12
  entry_point:
    x: 120.0
    y: 240.0
    z: 8.0
    o: 0.0
- map_id: 33
  name: Sunken Vault
  instanced: true
  zone_id: 40
"#;

    #[test]
    fn test_parse_and_lookup() {
        let catalog = MapCatalog::from_str(FIXTURE).unwrap();
        assert_eq!(catalog.len(), 2);

        let vale = catalog.lookup(0).unwrap();
        assert_eq!(vale.name, "Eastern Vale");
        assert!(!vale.instanced);
        assert_eq!(vale.entry_point.x, 120.0);

        let vault = catalog.lookup(33).unwrap();
        assert!(vault.instanced);
        // Missing entry_point falls back to zeroes.
        assert_eq!(vault.entry_point, EntryPoint::default());
    }

    #[test]
    fn test_unknown_id_is_none() {
        let catalog = MapCatalog::from_str(FIXTURE).unwrap();
        assert!(catalog.lookup(999).is_none());
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        assert!(MapCatalog::from_str("map_id: [oops").is_err());
    }
}
