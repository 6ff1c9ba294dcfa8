//! World instances and their registry.
//!
//! A [`WorldInstance`] is one live simulation of a map: an interest grid plus
//! the objects placed in it. The [`InstanceRegistry`] resolves hand-off
//! requests — reusing the single live instance of a global map, creating a
//! fresh instance per request for instanced maps — and destroys an instance
//! when its last object leaves.

use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::MapCatalog;
use crate::game::grid::{GridError, InterestGrid, RelocateOutcome, DEFAULT_VIEW_RADIUS};
use crate::game::object::{Field, GameObject};
use crate::proto::snapshot::CharacterSnapshot;
use crate::proto::WorldEnterError;

/// Ceiling on concurrent instances of one instanced map.
pub const MAX_INSTANCES_PER_MAP: usize = 64;

/// One live map simulation.
pub struct WorldInstance {
    pub instance_id: u32,
    pub map_id: u16,
    pub zone_id: u16,
    pub grid: InterestGrid,
    pub objects: HashMap<u64, GameObject>,
}

impl WorldInstance {
    fn new(instance_id: u32, map_id: u16, zone_id: u16) -> Self {
        Self {
            instance_id,
            map_id,
            zone_id,
            grid: InterestGrid::new(),
            objects: HashMap::new(),
        }
    }

    /// Materialize a character from its hand-off snapshot and place it in
    /// the grid.
    pub fn add_character(&mut self, snapshot: &CharacterSnapshot) -> Result<(), GridError> {
        let mut obj = GameObject::new(snapshot.guid);
        obj.set_u32(Field::Level, snapshot.level);
        obj.set_u32(Field::Health, snapshot.health);
        obj.set_u32(Field::MaxHealth, snapshot.max_health);
        obj.set_u32(Field::Power, snapshot.power);
        obj.set_u32(Field::MaxPower, snapshot.max_power);
        obj.set_u32(Field::MapId, snapshot.map_id as u32);
        obj.set_u32(Field::ZoneId, snapshot.zone_id as u32);
        obj.set_f32(Field::PosX, snapshot.x);
        obj.set_f32(Field::PosY, snapshot.y);
        obj.set_f32(Field::PosZ, snapshot.z);
        obj.set_f32(Field::Orientation, snapshot.o);
        obj.clear_changed(); // newcomers start clean; creation frames do not
                             // depend on change history

        self.grid
            .insert(snapshot.guid, snapshot.x, snapshot.y, DEFAULT_VIEW_RADIUS)?;
        self.objects.insert(snapshot.guid, obj);
        Ok(())
    }

    /// Authoritative movement: update the replicated position fields and
    /// re-tile the object.
    pub fn move_object(
        &mut self,
        guid: u64,
        x: f32,
        y: f32,
        z: f32,
        o: f32,
    ) -> Result<RelocateOutcome, GridError> {
        let obj = self
            .objects
            .get_mut(&guid)
            .ok_or(GridError::UnknownEntity(guid))?;
        obj.set_f32(Field::PosX, x);
        obj.set_f32(Field::PosY, y);
        obj.set_f32(Field::PosZ, z);
        obj.set_f32(Field::Orientation, o);
        self.grid.relocate(guid, x, y)
    }

    pub fn remove_object(&mut self, guid: u64) -> Result<(), GridError> {
        self.grid.remove(guid)?;
        self.objects.remove(&guid);
        Ok(())
    }

    pub fn object(&self, guid: u64) -> Option<&GameObject> {
        self.objects.get(&guid)
    }

    pub fn object_mut(&mut self, guid: u64) -> Option<&mut GameObject> {
        self.objects.get_mut(&guid)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Per-node instance table.
pub struct InstanceRegistry {
    catalog: Arc<MapCatalog>,
    hosted_maps: Vec<u16>,
    next_instance_id: u32,
    instances: HashMap<u32, WorldInstance>,
    by_map: HashMap<u16, Vec<u32>>,
}

impl InstanceRegistry {
    pub fn new(catalog: Arc<MapCatalog>, hosted_maps: Vec<u16>) -> Self {
        Self {
            catalog,
            hosted_maps,
            next_instance_id: 0,
            instances: HashMap::new(),
            by_map: HashMap::new(),
        }
    }

    pub fn hosted_maps(&self) -> &[u16] {
        &self.hosted_maps
    }

    /// Resolve a hand-off request for `map_id` to a live instance id.
    pub fn resolve(&mut self, map_id: u16) -> Result<u32, WorldEnterError> {
        if !self.hosted_maps.contains(&map_id) {
            return Err(WorldEnterError::UnsupportedMap);
        }
        let entry = self
            .catalog
            .lookup(map_id)
            .ok_or(WorldEnterError::UnsupportedMap)?;
        let zone_id = entry.zone_id;

        if !entry.instanced {
            if let Some(ids) = self.by_map.get(&map_id) {
                if let Some(id) = ids.first() {
                    return Ok(*id);
                }
            }
            return self.create_instance(map_id, zone_id);
        }

        let live = self.by_map.get(&map_id).map_or(0, |ids| ids.len());
        if live >= MAX_INSTANCES_PER_MAP {
            return Err(WorldEnterError::MapsAlreadyInUse);
        }
        self.create_instance(map_id, zone_id)
    }

    fn create_instance(&mut self, map_id: u16, zone_id: u16) -> Result<u32, WorldEnterError> {
        let id = self.next_instance_id;
        self.next_instance_id = self
            .next_instance_id
            .checked_add(1)
            .ok_or(WorldEnterError::InternalError)?;
        self.instances
            .insert(id, WorldInstance::new(id, map_id, zone_id));
        self.by_map.entry(map_id).or_default().push(id);
        tracing::info!("[world] [instance_create] id={} map={}", id, map_id);
        Ok(id)
    }

    pub fn get(&self, instance_id: u32) -> Option<&WorldInstance> {
        self.instances.get(&instance_id)
    }

    pub fn get_mut(&mut self, instance_id: u32) -> Option<&mut WorldInstance> {
        self.instances.get_mut(&instance_id)
    }

    /// Remove an object and destroy the instance if it emptied out.
    /// Returns true when the instance was destroyed.
    pub fn remove_object(&mut self, instance_id: u32, guid: u64) -> bool {
        let Some(instance) = self.instances.get_mut(&instance_id) else {
            return false;
        };
        let _ = instance.remove_object(guid);
        if !instance.is_empty() {
            return false;
        }
        let map_id = instance.map_id;
        self.instances.remove(&instance_id);
        if let Some(ids) = self.by_map.get_mut(&map_id) {
            ids.retain(|id| *id != instance_id);
            if ids.is_empty() {
                self.by_map.remove(&map_id);
            }
        }
        tracing::info!("[world] [instance_destroy] id={} map={}", instance_id, map_id);
        true
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}
