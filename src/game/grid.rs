//! Spatial interest management for one world instance.
//!
//! The playable area is a fixed `TILE_COUNT × TILE_COUNT` grid of square
//! tiles. Each tile owns two sets: the entities currently positioned in it,
//! and the watchers whose view radius covers it. An entity is in exactly one
//! tile at a time; a watcher is registered in every tile within its view
//! radius (Chebyshev distance, in tiles) of its own tile.
//!
//! Because every observer within radius of a tile is registered in that
//! tile's watcher set, a movement broadcast only has to walk the watcher set
//! of the mover's current tile — cost proportional to local density, never
//! to total population, and never any delivery outside the radius.

use std::collections::{HashMap, HashSet};

/// Edge length of the playable area of one instance, in world units.
pub const WORLD_WIDTH: f32 = 1024.0;

/// Tiles per axis.
pub const TILE_COUNT: usize = 64;

/// Edge length of one tile.
pub const TILE_EDGE: f32 = WORLD_WIDTH / TILE_COUNT as f32;

/// Default watcher view radius, in tiles.
pub const DEFAULT_VIEW_RADIUS: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("entity {0:#x} is already in the grid")]
    DuplicateEntity(u64),

    #[error("entity {0:#x} is not in the grid")]
    UnknownEntity(u64),
}

/// Tile coordinates `(column, row)`.
pub type TileIndex = (usize, usize);

/// Map a world position to its tile. Pure; positions outside the playable
/// area clamp to the border tiles.
pub fn tile_for(x: f32, y: f32) -> TileIndex {
    let clamp = |v: f32| {
        if v.is_nan() {
            0.0
        } else {
            v.clamp(0.0, WORLD_WIDTH - 1e-3)
        }
    };
    (
        (clamp(x) / TILE_EDGE) as usize,
        (clamp(y) / TILE_EDGE) as usize,
    )
}

#[derive(Default)]
struct Tile {
    entities: HashSet<u64>,
    watchers: HashSet<u64>,
}

struct Registration {
    tile: TileIndex,
    radius: u8,
}

/// Interest grid of one world instance.
pub struct InterestGrid {
    tiles: Vec<Tile>,
    registered: HashMap<u64, Registration>,
}

impl Default for InterestGrid {
    fn default() -> Self {
        Self::new()
    }
}

/// What a cross-tile move changed for the surrounding observers.
#[derive(Debug, Default)]
pub struct RelocateOutcome {
    pub tile_changed: bool,
    /// Watchers that can see the mover now but could not before; they need a
    /// creation snapshot.
    pub gained: Vec<u64>,
    /// Watchers that lost sight of the mover; notifications to them stop
    /// with this move.
    pub lost: Vec<u64>,
}

impl InterestGrid {
    pub fn new() -> Self {
        let mut tiles = Vec::with_capacity(TILE_COUNT * TILE_COUNT);
        tiles.resize_with(TILE_COUNT * TILE_COUNT, Tile::default);
        Self {
            tiles,
            registered: HashMap::new(),
        }
    }

    fn tile(&self, (i, j): TileIndex) -> &Tile {
        &self.tiles[i * TILE_COUNT + j]
    }

    fn tile_mut(&mut self, (i, j): TileIndex) -> &mut Tile {
        &mut self.tiles[i * TILE_COUNT + j]
    }

    /// Visit every tile within `radius` of `center` ("tiles in sight"),
    /// clipped at the grid border.
    pub fn for_each_tile_in_sight(
        center: TileIndex,
        radius: u8,
        mut f: impl FnMut(TileIndex),
    ) {
        let r = radius as usize;
        let i0 = center.0.saturating_sub(r);
        let i1 = (center.0 + r).min(TILE_COUNT - 1);
        let j0 = center.1.saturating_sub(r);
        let j1 = (center.1 + r).min(TILE_COUNT - 1);
        for i in i0..=i1 {
            for j in j0..=j1 {
                f((i, j));
            }
        }
    }

    fn add_watcher_footprint(&mut self, guid: u64, tile: TileIndex, radius: u8) {
        let mut touched = Vec::new();
        Self::for_each_tile_in_sight(tile, radius, |t| touched.push(t));
        for t in touched {
            self.tile_mut(t).watchers.insert(guid);
        }
    }

    fn remove_watcher_footprint(&mut self, guid: u64, tile: TileIndex, radius: u8) {
        let mut touched = Vec::new();
        Self::for_each_tile_in_sight(tile, radius, |t| touched.push(t));
        for t in touched {
            self.tile_mut(t).watchers.remove(&guid);
        }
    }

    /// Place an entity (which is also a watcher) at a world position.
    pub fn insert(&mut self, guid: u64, x: f32, y: f32, radius: u8) -> Result<TileIndex, GridError> {
        if self.registered.contains_key(&guid) {
            return Err(GridError::DuplicateEntity(guid));
        }
        let tile = tile_for(x, y);
        self.tile_mut(tile).entities.insert(guid);
        self.add_watcher_footprint(guid, tile, radius);
        self.registered.insert(guid, Registration { tile, radius });
        Ok(tile)
    }

    /// Remove an entity and its watcher footprint entirely.
    pub fn remove(&mut self, guid: u64) -> Result<TileIndex, GridError> {
        let reg = self
            .registered
            .remove(&guid)
            .ok_or(GridError::UnknownEntity(guid))?;
        self.tile_mut(reg.tile).entities.remove(&guid);
        self.remove_watcher_footprint(guid, reg.tile, reg.radius);
        Ok(reg.tile)
    }

    /// Authoritative movement update. Recomputes the tile from the new
    /// position; on a tile change, moves the entity membership and watcher
    /// footprint and reports which observers gained or lost sight.
    pub fn relocate(&mut self, guid: u64, x: f32, y: f32) -> Result<RelocateOutcome, GridError> {
        let (old_tile, radius) = {
            let reg = self
                .registered
                .get(&guid)
                .ok_or(GridError::UnknownEntity(guid))?;
            (reg.tile, reg.radius)
        };
        let new_tile = tile_for(x, y);
        if new_tile == old_tile {
            return Ok(RelocateOutcome::default());
        }

        let before: HashSet<u64> = self
            .tile(old_tile)
            .watchers
            .iter()
            .copied()
            .filter(|w| *w != guid)
            .collect();

        self.tile_mut(old_tile).entities.remove(&guid);
        self.tile_mut(new_tile).entities.insert(guid);
        self.remove_watcher_footprint(guid, old_tile, radius);
        self.add_watcher_footprint(guid, new_tile, radius);
        if let Some(reg) = self.registered.get_mut(&guid) {
            reg.tile = new_tile;
        }

        let after: HashSet<u64> = self
            .tile(new_tile)
            .watchers
            .iter()
            .copied()
            .filter(|w| *w != guid)
            .collect();

        Ok(RelocateOutcome {
            tile_changed: true,
            gained: after.difference(&before).copied().collect(),
            lost: before.difference(&after).copied().collect(),
        })
    }

    /// Watchers that must receive a movement/update notification for
    /// `guid` right now — everyone whose radius covers the entity's current
    /// tile, minus the entity itself.
    pub fn watchers_of(&self, guid: u64) -> Result<Vec<u64>, GridError> {
        let reg = self
            .registered
            .get(&guid)
            .ok_or(GridError::UnknownEntity(guid))?;
        Ok(self
            .tile(reg.tile)
            .watchers
            .iter()
            .copied()
            .filter(|w| *w != guid)
            .collect())
    }

    /// Entities positioned in any tile within `radius` of `center`. Used to
    /// seed creation snapshots when a watcher first appears.
    pub fn entities_in_sight(&self, center: TileIndex, radius: u8) -> Vec<u64> {
        let mut out = Vec::new();
        Self::for_each_tile_in_sight(center, radius, |t| {
            out.extend(self.tile(t).entities.iter().copied());
        });
        out
    }

    pub fn tile_of(&self, guid: u64) -> Option<TileIndex> {
        self.registered.get(&guid).map(|r| r.tile)
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(tile: usize) -> f32 {
        (tile as f32 + 0.5) * TILE_EDGE
    }

    #[test]
    fn test_tile_for_is_pure_and_clamped() {
        assert_eq!(tile_for(0.0, 0.0), (0, 0));
        assert_eq!(tile_for(TILE_EDGE, 0.0), (1, 0));
        assert_eq!(tile_for(TILE_EDGE - 0.01, TILE_EDGE * 2.0), (0, 2));
        // Outside the playable area clamps to the border tiles.
        assert_eq!(tile_for(-50.0, WORLD_WIDTH + 50.0), (0, TILE_COUNT - 1));
        assert_eq!(tile_for(WORLD_WIDTH, WORLD_WIDTH), (TILE_COUNT - 1, TILE_COUNT - 1));
    }

    #[test]
    fn test_entity_in_exactly_one_tile() {
        let mut grid = InterestGrid::new();
        grid.insert(1, pos(3), pos(3), 2).unwrap();
        assert_eq!(grid.tile_of(1), Some((3, 3)));

        grid.relocate(1, pos(10), pos(3)).unwrap();
        assert_eq!(grid.tile_of(1), Some((10, 3)));
        // Old tile no longer holds the entity.
        assert!(!grid.tile((3, 3)).entities.contains(&1));
        assert!(grid.tile((10, 3)).entities.contains(&1));
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut grid = InterestGrid::new();
        grid.insert(1, 0.0, 0.0, 1).unwrap();
        assert!(matches!(
            grid.insert(1, 0.0, 0.0, 1),
            Err(GridError::DuplicateEntity(1))
        ));
    }

    #[test]
    fn test_watcher_footprint_spans_radius() {
        let mut grid = InterestGrid::new();
        grid.insert(7, pos(5), pos(5), 2).unwrap();

        for di in -2i32..=2 {
            for dj in -2i32..=2 {
                let t = ((5 + di) as usize, (5 + dj) as usize);
                assert!(grid.tile(t).watchers.contains(&7), "missing at {:?}", t);
            }
        }
        assert!(!grid.tile((5, 8)).watchers.contains(&7));
        assert!(!grid.tile((8, 5)).watchers.contains(&7));
    }

    #[test]
    fn test_notify_iff_within_radius() {
        let mut grid = InterestGrid::new();
        let r = 2u8;
        grid.insert(1, pos(10), pos(10), r).unwrap(); // mover A
        grid.insert(2, pos(12), pos(10), r).unwrap(); // B: distance 2 -> sees A
        grid.insert(3, pos(13), pos(10), r).unwrap(); // C: distance 3 -> blind

        let watchers = grid.watchers_of(1).unwrap();
        assert!(watchers.contains(&2));
        assert!(!watchers.contains(&3));
        // The mover never notifies itself.
        assert!(!watchers.contains(&1));
    }

    #[test]
    fn test_moving_out_of_radius_stops_notifications() {
        let mut grid = InterestGrid::new();
        grid.insert(1, pos(10), pos(10), 2).unwrap();
        grid.insert(2, pos(11), pos(10), 2).unwrap();
        assert!(grid.watchers_of(1).unwrap().contains(&2));

        // A moves far away: B must drop out on this very update.
        let outcome = grid.relocate(1, pos(30), pos(30)).unwrap();
        assert!(outcome.tile_changed);
        assert!(outcome.lost.contains(&2));
        assert!(!grid.watchers_of(1).unwrap().contains(&2));

        // And back in: B reappears as a gained watcher.
        let outcome = grid.relocate(1, pos(11), pos(11)).unwrap();
        assert!(outcome.gained.contains(&2));
        assert!(grid.watchers_of(1).unwrap().contains(&2));
    }

    #[test]
    fn test_same_tile_move_changes_nothing() {
        let mut grid = InterestGrid::new();
        grid.insert(1, pos(4), pos(4), 2).unwrap();
        grid.insert(2, pos(5), pos(4), 2).unwrap();

        let outcome = grid.relocate(1, pos(4) + 1.0, pos(4) + 1.0).unwrap();
        assert!(!outcome.tile_changed);
        assert!(outcome.gained.is_empty() && outcome.lost.is_empty());
        assert!(grid.watchers_of(1).unwrap().contains(&2));
    }

    #[test]
    fn test_remove_clears_entity_and_footprint() {
        let mut grid = InterestGrid::new();
        grid.insert(1, pos(6), pos(6), 2).unwrap();
        grid.insert(2, pos(6), pos(6), 2).unwrap();

        grid.remove(1).unwrap();
        assert!(grid.tile_of(1).is_none());
        // 1 no longer watches anything...
        assert!(!grid.watchers_of(2).unwrap().contains(&1));
        // ...and is gone from every tile it covered.
        for i in 4..=8 {
            for j in 4..=8 {
                assert!(!grid.tile((i, j)).watchers.contains(&1));
            }
        }
        assert!(matches!(grid.remove(1), Err(GridError::UnknownEntity(1))));
    }

    #[test]
    fn test_entities_in_sight_seeds_new_watchers() {
        let mut grid = InterestGrid::new();
        grid.insert(1, pos(20), pos(20), 2).unwrap();
        grid.insert(2, pos(21), pos(20), 2).unwrap();
        grid.insert(3, pos(40), pos(40), 2).unwrap();

        let seen = grid.entities_in_sight((20, 20), 2);
        assert!(seen.contains(&1));
        assert!(seen.contains(&2));
        assert!(!seen.contains(&3));
    }

    #[test]
    fn test_border_tiles_clip_footprint() {
        let mut grid = InterestGrid::new();
        grid.insert(1, 0.0, 0.0, 2).unwrap();
        assert!(grid.tile((0, 0)).watchers.contains(&1));
        assert!(grid.tile((2, 2)).watchers.contains(&1));
        // Nothing panicked walking past the border, and the far corner is
        // untouched.
        assert!(!grid.tile((TILE_COUNT - 1, TILE_COUNT - 1)).watchers.contains(&1));
    }
}
