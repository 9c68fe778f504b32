//! Map Handle Registry
//!
//! Tracks which maps are registered with the session, which of them the
//! pose-estimation backend currently holds in memory (through the backend's
//! opaque handle), where each map sits in scene space, and which scene node
//! follows it.

use std::collections::HashMap;
use std::fmt;

use bevy::ecs::entity::Entity;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LocalizationError, LocalizationResult};
use crate::transform::SpatialRelation;

/// Caller-assigned identifier of a map, stable for the map's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MapId(pub i32);

impl MapId {
    /// Backend convention for "the current default map"
    pub const DEFAULT_SENTINEL: MapId = MapId(0);
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle assigned by the pose-estimation backend to a loaded map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MapHandle(pub i32);

impl MapHandle {
    pub const DEFAULT_SENTINEL: MapHandle = MapHandle(0);
}

/// A registered map
#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    pub map_id: MapId,
    /// Placement of the map's scene node inside map space
    pub relation: SpatialRelation,
    /// Scene node that follows this map, owned by the host
    pub scene_attachment: Option<Entity>,
}

impl MapEntry {
    pub fn new(map_id: MapId) -> Self {
        Self {
            map_id,
            relation: SpatialRelation::IDENTITY,
            scene_attachment: None,
        }
    }

    pub fn with_relation(mut self, relation: SpatialRelation) -> Self {
        self.relation = relation;
        self
    }

    pub fn with_scene_attachment(mut self, entity: Entity) -> Self {
        self.scene_attachment = Some(entity);
        self
    }
}

/// Which maps a localizer backend wants to search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapSelection {
    /// Every registered map (remote backends resolve maps themselves)
    #[default]
    AllRegistered,
    /// Only maps whose data is loaded into the on-device backend
    LoadedOnly,
}

impl MapSelection {
    pub fn select(self, registry: &MapHandleRegistry) -> Vec<MapId> {
        match self {
            MapSelection::AllRegistered => registry.registered_ids(),
            MapSelection::LoadedOnly => registry.loaded_ids(),
        }
    }
}

/// Bidirectional id/handle mapping plus per-map entries.
///
/// Both directions of the mapping are only ever changed together.
#[derive(Debug, Default)]
pub struct MapHandleRegistry {
    handles: HashMap<MapId, MapHandle>,
    ids: HashMap<MapHandle, MapId>,
    entries: HashMap<MapId, MapEntry>,
}

impl MapHandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `map_id` is loaded under `handle`.
    ///
    /// Existing mappings are never overwritten: if either side is already
    /// mapped this is a silent no-op and returns `false`.
    pub fn add_mapping(&mut self, map_id: MapId, handle: MapHandle) -> bool {
        if self.handles.contains_key(&map_id) || self.ids.contains_key(&handle) {
            debug!(%map_id, handle = handle.0, "mapping already present, ignoring");
            return false;
        }
        self.handles.insert(map_id, handle);
        self.ids.insert(handle, map_id);
        true
    }

    pub fn handle(&self, map_id: MapId) -> Option<MapHandle> {
        self.handles.get(&map_id).copied()
    }

    pub fn map_id(&self, handle: MapHandle) -> Option<MapId> {
        self.ids.get(&handle).copied()
    }

    /// Remove both directions of the mapping for `map_id`
    pub fn remove_mapping(&mut self, map_id: MapId) -> bool {
        match self.handles.remove(&map_id) {
            Some(handle) => {
                self.ids.remove(&handle);
                true
            }
            None => false,
        }
    }

    /// Translate map ids into backend handles.
    ///
    /// Returns `None` if any id has no handle. A single-element list holding
    /// [`MapId::DEFAULT_SENTINEL`] is passed through as
    /// [`MapHandle::DEFAULT_SENTINEL`] even when nothing is mapped; backends
    /// read that as "use the current default map".
    pub fn ids_to_handles(&self, map_ids: &[MapId]) -> Option<Vec<MapHandle>> {
        if map_ids == [MapId::DEFAULT_SENTINEL] {
            return Some(vec![MapHandle::DEFAULT_SENTINEL]);
        }
        map_ids.iter().map(|id| self.handle(*id)).collect()
    }

    /// Drop every mapping and entry. Only used on a total reset.
    pub fn clear(&mut self) {
        self.handles.clear();
        self.ids.clear();
        self.entries.clear();
    }

    pub fn register_map(&mut self, entry: MapEntry) -> LocalizationResult<()> {
        if self.entries.contains_key(&entry.map_id) {
            return Err(LocalizationError::DuplicateRegistration(entry.map_id));
        }
        debug!(map_id = %entry.map_id, "map registered");
        self.entries.insert(entry.map_id, entry);
        Ok(())
    }

    /// Unregister a map, dropping its handle mapping too
    pub fn unregister_map(&mut self, map_id: MapId) -> LocalizationResult<MapEntry> {
        let entry = self
            .entries
            .remove(&map_id)
            .ok_or(LocalizationError::MapNotFound(map_id))?;
        self.remove_mapping(map_id);
        Ok(entry)
    }

    pub fn entry(&self, map_id: MapId) -> Option<&MapEntry> {
        self.entries.get(&map_id)
    }

    pub fn update_relation(
        &mut self,
        map_id: MapId,
        relation: SpatialRelation,
    ) -> LocalizationResult<()> {
        let entry = self
            .entries
            .get_mut(&map_id)
            .ok_or(LocalizationError::MapNotFound(map_id))?;
        entry.relation = relation;
        Ok(())
    }

    pub fn attach_scene_node(&mut self, map_id: MapId, entity: Entity) -> LocalizationResult<()> {
        let entry = self
            .entries
            .get_mut(&map_id)
            .ok_or(LocalizationError::MapNotFound(map_id))?;
        entry.scene_attachment = Some(entity);
        Ok(())
    }

    /// Handle of a registered map, or why it cannot be used yet
    pub fn loaded_handle(&self, map_id: MapId) -> LocalizationResult<MapHandle> {
        if !self.entries.contains_key(&map_id) {
            return Err(LocalizationError::MapNotFound(map_id));
        }
        self.handle(map_id)
            .ok_or(LocalizationError::MapNotLoaded(map_id))
    }

    pub fn registered_ids(&self) -> Vec<MapId> {
        let mut ids: Vec<MapId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn loaded_ids(&self) -> Vec<MapId> {
        let mut ids: Vec<MapId> = self
            .entries
            .keys()
            .filter(|id| self.handles.contains_key(id))
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
