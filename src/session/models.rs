//! Model Load Bookkeeping
//!
//! Tracks in-flight model loads and the set of loaded models for the active
//! session. Progress callbacks may arrive out of order from the service, so
//! each slot only ever moves forward; the aggregate the UI binds to is the
//! minimum across all slots, reaching 1.0 only once every outstanding load
//! has finished.
//!
//! The remote side unloads every model when the runtime disconnects; the
//! manager mirrors that by calling [`ModelLoader::clear`] whenever the state
//! leaves `RuntimeConnected`.

use serde::Serialize;

use crate::service::EntityHandle;

/// Identifier for one load request, valid until [`ModelLoader::clear`].
pub type SlotId = usize;

#[derive(Clone, Debug)]
struct LoadSlot {
    name: String,
    progress: f32,
    finished: bool,
}

/// A successfully loaded model.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoadedModel {
    pub name: String,
    pub entity: EntityHandle,
    /// Uniform scale applied to the root entity at load time.
    pub scale: f32,
}

/// Per-session model bookkeeping.
#[derive(Debug, Default)]
pub struct ModelLoader {
    slots: Vec<LoadSlot>,
    loaded: Vec<LoadedModel>,
    selected: Option<usize>,
}

impl ModelLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new in-flight load and return its slot id.
    pub fn begin_load(&mut self, name: impl Into<String>) -> SlotId {
        self.slots.push(LoadSlot {
            name: name.into(),
            progress: 0.0,
            finished: false,
        });
        self.slots.len() - 1
    }

    /// Record a progress value for a slot, monotonically forward only.
    pub fn record_progress(&mut self, slot: SlotId, value: f32) {
        if let Some(entry) = self.slots.get_mut(slot) {
            if !entry.finished {
                entry.progress = entry.progress.max(value.clamp(0.0, 1.0));
            }
        }
    }

    /// Finish a slot. On success the model joins the loaded set with the
    /// given scale; on failure the slot is closed with progress forced to 1.0
    /// and nothing is added.
    pub fn finish_load(&mut self, slot: SlotId, entity: Option<EntityHandle>, scale: f32) {
        let Some(entry) = self.slots.get_mut(slot) else {
            return;
        };
        entry.finished = true;
        entry.progress = 1.0;
        if let Some(entity) = entity {
            self.loaded.push(LoadedModel {
                name: entry.name.clone(),
                entity,
                scale,
            });
        }
    }

    /// Aggregate progress: minimum across all slots, 1.0 when none exist or
    /// all have finished.
    pub fn aggregate_progress(&self) -> f32 {
        self.slots
            .iter()
            .map(|s| s.progress)
            .fold(1.0f32, f32::min)
    }

    /// True while any load is outstanding.
    pub fn is_loading(&self) -> bool {
        self.slots.iter().any(|s| !s.finished)
    }

    pub fn loaded(&self) -> &[LoadedModel] {
        &self.loaded
    }

    /// Select a loaded model, or `None` to clear the selection. An
    /// out-of-range index is rejected and leaves the selection unchanged.
    pub fn select(&mut self, index: Option<usize>) -> bool {
        match index {
            Some(i) if i >= self.loaded.len() => false,
            other => {
                self.selected = other;
                true
            }
        }
    }

    pub fn selected(&self) -> Option<&LoadedModel> {
        self.selected.and_then(|i| self.loaded.get(i))
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    /// Remove one loaded model, clearing any selection referencing it.
    pub fn remove(&mut self, index: usize) -> Option<LoadedModel> {
        if index >= self.loaded.len() {
            return None;
        }
        let removed = self.loaded.remove(index);
        self.selected = match self.selected {
            Some(sel) if sel == index => None,
            Some(sel) if sel > index => Some(sel - 1),
            other => other,
        };
        Some(removed)
    }

    /// Drop all slots, loaded models and the selection.
    ///
    /// Returns true if anything was actually cleared, so callers can skip a
    /// redundant models-changed notification.
    pub fn clear(&mut self) -> bool {
        let had_any = !self.slots.is_empty() || !self.loaded.is_empty() || self.selected.is_some();
        self.slots.clear();
        self.loaded.clear();
        self.selected = None;
        had_any
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_is_minimum_of_in_flight_loads() {
        let mut loader = ModelLoader::new();
        let a = loader.begin_load("engine");
        let b = loader.begin_load("chassis");
        loader.record_progress(a, 0.3);
        loader.record_progress(b, 0.9);
        assert_eq!(loader.aggregate_progress(), 0.3);

        loader.finish_load(a, Some(EntityHandle(1)), 1.0);
        assert_eq!(loader.aggregate_progress(), 0.9);
        loader.finish_load(b, Some(EntityHandle(2)), 1.0);
        assert_eq!(loader.aggregate_progress(), 1.0);
    }

    #[test]
    fn empty_loader_reports_complete() {
        let loader = ModelLoader::new();
        assert_eq!(loader.aggregate_progress(), 1.0);
        assert!(!loader.is_loading());
    }

    #[test]
    fn progress_only_moves_forward() {
        let mut loader = ModelLoader::new();
        let slot = loader.begin_load("m");
        loader.record_progress(slot, 0.6);
        loader.record_progress(slot, 0.4); // out-of-order delivery
        assert_eq!(loader.aggregate_progress(), 0.6);
        loader.record_progress(slot, 2.0); // clamped
        assert_eq!(loader.aggregate_progress(), 1.0);
        assert!(loader.is_loading()); // clamped progress is not completion
    }

    #[test]
    fn failed_load_closes_slot_without_model() {
        let mut loader = ModelLoader::new();
        let slot = loader.begin_load("broken");
        loader.record_progress(slot, 0.5);
        loader.finish_load(slot, None, 1.0);
        assert_eq!(loader.aggregate_progress(), 1.0);
        assert!(loader.loaded().is_empty());
        assert!(!loader.is_loading());
    }

    #[test]
    fn successful_load_records_scale() {
        let mut loader = ModelLoader::new();
        let slot = loader.begin_load("car");
        loader.finish_load(slot, Some(EntityHandle(7)), 0.01);
        assert_eq!(loader.loaded().len(), 1);
        assert_eq!(loader.loaded()[0].scale, 0.01);
        assert_eq!(loader.loaded()[0].entity, EntityHandle(7));
    }

    #[test]
    fn remove_adjusts_selection() {
        let mut loader = ModelLoader::new();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let slot = loader.begin_load(*name);
            loader.finish_load(slot, Some(EntityHandle(i as u64)), 1.0);
        }
        assert!(loader.select(Some(2)));
        assert_eq!(loader.selected().map(|m| m.name.as_str()), Some("c"));

        // Removing before the selection shifts it down.
        loader.remove(0);
        assert_eq!(loader.selected().map(|m| m.name.as_str()), Some("c"));

        // Removing the selected model clears the selection.
        loader.remove(1);
        assert!(loader.selected().is_none());
        assert_eq!(loader.loaded().len(), 1);
    }

    #[test]
    fn rejected_selection_keeps_current_selection() {
        let mut loader = ModelLoader::new();
        let slot = loader.begin_load("a");
        loader.finish_load(slot, Some(EntityHandle(1)), 1.0);

        assert!(loader.select(Some(0)));
        assert!(!loader.select(Some(3)));
        assert_eq!(loader.selected().map(|m| m.name.as_str()), Some("a"));

        assert!(loader.select(None));
        assert!(loader.selected().is_none());
    }

    #[test]
    fn clear_reports_whether_anything_was_dropped() {
        let mut loader = ModelLoader::new();
        assert!(!loader.clear());

        let slot = loader.begin_load("m");
        loader.finish_load(slot, Some(EntityHandle(1)), 1.0);
        assert!(loader.clear());
        assert!(loader.loaded().is_empty());
        assert_eq!(loader.aggregate_progress(), 1.0);
    }
}
