use crate::tables::{IsoEntry, ShutterEntry};
use parking_lot::RwLock;
use std::sync::Arc;

/// Everything both threads need to see about the daemon.
///
/// The dispatcher owns the lifecycle flags and the per-body tables; the HTTP
/// thread owns the user-editable sequence parameters. All times are
/// microseconds. Readers take a [`StateHandle::snapshot`] instead of holding
/// the lock while rendering.
#[derive(Debug, Clone)]
pub struct SharedState {
    pub running: bool,
    pub initialized: bool,
    pub connected: bool,
    pub shooting: bool,
    /// Model name of the detected body, kept after disconnect as the last
    /// known description.
    pub description: String,
    /// Index into `iso_table`; past the end means Auto.
    pub iso_index: usize,
    /// Index into `shutter_table`; past the end means Bulb.
    pub exposure_index: usize,
    /// Software-timed exposure length, used when `exposure_index` selects
    /// Bulb.
    pub exposure_us: i64,
    pub delay_us: i64,
    pub interval_us: i64,
    pub frames: i64,
    pub frames_taken: i64,
    /// Master-table subset the attached body advertises, in body order.
    /// Written only by the dispatcher on connect.
    pub shutter_table: Vec<ShutterEntry>,
    pub iso_table: Vec<IsoEntry>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            running: true,
            initialized: false,
            connected: false,
            shooting: false,
            description: String::new(),
            iso_index: 0,
            exposure_index: 0,
            exposure_us: 5_000_000,
            delay_us: 1_000_000,
            interval_us: 1_000_000,
            frames: 2,
            frames_taken: 0,
            shutter_table: Vec::new(),
            iso_table: Vec::new(),
        }
    }
}

impl SharedState {
    /// Bulb is selected when the index points past the filtered table.
    pub fn bulb_selected(&self) -> bool {
        self.exposure_index >= self.shutter_table.len()
    }

    pub fn iso_auto_selected(&self) -> bool {
        self.iso_index >= self.iso_table.len()
    }
}

/// Shared-ownership handle over the one [`SharedState`] value.
#[derive(Debug, Clone, Default)]
pub struct StateHandle(Arc<RwLock<SharedState>>);

impl StateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the state taken under the lock; safe to hold while rendering
    /// or sleeping.
    pub fn snapshot(&self) -> SharedState {
        self.0.read().clone()
    }

    /// Run `mutate` under the write lock. Callers must not perform SDK or
    /// queue operations inside the closure.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut SharedState) -> R) -> R {
        mutate(&mut self.0.write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables;

    #[test]
    fn snapshot_is_a_detached_copy() {
        let handle = StateHandle::new();
        let before = handle.snapshot();
        handle.update(|state| state.frames = 42);

        assert_eq!(before.frames, 2);
        assert_eq!(handle.snapshot().frames, 42);
    }

    #[test]
    fn sentinel_selection_follows_table_length() {
        let mut state = SharedState::default();
        assert!(state.bulb_selected());
        assert!(state.iso_auto_selected());

        state.shutter_table = tables::filter_shutter(&[0x68, 0x10]);
        state.iso_table = tables::filter_iso(&[0x48]);
        assert!(!state.bulb_selected());
        assert!(!state.iso_auto_selected());

        state.exposure_index = 2;
        state.iso_index = 1;
        assert!(state.bulb_selected());
        assert!(state.iso_auto_selected());
    }
}
