//! Resource load state machine.
//!
//! The state lives in a single atomic and can only be changed through
//! [`StateCell::compare_and_transition`], which rejects edges that are not
//! part of the lifecycle:
//!
//! ```text
//!            reload                 claim            body done
//!  Unloaded ───────▶ Queued ─────────────▶ Loading ───────────▶ Loaded
//!     │                ▲                      ▲                    │
//!     └────────────────┼── direct sync load ──┘                    │
//!                      └──────────────── reload ───────────────────┘
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    Unloaded = 0,
    Queued = 1,
    Loading = 2,
    Loaded = 3,
}

impl LoadState {
    #[inline]
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unloaded,
            1 => Self::Queued,
            2 => Self::Loading,
            _ => Self::Loaded,
        }
    }

    /// Whether `self -> to` is an edge of the lifecycle.
    #[inline]
    #[must_use]
    pub const fn can_transition(self, to: LoadState) -> bool {
        matches!(
            (self, to),
            (Self::Unloaded | Self::Loaded, Self::Queued)
                | (Self::Queued | Self::Unloaded, Self::Loading)
                | (Self::Loading, Self::Loaded)
        )
    }
}

/// Atomic holder of a [`LoadState`].
#[derive(Debug)]
pub struct StateCell {
    value: AtomicU8,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU8::new(LoadState::Unloaded as u8),
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self) -> LoadState {
        LoadState::from_u8(self.value.load(Ordering::Acquire))
    }

    /// Atomically moves from `from` to `to`.
    ///
    /// Returns `false` when the current state is not `from` or when the edge
    /// is not part of the lifecycle.
    pub fn compare_and_transition(&self, from: LoadState, to: LoadState) -> bool {
        if !from.can_transition(to) {
            log::error!("Rejected illegal load state transition {from:?} -> {to:?}");
            return false;
        }
        self.value
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
