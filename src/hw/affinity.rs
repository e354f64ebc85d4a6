// src/hw/affinity.rs
//! Thread pinning and priority
//!
//! Worker startup only ever talks to the [`CpuBind`] trait; the OS-specific
//! mechanics stay behind it. Tests swap in [`NullBind`] so pool lifecycle
//! tests do not depend on the host's core layout.

use log::{debug, warn};

/// Capability interface for binding the calling thread to a core and
/// adjusting its scheduling priority.
pub trait CpuBind: Send + Sync {
    /// Pins the calling thread to the given logical core.
    ///
    /// Best effort; a failed pin is logged, never fatal.
    fn set_affinity(&self, core: usize);

    /// Applies an OS scheduling priority to the calling thread.
    /// `-1` means "leave the OS default alone".
    fn set_priority(&self, priority: i32);
}

/// Production implementation backed by the `core_affinity` crate.
pub struct OsCpuBind;

impl CpuBind for OsCpuBind {
    fn set_affinity(&self, core: usize) {
        let Some(ids) = core_affinity::get_core_ids() else {
            warn!("Core enumeration failed, thread left unpinned");
            return;
        };

        match ids.iter().find(|id| id.id == core) {
            Some(id) if core_affinity::set_for_current(*id) => {
                debug!("Pinned worker thread to core {}", core);
            }
            Some(_) => warn!("Failed to pin thread to core {}", core),
            None => warn!("Affinity core {} does not exist on this machine", core),
        }
    }

    fn set_priority(&self, priority: i32) {
        if priority < 0 {
            return;
        }
        // Thread priority has no safe cross-platform setter in the stack
        // this crate builds on; the knob is accepted and surfaced so a
        // platform module can honor it.
        debug!("Requested worker thread priority {}", priority);
    }
}

/// No-op binding used by unit tests.
pub struct NullBind;

impl CpuBind for NullBind {
    fn set_affinity(&self, _core: usize) {}

    fn set_priority(&self, _priority: i32) {}
}
