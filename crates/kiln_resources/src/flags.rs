use bitflags::bitflags;

bitflags! {
    /// Ownership policy of a resource inside its manager.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceFlags: u32 {
        /// Never reloaded by file-time scans; the owner drives reloads.
        const MANUAL = 1 << 0;
        /// Never evicted by `remove_unused_resources`.
        const PERSISTENT = 1 << 1;
        /// Not deduplicated: every request creates a fresh, uncached instance.
        const TEMP = 1 << 2;
    }
}

bitflags! {
    /// How a load request should be carried out.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LoadFlags: u32 {
        /// Block until the resource is loaded.
        const WAIT = 1 << 0;
        /// Queue the load for a worker and return immediately.
        const ASYNC = 1 << 1;
        /// Reload if the file on disk is newer than the loaded copy.
        const RELOAD = 1 << 2;
        /// With `RELOAD`, reload even when the file time did not change.
        const FORCE_RELOAD = 1 << 3;
    }
}

impl ResourceFlags {
    /// Flags that exclude a resource from eviction.
    pub const PINNED: Self = Self::MANUAL.union(Self::PERSISTENT).union(Self::TEMP);
}
