use bitflags::bitflags;

bitflags! {
    /// Capabilities requested when an environment is opened.
    ///
    /// libmdbx always runs with transactions, locking, a write-ahead
    /// durability scheme and a page cache. The `INIT_*` flags are kept so
    /// callers state the subsystems they rely on; an engine that cannot
    /// provide one refuses to open.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct EnvironmentFlags: u32 {
        /// Create the environment if it does not already exist.
        const CREATE = 0x0001;
        /// Initialize the transaction subsystem.
        const INIT_TXN = 0x0002;
        /// Initialize the locking subsystem.
        const INIT_LOCK = 0x0004;
        /// Initialize the logging subsystem.
        const INIT_LOG = 0x0008;
        /// Initialize the in-memory buffer cache.
        const INIT_MPOOL = 0x0010;
        /// Write on commit but defer the sync-to-disk barrier.
        const TXN_WRITE_NOSYNC = 0x0100;

        /// Every subsystem an environment needs to run transactions.
        const SUBSYSTEMS = Self::INIT_TXN.bits()
            | Self::INIT_LOCK.bits()
            | Self::INIT_LOG.bits()
            | Self::INIT_MPOOL.bits();
    }
}

impl Default for EnvironmentFlags {
    fn default() -> Self {
        Self::CREATE | Self::SUBSYSTEMS | Self::TXN_WRITE_NOSYNC
    }
}

impl EnvironmentFlags {
    /// Translate into the libmdbx open flags.
    pub(crate) const fn mdbx_flags(&self) -> ffi::MDBX_env_flags_t {
        if self.contains(Self::TXN_WRITE_NOSYNC) {
            ffi::MDBX_SAFE_NOSYNC
        } else {
            ffi::MDBX_SYNC_DURABLE
        }
    }
}
