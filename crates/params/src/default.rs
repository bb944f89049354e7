//! Default values for the node configuration.

use bitcoin::Network;

/// Default network.
pub(crate) const NETWORK: Network = Network::Signet;

/// Default account index of the PRIMARY purpose.
pub(crate) const PRIMARY_ACCOUNT: u32 = 0;

/// Default account index of the MUSIG2 purpose.
pub(crate) const MUSIG2_ACCOUNT: u32 = 1;

/// Default maximum number of cached advertisements.
pub(crate) const DISCOVERY_CAPACITY: usize = 100;

/// Default coalescing window for cache and identity writes.
pub(crate) const FLUSH_DEBOUNCE_MS: u64 = 500;

/// Default interval between maintenance sweeps.
pub(crate) const SWEEP_INTERVAL_MS: u64 = 60_000;

/// Default lifetime of our own advertisements (1 hour).
pub(crate) const ADVERTISEMENT_TTL_MS: u64 = 60 * 60 * 1_000;

/// Default window in which a peer seen but not connected counts as recently online (5 minutes).
pub(crate) const RECENTLY_ONLINE_WINDOW_MS: u64 = 5 * 60 * 1_000;

/// Default signing session timeout.
pub(crate) const SESSION_TIMEOUT_MS: u64 = 30_000;
