//! Discovery of MuSig2 co-signers.
//!
//! Peers announce themselves with short-lived [`Advertisement`]s. The [`DiscoveryCache`] keeps
//! the most recently useful ones, keyed by a hash of the advertised public key so that a signer
//! renewing its advertisement replaces its previous entry instead of adding a new one.

pub mod advertisement;
pub mod cache;
pub mod errors;

pub use advertisement::Advertisement;
pub use cache::{
    cache_key, DiscoveryCache, DiscoveryCacheConfig, DiscoveryCacheEntry, DiscoverySource,
};
pub use errors::{DiscoveryError, DiscoveryResult};
