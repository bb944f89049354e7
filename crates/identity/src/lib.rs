//! The canonical identity registry.
//!
//! A single compressed public key is the identity of a peer, whether it is seen as a wallet
//! address, a P2P node or a MuSig2 co-signer. Everything else about the peer (address, peer id,
//! presence, signer capabilities) is derived from or attached to that key.

pub mod errors;
pub mod events;
pub mod identity;
pub mod level;
pub mod store;

pub use errors::{IdentityError, IdentityResult};
pub use events::IdentityEvent;
pub use identity::{Identity, PresenceUpdate, SignerCapabilities, SignerInfo};
pub use level::IdentityLevel;
pub use store::{IdentityStore, IdentityStoreConfig};
