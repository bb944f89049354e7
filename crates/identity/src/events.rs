//! Notifications emitted by the identity store.

use concord_primitives::{PublicKeyHex, UnixMillis};

/// A change to the identity set, delivered over [`crate::IdentityStore::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    /// A key was observed for the first time.
    Created(PublicKeyHex),

    /// Presence of an identity changed.
    PresenceChanged {
        /// The identity.
        public_key: PublicKeyHex,
        /// New online flag.
        is_online: bool,
        /// New last-seen timestamp.
        last_seen_at: Option<UnixMillis>,
    },

    /// Discovery data was merged into an identity.
    SignerUpdated(PublicKeyHex),

    /// The user removed an identity.
    Removed(PublicKeyHex),
}
