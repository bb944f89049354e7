//! Multi-signal presence resolution.
//!
//! Any one signal is enough to promote a peer:
//!
//! 1. a live transport connection to its peer id gives [`PresenceStatus::Online`].
//! 2. the identity store's online flag gives [`PresenceStatus::Online`], unless the peer is a
//!    signer whose advertisement has expired.
//! 3. a last-seen time inside the recency window gives [`PresenceStatus::RecentlyOnline`].
//!
//! With none of them the peer is [`PresenceStatus::Offline`]. The local node is always online.

use std::time::Duration;

use concord_identity::Identity;
use concord_primitives::UnixMillis;
use serde::{Deserialize, Serialize};

/// Default recency window: five minutes.
pub const DEFAULT_RECENTLY_ONLINE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Resolved presence of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// No signal at all.
    Offline,
    /// Seen within the recency window, but not confirmed now.
    RecentlyOnline,
    /// Confirmed reachable.
    Online,
}

/// How presence signals are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresencePolicy {
    /// How long after the last sighting a peer still counts as recently online.
    pub recently_online_window_ms: u64,

    /// Whether [`PresenceStatus::RecentlyOnline`] is good enough to co-sign.
    pub accept_recently_online: bool,
}

impl Default for PresencePolicy {
    fn default() -> Self {
        Self {
            recently_online_window_ms: DEFAULT_RECENTLY_ONLINE_WINDOW.as_millis() as u64,
            accept_recently_online: true,
        }
    }
}

impl PresencePolicy {
    /// Whether a peer with `status` counts as available.
    pub const fn is_available(&self, status: PresenceStatus) -> bool {
        match status {
            PresenceStatus::Online => true,
            PresenceStatus::RecentlyOnline => self.accept_recently_online,
            PresenceStatus::Offline => false,
        }
    }
}

/// The raw signals known about one peer at one moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenceSignals {
    /// The peer is the local node.
    pub is_self: bool,
    /// A transport connection to the peer's id is open.
    pub transport_connected: bool,
    /// The identity store reports the peer online.
    pub identity_online: bool,
    /// Last time the peer was observed.
    pub last_seen_at: Option<UnixMillis>,
}

impl PresenceSignals {
    /// Collects the signals for a peer from its identity, if known, at `now`.
    ///
    /// `is_connected` answers whether a transport connection to a peer id is open. The online
    /// flag of a signer whose advertisement expired by `now` is ignored.
    pub fn observe(
        identity: Option<&Identity>,
        is_self: bool,
        now: UnixMillis,
        is_connected: impl Fn(&str) -> bool,
    ) -> Self {
        let Some(identity) = identity else {
            return Self {
                is_self,
                ..Default::default()
            };
        };

        Self {
            is_self,
            transport_connected: identity.peer_id.as_deref().is_some_and(is_connected),
            identity_online: identity.is_online
                && !identity
                    .signer_capabilities
                    .as_ref()
                    .is_some_and(|caps| caps.has_expired(now)),
            last_seen_at: identity.last_seen_at,
        }
    }
}

/// Resolves presence from `signals` at `now`. Pure.
pub fn resolve_status(
    signals: &PresenceSignals,
    policy: &PresencePolicy,
    now: UnixMillis,
) -> PresenceStatus {
    if signals.is_self || signals.transport_connected || signals.identity_online {
        return PresenceStatus::Online;
    }

    match signals.last_seen_at {
        Some(seen) if now.saturating_sub(seen) <= policy.recently_online_window_ms => {
            PresenceStatus::RecentlyOnline
        }
        _ => PresenceStatus::Offline,
    }
}
