//! Spend gating.
//!
//! Viewing a shared wallet needs nothing but its record. Spending needs the transport up,
//! discovery ready, a positive balance and every other participant available. The predicate is
//! recomputed on demand and reports every reason it fails.

use std::{
    collections::HashSet,
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

use concord_contacts::{PresencePolicy, PresenceStatus};
use concord_primitives::PublicKeyHex;
use parking_lot::RwLock;

use crate::wallet::SharedWallet;

/// Live view of the P2P layer, implemented by the transport collaborator.
pub trait TransportStatus: fmt::Debug + Send + Sync {
    /// Whether the transport is connected to the network at all.
    fn is_connected(&self) -> bool;

    /// Whether the discovery layer has finished bootstrapping.
    fn is_discovery_ready(&self) -> bool;

    /// Whether a connection to `peer_id` is open.
    fn is_peer_connected(&self, peer_id: &str) -> bool;
}

/// A [`TransportStatus`] driven by explicit updates.
#[derive(Debug, Default)]
pub struct TransportFlags {
    connected: AtomicBool,
    discovery_ready: AtomicBool,
    peers: RwLock<HashSet<String>>,
}

impl TransportFlags {
    /// Creates flags with everything down.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transport connection flag.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Sets the discovery readiness flag.
    pub fn set_discovery_ready(&self, ready: bool) {
        self.discovery_ready.store(ready, Ordering::Release);
    }

    /// Records a peer connection opening or closing.
    pub fn set_peer_connected(&self, peer_id: &str, connected: bool) {
        let mut peers = self.peers.write();
        if connected {
            peers.insert(peer_id.to_owned());
        } else {
            peers.remove(peer_id);
        }
    }
}

impl TransportStatus for TransportFlags {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn is_discovery_ready(&self) -> bool {
        self.discovery_ready.load(Ordering::Acquire)
    }

    fn is_peer_connected(&self, peer_id: &str) -> bool {
        self.peers.read().contains(peer_id)
    }
}

/// One reason a shared wallet cannot be spent right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpendBlocker {
    /// The P2P transport is down.
    P2pDisconnected,
    /// Discovery has not finished bootstrapping.
    DiscoveryNotReady,
    /// Nothing to spend.
    ZeroBalance,
    /// These participants are not available to co-sign.
    ParticipantsOffline(Vec<PublicKeyHex>),
}

impl fmt::Display for SpendBlocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpendBlocker::P2pDisconnected => f.write_str("not connected to the P2P network"),
            SpendBlocker::DiscoveryNotReady => f.write_str("peer discovery is not ready"),
            SpendBlocker::ZeroBalance => f.write_str("wallet balance is zero"),
            SpendBlocker::ParticipantsOffline(keys) => {
                f.write_str("participants offline:")?;
                for key in keys {
                    write!(f, " {key}")?;
                }
                Ok(())
            }
        }
    }
}

/// The outcome of the spend predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpendEligibility {
    /// Every reason spending is blocked; empty when spendable.
    pub blockers: Vec<SpendBlocker>,
}

impl SpendEligibility {
    /// Whether the wallet can be spent.
    pub fn can_spend(&self) -> bool {
        self.blockers.is_empty()
    }

    /// Participants blocking the spend by being offline.
    pub fn offline_participants(&self) -> &[PublicKeyHex] {
        self.blockers
            .iter()
            .find_map(|b| match b {
                SpendBlocker::ParticipantsOffline(keys) => Some(keys.as_slice()),
                _ => None,
            })
            .unwrap_or_default()
    }
}

/// Evaluates the spend predicate for `wallet`.
///
/// `statuses` holds the resolved presence of every non-self participant; a participant with
/// no entry is treated as offline.
pub fn evaluate_spend(
    wallet: &SharedWallet,
    transport: &dyn TransportStatus,
    statuses: &[(PublicKeyHex, PresenceStatus)],
    policy: &PresencePolicy,
) -> SpendEligibility {
    let mut blockers = Vec::new();
    if !transport.is_connected() {
        blockers.push(SpendBlocker::P2pDisconnected);
    }
    if !transport.is_discovery_ready() {
        blockers.push(SpendBlocker::DiscoveryNotReady);
    }
    if wallet.balance == 0 {
        blockers.push(SpendBlocker::ZeroBalance);
    }

    let offline: Vec<_> = wallet
        .others()
        .map(|p| p.public_key_hex)
        .filter(|key| {
            !statuses
                .iter()
                .find(|(k, _)| k == key)
                .is_some_and(|(_, status)| policy.is_available(*status))
        })
        .collect();
    if !offline.is_empty() {
        blockers.push(SpendBlocker::ParticipantsOffline(offline));
    }

    SpendEligibility { blockers }
}
