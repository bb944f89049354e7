//! End-to-end shared wallet flows across several coordinators.

use std::{sync::Arc, time::Duration};

use bitcoin::{key::XOnlyPublicKey, Network};
use concord_db::{InMemoryKvStore, KvStore};
use concord_discovery::{DiscoveryCache, DiscoveryCacheConfig, DiscoverySource};
use concord_identity::{IdentityStore, IdentityStoreConfig};
use concord_contacts::PresenceStatus;
use concord_musig2::{
    AdvertisementPublisher, CoordinatorConfig, CoordinatorError, Musig2Coordinator, PublishError,
    SessionError, SessionId, SessionNotice, SessionProgress, SessionState, SpendBlocker,
    TransportFlags,
};
use concord_primitives::{Capabilities, ManualClock, PublicKeyHex};
use concord_test_utils::keys::node_keys;
use secp256k1::{Message, SECP256K1};

const NETWORK: Network = Network::Regtest;
const START: u64 = 1_700_000_000_000;

struct Node {
    coordinator: Musig2Coordinator,
    clock: ManualClock,
    transport: Arc<TransportFlags>,
}

impl Node {
    fn new(seed: u8) -> Self {
        Self::with_store(seed, Arc::new(InMemoryKvStore::new()))
    }

    fn with_store(seed: u8, store: Arc<dyn KvStore>) -> Self {
        let clock = ManualClock::new(START);
        let transport = Arc::new(TransportFlags::new());
        let identities = Arc::new(IdentityStore::open(
            store.clone(),
            Arc::new(clock.clone()),
            IdentityStoreConfig {
                network: NETWORK,
                ..Default::default()
            },
        ));
        let discovery = Arc::new(DiscoveryCache::open(
            store.clone(),
            Arc::new(clock.clone()),
            DiscoveryCacheConfig::default(),
        ));
        let coordinator = Musig2Coordinator::new(
            CoordinatorConfig {
                network: NETWORK,
                ..Default::default()
            },
            Arc::new(clock.clone()),
            Arc::new(node_keys(seed, NETWORK)),
            identities,
            discovery,
            transport.clone(),
            store,
        );

        Self {
            coordinator,
            clock,
            transport,
        }
    }

    fn key(&self) -> PublicKeyHex {
        self.coordinator.my_public_key()
    }

    fn bring_up(&self) {
        self.transport.set_connected(true);
        self.transport.set_discovery_ready(true);
    }
}

fn trio() -> (Node, Node, Node) {
    (Node::new(1), Node::new(2), Node::new(3))
}

#[test]
fn every_participant_derives_the_same_wallet() {
    let (a, b, c) = trio();

    let from_a = a
        .coordinator
        .create_shared_wallet("trio", [b.key(), c.key()])
        .unwrap();
    let from_a_reordered = a
        .coordinator
        .create_shared_wallet("trio again", [c.key(), b.key()])
        .unwrap();
    let from_b = b
        .coordinator
        .create_shared_wallet("trio", [c.key(), a.key()])
        .unwrap();
    let from_c = c
        .coordinator
        .create_shared_wallet("trio", [a.key(), b.key(), c.key()])
        .unwrap();

    assert_eq!(from_a, from_a_reordered);
    assert_eq!(from_a.participants.len(), 3);
    assert_eq!(from_a.participants.iter().filter(|p| p.is_me).count(), 1);
    for other in [&from_b, &from_c] {
        assert_eq!(other.id, from_a.id);
        assert_eq!(other.shared_address, from_a.shared_address);
        assert_eq!(other.aggregated_public_key_hex, from_a.aggregated_public_key_hex);
    }
    assert_eq!(a.coordinator.wallets().len(), 1);
}

#[test]
fn wallet_needs_another_participant() {
    let a = Node::new(1);

    let err = a
        .coordinator
        .create_shared_wallet("solo", [a.key()])
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Aggregation(_)));
    assert!(a.coordinator.wallets().is_empty());
}

#[test]
fn three_coordinators_produce_a_valid_signature() {
    let (a, b, c) = trio();
    let nodes = [&a, &b, &c];
    let wallet = a
        .coordinator
        .create_shared_wallet("trio", [b.key(), c.key()])
        .unwrap();
    b.coordinator
        .create_shared_wallet("trio", [a.key(), c.key()])
        .unwrap();
    c.coordinator
        .create_shared_wallet("trio", [a.key(), b.key()])
        .unwrap();

    let message = [0x5a; 32];
    let mut notices = a.coordinator.subscribe_notices();
    let (session_id, nonce_a) = a.coordinator.start_session(&wallet.id, message).unwrap();
    let nonce_b = b
        .coordinator
        .join_session(session_id, &wallet.id, message)
        .unwrap();
    let nonce_c = c
        .coordinator
        .join_session(session_id, &wallet.id, message)
        .unwrap();
    let nonces = [(a.key(), nonce_a), (b.key(), nonce_b), (c.key(), nonce_c)];

    for node in nodes {
        let mut last = None;
        for (key, nonce) in &nonces {
            if *key != node.key() {
                last = Some(
                    node.coordinator
                        .receive_nonce(&session_id, *key, nonce.clone())
                        .unwrap(),
                );
            }
        }
        assert!(matches!(last, Some(SessionProgress::NoncesReady(_))));
    }

    let partials: Vec<_> = nodes
        .iter()
        .map(|node| (node.key(), node.coordinator.sign(&session_id).unwrap().0))
        .collect();

    let mut signatures = Vec::new();
    for node in nodes {
        for (key, partial) in &partials {
            if *key != node.key() {
                if let SessionProgress::Aggregated(signature) = node
                    .coordinator
                    .receive_partial(&session_id, *key, *partial)
                    .unwrap()
                {
                    signatures.push(signature);
                }
            }
        }
    }
    assert_eq!(signatures.len(), 3);
    assert!(signatures.windows(2).all(|w| w[0] == w[1]));

    let script = wallet.address(NETWORK).script_pubkey();
    let output_key = XOnlyPublicKey::from_slice(&script.as_bytes()[2..34]).unwrap();
    SECP256K1
        .verify_schnorr(&signatures[0], &Message::from_digest(message), &output_key)
        .unwrap();

    assert!(matches!(
        notices.try_recv().unwrap(),
        SessionNotice::Aggregated { session_id: id, .. } if id == session_id
    ));

    a.coordinator.mark_broadcast(&session_id).unwrap();
    assert!(a.coordinator.is_retired(&session_id));
    let err = a
        .coordinator
        .join_session(session_id, &wallet.id, message)
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Session(SessionError::Retired(_))));
}

#[test]
fn local_signature_completing_the_set_aggregates() {
    let (a, b, c) = trio();
    let nodes = [&a, &b, &c];
    let wallet = a
        .coordinator
        .create_shared_wallet("trio", [b.key(), c.key()])
        .unwrap();
    for (node, others) in [(&b, [a.key(), c.key()]), (&c, [a.key(), b.key()])] {
        node.coordinator.create_shared_wallet("trio", others).unwrap();
    }

    let message = [0x6b; 32];
    let mut notices = a.coordinator.subscribe_notices();
    let (session_id, nonce_a) = a.coordinator.start_session(&wallet.id, message).unwrap();
    let mut nonces = vec![(a.key(), nonce_a)];
    for node in [&b, &c] {
        let nonce = node
            .coordinator
            .join_session(session_id, &wallet.id, message)
            .unwrap();
        nonces.push((node.key(), nonce));
    }
    for node in nodes {
        for (key, nonce) in nonces.iter().filter(|(key, _)| *key != node.key()) {
            node.coordinator
                .receive_nonce(&session_id, *key, nonce.clone())
                .unwrap();
        }
    }

    // Both co-signers' partials reach A before A signs.
    for node in [&b, &c] {
        let (partial, _) = node.coordinator.sign(&session_id).unwrap();
        a.coordinator
            .receive_partial(&session_id, node.key(), partial)
            .unwrap();
    }
    assert_eq!(
        a.coordinator.session_state(&session_id),
        Some(SessionState::NoncesExchanged)
    );

    let (_, progress) = a.coordinator.sign(&session_id).unwrap();
    let SessionProgress::Aggregated(signature) = progress else {
        panic!("expected aggregation, got {progress:?}");
    };
    assert_eq!(notices.try_recv().unwrap(), SessionNotice::Aggregated {
        session_id,
        signature,
    });

    let script = wallet.address(NETWORK).script_pubkey();
    let output_key = XOnlyPublicKey::from_slice(&script.as_bytes()[2..34]).unwrap();
    SECP256K1
        .verify_schnorr(&signature, &Message::from_digest(message), &output_key)
        .unwrap();
    a.coordinator.mark_broadcast(&session_id).unwrap();
}

#[test]
fn missing_partial_expires_the_session() {
    let (a, b, c) = trio();
    let wallet = a
        .coordinator
        .create_shared_wallet("trio", [b.key(), c.key()])
        .unwrap();
    b.coordinator
        .create_shared_wallet("trio", [a.key(), c.key()])
        .unwrap();
    c.coordinator
        .create_shared_wallet("trio", [a.key(), b.key()])
        .unwrap();
    a.coordinator.set_balance(&wallet.id, 50_000).unwrap();

    let message = [7; 32];
    let mut notices = a.coordinator.subscribe_notices();
    let (session_id, nonce_a) = a.coordinator.start_session(&wallet.id, message).unwrap();
    let nonce_b = b
        .coordinator
        .join_session(session_id, &wallet.id, message)
        .unwrap();
    let nonce_c = c
        .coordinator
        .join_session(session_id, &wallet.id, message)
        .unwrap();
    a.coordinator
        .receive_nonce(&session_id, b.key(), nonce_b.clone())
        .unwrap();
    a.coordinator
        .receive_nonce(&session_id, c.key(), nonce_c.clone())
        .unwrap();
    b.coordinator
        .receive_nonce(&session_id, a.key(), nonce_a)
        .unwrap();
    b.coordinator
        .receive_nonce(&session_id, c.key(), nonce_c)
        .unwrap();

    a.coordinator.sign(&session_id).unwrap();
    let (partial_b, _) = b.coordinator.sign(&session_id).unwrap();
    let progress = a
        .coordinator
        .receive_partial(&session_id, b.key(), partial_b)
        .unwrap();
    assert_eq!(progress, SessionProgress::Waiting {
        missing: vec![c.key()]
    });

    a.clock.advance(Duration::from_millis(30_001));
    assert_eq!(a.coordinator.expire_sessions(), vec![session_id]);
    assert!(a.coordinator.session_state(&session_id).is_none());
    assert!(a.coordinator.is_retired(&session_id));
    let notice = notices.try_recv().unwrap();
    assert_eq!(notice, SessionNotice::Expired {
        session_id,
        missing: vec![c.key()],
    });
    assert_eq!(
        notice.insufficient_participants(),
        Some(SessionError::InsufficientParticipants {
            missing: vec![c.key()]
        })
    );

    // Nothing moved; the balance is still there.
    let eligibility = a.coordinator.spend_eligibility(&wallet.id).unwrap();
    assert_eq!(a.coordinator.get_wallet(&wallet.id).unwrap().balance, 50_000);
    assert!(!eligibility.blockers.contains(&SpendBlocker::ZeroBalance));
}

#[test]
fn late_event_after_deadline_fails_the_session() {
    let (a, b) = (Node::new(1), Node::new(2));
    let wallet = a.coordinator.create_shared_wallet("pair", [b.key()]).unwrap();
    b.coordinator.create_shared_wallet("pair", [a.key()]).unwrap();

    let message = [1; 32];
    let (session_id, _) = a.coordinator.start_session(&wallet.id, message).unwrap();
    let nonce_b = b
        .coordinator
        .join_session(session_id, &wallet.id, message)
        .unwrap();

    a.clock.advance(Duration::from_secs(31));
    let err = a
        .coordinator
        .receive_nonce(&session_id, b.key(), nonce_b.clone())
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Session(SessionError::Timeout { .. })));

    let err = a
        .coordinator
        .receive_nonce(&session_id, b.key(), nonce_b)
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Session(SessionError::Retired(_))));
}

#[test]
fn cancelled_session_cannot_be_resumed() {
    let (a, b) = (Node::new(1), Node::new(2));
    let wallet = a.coordinator.create_shared_wallet("pair", [b.key()]).unwrap();
    let mut notices = a.coordinator.subscribe_notices();

    let (session_id, _) = a.coordinator.start_session(&wallet.id, [2; 32]).unwrap();
    let missing = a
        .coordinator
        .cancel_session(&session_id, Some(b.key()))
        .unwrap();
    assert_eq!(missing, vec![b.key()]);

    let notice = notices.try_recv().unwrap();
    assert_eq!(notice, SessionNotice::Cancelled {
        session_id,
        by: Some(b.key()),
        missing: vec![b.key()],
    });
    assert_eq!(
        notice.insufficient_participants(),
        Some(SessionError::InsufficientParticipants {
            missing: vec![b.key()]
        })
    );
    assert!(a.coordinator.sign(&session_id).is_err());
    assert!(a
        .coordinator
        .join_session(session_id, &wallet.id, [2; 32])
        .is_err());
}

#[test]
fn retired_ids_are_refused_after_restart() {
    let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
    let b = Node::new(2);
    let session_id = SessionId::from_bytes([7; 32]);
    let message = [9; 32];

    let (wallet, first_nonce) = {
        let a = Node::with_store(1, store.clone());
        let wallet = a.coordinator.create_shared_wallet("pair", [b.key()]).unwrap();
        let nonce = a
            .coordinator
            .join_session(session_id, &wallet.id, message)
            .unwrap();
        a.coordinator.cancel_session(&session_id, None).unwrap();
        assert!(a.coordinator.is_retired(&session_id));
        (wallet, nonce)
    };

    let restarted = Node::with_store(1, store);
    assert!(restarted.coordinator.is_retired(&session_id));
    let err = restarted
        .coordinator
        .join_session(session_id, &wallet.id, message)
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Session(SessionError::Retired(id)) if id == session_id
    ));

    // A node that lost its storage still never repeats a nonce for the same id and message.
    let amnesiac = Node::new(1);
    amnesiac
        .coordinator
        .create_shared_wallet("pair", [b.key()])
        .unwrap();
    let replayed = amnesiac
        .coordinator
        .join_session(session_id, &wallet.id, message)
        .unwrap();
    assert_ne!(replayed, first_nonce);
}

#[test]
fn disconnected_wallet_stays_viewable() {
    let (a, b, c) = trio();
    let wallet = a
        .coordinator
        .create_shared_wallet("trio", [b.key(), c.key()])
        .unwrap();
    a.coordinator.set_balance(&wallet.id, 10_000).unwrap();

    assert!(a.coordinator.can_view(&wallet.id));
    let loaded = a.coordinator.get_wallet(&wallet.id).unwrap();
    assert_eq!(loaded.shared_address, wallet.shared_address);
    assert_eq!(
        a.coordinator.wallet_address(&wallet.id).unwrap().to_string(),
        wallet.shared_address
    );

    let eligibility = a.coordinator.spend_eligibility(&wallet.id).unwrap();
    assert!(!a.coordinator.can_spend(&wallet.id));
    assert!(eligibility.blockers.contains(&SpendBlocker::P2pDisconnected));
    assert!(eligibility.blockers.contains(&SpendBlocker::DiscoveryNotReady));
    assert!(!eligibility.blockers.contains(&SpendBlocker::ZeroBalance));
}

#[test]
fn advertisements_make_participants_available() {
    let (a, b, c) = trio();
    let wallet = a
        .coordinator
        .create_shared_wallet("trio", [b.key(), c.key()])
        .unwrap();
    a.coordinator.set_balance(&wallet.id, 10_000).unwrap();
    a.bring_up();

    assert_eq!(
        a.coordinator
            .spend_eligibility(&wallet.id)
            .unwrap()
            .offline_participants()
            .len(),
        2
    );

    for (node, peer) in [(&b, "peer-b"), (&c, "peer-c")] {
        let ad = node.coordinator.advertisement(peer, Capabilities::default());
        assert!(ad.main_wallet_address.is_some());
        a.coordinator
            .ingest_advertisement(ad, DiscoverySource::Gossip, vec![])
            .unwrap();
    }

    let updated = a.coordinator.get_wallet(&wallet.id).unwrap();
    assert!(updated
        .others()
        .all(|p| p.peer_id.as_deref().is_some_and(|id| id.starts_with("peer-"))));
    assert!(a.coordinator.can_spend(&wallet.id));

    a.coordinator.set_balance(&wallet.id, 0).unwrap();
    assert_eq!(
        a.coordinator.spend_eligibility(&wallet.id).unwrap().blockers,
        vec![SpendBlocker::ZeroBalance]
    );
}

#[test]
fn expired_advertisements_block_spending() {
    let (a, b) = (Node::new(1), Node::new(2));
    let wallet = a.coordinator.create_shared_wallet("pair", [b.key()]).unwrap();
    a.coordinator.set_balance(&wallet.id, 10_000).unwrap();
    a.bring_up();

    let mut ad = b.coordinator.advertisement("peer-b", Capabilities::default());
    ad.expires_at = START + 1_000;
    a.coordinator
        .ingest_advertisement(ad, DiscoverySource::Gossip, vec![])
        .unwrap();
    assert!(a.coordinator.can_spend(&wallet.id));

    a.clock.advance(Duration::from_secs(2 * 60 * 60));
    let offline = vec![(b.key(), PresenceStatus::Offline)];
    assert_eq!(a.coordinator.participant_statuses(&wallet), offline);

    a.coordinator.maintenance_tick();
    assert_eq!(a.coordinator.participant_statuses(&wallet), offline);
    let eligibility = a.coordinator.spend_eligibility(&wallet.id).unwrap();
    assert!(!eligibility.can_spend());
    assert_eq!(eligibility.offline_participants(), &[b.key()]);
}

#[test]
fn raw_payloads_are_ingested() -> anyhow::Result<()> {
    let (a, b) = (Node::new(1), Node::new(2));
    let payload = b
        .coordinator
        .advertisement("peer-b", Capabilities::default())
        .to_json()?;

    let identity = a
        .coordinator
        .ingest_advertisement_payload(&payload, DiscoverySource::Dht)?;
    assert_eq!(identity.public_key_hex, b.key());
    assert_eq!(identity.peer_id.as_deref(), Some("peer-b"));

    assert!(a
        .coordinator
        .ingest_advertisement_payload(b"not json", DiscoverySource::Dht)
        .is_err());
    Ok(())
}

#[test]
fn wallets_survive_restart() -> anyhow::Result<()> {
    let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
    let b = Node::new(2);
    let wallet = {
        let a = Node::with_store(1, store.clone());
        a.coordinator.create_shared_wallet("pair", [b.key()])?
    };

    let restarted = Node::with_store(1, store);
    assert_eq!(restarted.coordinator.get_wallet(&wallet.id), Some(wallet.clone()));

    let subscriptions = restarted.coordinator.receive_subscriptions();
    assert_eq!(subscriptions.len(), 2);
    assert!(subscriptions
        .iter()
        .any(|addr| addr.to_string() == wallet.shared_address));
    Ok(())
}

#[tokio::test]
async fn maintenance_task_expires_sessions() {
    let (a, b) = (Node::new(1), Node::new(2));
    let wallet = a.coordinator.create_shared_wallet("pair", [b.key()]).unwrap();
    let clock = a.clock.clone();
    let coordinator = Arc::new(a.coordinator);
    let mut notices = coordinator.subscribe_notices();

    let (session_id, _) = coordinator.start_session(&wallet.id, [3; 32]).unwrap();
    clock.advance(Duration::from_secs(60));
    let handle = coordinator.clone().spawn_maintenance(Duration::from_millis(10));

    let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice.session_id(), &session_id);
    handle.abort();
}

#[derive(Debug, Default)]
struct RecordingPublisher {
    published: parking_lot::Mutex<Vec<concord_discovery::Advertisement>>,
}

#[async_trait::async_trait]
impl AdvertisementPublisher for RecordingPublisher {
    async fn publish(
        &self,
        advertisement: &concord_discovery::Advertisement,
    ) -> Result<(), PublishError> {
        self.published.lock().push(advertisement.clone());
        Ok(())
    }
}

#[tokio::test]
async fn publishes_musig2_key_with_primary_address() {
    let a = Node::new(1);
    let publisher = RecordingPublisher::default();

    let ad = a
        .coordinator
        .publish_advertisement(&publisher, "peer-a", Capabilities::default())
        .await
        .unwrap();

    assert_eq!(ad.public_key_hex, a.key());
    assert_eq!(ad.expires_at, START + 60 * 60 * 1_000);
    assert_eq!(
        ad.main_wallet_address,
        Some(node_keys(1, NETWORK).primary().address.to_string())
    );
    assert_eq!(publisher.published.lock().as_slice(), &[ad]);
}
