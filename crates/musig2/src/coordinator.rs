//! The MuSig2 coordinator.
//!
//! Owns the wallet registry and live signing sessions, and reads presence from the injected
//! identity store, discovery cache and transport status. Everything it needs is passed in at
//! construction; there are no process-wide singletons.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bitcoin::{Address, Network};
use concord_contacts::{resolve_status, PresencePolicy, PresenceSignals, PresenceStatus};
use concord_db::{Flush, KvStore};
use concord_discovery::{Advertisement, DiscoveryCache, DiscoverySource};
use concord_identity::{Identity, IdentityStore};
use concord_key_deriv::NodeKeys;
use concord_primitives::{Capabilities, Clock, PublicKeyHex, UnixMillis};
use musig2::{PartialSignature, PubNonce};
use parking_lot::Mutex;
use tokio::{sync::broadcast, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    aggregate::aggregate,
    errors::{CoordinatorError, CoordinatorResult, SessionError, SessionResult},
    gating::{evaluate_spend, SpendEligibility, TransportStatus},
    publisher::AdvertisementPublisher,
    registry::WalletRegistry,
    session::{
        RetiredSessions, SessionId, SessionNotice, SessionProgress, SessionState, SigningSession,
    },
    subscriptions::receive_subscriptions,
    wallet::{Participant, SharedWallet},
};

/// Capacity of the session notice channel.
const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Settings of a [`Musig2Coordinator`].
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Active network.
    pub network: Network,
    /// How long a session may take to aggregate.
    pub session_timeout_ms: u64,
    /// Lifetime of our own advertisements.
    pub advertisement_ttl_ms: u64,
    /// Which presence statuses count as available for co-signing.
    pub presence: PresencePolicy,
    /// Whether our advertisements carry the PRIMARY receive address.
    pub advertise_main_address: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            network: Network::Signet,
            session_timeout_ms: 30_000,
            advertisement_ttl_ms: 60 * 60 * 1_000,
            presence: PresencePolicy::default(),
            advertise_main_address: true,
        }
    }
}

/// Coordinates shared wallets and their N-of-N signing sessions.
#[derive(Debug)]
pub struct Musig2Coordinator {
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    keys: Arc<NodeKeys>,
    identities: Arc<IdentityStore>,
    discovery: Arc<DiscoveryCache>,
    transport: Arc<dyn TransportStatus>,
    wallets: WalletRegistry,
    sessions: Mutex<HashMap<SessionId, SigningSession>>,
    retired: RetiredSessions,
    notices: broadcast::Sender<SessionNotice>,
}

impl Musig2Coordinator {
    /// Builds the coordinator, loading persisted shared wallets and retired session ids from
    /// `store`.
    pub fn new(
        config: CoordinatorConfig,
        clock: Arc<dyn Clock>,
        keys: Arc<NodeKeys>,
        identities: Arc<IdentityStore>,
        discovery: Arc<DiscoveryCache>,
        transport: Arc<dyn TransportStatus>,
        store: Arc<dyn KvStore>,
    ) -> Self {
        debug_assert_eq!(keys.network(), config.network);
        let retired = RetiredSessions::open(store.clone());
        let wallets = WalletRegistry::open(store, config.network);
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);

        Self {
            config,
            clock,
            keys,
            identities,
            discovery,
            transport,
            wallets,
            sessions: Mutex::new(HashMap::new()),
            retired,
            notices,
        }
    }

    /// The local MUSIG2 key; what other nodes aggregate with.
    pub fn my_public_key(&self) -> PublicKeyHex {
        self.keys.musig2().public_key
    }

    /// Subscribes to session notices.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Creates a shared wallet with `others`; the local key is always included.
    ///
    /// The same key set always yields the same wallet, so creating it twice returns the first
    /// record. Nothing is persisted if aggregation fails.
    pub fn create_shared_wallet(
        &self,
        name: &str,
        others: impl IntoIterator<Item = PublicKeyHex>,
    ) -> CoordinatorResult<SharedWallet> {
        let me = self.my_public_key();
        let agg = aggregate(std::iter::once(me).chain(others.into_iter().filter(|k| *k != me)))?;

        let mut participants = Vec::with_capacity(agg.participants().len());
        for key in agg.participants() {
            let peer_id = if *key == me {
                None
            } else {
                self.identities.find_or_create_key(*key)?.peer_id
            };
            participants.push(Participant {
                public_key_hex: *key,
                peer_id,
                is_me: *key == me,
            });
        }

        let wallet = SharedWallet {
            id: SharedWallet::id_for(&agg.public_key()),
            name: name.to_owned(),
            participants,
            aggregated_public_key_hex: agg.public_key(),
            shared_address: agg.address(self.config.network).to_string(),
            balance: 0,
            created_at: self.clock.now_ms(),
        };
        let wallet = self.wallets.insert(wallet)?;

        info!(
            id = %wallet.id,
            participants = wallet.participants.len(),
            address = %wallet.shared_address,
            "created shared wallet"
        );
        Ok(wallet)
    }

    /// Looks up a wallet. Works without any network connectivity.
    pub fn get_wallet(&self, id: &str) -> Option<SharedWallet> {
        self.wallets.get(id)
    }

    /// All shared wallets.
    pub fn wallets(&self) -> Vec<SharedWallet> {
        self.wallets.all()
    }

    /// The wallet's address on the active network.
    pub fn wallet_address(&self, id: &str) -> Option<Address> {
        self.wallets.get(id).map(|w| w.address(self.config.network))
    }

    /// Records a new confirmed balance.
    pub fn set_balance(&self, id: &str, balance: u64) -> CoordinatorResult<SharedWallet> {
        self.wallets
            .set_balance(id, balance)?
            .ok_or_else(|| CoordinatorError::WalletNotFound(id.to_owned()))
    }

    /// Whether the wallet can be displayed: always, as long as it exists.
    pub fn can_view(&self, id: &str) -> bool {
        self.wallets.get(id).is_some()
    }

    /// Resolved presence of every other participant.
    pub fn participant_statuses(
        &self,
        wallet: &SharedWallet,
    ) -> Vec<(PublicKeyHex, PresenceStatus)> {
        let now = self.clock.now_ms();
        wallet
            .others()
            .map(|participant| {
                let identity = self.identities.get(&participant.public_key_hex);
                let mut signals =
                    PresenceSignals::observe(identity.as_ref(), false, now, |peer| {
                        self.transport.is_peer_connected(peer)
                    });
                signals.transport_connected |= participant
                    .peer_id
                    .as_deref()
                    .is_some_and(|peer| self.transport.is_peer_connected(peer));

                (
                    participant.public_key_hex,
                    resolve_status(&signals, &self.config.presence, now),
                )
            })
            .collect()
    }

    /// Evaluates the spend predicate, with every reason it fails.
    pub fn spend_eligibility(&self, id: &str) -> CoordinatorResult<SpendEligibility> {
        let wallet = self
            .wallets
            .get(id)
            .ok_or_else(|| CoordinatorError::WalletNotFound(id.to_owned()))?;
        let statuses = self.participant_statuses(&wallet);

        Ok(evaluate_spend(
            &wallet,
            self.transport.as_ref(),
            &statuses,
            &self.config.presence,
        ))
    }

    /// Whether the wallet can be spent right now.
    pub fn can_spend(&self, id: &str) -> bool {
        self.spend_eligibility(id)
            .is_ok_and(|eligibility| eligibility.can_spend())
    }

    /// Addresses the chain indexer should watch for incoming funds.
    pub fn receive_subscriptions(&self) -> Vec<Address> {
        receive_subscriptions(
            [self.keys.primary()],
            &self.wallets.all(),
            self.config.network,
        )
    }

    /// Builds our co-signer advertisement.
    pub fn advertisement(&self, peer_id: &str, capabilities: Capabilities) -> Advertisement {
        Advertisement {
            public_key_hex: self.my_public_key(),
            peer_id: peer_id.to_owned(),
            capabilities,
            expires_at: self
                .clock
                .now_ms()
                .saturating_add(self.config.advertisement_ttl_ms),
            main_wallet_address: self
                .config
                .advertise_main_address
                .then(|| self.keys.primary().address.to_string()),
        }
    }

    /// Builds and publishes our advertisement.
    pub async fn publish_advertisement(
        &self,
        publisher: &dyn AdvertisementPublisher,
        peer_id: &str,
        capabilities: Capabilities,
    ) -> CoordinatorResult<Advertisement> {
        let advertisement = self.advertisement(peer_id, capabilities);
        publisher.publish(&advertisement).await?;
        debug!(expires_at = advertisement.expires_at, "published advertisement");
        Ok(advertisement)
    }

    /// Accepts an advertisement from the network.
    ///
    /// The advertisement is cached and merged into the signer's identity, and the signer's
    /// peer id is recorded in every wallet it belongs to. Our own advertisements are ignored.
    pub fn ingest_advertisement(
        &self,
        advertisement: Advertisement,
        source: DiscoverySource,
        multiaddrs: Vec<String>,
    ) -> CoordinatorResult<Identity> {
        let key = advertisement.public_key_hex;
        if key == self.my_public_key() {
            debug!("ignoring our own advertisement");
            return Ok(self.identities.find_or_create_key(key)?);
        }

        let signer = advertisement.signer_info(multiaddrs);
        let peer_id = advertisement.peer_id.clone();
        self.discovery.set(advertisement, source)?;
        let identity = self.identities.update_from_signer(signer)?;
        self.wallets.update_peer_id(&key, &peer_id)?;

        Ok(identity)
    }

    /// [`Self::ingest_advertisement`] for a raw gossip payload.
    pub fn ingest_advertisement_payload(
        &self,
        payload: &[u8],
        source: DiscoverySource,
    ) -> CoordinatorResult<Identity> {
        let advertisement = Advertisement::from_json(payload)?;
        self.ingest_advertisement(advertisement, source, Vec::new())
    }

    /// Opens a new session to sign `message` from `wallet_id`.
    ///
    /// Returns the session id and our public nonce, both to be sent to the other participants.
    pub fn start_session(
        &self,
        wallet_id: &str,
        message: [u8; 32],
    ) -> CoordinatorResult<(SessionId, PubNonce)> {
        let id = SessionId::random();
        let nonce = self.join_session(id, wallet_id, message)?;
        Ok((id, nonce))
    }

    /// Joins a session opened by another participant. Joining twice returns the same nonce.
    pub fn join_session(
        &self,
        id: SessionId,
        wallet_id: &str,
        message: [u8; 32],
    ) -> CoordinatorResult<PubNonce> {
        let wallet = self
            .wallets
            .get(wallet_id)
            .ok_or_else(|| CoordinatorError::WalletNotFound(wallet_id.to_owned()))?;

        let mut sessions = self.sessions.lock();
        if self.retired.contains(&id) {
            return Err(SessionError::Retired(id).into());
        }
        if let Some(existing) = sessions.get(&id) {
            if existing.wallet_id() != wallet_id || existing.message() != &message {
                return Err(SessionError::rejected(
                    existing.state(),
                    "open",
                    "session id already in use",
                )
                .into());
            }
            return existing
                .our_pubnonce()
                .cloned()
                .ok_or_else(|| CoordinatorError::UnknownSession(id));
        }

        let session = SigningSession::new(
            id,
            &wallet,
            &self.keys.musig2().keypair,
            self.keys.nonce_ikm(),
            message,
            self.clock.now_ms(),
            self.config.session_timeout_ms,
        )?;
        let nonce = session
            .our_pubnonce()
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownSession(id))?;
        sessions.insert(id, session);

        Ok(nonce)
    }

    /// Records another participant's public nonce.
    pub fn receive_nonce(
        &self,
        id: &SessionId,
        participant: PublicKeyHex,
        pubnonce: PubNonce,
    ) -> CoordinatorResult<SessionProgress> {
        self.drive(id, |session, now| {
            session.receive_nonce(participant, pubnonce, now)
        })
    }

    /// Produces our partial signature, with our MUSIG2 key.
    ///
    /// When every other partial signature is already in, the session aggregates here and the
    /// `Aggregated` notice is sent.
    pub fn sign(&self, id: &SessionId) -> CoordinatorResult<(PartialSignature, SessionProgress)> {
        let keypair = &self.keys.musig2().keypair;
        let (partial, progress) = self.drive(id, |session, now| {
            if let Some(missing) = session.expire_if_overdue(now) {
                return Err(SessionError::Timeout {
                    session_id: *session.id(),
                    missing,
                });
            }
            session.sign(keypair)
        })?;

        self.notify_if_aggregated(id, &progress);
        Ok((partial, progress))
    }

    /// Records and verifies another participant's partial signature.
    pub fn receive_partial(
        &self,
        id: &SessionId,
        participant: PublicKeyHex,
        partial: PartialSignature,
    ) -> CoordinatorResult<SessionProgress> {
        let progress = self.drive(id, |session, now| {
            session.receive_partial(participant, partial, now)
        })?;

        self.notify_if_aggregated(id, &progress);
        Ok(progress)
    }

    /// Marks the session's transaction as broadcast and releases the session.
    pub fn mark_broadcast(&self, id: &SessionId) -> CoordinatorResult<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(id)
            .ok_or(CoordinatorError::UnknownSession(*id))?;
        session.mark_broadcast()?;
        self.retire(&mut sessions, id);
        Ok(())
    }

    /// Cancels a session, locally (`by = None`) or on a participant's request.
    ///
    /// The session id is retired so that nothing collected for it can be reused. Returns the
    /// participants whose contribution had not arrived.
    pub fn cancel_session(
        &self,
        id: &SessionId,
        by: Option<PublicKeyHex>,
    ) -> CoordinatorResult<Vec<PublicKeyHex>> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(id)
            .ok_or(CoordinatorError::UnknownSession(*id))?;
        let missing = session.cancel(by)?;
        self.retire(&mut sessions, id);
        drop(sessions);

        self.notify(SessionNotice::Cancelled {
            session_id: *id,
            by,
            missing: missing.clone(),
        });
        Ok(missing)
    }

    /// Expires every overdue session. Returns the expired ids.
    pub fn expire_sessions(&self) -> Vec<SessionId> {
        let now = self.clock.now_ms();
        let mut sessions = self.sessions.lock();

        let expired: Vec<(SessionId, Vec<PublicKeyHex>)> = sessions
            .iter_mut()
            .filter_map(|(id, session)| session.expire_if_overdue(now).map(|m| (*id, m)))
            .collect();
        for (id, _) in &expired {
            self.retire(&mut sessions, id);
        }
        drop(sessions);

        expired
            .into_iter()
            .map(|(session_id, missing)| {
                self.notify(SessionNotice::Expired {
                    session_id,
                    missing,
                });
                session_id
            })
            .collect()
    }

    /// State of a live session.
    pub fn session_state(&self, id: &SessionId) -> Option<SessionState> {
        self.sessions.lock().get(id).map(SigningSession::state)
    }

    /// Whether `id` belongs to a session that ended and can never be reopened.
    pub fn is_retired(&self, id: &SessionId) -> bool {
        self.retired.contains(id)
    }

    fn drive<T>(
        &self,
        id: &SessionId,
        transition: impl FnOnce(&mut SigningSession, UnixMillis) -> SessionResult<T>,
    ) -> CoordinatorResult<T> {
        let now = self.clock.now_ms();
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(id) else {
            if self.retired.contains(id) {
                return Err(SessionError::Retired(*id).into());
            }
            return Err(CoordinatorError::UnknownSession(*id));
        };

        let result = transition(session, now);
        if let Err(SessionError::Timeout { missing, .. }) = &result {
            let missing = missing.clone();
            self.retire(&mut sessions, id);
            drop(sessions);
            self.notify(SessionNotice::Expired {
                session_id: *id,
                missing,
            });
        }

        Ok(result?)
    }

    fn retire(&self, sessions: &mut HashMap<SessionId, SigningSession>, id: &SessionId) {
        sessions.remove(id);
        self.retired.insert(*id);
    }

    fn notify_if_aggregated(&self, id: &SessionId, progress: &SessionProgress) {
        if let SessionProgress::Aggregated(signature) = progress {
            self.notify(SessionNotice::Aggregated {
                session_id: *id,
                signature: *signature,
            });
        }
    }

    fn notify(&self, notice: SessionNotice) {
        // No subscribers is not an error.
        let _ = self.notices.send(notice);
    }

    /// Sweeps expired advertisements and marks their signers offline, flushes coalesced writes
    /// and expires overdue sessions.
    pub fn maintenance_tick(&self) {
        let swept = self.discovery.sweep_expired();
        let lapsed = self.identities.expire_signers();
        if let Err(err) = self.discovery.flush_if_due() {
            error!(%err, "failed to flush discovery cache");
        }
        if let Err(err) = self.identities.flush_if_due() {
            error!(%err, "failed to flush identities");
        }
        let expired = self.expire_sessions();
        if swept > 0 || !lapsed.is_empty() || !expired.is_empty() {
            debug!(
                swept,
                lapsed = lapsed.len(),
                expired = expired.len(),
                "maintenance tick"
            );
        }
    }

    /// Writes every pending coalesced snapshot. Call on shutdown.
    pub fn flush_all(&self) {
        if let Err(err) = self.discovery.flush_now() {
            warn!(%err, "failed to flush discovery cache on shutdown");
        }
        if let Err(err) = self.identities.flush_now() {
            warn!(%err, "failed to flush identities on shutdown");
        }
    }

    /// Runs [`Self::maintenance_tick`] every `interval` until the handle is aborted.
    pub fn spawn_maintenance(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.maintenance_tick();
            }
        })
    }
}
