//! The signing-session state machine.

use std::{collections::BTreeMap, fmt};

use bitcoin::secp256k1::schnorr;
use concord_key_deriv::{Musig2Keypair, Musig2NonceIkm};
use concord_primitives::{PublicKeyHex, UnixMillis};
use musig2::{
    aggregate_partial_signatures, sign_partial, verify_partial, AggNonce, KeyAggContext,
    PartialSignature, PubNonce, SecNonce, SecNonceBuilder,
};
use secp256k1::{Message, SECP256K1};
use tracing::{debug, info, warn};

use super::{nonce::derive_nonce_seed, SessionId, SessionState};
use crate::{
    errors::{AggregationError, SessionError, SessionResult},
    wallet::SharedWallet,
};

/// What a successful transition produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionProgress {
    /// Still waiting for these participants in the current phase.
    Waiting {
        /// Participants yet to contribute.
        missing: Vec<PublicKeyHex>,
    },

    /// Every nonce is in; participants may now sign.
    NoncesReady(AggNonce),

    /// Every partial signature is in and the final signature verifies.
    Aggregated(schnorr::Signature),
}

/// One N-of-N signing session over a shared wallet.
///
/// The local participant's secret nonce is drawn at creation from fresh entropy mixed with the
/// node's nonce key material, and consumed by [`Self::sign`]; it never leaves the session and is
/// erased on any terminal transition.
pub struct SigningSession {
    id: SessionId,
    wallet_id: String,
    message: [u8; 32],
    participants: Vec<PublicKeyHex>,
    me: PublicKeyHex,
    ctx: KeyAggContext,
    state: SessionState,
    secnonce: Option<SecNonce>,
    pubnonces: BTreeMap<PublicKeyHex, PubNonce>,
    agg_nonce: Option<AggNonce>,
    partials: BTreeMap<PublicKeyHex, PartialSignature>,
    signature: Option<schnorr::Signature>,
    created_at: UnixMillis,
    deadline: UnixMillis,
}

impl fmt::Debug for SigningSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSession")
            .field("id", &self.id)
            .field("wallet_id", &self.wallet_id)
            .field("state", &self.state)
            .field("nonces", &self.pubnonces.len())
            .field("partials", &self.partials.len())
            .field("participants", &self.participants.len())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl SigningSession {
    /// Opens a session over `wallet` for `message`, contributing the local nonce.
    ///
    /// `keypair` must be the local participant's MUSIG2 key.
    pub fn new(
        id: SessionId,
        wallet: &SharedWallet,
        keypair: &Musig2Keypair,
        ikm: &Musig2NonceIkm,
        message: [u8; 32],
        now: UnixMillis,
        timeout_ms: u64,
    ) -> SessionResult<Self> {
        let me = PublicKeyHex::from(keypair.public_key());
        let participants: Vec<_> = wallet.participant_keys().collect();
        if !participants.contains(&me) {
            return Err(SessionError::rejected(
                SessionState::Created,
                "open",
                format!("{me} is not a participant of wallet {}", wallet.id),
            ));
        }

        let ctx = crate::aggregate::aggregate(participants.iter().copied())
            .and_then(|agg| agg.signing_context())
            .map_err(|e: AggregationError| {
                SessionError::rejected(SessionState::Created, "open", e.to_string())
            })?;

        let entropy: [u8; 32] = rand::random();
        let seed = derive_nonce_seed(ikm, &id, &message, &entropy);
        let secnonce = SecNonceBuilder::from_seckey(seed, keypair.secret_key())
            .with_aggregated_pubkey(ctx.aggregated_pubkey::<secp256k1::PublicKey>())
            .with_message(&message)
            .with_extra_input(id.as_bytes())
            .build();

        let mut pubnonces = BTreeMap::new();
        pubnonces.insert(me, secnonce.public_nonce());

        info!(
            session_id = %id,
            wallet_id = %wallet.id,
            participants = participants.len(),
            "opened signing session"
        );
        Ok(Self {
            id,
            wallet_id: wallet.id.clone(),
            message,
            participants,
            me,
            ctx,
            state: SessionState::Created,
            secnonce: Some(secnonce),
            pubnonces,
            agg_nonce: None,
            partials: BTreeMap::new(),
            signature: None,
            created_at: now,
            deadline: now.saturating_add(timeout_ms),
        })
    }

    /// The session id.
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// The wallet being spent from.
    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    /// The 32-byte message (sighash) being signed.
    pub const fn message(&self) -> &[u8; 32] {
        &self.message
    }

    /// Current state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// When the session was opened.
    pub const fn created_at(&self) -> UnixMillis {
        self.created_at
    }

    /// When the session expires unless aggregated.
    pub const fn deadline(&self) -> UnixMillis {
        self.deadline
    }

    /// The local public nonce, to be sent to every other participant.
    pub fn our_pubnonce(&self) -> Option<&PubNonce> {
        self.pubnonces.get(&self.me)
    }

    /// The aggregate nonce, once every nonce is in.
    pub const fn agg_nonce(&self) -> Option<&AggNonce> {
        self.agg_nonce.as_ref()
    }

    /// The final signature, once aggregated.
    pub const fn signature(&self) -> Option<&schnorr::Signature> {
        self.signature.as_ref()
    }

    /// Participants whose contribution to the current phase is missing.
    pub fn missing(&self) -> Vec<PublicKeyHex> {
        match self.state {
            SessionState::Created => self
                .participants
                .iter()
                .filter(|k| !self.pubnonces.contains_key(k))
                .copied()
                .collect(),
            SessionState::NoncesExchanged => self
                .participants
                .iter()
                .filter(|k| !self.partials.contains_key(k))
                .copied()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Records a participant's public nonce.
    ///
    /// A participant may replace its nonce until every nonce is in; once the aggregate nonce
    /// exists a different nonce is rejected and the same one is a duplicate.
    pub fn receive_nonce(
        &mut self,
        participant: PublicKeyHex,
        pubnonce: PubNonce,
        now: UnixMillis,
    ) -> SessionResult<SessionProgress> {
        const EVENT: &str = "nonce";
        self.check_deadline(now)?;
        self.check_participant(participant, EVENT)?;

        match self.state {
            SessionState::Created => {
                if participant == self.me {
                    return Err(SessionError::rejected(
                        self.state,
                        EVENT,
                        "the local nonce cannot be replaced",
                    ));
                }
                if let Some(previous) = self.pubnonces.insert(participant, pubnonce) {
                    debug!(
                        session_id = %self.id,
                        %participant,
                        same = previous == self.pubnonces[&participant],
                        "nonce resubmitted"
                    );
                }

                if self.pubnonces.len() < self.participants.len() {
                    return Ok(SessionProgress::Waiting {
                        missing: self.missing(),
                    });
                }

                let agg_nonce = AggNonce::sum(self.pubnonces.values());
                self.agg_nonce = Some(agg_nonce.clone());
                self.state = SessionState::NoncesExchanged;
                info!(session_id = %self.id, "all nonces collected");
                Ok(SessionProgress::NoncesReady(agg_nonce))
            }
            SessionState::NoncesExchanged
            | SessionState::PartialSigsCollected
            | SessionState::Aggregated => {
                if self.pubnonces.get(&participant) == Some(&pubnonce) {
                    Err(SessionError::duplicate(self.state, EVENT, participant))
                } else {
                    Err(SessionError::rejected(
                        self.state,
                        EVENT,
                        "nonces are fixed once aggregated",
                    ))
                }
            }
            _ => Err(SessionError::invalid_event(self.state, EVENT, None)),
        }
    }

    /// Produces the local partial signature.
    ///
    /// Only a [`Musig2Keypair`] is accepted, so the PRIMARY spending key cannot sign here. The
    /// secret nonce is consumed; a second call fails. If every other partial signature is
    /// already in, the session aggregates and the progress carries the final signature.
    pub fn sign(
        &mut self,
        keypair: &Musig2Keypair,
    ) -> SessionResult<(PartialSignature, SessionProgress)> {
        const EVENT: &str = "sign";
        if self.state != SessionState::NoncesExchanged {
            return Err(SessionError::invalid_event(
                self.state,
                EVENT,
                Some("nonces are not exchanged".to_owned()),
            ));
        }
        if PublicKeyHex::from(keypair.public_key()) != self.me {
            return Err(SessionError::rejected(
                self.state,
                EVENT,
                "key does not belong to the local participant",
            ));
        }
        let Some(agg_nonce) = self.agg_nonce.clone() else {
            return Err(SessionError::invalid_event(self.state, EVENT, None));
        };
        let Some(secnonce) = self.secnonce.take() else {
            return Err(SessionError::duplicate(self.state, EVENT, self.me));
        };

        let partial: PartialSignature = sign_partial(
            &self.ctx,
            keypair.secret_key(),
            secnonce,
            &agg_nonce,
            self.message,
        )
        .map_err(|e| SessionError::rejected(self.state, EVENT, e.to_string()))?;

        self.partials.insert(self.me, partial);
        debug!(session_id = %self.id, "produced local partial signature");
        if self.partials.len() < self.participants.len() {
            let missing = self.missing();
            return Ok((partial, SessionProgress::Waiting { missing }));
        }

        self.state = SessionState::PartialSigsCollected;
        let progress = self.aggregate()?;
        Ok((partial, progress))
    }

    /// Records and verifies a participant's partial signature.
    ///
    /// Invalid signatures are rejected without being recorded. A valid resubmission replaces
    /// the previous one and never counts twice. Once every participant's signature is in, the
    /// session aggregates and the final signature is returned.
    pub fn receive_partial(
        &mut self,
        participant: PublicKeyHex,
        partial: PartialSignature,
        now: UnixMillis,
    ) -> SessionResult<SessionProgress> {
        const EVENT: &str = "partial signature";
        self.check_deadline(now)?;
        self.check_participant(participant, EVENT)?;

        match self.state {
            SessionState::NoncesExchanged => {
                let (Some(agg_nonce), Some(pubnonce)) =
                    (self.agg_nonce.as_ref(), self.pubnonces.get(&participant))
                else {
                    return Err(SessionError::invalid_event(self.state, EVENT, None));
                };

                if let Err(err) = verify_partial(
                    &self.ctx,
                    partial,
                    agg_nonce,
                    participant.public_key(),
                    pubnonce,
                    self.message,
                ) {
                    warn!(session_id = %self.id, %participant, %err, "invalid partial signature");
                    return Err(SessionError::rejected(
                        self.state,
                        EVENT,
                        format!("partial signature from {participant} does not verify"),
                    ));
                }

                self.partials.insert(participant, partial);
                if self.partials.len() < self.participants.len() {
                    return Ok(SessionProgress::Waiting {
                        missing: self.missing(),
                    });
                }

                self.state = SessionState::PartialSigsCollected;
                self.aggregate()
            }
            SessionState::PartialSigsCollected | SessionState::Aggregated => {
                Err(SessionError::duplicate(self.state, EVENT, participant))
            }
            SessionState::Created => Err(SessionError::invalid_event(
                self.state,
                EVENT,
                Some("nonces are not exchanged".to_owned()),
            )),
            _ => Err(SessionError::invalid_event(self.state, EVENT, None)),
        }
    }

    /// Marks the signed transaction as handed to the network.
    pub fn mark_broadcast(&mut self) -> SessionResult<()> {
        match self.state {
            SessionState::Aggregated => {
                self.state = SessionState::Broadcast;
                info!(session_id = %self.id, "session broadcast");
                Ok(())
            }
            SessionState::Broadcast => {
                Err(SessionError::duplicate(self.state, "broadcast", self.me))
            }
            _ => Err(SessionError::invalid_event(self.state, "broadcast", None)),
        }
    }

    /// Cancels the session, discarding every piece of signing material.
    ///
    /// Returns the participants whose contribution to the current phase never arrived.
    pub fn cancel(&mut self, by: Option<PublicKeyHex>) -> SessionResult<Vec<PublicKeyHex>> {
        if self.state.is_terminal() {
            return Err(SessionError::invalid_event(
                self.state,
                "cancel",
                Some("session already ended".to_owned()),
            ));
        }
        if let Some(by) = by {
            self.check_participant(by, "cancel")?;
        }

        let missing = self.missing();
        info!(session_id = %self.id, ?by, state = %self.state, ?missing, "session cancelled");
        self.fail(SessionState::Failed);
        Ok(missing)
    }

    /// Expires the session if its deadline has passed before aggregation.
    ///
    /// Returns the participants that never contributed.
    pub fn expire_if_overdue(&mut self, now: UnixMillis) -> Option<Vec<PublicKeyHex>> {
        if !self.state.is_pending() || now < self.deadline {
            return None;
        }

        let missing = self.missing();
        warn!(session_id = %self.id, state = %self.state, ?missing, "session expired");
        self.fail(SessionState::Expired);
        Some(missing)
    }

    fn aggregate(&mut self) -> SessionResult<SessionProgress> {
        const EVENT: &str = "aggregate";
        let Some(agg_nonce) = self.agg_nonce.as_ref() else {
            return Err(SessionError::invalid_event(self.state, EVENT, None));
        };

        let signature: schnorr::Signature = aggregate_partial_signatures(
            &self.ctx,
            agg_nonce,
            self.partials.values().copied(),
            self.message,
        )
        .map_err(|e| SessionError::rejected(self.state, EVENT, e.to_string()))?;

        let output_key = self
            .ctx
            .aggregated_pubkey::<secp256k1::PublicKey>()
            .x_only_public_key()
            .0;
        SECP256K1
            .verify_schnorr(&signature, &Message::from_digest(self.message), &output_key)
            .map_err(|e| SessionError::rejected(self.state, EVENT, e.to_string()))?;

        self.signature = Some(signature);
        self.state = SessionState::Aggregated;
        info!(session_id = %self.id, wallet_id = %self.wallet_id, "session aggregated");
        Ok(SessionProgress::Aggregated(signature))
    }

    fn check_deadline(&mut self, now: UnixMillis) -> SessionResult<()> {
        match self.expire_if_overdue(now) {
            Some(missing) => Err(SessionError::Timeout {
                session_id: self.id,
                missing,
            }),
            None if self.state == SessionState::Expired => Err(SessionError::Timeout {
                session_id: self.id,
                missing: Vec::new(),
            }),
            None if self.state == SessionState::Failed => Err(SessionError::Cancelled {
                session_id: self.id,
                by: None,
            }),
            None => Ok(()),
        }
    }

    fn check_participant(&self, participant: PublicKeyHex, event: &str) -> SessionResult<()> {
        if self.participants.contains(&participant) {
            Ok(())
        } else {
            Err(SessionError::rejected(
                self.state,
                event,
                format!("{participant} is not a participant"),
            ))
        }
    }

    fn fail(&mut self, state: SessionState) {
        self.state = state;
        self.secnonce = None;
        self.partials.clear();
        self.agg_nonce = None;
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::Network;
    use concord_key_deriv::NodeKeys;
    use concord_test_utils::{keys::node_keys, musig2::TestMusigSigner};

    use super::*;
    use crate::{aggregate::aggregate, wallet::Participant};

    const MESSAGE: [u8; 32] = [0x42; 32];
    const TIMEOUT: u64 = 30_000;

    struct Fixture {
        local: NodeKeys,
        remotes: Vec<TestMusigSigner>,
        wallet: SharedWallet,
    }

    fn fixture(remote_count: u8) -> Fixture {
        let local = node_keys(1, Network::Regtest);
        let remotes: Vec<_> = (10..10 + remote_count).map(TestMusigSigner::new).collect();
        let me = local.musig2().public_key;

        let agg = aggregate(
            std::iter::once(me).chain(remotes.iter().map(TestMusigSigner::pubkey)),
        )
        .unwrap();
        let wallet = SharedWallet {
            id: SharedWallet::id_for(&agg.public_key()),
            name: "test".to_owned(),
            participants: agg
                .participants()
                .iter()
                .map(|k| Participant {
                    public_key_hex: *k,
                    peer_id: None,
                    is_me: *k == me,
                })
                .collect(),
            aggregated_public_key_hex: agg.public_key(),
            shared_address: agg.address(Network::Regtest).to_string(),
            balance: 10_000,
            created_at: 0,
        };

        Fixture {
            local,
            remotes,
            wallet,
        }
    }

    fn open(f: &Fixture) -> SigningSession {
        SigningSession::new(
            SessionId::from_bytes([9; 32]),
            &f.wallet,
            &f.local.musig2().keypair,
            f.local.nonce_ikm(),
            MESSAGE,
            0,
            TIMEOUT,
        )
        .unwrap()
    }

    fn exchange_nonces(f: &Fixture, session: &mut SigningSession) -> AggNonce {
        let agg_pubkey = session.ctx.aggregated_pubkey();
        let mut last = None;
        for remote in &f.remotes {
            last = Some(
                session
                    .receive_nonce(remote.pubkey(), remote.pubnonce(agg_pubkey, 0), 1)
                    .unwrap(),
            );
        }
        match last {
            Some(SessionProgress::NoncesReady(agg)) => agg,
            other => panic!("expected nonces to be ready, got {other:?}"),
        }
    }

    #[test]
    fn three_of_three_aggregates_only_with_all_partials() {
        let f = fixture(2);
        let mut session = open(&f);
        let agg_nonce = exchange_nonces(&f, &mut session);
        assert_eq!(session.state(), SessionState::NoncesExchanged);

        session.sign(&f.local.musig2().keypair).unwrap();
        let message = Message::from_digest(MESSAGE);
        let first = f.remotes[0].sign(&session.ctx, 0, &agg_nonce, message);
        assert!(matches!(
            session.receive_partial(f.remotes[0].pubkey(), first, 2).unwrap(),
            SessionProgress::Waiting { ref missing } if missing == &vec![f.remotes[1].pubkey()]
        ));
        assert_eq!(session.state(), SessionState::NoncesExchanged);

        let second = f.remotes[1].sign(&session.ctx, 0, &agg_nonce, message);
        let progress = session.receive_partial(f.remotes[1].pubkey(), second, 3).unwrap();
        assert!(matches!(progress, SessionProgress::Aggregated(_)));
        assert_eq!(session.state(), SessionState::Aggregated);

        session.mark_broadcast().unwrap();
        assert!(session.state().is_terminal());
    }

    #[test]
    fn local_partial_completing_the_set_aggregates() {
        let f = fixture(2);
        let mut session = open(&f);
        let agg_nonce = exchange_nonces(&f, &mut session);
        let message = Message::from_digest(MESSAGE);

        for remote in &f.remotes {
            let partial = remote.sign(&session.ctx, 0, &agg_nonce, message);
            session.receive_partial(remote.pubkey(), partial, 2).unwrap();
        }
        assert_eq!(session.missing(), vec![f.local.musig2().public_key]);

        let (_, progress) = session.sign(&f.local.musig2().keypair).unwrap();
        let SessionProgress::Aggregated(signature) = progress else {
            panic!("expected aggregation, got {progress:?}");
        };
        assert_eq!(session.state(), SessionState::Aggregated);
        assert_eq!(session.signature(), Some(&signature));
        session.mark_broadcast().unwrap();
    }

    #[test]
    fn duplicate_partials_do_not_count_twice() {
        let f = fixture(2);
        let mut session = open(&f);
        let agg_nonce = exchange_nonces(&f, &mut session);
        let message = Message::from_digest(MESSAGE);

        let partial = f.remotes[0].sign(&session.ctx, 0, &agg_nonce, message);
        session.receive_partial(f.remotes[0].pubkey(), partial, 2).unwrap();
        let again = session.receive_partial(f.remotes[0].pubkey(), partial, 2).unwrap();

        // Still missing the local and the second remote signature.
        assert!(matches!(again, SessionProgress::Waiting { ref missing } if missing.len() == 2));
    }

    #[test]
    fn invalid_partials_are_rejected() {
        let f = fixture(2);
        let mut session = open(&f);
        let agg_nonce = exchange_nonces(&f, &mut session);
        let message = Message::from_digest(MESSAGE);

        // Remote 0's signature submitted as remote 1's.
        let partial = f.remotes[0].sign(&session.ctx, 0, &agg_nonce, message);
        assert!(matches!(
            session.receive_partial(f.remotes[1].pubkey(), partial, 2),
            Err(SessionError::Rejected { .. })
        ));
        assert_eq!(session.missing().len(), 3);
    }

    #[test]
    fn secret_nonce_is_single_use() {
        let f = fixture(1);
        let mut session = open(&f);
        exchange_nonces(&f, &mut session);

        session.sign(&f.local.musig2().keypair).unwrap();
        assert!(matches!(
            session.sign(&f.local.musig2().keypair),
            Err(SessionError::Duplicate { .. })
        ));
    }

    #[test]
    fn foreign_musig2_key_cannot_sign() {
        let f = fixture(1);
        let mut session = open(&f);
        exchange_nonces(&f, &mut session);

        let stranger = node_keys(7, Network::Regtest);
        assert!(matches!(
            session.sign(&stranger.musig2().keypair),
            Err(SessionError::Rejected { .. })
        ));
    }

    #[test]
    fn times_out_with_missing_participants() {
        let f = fixture(2);
        let mut session = open(&f);
        let agg_nonce = exchange_nonces(&f, &mut session);
        let message = Message::from_digest(MESSAGE);

        session.sign(&f.local.musig2().keypair).unwrap();
        let partial = f.remotes[0].sign(&session.ctx, 0, &agg_nonce, message);
        session.receive_partial(f.remotes[0].pubkey(), partial, 2).unwrap();

        let late = f.remotes[1].sign(&session.ctx, 0, &agg_nonce, message);
        let err = session
            .receive_partial(f.remotes[1].pubkey(), late, TIMEOUT)
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::Timeout {
                session_id: *session.id(),
                missing: vec![f.remotes[1].pubkey()],
            }
        );
        assert_eq!(session.state(), SessionState::Expired);
        assert!(session.signature().is_none());
        assert!(session.agg_nonce().is_none());
    }

    #[test]
    fn cancel_discards_material() {
        let f = fixture(1);
        let mut session = open(&f);
        exchange_nonces(&f, &mut session);

        let missing = session.cancel(Some(f.remotes[0].pubkey())).unwrap();
        assert_eq!(missing.len(), 2);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(matches!(
            session.sign(&f.local.musig2().keypair),
            Err(SessionError::InvalidEvent { .. })
        ));
        assert!(session.cancel(None).is_err());
    }

    #[test]
    fn cancel_reports_missing_partials() {
        let f = fixture(2);
        let mut session = open(&f);
        let agg_nonce = exchange_nonces(&f, &mut session);

        let partial = f.remotes[0].sign(&session.ctx, 0, &agg_nonce, Message::from_digest(MESSAGE));
        session.receive_partial(f.remotes[0].pubkey(), partial, 2).unwrap();
        session.sign(&f.local.musig2().keypair).unwrap();

        assert_eq!(session.cancel(None).unwrap(), vec![f.remotes[1].pubkey()]);
    }

    #[test]
    fn reopening_an_id_draws_a_fresh_nonce() {
        let f = fixture(1);
        let first = open(&f);
        let second = open(&f);

        assert_eq!(first.id(), second.id());
        assert_ne!(first.our_pubnonce(), second.our_pubnonce());
    }

    #[test]
    fn non_participant_cannot_open() {
        let f = fixture(2);
        let outsider = node_keys(8, Network::Regtest);
        assert!(SigningSession::new(
            SessionId::random(),
            &f.wallet,
            &outsider.musig2().keypair,
            outsider.nonce_ikm(),
            MESSAGE,
            0,
            TIMEOUT,
        )
        .is_err());
    }
}
