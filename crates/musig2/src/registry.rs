//! The persistent shared-wallet registry.

use std::{collections::BTreeMap, sync::Arc};

use bitcoin::Network;
use concord_db::{kv::SHARED_WALLETS_KEY, DbResult, KvStore, Persister};
use concord_primitives::PublicKeyHex;
use parking_lot::RwLock;
use tracing::{debug, error, info};

use crate::{aggregate::aggregate, wallet::SharedWallet};

/// Shared wallets by id. Every change is written before the call returns.
#[derive(Debug)]
pub struct WalletRegistry {
    network: Network,
    wallets: RwLock<BTreeMap<String, SharedWallet>>,
    persister: Persister,
}

impl WalletRegistry {
    /// Loads the persisted wallets.
    ///
    /// Each wallet is reconstructed from its participant keys: the aggregate is recomputed and
    /// the address hint refreshed for `network`. Records whose stored aggregate disagrees with
    /// their participants are dropped.
    pub fn open(store: Arc<dyn KvStore>, network: Network) -> Self {
        let persister = Persister::new(store, SHARED_WALLETS_KEY);
        let loaded: Vec<SharedWallet> = persister.load_or_default();

        let mut wallets = BTreeMap::new();
        for mut wallet in loaded {
            match aggregate(wallet.participant_keys()) {
                Ok(agg) if agg.public_key() == wallet.aggregated_public_key_hex => {
                    wallet.shared_address = agg.address(network).to_string();
                    wallets.insert(wallet.id.clone(), wallet);
                }
                Ok(agg) => error!(
                    id = %wallet.id,
                    stored = %wallet.aggregated_public_key_hex,
                    computed = %agg.public_key(),
                    "dropping shared wallet with inconsistent aggregate"
                ),
                Err(err) => {
                    error!(id = %wallet.id, %err, "dropping unreconstructible shared wallet")
                }
            }
        }
        info!(count = wallets.len(), %network, "loaded shared wallets");

        Self {
            network,
            wallets: RwLock::new(wallets),
            persister,
        }
    }

    /// The network address hints are rendered for.
    pub const fn network(&self) -> Network {
        self.network
    }

    /// Stores a new wallet, or returns the existing one with the same id.
    ///
    /// If the write fails the wallet is not kept in memory either.
    pub fn insert(&self, wallet: SharedWallet) -> DbResult<SharedWallet> {
        let mut wallets = self.wallets.write();
        if let Some(existing) = wallets.get(&wallet.id) {
            debug!(id = %wallet.id, "shared wallet already exists");
            return Ok(existing.clone());
        }

        let id = wallet.id.clone();
        wallets.insert(id.clone(), wallet.clone());
        if let Err(err) = self.save(&wallets) {
            wallets.remove(&id);
            return Err(err);
        }

        Ok(wallet)
    }

    /// Looks up a wallet.
    pub fn get(&self, id: &str) -> Option<SharedWallet> {
        self.wallets.read().get(id).cloned()
    }

    /// All wallets ordered by id.
    pub fn all(&self) -> Vec<SharedWallet> {
        self.wallets.read().values().cloned().collect()
    }

    /// Records a new balance. Returns the updated wallet, or `None` if unknown.
    ///
    /// If the write fails the previous balance is kept.
    pub fn set_balance(&self, id: &str, balance: u64) -> DbResult<Option<SharedWallet>> {
        let mut wallets = self.wallets.write();
        let Some(current) = wallets.get(id) else {
            return Ok(None);
        };
        if current.balance == balance {
            return Ok(Some(current.clone()));
        }

        let mut updated = current.clone();
        updated.balance = balance;
        let previous = wallets.insert(id.to_owned(), updated.clone());
        if let Err(err) = self.save(&wallets) {
            if let Some(previous) = previous {
                wallets.insert(id.to_owned(), previous);
            }
            return Err(err);
        }

        Ok(Some(updated))
    }

    /// Records `peer_id` for `key` in every wallet it participates in. Returns how many
    /// wallets changed.
    ///
    /// Nothing changes in memory unless the write succeeds.
    pub fn update_peer_id(&self, key: &PublicKeyHex, peer_id: &str) -> DbResult<usize> {
        let mut wallets = self.wallets.write();
        let mut staged = wallets.clone();
        let mut changed = 0;
        for wallet in staged.values_mut() {
            for participant in &mut wallet.participants {
                if participant.public_key_hex == *key
                    && participant.peer_id.as_deref() != Some(peer_id)
                {
                    participant.peer_id = Some(peer_id.to_owned());
                    changed += 1;
                }
            }
        }

        if changed > 0 {
            self.save(&staged)?;
            *wallets = staged;
        }
        Ok(changed)
    }

    fn save(&self, wallets: &BTreeMap<String, SharedWallet>) -> DbResult<()> {
        let records: Vec<&SharedWallet> = wallets.values().collect();
        self.persister.save(&records)
    }
}
