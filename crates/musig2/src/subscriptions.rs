//! Addresses that can receive funds.

use bitcoin::{Address, Network};
use concord_key_deriv::{DerivedAccount, PrimaryKeypair};

use crate::wallet::SharedWallet;

/// The addresses a chain indexer should watch: every PRIMARY account address and every shared
/// wallet's address on `network`, deduplicated in first-seen order.
///
/// Only PRIMARY accounts are accepted; MUSIG2 keys sign but never receive.
pub fn receive_subscriptions<'a>(
    primary: impl IntoIterator<Item = &'a DerivedAccount<PrimaryKeypair>>,
    wallets: &[SharedWallet],
    network: Network,
) -> Vec<Address> {
    let mut out: Vec<Address> = Vec::new();
    let candidates = primary
        .into_iter()
        .map(|account| account.address.clone())
        .chain(wallets.iter().map(|w| w.address(network)));

    for address in candidates {
        if !out.contains(&address) {
            out.push(address);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use concord_test_utils::keys::node_keys;

    use super::*;
    use crate::aggregate::aggregate;

    #[test]
    fn includes_primary_and_shared_but_not_musig2() {
        let keys = node_keys(1, Network::Regtest);
        let other = node_keys(2, Network::Regtest);
        let agg = aggregate([keys.musig2().public_key, other.musig2().public_key]).unwrap();
        let wallet = SharedWallet {
            id: SharedWallet::id_for(&agg.public_key()),
            name: "pair".to_owned(),
            participants: Vec::new(),
            aggregated_public_key_hex: agg.public_key(),
            shared_address: String::new(),
            balance: 0,
            created_at: 0,
        };
        let change = keys.deriver().primary(true, 0).unwrap();

        let subs = receive_subscriptions(
            [keys.primary(), &change, keys.primary()],
            std::slice::from_ref(&wallet),
            Network::Regtest,
        );

        assert_eq!(
            subs,
            vec![
                keys.primary().address.clone(),
                change.address.clone(),
                agg.address(Network::Regtest),
            ]
        );
        assert!(!subs.contains(&keys.musig2().address));
    }
}
