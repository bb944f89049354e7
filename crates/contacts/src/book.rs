//! The persistent contact book.

use std::sync::Arc;

use bitcoin::Network;
use concord_db::{kv::CONTACTS_KEY, KvStore, Persister};
use concord_discovery::Advertisement;
use concord_identity::IdentityStore;
use concord_primitives::{identity_address, parse_address, Clock, PublicKeyHex};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{
    contact::Contact,
    errors::{ContactError, ContactResult},
    presence::{resolve_status, PresencePolicy, PresenceSignals, PresenceStatus},
};

/// Settings of a [`ContactBook`].
#[derive(Debug, Clone, Copy)]
pub struct ContactBookConfig {
    /// Network contact addresses must belong to.
    pub network: Network,

    /// Whether an advertised `mainWalletAddress` is used instead of the key-derived address.
    pub trust_advertised_address: bool,
}

impl Default for ContactBookConfig {
    fn default() -> Self {
        Self {
            network: Network::Signet,
            trust_advertised_address: true,
        }
    }
}

/// The user's contacts, persisted as a whole on every change.
#[derive(Debug)]
pub struct ContactBook {
    config: ContactBookConfig,
    clock: Arc<dyn Clock>,
    contacts: RwLock<Vec<Contact>>,
    persister: Persister,
}

impl ContactBook {
    /// Opens the book, loading persisted contacts.
    pub fn open(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: ContactBookConfig) -> Self {
        let persister = Persister::new(store, CONTACTS_KEY);
        let contacts: Vec<Contact> = persister.load_or_default();
        info!(count = contacts.len(), "loaded contacts");

        Self {
            config,
            clock,
            contacts: RwLock::new(contacts),
            persister,
        }
    }

    /// Adds an address-only contact. Adding an address already in the book returns the
    /// existing contact.
    pub fn add(&self, name: &str, address: &str) -> ContactResult<Contact> {
        let address = parse_address(address, self.config.network)?.to_string();
        let now = self.clock.now_ms();

        let mut contacts = self.contacts.write();
        if let Some(existing) = contacts.iter().find(|c| c.address == address) {
            return Ok(existing.clone());
        }

        let contact = Contact {
            id: new_contact_id(),
            name: name.to_owned(),
            address,
            identity_id: None,
            created_at: now,
            updated_at: now,
        };
        contacts.push(contact.clone());
        self.persister.save(&*contacts)?;

        debug!(id = %contact.id, "added contact");
        Ok(contact)
    }

    /// Creates or updates the contact for an advertised signer.
    ///
    /// The address is derived from the advertised key unless a `mainWalletAddress` is present,
    /// trusted and valid on the active network. A contact already linked to the key is updated
    /// rather than duplicated; an address-only contact with the same address is upgraded in
    /// place and keeps its id.
    pub fn add_from_signer(
        &self,
        advertisement: &Advertisement,
        name: Option<&str>,
    ) -> ContactResult<Contact> {
        let key = advertisement.public_key_hex;
        let address = self.address_for(advertisement);
        let now = self.clock.now_ms();

        let mut contacts = self.contacts.write();
        let position = contacts
            .iter()
            .position(|c| c.identity_id == Some(key))
            .or_else(|| {
                contacts
                    .iter()
                    .position(|c| c.is_address_only() && c.address == address)
            });

        let contact = match position {
            Some(idx) => {
                let contact = &mut contacts[idx];
                if contact.is_address_only() {
                    info!(id = %contact.id, %key, "linked address-only contact to identity");
                }
                contact.identity_id = Some(key);
                contact.address = address;
                contact.updated_at = now;
                contact.clone()
            }
            None => {
                let contact = Contact {
                    id: new_contact_id(),
                    name: name.map_or_else(|| advertisement.peer_id.clone(), str::to_owned),
                    address,
                    identity_id: Some(key),
                    created_at: now,
                    updated_at: now,
                };
                debug!(id = %contact.id, %key, "added contact from signer");
                contacts.push(contact.clone());
                contact
            }
        };
        self.persister.save(&*contacts)?;

        Ok(contact)
    }

    /// Links a contact to an identity.
    pub fn link_identity(&self, id: &str, key: PublicKeyHex) -> ContactResult<Contact> {
        let now = self.clock.now_ms();
        let mut contacts = self.contacts.write();
        let contact = contacts
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ContactError::NotFound(id.to_owned()))?;

        contact.identity_id = Some(key);
        contact.updated_at = now;
        let contact = contact.clone();
        self.persister.save(&*contacts)?;

        Ok(contact)
    }

    /// Removes a contact.
    pub fn remove(&self, id: &str) -> ContactResult<Contact> {
        let mut contacts = self.contacts.write();
        let idx = contacts
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| ContactError::NotFound(id.to_owned()))?;
        let removed = contacts.remove(idx);
        self.persister.save(&*contacts)?;

        Ok(removed)
    }

    /// Looks up a contact by id.
    pub fn get(&self, id: &str) -> Option<Contact> {
        self.contacts.read().iter().find(|c| c.id == id).cloned()
    }

    /// Looks up the contact linked to `key`.
    pub fn get_by_identity(&self, key: &PublicKeyHex) -> Option<Contact> {
        self.contacts
            .read()
            .iter()
            .find(|c| c.identity_id.as_ref() == Some(key))
            .cloned()
    }

    /// All contacts in insertion order.
    pub fn all(&self) -> Vec<Contact> {
        self.contacts.read().clone()
    }

    /// Resolves the presence of a contact.
    ///
    /// Address-only contacts have no presence signals and are always offline.
    pub fn resolve_status(
        &self,
        contact: &Contact,
        identities: &IdentityStore,
        is_connected: impl Fn(&str) -> bool,
        policy: &PresencePolicy,
    ) -> PresenceStatus {
        let identity = contact.identity_id.and_then(|key| identities.get(&key));
        let now = self.clock.now_ms();
        let signals = PresenceSignals::observe(identity.as_ref(), false, now, is_connected);
        resolve_status(&signals, policy, now)
    }

    fn address_for(&self, advertisement: &Advertisement) -> String {
        let network = self.config.network;
        if self.config.trust_advertised_address {
            if let Some(advertised) = &advertisement.main_wallet_address {
                match parse_address(advertised, network) {
                    Ok(address) => return address.to_string(),
                    Err(err) => {
                        warn!(
                            %err,
                            pubkey = %advertisement.public_key_hex,
                            "ignoring advertised address"
                        )
                    }
                }
            }
        }
        identity_address(&advertisement.public_key_hex, network).to_string()
    }
}

fn new_contact_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}
