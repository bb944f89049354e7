//! The TOML configuration file and its conversion into component settings.

use std::{fs, path::Path, time::Duration};

use bitcoin::Network;
use concord_contacts::{ContactBookConfig, PresencePolicy};
use concord_discovery::DiscoveryCacheConfig;
use concord_identity::IdentityStoreConfig;
use concord_key_deriv::AccountLayout;
use concord_musig2::CoordinatorConfig;
use serde::{Deserialize, Serialize};

use crate::{
    default,
    errors::{ParamsError, ParamsResult},
};

/// The configuration values that dictate the behavior of a node.
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The network keys, addresses and wallets are rendered for.
    pub network: Network,

    /// Account indices per key purpose.
    pub accounts: AccountsConfig,

    /// Discovery cache tunables.
    pub discovery: DiscoveryConfig,

    /// Identity store tunables.
    pub identity: IdentityConfig,

    /// Presence resolution.
    pub presence: PresenceConfig,

    /// Signing sessions.
    pub session: SessionConfig,

    /// Contact book.
    pub contacts: ContactsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: default::NETWORK,
            accounts: AccountsConfig::default(),
            discovery: DiscoveryConfig::default(),
            identity: IdentityConfig::default(),
            presence: PresenceConfig::default(),
            session: SessionConfig::default(),
            contacts: ContactsConfig::default(),
        }
    }
}

/// Account indices per key purpose. They must differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    /// Account of the single-sig spending key.
    pub primary_account: u32,
    /// Account of the MuSig2 signing key.
    pub musig2_account: u32,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            primary_account: default::PRIMARY_ACCOUNT,
            musig2_account: default::MUSIG2_ACCOUNT,
        }
    }
}

/// Discovery cache and advertisement settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Maximum number of cached advertisements.
    pub capacity: usize,
    /// Coalescing window for cache writes.
    pub flush_debounce_ms: u64,
    /// Interval between maintenance sweeps.
    pub sweep_interval_ms: u64,
    /// Lifetime of our own advertisements.
    pub default_ttl_ms: u64,
    /// Whether our advertisements carry the PRIMARY receive address.
    pub advertise_main_address: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            capacity: default::DISCOVERY_CAPACITY,
            flush_debounce_ms: default::FLUSH_DEBOUNCE_MS,
            sweep_interval_ms: default::SWEEP_INTERVAL_MS,
            default_ttl_ms: default::ADVERTISEMENT_TTL_MS,
            advertise_main_address: true,
        }
    }
}

/// Identity store settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Coalescing window for presence writes.
    pub flush_debounce_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            flush_debounce_ms: default::FLUSH_DEBOUNCE_MS,
        }
    }
}

/// Presence resolution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// How long after last being seen a peer still counts as recently online.
    pub recently_online_window_ms: u64,
    /// Whether recently online co-signers are good enough to start a spend.
    pub accept_recently_online: bool,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            recently_online_window_ms: default::RECENTLY_ONLINE_WINDOW_MS,
            accept_recently_online: true,
        }
    }
}

/// Signing session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a session may take to aggregate.
    pub timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default::SESSION_TIMEOUT_MS,
        }
    }
}

/// Contact book settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactsConfig {
    /// Whether an advertised main wallet address replaces the key-derived one.
    pub trust_advertised_address: bool,
}

impl Default for ContactsConfig {
    fn default() -> Self {
        Self {
            trust_advertised_address: true,
        }
    }
}

impl Config {
    /// Parses a TOML document.
    pub fn from_toml_str(contents: &str) -> ParamsResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.account_layout()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ParamsResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ParamsError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&contents)
    }

    /// The account layout for key derivation.
    pub fn account_layout(&self) -> ParamsResult<AccountLayout> {
        Ok(AccountLayout::new(
            self.accounts.primary_account,
            self.accounts.musig2_account,
        )?)
    }

    /// Settings for the discovery cache.
    pub const fn discovery_cache(&self) -> DiscoveryCacheConfig {
        DiscoveryCacheConfig {
            capacity: self.discovery.capacity,
            flush_debounce_ms: self.discovery.flush_debounce_ms,
        }
    }

    /// Settings for the identity store.
    pub const fn identity_store(&self) -> IdentityStoreConfig {
        IdentityStoreConfig {
            network: self.network,
            flush_debounce_ms: self.identity.flush_debounce_ms,
        }
    }

    /// The presence policy.
    pub const fn presence_policy(&self) -> PresencePolicy {
        PresencePolicy {
            recently_online_window_ms: self.presence.recently_online_window_ms,
            accept_recently_online: self.presence.accept_recently_online,
        }
    }

    /// Settings for the contact book.
    pub const fn contact_book(&self) -> ContactBookConfig {
        ContactBookConfig {
            network: self.network,
            trust_advertised_address: self.contacts.trust_advertised_address,
        }
    }

    /// Settings for the MuSig2 coordinator.
    pub const fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            network: self.network,
            session_timeout_ms: self.session.timeout_ms,
            advertisement_ttl_ms: self.discovery.default_ttl_ms,
            presence: self.presence_policy(),
            advertise_main_address: self.discovery.advertise_main_address,
        }
    }

    /// Interval of the maintenance task.
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.discovery.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.network, Network::Signet);
        assert_eq!(config.discovery_cache().capacity, 100);
        assert_eq!(config.coordinator().session_timeout_ms, 30_000);
        assert_eq!(config.presence_policy(), PresencePolicy::default());
    }

    #[test]
    fn parses_full_document() {
        let contents = r#"
            network = "regtest"

            [accounts]
            primary_account = 2
            musig2_account = 5

            [discovery]
            capacity = 10
            flush_debounce_ms = 100
            sweep_interval_ms = 1000
            default_ttl_ms = 60000
            advertise_main_address = false

            [identity]
            flush_debounce_ms = 50

            [presence]
            recently_online_window_ms = 1000
            accept_recently_online = false

            [session]
            timeout_ms = 5000

            [contacts]
            trust_advertised_address = false
        "#;

        let config = Config::from_toml_str(contents).unwrap();
        let layout = config.account_layout().unwrap();
        let coordinator = config.coordinator();

        assert_eq!(config.identity_store().network, Network::Regtest);
        assert_eq!(config.identity_store().flush_debounce_ms, 50);
        assert_eq!(layout, AccountLayout::new(2, 5).unwrap());
        assert_eq!(coordinator.advertisement_ttl_ms, 60_000);
        assert!(!coordinator.advertise_main_address);
        assert!(!coordinator.presence.accept_recently_online);
        assert!(!config.contact_book().trust_advertised_address);
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str("[session]\ntimeout_ms = 1").unwrap();

        assert_eq!(config.session.timeout_ms, 1);
        assert_eq!(config.discovery, DiscoveryConfig::default());
    }

    #[test]
    fn rejects_colliding_accounts() {
        let err = Config::from_toml_str("[accounts]\nprimary_account = 3\nmusig2_account = 3")
            .unwrap_err();
        assert!(matches!(err, ParamsError::Accounts(_)));
    }

    #[test]
    fn rejects_unknown_network() {
        let err = Config::from_toml_str("network = \"moon\"").unwrap_err();
        assert!(matches!(err, ParamsError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "network = \"bitcoin\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.network, Network::Bitcoin);

        let missing = Config::load(file.path().with_extension("missing")).unwrap_err();
        assert!(matches!(missing, ParamsError::Io { .. }));
    }
}
