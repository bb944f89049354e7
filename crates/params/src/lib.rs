//! Node configuration.
//!
//! None of these values are consensus-critical: two nodes with different settings still derive
//! the same keys and the same shared wallets. They only tune caching, presence and timeouts.

pub mod config;
mod default;
pub mod errors;

pub use config::{
    AccountsConfig, Config, ContactsConfig, DiscoveryConfig, IdentityConfig, PresenceConfig,
    SessionConfig,
};
pub use errors::{ParamsError, ParamsResult};
