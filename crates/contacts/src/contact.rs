use concord_primitives::{PublicKeyHex, UnixMillis};
use serde::{Deserialize, Serialize};

/// A named entry in the user's address book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Stable id; never changes, even when the contact is linked to an identity.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Where payments to this contact go.
    pub address: String,

    /// The linked identity, once the contact's public key is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<PublicKeyHex>,

    /// When the contact was added.
    pub created_at: UnixMillis,

    /// Last change.
    pub updated_at: UnixMillis,
}

impl Contact {
    /// Whether only an address is known.
    pub const fn is_address_only(&self) -> bool {
        self.identity_id.is_none()
    }
}
