//! Secret-nonce seeds.

use concord_key_deriv::Musig2NonceIkm;
use hkdf::Hkdf;
use sha2::Sha256;

use super::SessionId;

/// Derives the nonce seed for one session from the node's MUSIG2 nonce key material.
///
/// The session id and message are bound into the HKDF info and `entropy` is the salt. The
/// session id comes from whoever opened the session, so `entropy` must be freshly sampled for
/// every session: replaying an id and message never reproduces a seed.
pub fn derive_nonce_seed(
    ikm: &Musig2NonceIkm,
    session_id: &SessionId,
    message: &[u8; 32],
    entropy: &[u8; 32],
) -> [u8; 32] {
    let mut info = [0u8; 64];
    info[..32].copy_from_slice(session_id.as_bytes());
    info[32..].copy_from_slice(message);

    let hk = Hkdf::<Sha256>::new(Some(entropy), &ikm[..]);
    let mut okm = [0u8; 32];
    hk.expand(&info, &mut okm)
        .expect("32 is a valid length for Sha256 to output");
    okm
}
