//! AES-256 Key Wrap (RFC 3394) of content encryption keys

use aes::Aes256;
use aes_kw::Kek;

use crate::error::{Error, Result};

/// Length of a content encryption key
pub const CEK_LEN: usize = 32;
/// Length of a wrapped content encryption key
pub const WRAPPED_CEK_LEN: usize = CEK_LEN + 8;

/// Wraps a content encryption key under a key encryption key
pub fn wrap_cek(kek: &[u8; 32], cek: &[u8; CEK_LEN]) -> Result<Vec<u8>> {
    let kek = Kek::<Aes256>::from(*kek);
    let mut wrapped = vec![0u8; WRAPPED_CEK_LEN];
    kek.wrap(cek, &mut wrapped)
        .map_err(|e| Error::Cryptography(format!("Key wrap failed: {:?}", e)))?;
    Ok(wrapped)
}

/// Unwraps a content encryption key. Fails if the integrity check does not hold.
pub fn unwrap_cek(kek: &[u8; 32], wrapped: &[u8]) -> Result<[u8; CEK_LEN]> {
    if wrapped.len() != WRAPPED_CEK_LEN {
        return Err(Error::Cryptography(format!(
            "Wrapped key must be {} bytes, got {}",
            WRAPPED_CEK_LEN,
            wrapped.len()
        )));
    }

    let kek = Kek::<Aes256>::from(*kek);
    let mut cek = [0u8; CEK_LEN];
    kek.unwrap(wrapped, &mut cek)
        .map_err(|e| Error::Cryptography(format!("Key unwrap failed: {:?}", e)))?;
    Ok(cek)
}
