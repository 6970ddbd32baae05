//! Concat KDF (NIST SP 800-56A) with SHA-256
//!
//! Derives key encryption keys from ECDH shared secrets for both
//! `ECDH-ES+A256KW` and `ECDH-1PU+A256KW`. The 1PU variant appends the
//! content encryption tag to SuppPubInfo.

use sha2::{Digest, Sha256};

/// Length of the derived key encryption key in bytes
pub const KEK_LEN: usize = 32;

fn length_prefixed(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}

/// Derives a 256-bit key encryption key.
///
/// OtherInfo is `len||alg || len||apu || len||apv || keydatalen [|| len||tag]`.
/// A single SHA-256 round yields exactly 256 bits, so the counter is always 1.
pub fn concat_kdf(
    shared_secret: &[u8],
    algorithm_id: &str,
    apu: &[u8],
    apv: &[u8],
    cc_tag: Option<&[u8]>,
) -> [u8; KEK_LEN] {
    let mut other_info = Vec::with_capacity(64 + apu.len() + apv.len());
    length_prefixed(&mut other_info, algorithm_id.as_bytes());
    length_prefixed(&mut other_info, apu);
    length_prefixed(&mut other_info, apv);
    other_info.extend_from_slice(&((KEK_LEN * 8) as u32).to_be_bytes());
    if let Some(tag) = cc_tag {
        length_prefixed(&mut other_info, tag);
    }

    let mut hasher = Sha256::new();
    hasher.update(1u32.to_be_bytes());
    hasher.update(shared_secret);
    hasher.update(&other_info);
    hasher.finalize().into()
}
