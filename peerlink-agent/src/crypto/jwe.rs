//! JWE encryption and decryption for X25519 recipients
//!
//! Content is encrypted once with A256GCM under a random content key, using
//! the ASCII base64url protected header as additional authenticated data.
//! The content key is then wrapped for every recipient with AES-256-KW
//! under a key derived by Concat KDF from:
//!
//! - `ECDH-ES+A256KW` (anoncrypt): `Ze`, the ephemeral-static secret.
//! - `ECDH-1PU+A256KW` (authcrypt): `Ze || Zs`, adding the sender-static
//!   secret, with the content tag bound into the KDF.

use aes_gcm::{AeadInPlace, Aes256Gcm, KeyInit, Nonce, Tag};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use super::kdf::concat_kdf;
use super::key_wrap::{unwrap_cek, wrap_cek, CEK_LEN};
use crate::agent_key::{JweAlgorithm, JweEncryption, KeyAgreementKey};
use crate::error::{Error, Result};
use crate::local_agent_key::PublicAgreementKey;
use crate::message::{
    EphemeralPublicKey, Jwe, JweHeader, JweProtected, JweRecipient, DIDCOMM_ENCRYPTED,
};

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// `apv` value: SHA-256 over the sorted recipient key ids joined with `.`
pub fn recipients_apv(kids: &[&str]) -> Vec<u8> {
    let mut sorted = kids.to_vec();
    sorted.sort_unstable();
    Sha256::digest(sorted.join(".").as_bytes()).to_vec()
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| Error::InvalidEnvelope(format!("Invalid base64url in JWE {}: {}", name, e)))
}

fn x25519_public(name: &str, bytes: &[u8]) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| Error::Cryptography(format!("Invalid X25519 {} length {}", name, bytes.len())))
}

/// Encrypts `plaintext` for every recipient.
///
/// With a sender key the result is authcrypt (`ECDH-1PU+A256KW`), otherwise
/// anoncrypt (`ECDH-ES+A256KW`).
pub async fn encrypt(
    plaintext: &[u8],
    recipients: &[PublicAgreementKey],
    sender: Option<&dyn KeyAgreementKey>,
) -> Result<Jwe> {
    if recipients.is_empty() {
        return Err(Error::Validation("No recipients specified for JWE".to_string()));
    }

    let mut cek = [0u8; CEK_LEN];
    OsRng.fill_bytes(&mut cek);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ephemeral_secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral_secret);

    let kids: Vec<&str> = recipients.iter().map(PublicAgreementKey::key_id).collect();
    let apv = recipients_apv(&kids);
    let apu = sender.map(|s| s.key_id().as_bytes().to_vec());

    let alg = if sender.is_some() {
        JweAlgorithm::Ecdh1puA256kw
    } else {
        JweAlgorithm::EcdhEsA256kw
    };

    let protected = JweProtected {
        typ: DIDCOMM_ENCRYPTED.to_string(),
        alg: alg.as_str().to_string(),
        enc: JweEncryption::A256GCM.as_str().to_string(),
        epk: EphemeralPublicKey {
            kty: "OKP".to_string(),
            crv: "X25519".to_string(),
            x: URL_SAFE_NO_PAD.encode(ephemeral_public.as_bytes()),
        },
        skid: sender.map(|s| s.key_id().to_string()),
        apu: apu.as_ref().map(|apu| URL_SAFE_NO_PAD.encode(apu)),
        apv: URL_SAFE_NO_PAD.encode(&apv),
    };
    let protected_json = serde_json::to_string(&protected).map_err(|e| {
        Error::Serialization(format!("Failed to serialize protected header: {}", e))
    })?;
    let protected_b64 = URL_SAFE_NO_PAD.encode(protected_json);

    let cipher = Aes256Gcm::new_from_slice(&cek)
        .map_err(|e| Error::Cryptography(format!("Failed to create AES-GCM cipher: {}", e)))?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), protected_b64.as_bytes(), &mut buffer)
        .map_err(|e| Error::Cryptography(format!("AES-GCM encryption failed: {}", e)))?;

    let mut jwe_recipients = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let recipient_public = x25519_dalek::PublicKey::from(*recipient.public_key());
        let ze = ephemeral_secret.diffie_hellman(&recipient_public);

        let kek = match sender {
            Some(sender) => {
                let zs = sender.diffie_hellman(recipient.public_key()).await?;
                let mut z = ze.as_bytes().to_vec();
                z.extend_from_slice(&zs);
                concat_kdf(
                    &z,
                    alg.as_str(),
                    apu.as_deref().unwrap_or_default(),
                    &apv,
                    Some(tag.as_slice()),
                )
            }
            None => concat_kdf(ze.as_bytes(), alg.as_str(), b"", &apv, None),
        };

        jwe_recipients.push(JweRecipient {
            header: JweHeader {
                kid: recipient.key_id().to_string(),
            },
            encrypted_key: URL_SAFE_NO_PAD.encode(wrap_cek(&kek, &cek)?),
        });
    }

    Ok(Jwe {
        protected: protected_b64,
        recipients: jwe_recipients,
        iv: URL_SAFE_NO_PAD.encode(iv),
        ciphertext: URL_SAFE_NO_PAD.encode(buffer),
        tag: URL_SAFE_NO_PAD.encode(tag),
    })
}

/// Decodes and checks the protected header of a JWE
pub fn decode_protected(jwe: &Jwe) -> Result<JweProtected> {
    let bytes = decode_field("protected header", &jwe.protected)?;
    let protected: JweProtected = serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidEnvelope(format!("Invalid JWE protected header: {}", e)))?;

    if JweAlgorithm::from_header(&protected.alg).is_none() {
        return Err(Error::InvalidEnvelope(format!(
            "Unsupported JWE algorithm: {}",
            protected.alg
        )));
    }
    if protected.enc != JweEncryption::A256GCM.as_str() {
        return Err(Error::InvalidEnvelope(format!(
            "Unsupported JWE content encryption: {}",
            protected.enc
        )));
    }
    if protected.epk.kty != "OKP" || protected.epk.crv != "X25519" {
        return Err(Error::InvalidEnvelope(format!(
            "Unsupported ephemeral key: {}/{}",
            protected.epk.kty, protected.epk.crv
        )));
    }
    Ok(protected)
}

/// Decrypts a JWE with one of the recipient's keys.
///
/// `sender` must be given for authcrypt messages and is the key named by `skid`.
pub async fn decrypt(
    jwe: &Jwe,
    protected: &JweProtected,
    recipient: &dyn KeyAgreementKey,
    sender: Option<&PublicAgreementKey>,
) -> Result<Vec<u8>> {
    let alg = JweAlgorithm::from_header(&protected.alg).ok_or_else(|| {
        Error::InvalidEnvelope(format!("Unsupported JWE algorithm: {}", protected.alg))
    })?;

    let entry = jwe
        .recipients
        .iter()
        .find(|r| r.header.kid == recipient.key_id())
        .ok_or_else(|| {
            Error::KeyNotFound(format!("No recipient entry for {}", recipient.key_id()))
        })?;

    let iv = decode_field("iv", &jwe.iv)?;
    let tag = decode_field("tag", &jwe.tag)?;
    let mut buffer = decode_field("ciphertext", &jwe.ciphertext)?;
    let encrypted_key = decode_field("encrypted_key", &entry.encrypted_key)?;
    let epk = x25519_public("ephemeral key", &decode_field("epk", &protected.epk.x)?)?;
    let apv = decode_field("apv", &protected.apv)?;

    if iv.len() != IV_LEN {
        return Err(Error::Cryptography(format!("Invalid IV length {}", iv.len())));
    }
    if tag.len() != TAG_LEN {
        return Err(Error::Cryptography(format!("Invalid tag length {}", tag.len())));
    }

    let ze = recipient.diffie_hellman(&epk).await?;
    let kek = match alg {
        JweAlgorithm::EcdhEsA256kw => concat_kdf(&ze, alg.as_str(), b"", &apv, None),
        JweAlgorithm::Ecdh1puA256kw => {
            let sender = sender.ok_or_else(|| {
                Error::InvalidEnvelope("Authcrypt message without a sender key".to_string())
            })?;
            let apu = match &protected.apu {
                Some(apu) => decode_field("apu", apu)?,
                None => Vec::new(),
            };
            let zs = recipient.diffie_hellman(sender.public_key()).await?;
            let mut z = ze.to_vec();
            z.extend_from_slice(&zs);
            concat_kdf(&z, alg.as_str(), &apu, &apv, Some(&tag))
        }
    };

    let cek = unwrap_cek(&kek, &encrypted_key)?;
    let cipher = Aes256Gcm::new_from_slice(&cek)
        .map_err(|e| Error::Cryptography(format!("Failed to create AES-GCM cipher: {}", e)))?;
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&iv),
            jwe.protected.as_bytes(),
            &mut buffer,
            Tag::from_slice(&tag),
        )
        .map_err(|e| Error::Cryptography(format!("AES-GCM decryption failed: {}", e)))?;

    Ok(buffer)
}
