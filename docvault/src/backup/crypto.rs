//! Password-based encryption of snapshot payloads.
//!
//! Layout: `DVPB | version | salt(16) | t_cost | m_cost_kib | lanes | nonce(12) | ciphertext`,
//! integers big-endian. The header bytes are bound to the ciphertext as associated data.

use crate::utils::{Result, VaultError};
use aes_gcm::aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

const PBE_MAGIC: &[u8; 4] = b"DVPB";
const PBE_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 4 + 1 + SALT_LEN + 12 + NONCE_LEN;

// Upper bounds for parameters, four times the defaults; headers are untrusted.
const MAX_T_COST: u32 = 12;
const MAX_M_COST_KIB: u32 = 256 * 1024;
const MAX_LANES: u32 = 8;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub t_cost: u32,
    pub m_cost_kib: u32,
    pub lanes: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            t_cost: 3,
            m_cost_kib: 64 * 1024,
            lanes: 1,
        }
    }
}

impl KdfParams {
    /// Reject parameters outside the accepted cost range.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.t_cost == 0 || self.t_cost > MAX_T_COST {
            return Err(format!("t_cost {} out of range 1-{MAX_T_COST}", self.t_cost));
        }
        if self.lanes == 0 || self.lanes > MAX_LANES {
            return Err(format!("lanes {} out of range 1-{MAX_LANES}", self.lanes));
        }
        if self.m_cost_kib > MAX_M_COST_KIB {
            return Err(format!("m_cost {} KiB above {MAX_M_COST_KIB} KiB", self.m_cost_kib));
        }
        Ok(())
    }
}

fn derive_key(password: &str, salt: &[u8], params: &KdfParams) -> std::result::Result<Zeroizing<[u8; 32]>, String> {
    let p = Params::new(params.m_cost_kib, params.t_cost, params.lanes, Some(32))
        .map_err(|e| format!("argon2 params: {e}"))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, p);
    let mut out: Zeroizing<[u8; 32]> = Zeroizing::new([0u8; 32]);
    argon
        .hash_password_into(password.as_bytes(), salt, &mut *out)
        .map_err(|e| format!("argon2: {e}"))?;
    Ok(out)
}

/// Encrypt `plaintext` under a key derived from `password`.
pub fn encrypt(password: &str, plaintext: &[u8], params: &KdfParams) -> Result<Vec<u8>> {
    if password.is_empty() {
        return Err(VaultError::Encryption("a non-empty password is required".into()));
    }
    params.check().map_err(VaultError::Encryption)?;
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt, params).map_err(VaultError::Encryption)?;
    let cipher = Aes256Gcm::new_from_slice(&*key)
        .map_err(|e| VaultError::Encryption(format!("aes key: {e}")))?;

    let mut out = Vec::with_capacity(HEADER_LEN + plaintext.len() + 16);
    out.extend_from_slice(PBE_MAGIC);
    out.push(PBE_VERSION);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&params.t_cost.to_be_bytes());
    out.extend_from_slice(&params.m_cost_kib.to_be_bytes());
    out.extend_from_slice(&params.lanes.to_be_bytes());
    out.extend_from_slice(&nonce_bytes);

    let ct = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload { msg: plaintext, aad: &out },
        )
        .map_err(|e| VaultError::Encryption(format!("encrypt: {e}")))?;
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Decrypt a buffer produced by [`encrypt`]. A wrong password fails authentication.
pub fn decrypt(password: &str, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < HEADER_LEN || !is_encrypted(data) {
        return Err(VaultError::Decryption("not an encrypted payload".into()));
    }
    if data[4] != PBE_VERSION {
        return Err(VaultError::Decryption(format!("unsupported version {}", data[4])));
    }
    let (header, ct) = data.split_at(HEADER_LEN);
    let salt = &header[5..5 + SALT_LEN];
    let int_at = |at: usize| u32::from_be_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);
    let params = KdfParams {
        t_cost: int_at(5 + SALT_LEN),
        m_cost_kib: int_at(9 + SALT_LEN),
        lanes: int_at(13 + SALT_LEN),
    };
    params.check().map_err(VaultError::Decryption)?;
    let nonce_bytes = &header[HEADER_LEN - NONCE_LEN..];

    let key = derive_key(password, salt, &params).map_err(VaultError::Decryption)?;
    let cipher = Aes256Gcm::new_from_slice(&*key)
        .map_err(|e| VaultError::Decryption(format!("aes key: {e}")))?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), Payload { msg: ct, aad: header })
        .map_err(|_| VaultError::Decryption("wrong password or corrupted payload".into()))
}

/// Whether `data` starts with the encrypted payload magic.
pub fn is_encrypted(data: &[u8]) -> bool {
    data.starts_with(PBE_MAGIC)
}

#[cfg(test)]
pub(crate) fn test_params() -> KdfParams {
    KdfParams {
        t_cost: 1,
        m_cost_kib: 64,
        lanes: 1,
    }
}
