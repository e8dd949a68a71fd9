//! Stateless session tokens.
//!
//! A token is the standard-base64 AES-256-CBC ciphertext of a JSON payload.
//! Nothing is stored server-side: a token is valid for as long as it decrypts
//! under the server key material and its expiry window has not elapsed.
//!
//! The key material comes from a [`KeyDerivation`]. [`ConcatKeyDerivation`]
//! reproduces the legacy byte-concatenation scheme that existing tokens were
//! issued with. It is not a real KDF: key and IV share bytes and the password
//! is used verbatim. [`Sha256KeyDerivation`] keeps the same token format with
//! digest-derived material and can be swapped in when compatibility with
//! previously issued tokens no longer matters.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Cipher used for every token.
pub const ALGORITHM: &str = "aes-256-cbc";

/// Lifetime of a sign-in token: 5 hours.
pub const SESSION_WINDOW_MS: u64 = 18_000_000;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("salt must not be empty")]
    EmptySalt,

    #[error("token is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("token could not be decrypted")]
    Decrypt,

    #[error("token payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Cipher key and IV for the session token codec.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("algorithm", &ALGORITHM)
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    pub fn new(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    /// Derive key material with the legacy concatenation scheme.
    pub fn derive(password: &str, salt: &str) -> Result<Self, TokenError> {
        ConcatKeyDerivation.derive(password, salt)
    }

    pub fn algorithm(&self) -> &'static str {
        ALGORITHM
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }
}

/// Strategy for turning a password and salt into [`KeyMaterial`].
pub trait KeyDerivation: Send + Sync {
    fn derive(&self, password: &str, salt: &str) -> Result<KeyMaterial, TokenError>;
}

/// Legacy scheme: the salt is doubled until it is at least 32 characters,
/// the key is the first 32 bytes of `password ++ salt` and the IV the first
/// 16 bytes of `salt ++ password`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatKeyDerivation;

impl KeyDerivation for ConcatKeyDerivation {
    fn derive(&self, password: &str, salt: &str) -> Result<KeyMaterial, TokenError> {
        if salt.is_empty() {
            return Err(TokenError::EmptySalt);
        }

        let mut padded = salt.to_string();
        while padded.chars().count() < KEY_LEN {
            padded = padded.repeat(2);
        }

        let mut key = [0u8; KEY_LEN];
        fill_prefix(&mut key, &[password.as_bytes(), padded.as_bytes()]);

        let mut iv = [0u8; IV_LEN];
        fill_prefix(&mut iv, &[padded.as_bytes(), password.as_bytes()]);

        Ok(KeyMaterial { key, iv })
    }
}

/// Digest-based scheme: key and IV are separate SHA-256 digests over the
/// salt and password.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256KeyDerivation;

impl KeyDerivation for Sha256KeyDerivation {
    fn derive(&self, password: &str, salt: &str) -> Result<KeyMaterial, TokenError> {
        if salt.is_empty() {
            return Err(TokenError::EmptySalt);
        }

        let digest = |label: &[u8]| {
            let mut hasher = Sha256::new();
            hasher.update(label);
            hasher.update(salt.as_bytes());
            hasher.update([0u8]);
            hasher.update(password.as_bytes());
            hasher.finalize()
        };

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&digest(b"memo-vault/key"));

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&digest(b"memo-vault/iv")[..IV_LEN]);

        Ok(KeyMaterial { key, iv })
    }
}

/// Copy the concatenation of `parts` into `out`, truncating or zero filling.
fn fill_prefix(out: &mut [u8], parts: &[&[u8]]) {
    let mut bytes = parts.iter().flat_map(|part| part.iter().copied());
    for slot in out.iter_mut() {
        *slot = bytes.next().unwrap_or(0);
    }
}

/// Serialize `payload` to JSON, encrypt it and return the base64 token.
pub fn sign<T: Serialize>(payload: &T, material: &KeyMaterial) -> Result<String, TokenError> {
    let plaintext = serde_json::to_vec(payload)?;
    let ciphertext = Aes256CbcEnc::new(&material.key.into(), &material.iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);
    Ok(STANDARD.encode(ciphertext))
}

/// Decrypt and parse a token produced by [`sign`].
pub fn verify<T: DeserializeOwned>(token: &str, material: &KeyMaterial) -> Result<T, TokenError> {
    let ciphertext = STANDARD.decode(token.trim())?;
    let plaintext = Aes256CbcDec::new(&material.key.into(), &material.iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| TokenError::Decrypt)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Payload carried by a sign-in token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Password the token was issued for
    pub p: String,
    /// Expiry window in milliseconds
    pub e: u64,
    /// Issue time in milliseconds since the Unix epoch
    pub t: u64,
}

impl TokenClaims {
    pub fn issue(passwd: &str, now_ms: u64) -> Self {
        Self {
            p: passwd.to_string(),
            e: SESSION_WINDOW_MS,
            t: now_ms,
        }
    }

    pub fn expires_at(&self) -> u64 {
        self.t.saturating_add(self.e)
    }

    pub fn is_live(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> KeyMaterial {
        KeyMaterial::derive("correct horse", "battery-staple").unwrap()
    }

    #[test]
    fn test_concat_derivation_layout() {
        let material = KeyMaterial::derive("pw", "0123456789").unwrap();

        // "0123456789" doubles twice to 40 chars
        let salt = "0123456789".repeat(4);
        let expected_key: Vec<u8> = "pw".bytes().chain(salt.bytes()).take(32).collect();
        let expected_iv: Vec<u8> = salt.bytes().take(16).collect();

        assert_eq!(material.key().as_slice(), expected_key.as_slice());
        assert_eq!(material.iv().as_slice(), expected_iv.as_slice());
        assert_eq!(material.algorithm(), "aes-256-cbc");
    }

    #[test]
    fn test_long_password_fills_key() {
        let password = "p".repeat(40);
        let material = KeyMaterial::derive(&password, "s").unwrap();
        assert!(material.key().iter().all(|b| *b == b'p'));
        assert!(material.iv().iter().all(|b| *b == b's'));
    }

    #[test]
    fn test_empty_salt_rejected() {
        assert!(matches!(
            KeyMaterial::derive("pw", ""),
            Err(TokenError::EmptySalt)
        ));
        assert!(matches!(
            Sha256KeyDerivation.derive("pw", ""),
            Err(TokenError::EmptySalt)
        ));
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let material = material();
        let claims = TokenClaims::issue("correct horse", 1_700_000_000_000);

        let token = sign(&claims, &material).unwrap();
        let decoded: TokenClaims = verify(&token, &material).unwrap();

        assert_eq!(decoded, claims);
    }

    #[test]
    fn test_round_trip_with_sha256_derivation() {
        let material = Sha256KeyDerivation.derive("pw", "salt").unwrap();
        let payload = serde_json::json!({"hello": "world", "n": 3});

        let token = sign(&payload, &material).unwrap();
        let decoded: serde_json::Value = verify(&token, &material).unwrap();

        assert_eq!(decoded, payload);
        assert_ne!(material, KeyMaterial::derive("pw", "salt").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let claims = TokenClaims::issue("correct horse", 42);
        let token = sign(&claims, &material()).unwrap();

        let other = KeyMaterial::derive("wrong horse", "battery-staple").unwrap();
        assert!(verify::<TokenClaims>(&token, &other).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let material = material();
        let claims = TokenClaims::issue("correct horse", 1_700_000_000_000);
        let token = sign(&claims, &material).unwrap();
        let raw = STANDARD.decode(&token).unwrap();

        for index in [0, raw.len() / 2, raw.len() - 17, raw.len() - 1] {
            let mut tampered = raw.clone();
            tampered[index] ^= 0x5a;
            let tampered = STANDARD.encode(&tampered);
            assert!(
                verify::<TokenClaims>(&tampered, &material).is_err(),
                "byte {index} flipped but token still verified"
            );
        }
    }

    #[test]
    fn test_garbage_rejected() {
        let material = material();
        assert!(matches!(
            verify::<TokenClaims>("not base64 at all!", &material),
            Err(TokenError::Decode(_))
        ));
        assert!(verify::<TokenClaims>("", &material).is_err());
        assert!(matches!(
            verify::<TokenClaims>(&STANDARD.encode([7u8; 16]), &material),
            Err(TokenError::Decrypt) | Err(TokenError::Payload(_))
        ));
    }

    #[test]
    fn test_claims_expiry_window() {
        let claims = TokenClaims::issue("pw", 1_000);
        assert_eq!(claims.e, SESSION_WINDOW_MS);
        assert!(claims.is_live(1_000));
        assert!(claims.is_live(1_000 + SESSION_WINDOW_MS - 1));
        assert!(!claims.is_live(1_000 + SESSION_WINDOW_MS));
        assert!(!claims.is_live(u64::MAX));
    }

    #[test]
    fn test_claims_wire_format() {
        let claims = TokenClaims::issue("pw", 5);
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json, serde_json::json!({"p": "pw", "e": 18_000_000, "t": 5}));
    }
}
