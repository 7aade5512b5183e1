/*
 * MailPulse SMTP relay
 * Copyright (C) 2024 MailPulse
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit, Nonce};

/// name of the environment variable holding the process-wide secret.
pub const ENCRYPTION_KEY_ENV: &str = "ENCRYPTION_KEY";

// development fallback, matching the admin surface
const DEFAULT_KEY: &str = "changeme-32-char-encryption-key";

const NONCE_LEN: usize = 12;

/// Process-wide AES-256-GCM key protecting stored upstream credentials and
/// API keys. Loaded once at start; rotating it means re-encrypting every
/// stored secret and is outside the relay.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl EncryptionKey {
    /// Build a key from arbitrary input, truncated or zero-padded to the
    /// 32 bytes AES-256 requires.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let mut key = [0_u8; 32];
        let raw = raw.as_bytes();
        let len = raw.len().min(32);
        key[..len].copy_from_slice(&raw[..len]);
        Self(key)
    }

    /// Read the key from `ENCRYPTION_KEY`, falling back to the (insecure)
    /// development default when unset.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var(ENCRYPTION_KEY_ENV) {
            Ok(raw) if !raw.is_empty() => Self::new(&raw),
            _ => {
                log::warn!(
                    "{} is not set, using the development default key",
                    ENCRYPTION_KEY_ENV
                );
                Self::new(DEFAULT_KEY)
            }
        }
    }

    /// Encrypt a secret for storage: random 96-bit nonce prefixed to the
    /// ciphertext, base64 encoded.
    ///
    /// # Errors
    ///
    /// * the cipher rejected the input
    pub fn encrypt(&self, plaintext: &str) -> anyhow::Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.0).expect("key is 32 bytes");
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let mut out = nonce.to_vec();
        out.extend(
            cipher
                .encrypt(&nonce, plaintext.as_bytes())
                .map_err(|e| anyhow::anyhow!("failed to encrypt secret: {}", e))?,
        );

        Ok(base64::encode(out))
    }

    /// Decrypt a stored secret. An empty input decrypts to an empty string,
    /// so unset columns round-trip.
    ///
    /// # Errors
    ///
    /// * the input is not base64, is truncated, or fails authentication
    pub fn decrypt(&self, ciphertext: &str) -> anyhow::Result<String> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }

        let data = base64::decode(ciphertext)
            .map_err(|e| anyhow::anyhow!("failed to decode secret: {}", e))?;
        if data.len() < NONCE_LEN {
            anyhow::bail!("ciphertext too short");
        }

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(&self.0).expect("key is 32 bytes");

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| anyhow::anyhow!("failed to decrypt secret: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("secret is not utf8: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = EncryptionKey::new("a key that is exactly 32 bytes!!");
        let secret = "upstream-password";

        let encrypted = key.encrypt(secret).unwrap();
        assert_ne!(encrypted, secret);
        assert_eq!(key.decrypt(&encrypted).unwrap(), secret);
    }

    #[test]
    fn nonce_makes_output_unique() {
        let key = EncryptionKey::new("k");
        assert_ne!(key.encrypt("x").unwrap(), key.encrypt("x").unwrap());
    }

    #[test]
    fn short_and_long_keys_are_normalized() {
        // padded and truncated keys are both usable and distinct
        let short = EncryptionKey::new("short");
        let long = EncryptionKey::new(&"x".repeat(64));

        let from_short = short.encrypt("secret").unwrap();
        assert!(long.decrypt(&from_short).is_err());
        assert_eq!(short.decrypt(&from_short).unwrap(), "secret");
    }

    #[test]
    fn tampering_is_detected() {
        let key = EncryptionKey::new("k");
        let mut data = base64::decode(key.encrypt("secret").unwrap()).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        assert!(key.decrypt(&base64::encode(data)).is_err());
    }

    #[test]
    fn empty_round_trips() {
        let key = EncryptionKey::new("k");
        assert_eq!(key.decrypt("").unwrap(), "");
        assert!(key.decrypt("not base64!").is_err());
        assert!(key.decrypt("AAAA").is_err());
    }
}
