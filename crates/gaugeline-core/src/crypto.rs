// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! RSA-OAEP (SHA-256) payload encryption.
//!
//! A single OAEP block carries at most `k - 2*hLen - 2` bytes, where `k` is
//! the modulus size. Larger payloads are split into chunks of that size and
//! each chunk encrypts to exactly `k` bytes; the ciphertext is the
//! concatenation of those blocks.

use std::fs;
use std::path::Path;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::errors::CryptoError;

const SHA256_LEN: usize = 32;

fn max_chunk(key_size: usize) -> usize {
    key_size.saturating_sub(2 * SHA256_LEN + 2)
}

fn read_pem(path: &Path) -> Result<String, CryptoError> {
    fs::read_to_string(path).map_err(|source| CryptoError::ReadKey {
        path: path.display().to_string(),
        source,
    })
}

/// Agent side: encrypts with a public key (`BEGIN PUBLIC KEY`).
#[derive(Debug, Clone)]
pub struct Encryptor {
    key: RsaPublicKey,
}

impl Encryptor {
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| CryptoError::ParseKey(e.to_string()))?;
        Ok(Encryptor { key })
    }

    pub fn from_file(path: &Path) -> Result<Self, CryptoError> {
        Self::from_pem(&read_pem(path)?)
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block = self.key.size();
        let chunk = max_chunk(block).max(1);
        let mut rng = rand::thread_rng();

        // An empty payload still encrypts to one block.
        let pieces: Vec<&[u8]> = if data.is_empty() {
            vec![data]
        } else {
            data.chunks(chunk).collect()
        };
        let mut out = Vec::with_capacity(pieces.len() * block);
        for piece in pieces {
            let encrypted = self
                .key
                .encrypt(&mut rng, Oaep::new::<Sha256>(), piece)
                .map_err(CryptoError::Encrypt)?;
            out.extend(encrypted);
        }
        Ok(out)
    }
}

/// Server side: decrypts with a PKCS#1 private key (`BEGIN RSA PRIVATE KEY`).
#[derive(Debug, Clone)]
pub struct Decryptor {
    key: RsaPrivateKey,
}

impl Decryptor {
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| CryptoError::ParseKey(e.to_string()))?;
        Ok(Decryptor { key })
    }

    pub fn from_file(path: &Path) -> Result<Self, CryptoError> {
        Self::from_pem(&read_pem(path)?)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block = self.key.size();
        if data.is_empty() || data.len() % block != 0 {
            return Err(CryptoError::Truncated {
                len: data.len(),
                block,
            });
        }
        let mut out = Vec::with_capacity(data.len());
        for piece in data.chunks(block) {
            let plain = self
                .key
                .decrypt(Oaep::new::<Sha256>(), piece)
                .map_err(CryptoError::Decrypt)?;
            out.extend(plain);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};

    fn key_pair() -> (Encryptor, Decryptor) {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let public_pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let private_pem = private.to_pkcs1_pem(LineEnding::LF).unwrap();
        (
            Encryptor::from_pem(&public_pem).unwrap(),
            Decryptor::from_pem(&private_pem).unwrap(),
        )
    }

    #[test]
    fn payload_larger_than_one_block_is_chunked() {
        let (enc, dec) = key_pair();
        // 1024-bit key: 128-byte blocks carrying 62 bytes each.
        let payload: Vec<u8> = (0..=255u8).cycle().take(500).collect();
        let ciphertext = enc.encrypt(&payload).unwrap();
        assert_eq!(ciphertext.len(), 500usize.div_ceil(62) * 128);
        assert_eq!(dec.decrypt(&ciphertext).unwrap(), payload);
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let (enc, dec) = key_pair();
        let mut ciphertext = enc.encrypt(b"hello").unwrap();
        ciphertext.pop();
        assert!(matches!(
            dec.decrypt(&ciphertext),
            Err(CryptoError::Truncated { .. })
        ));
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let (enc, _) = key_pair();
        let (_, other) = key_pair();
        let ciphertext = enc.encrypt(b"hello").unwrap();
        assert!(matches!(
            other.decrypt(&ciphertext),
            Err(CryptoError::Decrypt(_))
        ));
    }

    #[test]
    fn garbage_pem_is_a_parse_error() {
        assert!(matches!(
            Encryptor::from_pem("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n"),
            Err(CryptoError::ParseKey(_))
        ));
        assert!(matches!(
            Decryptor::from_file(Path::new("/nonexistent/key.pem")),
            Err(CryptoError::ReadKey { .. })
        ));
    }
}
