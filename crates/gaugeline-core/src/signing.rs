// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HMAC-SHA256 payload signatures, hex encoded.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies payloads with a shared key.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("key", &"<redacted>").finish()
    }
}

impl Signer {
    /// Returns `None` for an empty key, which disables signing.
    #[must_use]
    pub fn new(key: &str) -> Option<Self> {
        if key.is_empty() {
            return None;
        }
        Some(Signer {
            key: key.as_bytes().to_vec(),
        })
    }

    #[allow(clippy::expect_used)]
    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size")
    }

    #[must_use]
    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a lowercase hex signature, as produced by
    /// [`Signer::sign`]. Malformed or upper-case hex never verifies.
    #[must_use]
    pub fn verify(&self, data: &[u8], signature: &str) -> bool {
        let signature = signature.trim();
        if !signature
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return false;
        }
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(data);
        mac.verify_slice(&expected).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_disables_signing() {
        assert!(Signer::new("").is_none());
    }

    #[test]
    fn known_vector() {
        let signer = Signer::new("key").unwrap();
        assert_eq!(
            signer.sign(b"The quick brown fox jumps over the lazy dog"),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn verify_accepts_own_signature_only() {
        let signer = Signer::new("secret").unwrap();
        let sig = signer.sign(b"payload");
        assert!(signer.verify(b"payload", &sig));
        assert!(!signer.verify(b"payload!", &sig));
        assert!(!Signer::new("other").unwrap().verify(b"payload", &sig));
        assert!(!signer.verify(b"payload", "not-hex"));
        assert!(!signer.verify(b"payload", ""));
    }

    #[test]
    fn any_single_character_change_to_the_signature_fails() {
        let signer = Signer::new("secret").unwrap();
        let sig = signer.sign(b"payload");
        for i in 0..sig.len() {
            let mut upper = sig.clone().into_bytes();
            upper[i] = upper[i].to_ascii_uppercase();
            let upper = String::from_utf8(upper).unwrap();
            if upper != sig {
                assert!(!signer.verify(b"payload", &upper), "upper-cased at {i}");
            }

            let mut flipped = sig.clone().into_bytes();
            flipped[i] = if flipped[i] == b'0' { b'1' } else { b'0' };
            let flipped = String::from_utf8(flipped).unwrap();
            assert!(!signer.verify(b"payload", &flipped), "changed at {i}");
        }
    }

    #[test]
    fn debug_hides_key() {
        let signer = Signer::new("secret").unwrap();
        assert!(!format!("{signer:?}").contains("secret"));
    }
}
