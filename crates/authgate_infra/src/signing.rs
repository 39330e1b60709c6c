//! HMAC-SHA256 decision-token signing (spec §4.9, §5 "Shared-resource
//! policy": signing keys are read-only at runtime, refreshed by atomic swap).

use authgate_core::token::{Signer, SignatureAlgorithm, TokenVerifier};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::{Arc, Mutex};

type HmacSha256 = Hmac<Sha256>;

/// Holds the current signing key behind a mutex so a rotation is a single
/// atomic swap; readers never observe a half-updated key.
pub struct KeyedSigner {
    key: Mutex<Arc<Vec<u8>>>,
}

impl KeyedSigner {
    pub fn new(key_material: &str) -> Self {
        Self {
            key: Mutex::new(Arc::new(key_material.as_bytes().to_vec())),
        }
    }

    /// Atomically replace the active key. Callers already holding a `Signer`
    /// reference continue signing with this instance; the next `sign` call
    /// observes the new key.
    pub fn rotate(&self, new_key_material: &str) {
        let mut guard = self.key.lock().expect("signing key mutex poisoned");
        *guard = Arc::new(new_key_material.as_bytes().to_vec());
    }

    fn current_key(&self) -> Arc<Vec<u8>> {
        self.key.lock().expect("signing key mutex poisoned").clone()
    }
}

impl Signer for KeyedSigner {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::HmacSha256V0
    }

    fn sign(&self, bytes: &[u8]) -> Vec<u8> {
        let key = self.current_key();
        let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts any key length");
        mac.update(bytes);
        mac.finalize().into_bytes().to_vec()
    }
}

impl TokenVerifier for KeyedSigner {
    fn verify_signature(&self, algorithm: SignatureAlgorithm, bytes: &[u8], signature_hex: &str) -> bool {
        match algorithm {
            SignatureAlgorithm::HmacSha256V0 => {
                let Ok(expected) = hex::decode(signature_hex) else {
                    return false;
                };
                let key = self.current_key();
                let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts any key length");
                mac.update(bytes);
                mac.verify_slice(&expected).is_ok()
            }
        }
    }
}
