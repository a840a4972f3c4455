//! Request signing for the gateway's `HMAC_SHA512_V2` scheme.
//!
//! Every request is signed with a key derived per order: the terminal key
//! encrypts the order id with AES-128-CBC under an all-zero IV, and the
//! base64 of that ciphertext keys an HMAC-SHA512 over the encoded merchant
//! parameters. The zero IV is fixed by the gateway and must not change.

use aes::Aes128;
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::fmt;
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type HmacSha512 = Hmac<Sha512>;

const KEY_LEN: usize = 16;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("terminal secret key is empty")]
    EmptyKey,
    #[error("HMAC rejected the diversified key length")]
    KeyLength,
}

/// Signs and verifies merchant parameters for one terminal key.
#[derive(Clone)]
pub struct SignatureEngine {
    key: [u8; KEY_LEN],
}

impl SignatureEngine {
    /// Keys longer than 16 bytes are truncated, shorter ones right-padded
    /// with ASCII `'0'`.
    pub fn new(terminal_key: &str) -> Result<Self, SignatureError> {
        if terminal_key.is_empty() {
            return Err(SignatureError::EmptyKey);
        }
        let mut key = [b'0'; KEY_LEN];
        let raw = terminal_key.as_bytes();
        let len = raw.len().min(KEY_LEN);
        key[..len].copy_from_slice(&raw[..len]);
        Ok(Self { key })
    }

    fn diversified_key(&self, order: &str) -> Vec<u8> {
        let iv = [0u8; KEY_LEN];
        Aes128CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(order.as_bytes())
    }

    fn mac(&self, order: &str, params: &str) -> Result<HmacSha512, SignatureError> {
        let hmac_key = STANDARD.encode(self.diversified_key(order));
        let mut mac = HmacSha512::new_from_slice(hmac_key.as_bytes())
            .map_err(|_| SignatureError::KeyLength)?;
        mac.update(params.as_bytes());
        Ok(mac)
    }

    /// Signature over the already-encoded merchant parameters string.
    pub fn sign(&self, order: &str, params: &str) -> Result<String, SignatureError> {
        let digest = self.mac(order, params)?.finalize().into_bytes();
        Ok(URL_SAFE_NO_PAD.encode(digest))
    }

    /// Constant-time check of a signature received from the gateway. Either
    /// base64 alphabet is accepted, with or without padding.
    pub fn verify(&self, order: &str, params: &str, signature: &str) -> Result<bool, SignatureError> {
        let normalized: String = signature
            .trim()
            .trim_end_matches('=')
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                other => other,
            })
            .collect();
        let Ok(expected) = URL_SAFE_NO_PAD.decode(normalized) else {
            return Ok(false);
        };
        Ok(self.mac(order, params)?.verify_slice(&expected).is_ok())
    }
}

impl fmt::Debug for SignatureEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureEngine")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// One-shot signing without keeping an engine around.
pub fn compute_signature(terminal_key: &str, order: &str, params: &str) -> Result<String, SignatureError> {
    SignatureEngine::new(terminal_key)?.sign(order, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "DUMMY_KEY_TERMINAL";
    const PADDED_PARAMS: &str = "eyJEc19NZXJjaGFudF9BbW91bnQiOiIxMjQ5IiwiRHNfTWVyY2hhbnRfQ3VycmVuY3kiOiI5NzgiLCJEc19NZXJjaGFudF9NZXJjaGFudENvZGUiOiIxMjM0NTY3ODkiLCJEc19NZXJjaGFudF9PcmRlciI6IkFCQ0QxMjM0IiwiRHNfTWVyY2hhbnRfVGVybWluYWwiOiIwMDEiLCJEc19NZXJjaGFudF9UcmFuc2FjdGlvblR5cGUiOiIwIn0=";
    const METHOD_DATA: &str = "eyJ0aHJlZURTTWV0aG9kTm90aWZpY2F0aW9uVVJMIjoiaHR0cHM6Ly9zaG9wLmV4YW1wbGUuY29tL0Bub3RpZmljYXRpb25SZWRzeXMzRFMvQUJDRDEyMzQvOGRlODQ0MzAtMzMzNi00ZmY0LWIxOGQtZjA3M2I1NDZjY2VhIiwidGhyZWVEU1NlcnZlclRyYW5zSUQiOiI4ZGU4NDQzMC0zMzM2LTRmZjQtYjE4ZC1mMDczYjU0NmNjZWEifQ";

    #[test]
    fn test_known_signature() {
        let engine = SignatureEngine::new(KEY).unwrap();
        assert_eq!(
            engine.sign("ABCD1234", PADDED_PARAMS).unwrap(),
            "xWRjkaw-EwqkFa4thFiPfv1P5oEDl3mJXk79QnU9KDZtXVjNg0QVJbEVEGfpxRChUg1psFx-OChuFCFNpCBjhQ"
        );
    }

    #[test]
    fn test_signing_is_deterministic() {
        let engine = SignatureEngine::new(KEY).unwrap();
        let first = engine.sign("ABCD1234", METHOD_DATA).unwrap();
        let second = compute_signature(KEY, "ABCD1234", METHOD_DATA).unwrap();
        assert_eq!(first, second);
        assert!(!first.contains('='));
        assert_ne!(first, engine.sign("ABCD1235", METHOD_DATA).unwrap());
    }

    #[test]
    fn test_short_key_is_padded_with_zero_characters() {
        let short = compute_signature("shortkey", "ABCD1234", METHOD_DATA).unwrap();
        let padded = compute_signature("shortkey00000000", "ABCD1234", METHOD_DATA).unwrap();
        assert_eq!(short, padded);
        assert_eq!(
            short,
            "wurkV8eOgBj1BhKRoPtu68jld_NIyLR3wtt_FHquicPT96QEuyzmqTdPL96TV98aLxUm_7kxc6bNHJ7wrZO8Fg"
        );
    }

    #[test]
    fn test_long_key_is_truncated() {
        let long = compute_signature("0123456789abcdefXYZ", "ABCD1234", METHOD_DATA).unwrap();
        let exact = compute_signature("0123456789abcdef", "ABCD1234", METHOD_DATA).unwrap();
        assert_eq!(long, exact);
        assert_eq!(
            long,
            "X_rTo-UAVwKZPC1u4THX1WXAEBP2hMujW3Y9nCtGsA6K6EiMnXjdgFW_eE9W3qX-z5vg8SgCoc27JnKGk3WqTg"
        );
    }

    #[test]
    fn test_empty_key_is_rejected() {
        assert_eq!(SignatureEngine::new("").unwrap_err(), SignatureError::EmptyKey);
    }

    #[test]
    fn test_verify_accepts_both_alphabets() {
        let engine = SignatureEngine::new(KEY).unwrap();
        let signature = engine.sign("ABCD1234", PADDED_PARAMS).unwrap();
        let standard = format!("{}==", signature.replace('-', "+").replace('_', "/"));

        assert!(engine.verify("ABCD1234", PADDED_PARAMS, &signature).unwrap());
        assert!(engine.verify("ABCD1234", PADDED_PARAMS, &standard).unwrap());
        assert!(!engine.verify("ABCD9999", PADDED_PARAMS, &signature).unwrap());
        assert!(!engine.verify("ABCD1234", PADDED_PARAMS, "not base64!").unwrap());
    }

    #[test]
    fn test_debug_hides_key() {
        let engine = SignatureEngine::new(KEY).unwrap();
        assert!(!format!("{engine:?}").contains("DUMMY"));
    }
}
