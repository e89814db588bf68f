//! Session token envelope.
//!
//! Browsers present an opaque token minted by the sign-in service:
//! `base64(IV16) ':' base64(ciphertext)`, AES-256-CBC with PKCS#7 padding.
//! The key is the SHA-256 of the configured password. The plaintext is a JSON
//! connection descriptor:
//!
//! ```json
//! { "type": "rdp", "arguments": { "hostname": "10.0.0.5", "port": "3389" } }
//! ```
//!
//! Descriptor keys are matched case-insensitively; argument keys are
//! lower-cased so the merge and connect lookups are uniform. The envelope is
//! not replay-resistant.

use std::collections::HashMap;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{GatewayError, Result};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Decrypted connection descriptor, immutable once merged.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDescriptor {
    /// Lower-cased protocol tag ("rdp", "vnc", "ssh", ...)
    pub protocol: String,
    /// Protocol-specific parameters, keys lower-cased
    pub arguments: HashMap<String, String>,
}

fn derive_key(password: &str) -> Zeroizing<[u8; 32]> {
    let digest = Sha256::digest(password.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&digest);
    key
}

fn bad_token(detail: impl Into<String>) -> GatewayError {
    GatewayError::BadToken(detail.into())
}

/// Decrypt and parse a session token.
///
/// Every failure mode (malformed base64, wrong IV size, cipher or padding
/// error, malformed JSON, missing fields) reports as `BadToken`.
pub fn decrypt(password: &str, token: &str) -> Result<ConnectionDescriptor> {
    let (iv_b64, ciphertext_b64) = token
        .split_once(':')
        .ok_or_else(|| bad_token("token missing ':' separator"))?;

    let iv: [u8; 16] = BASE64
        .decode(iv_b64)
        .map_err(|e| bad_token(format!("invalid IV base64: {}", e)))?
        .try_into()
        .map_err(|v: Vec<u8>| bad_token(format!("IV must be 16 bytes, got {}", v.len())))?;
    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .map_err(|e| bad_token(format!("invalid ciphertext base64: {}", e)))?;

    let key = derive_key(password);
    let plaintext = Zeroizing::new(
        Aes256CbcDec::new((&*key).into(), (&iv).into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| bad_token("decryption failed"))?,
    );

    let json = std::str::from_utf8(&plaintext).map_err(|_| bad_token("plaintext not UTF-8"))?;
    parse_descriptor(json)
}

/// Encrypt a descriptor JSON document into token form.
///
/// Inverse of [`decrypt`]; used by tests and local tooling standing in for
/// the sign-in service.
pub fn encrypt(password: &str, iv: &[u8; 16], descriptor_json: &str) -> String {
    let key = derive_key(password);
    let ciphertext = Aes256CbcEnc::new((&*key).into(), iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(descriptor_json.as_bytes());
    format!("{}:{}", BASE64.encode(iv), BASE64.encode(ciphertext))
}

/// Parse a descriptor JSON document with case-insensitive keys.
pub fn parse_descriptor(json: &str) -> Result<ConnectionDescriptor> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| bad_token(format!("invalid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| bad_token("descriptor is not a JSON object"))?;

    let protocol = get_ignore_case(object, "type")
        .and_then(Value::as_str)
        .ok_or_else(|| bad_token("descriptor missing 'type'"))?
        .to_ascii_lowercase();

    let raw_arguments = get_ignore_case(object, "arguments")
        .and_then(Value::as_object)
        .ok_or_else(|| bad_token("descriptor missing 'arguments'"))?;

    let mut arguments = HashMap::with_capacity(raw_arguments.len());
    for (key, value) in raw_arguments {
        let value = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(bad_token(format!(
                    "argument '{}' has unsupported type: {}",
                    key, other
                )))
            }
        };
        arguments.insert(key.to_ascii_lowercase(), value);
    }

    Ok(ConnectionDescriptor {
        protocol,
        arguments,
    })
}

fn get_ignore_case<'a>(object: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a Value> {
    object
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}
