use std::fs;
use std::path::Path;

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};

/// ECDSA keypair over secp256k1; signatures digest with SHA-256.
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Compressed SEC1 public key bytes.
    pub fn public(&self) -> Vec<u8> {
        self.signing
            .verifying_key()
            .to_sec1_bytes()
            .as_ref()
            .to_vec()
    }

    pub fn secret(&self) -> Vec<u8> {
        self.signing.to_bytes().to_vec()
    }

    /// Sign `data`, returning `(signature, public_key)` raw byte pairs.
    pub fn sign(&self, data: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let signature: Signature = self.signing.sign(data);
        (signature.to_bytes().to_vec(), self.public())
    }
}

pub fn generate_keypair() -> Keypair {
    Keypair {
        signing: SigningKey::random(&mut rand::thread_rng()),
    }
}

pub fn keypair_from_secret(secret: &[u8]) -> ChainResult<Keypair> {
    let signing = SigningKey::from_slice(secret)
        .map_err(|err| ChainError::Crypto(format!("invalid secret key bytes: {err}")))?;
    Ok(Keypair { signing })
}

/// Verify `signature` over `data` against `public_key` (any SEC1 encoding).
/// Returns the public key bytes on success so callers can attribute the
/// transaction to its signer.
pub fn verify(data: &[u8], signature: &[u8], public_key: &[u8]) -> ChainResult<Vec<u8>> {
    let verifying =
        VerifyingKey::from_sec1_bytes(public_key).map_err(|_| ChainError::InvalidSignature)?;
    let signature = Signature::from_slice(signature).map_err(|_| ChainError::InvalidSignature)?;
    verifying
        .verify(data, &signature)
        .map_err(|_| ChainError::InvalidSignature)?;
    Ok(public_key.to_vec())
}

/// Extract the raw public key bytes from a DER `SubjectPublicKeyInfo`.
///
/// The structure is `SEQUENCE { AlgorithmIdentifier, BIT STRING }`; the bit
/// string body (after its unused-bits octet) is the SEC1 point. The key is
/// validated as a secp256k1 point before it is returned.
pub fn decode_der_public_key(der: &[u8]) -> ChainResult<Vec<u8>> {
    let (outer, rest) = der_element(der, 0x30)?;
    if !rest.is_empty() {
        return Err(ChainError::Crypto("trailing bytes after SPKI".into()));
    }
    let (_algorithm, after_algorithm) = der_element(outer, 0x30)?;
    let (bit_string, trailing) = der_element(after_algorithm, 0x03)?;
    if !trailing.is_empty() {
        return Err(ChainError::Crypto("trailing bytes in SPKI body".into()));
    }
    let (&unused_bits, key) = bit_string
        .split_first()
        .ok_or_else(|| ChainError::Crypto("empty bit string".into()))?;
    if unused_bits != 0 {
        return Err(ChainError::Crypto("unsupported bit string padding".into()));
    }
    VerifyingKey::from_sec1_bytes(key)
        .map_err(|err| ChainError::Crypto(format!("invalid public key bytes: {err}")))?;
    Ok(key.to_vec())
}

/// Read one DER element of the expected tag, returning its contents and the
/// remainder of the input. Only definite short and long lengths appear in
/// SPKI documents.
fn der_element(input: &[u8], expected_tag: u8) -> ChainResult<(&[u8], &[u8])> {
    let (&tag, rest) = input
        .split_first()
        .ok_or_else(|| ChainError::Crypto("truncated DER element".into()))?;
    if tag != expected_tag {
        return Err(ChainError::Crypto(format!(
            "unexpected DER tag {tag:#04x}, wanted {expected_tag:#04x}"
        )));
    }
    let (&first_len, rest) = rest
        .split_first()
        .ok_or_else(|| ChainError::Crypto("truncated DER length".into()))?;
    let (length, rest) = if first_len < 0x80 {
        (first_len as usize, rest)
    } else {
        let count = (first_len & 0x7f) as usize;
        if count == 0 || count > std::mem::size_of::<usize>() || rest.len() < count {
            return Err(ChainError::Crypto("malformed DER length".into()));
        }
        let mut length = 0usize;
        for &byte in &rest[..count] {
            length = length << 8 | byte as usize;
        }
        (length, &rest[count..])
    };
    if rest.len() < length {
        return Err(ChainError::Crypto("DER element overruns input".into()));
    }
    Ok(rest.split_at(length))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKeypair {
    pub public_key: String,
    pub secret_key: String,
}

pub fn save_keypair(path: &Path, keypair: &Keypair) -> ChainResult<()> {
    let stored = StoredKeypair {
        public_key: hex::encode(keypair.public()),
        secret_key: hex::encode(keypair.secret()),
    };
    let encoded = toml::to_string_pretty(&stored)
        .map_err(|err| ChainError::Config(format!("failed to encode keypair: {err}")))?;
    fs::create_dir_all(path.parent().unwrap_or_else(|| Path::new(".")))?;
    fs::write(path, encoded)?;
    Ok(())
}

pub fn load_keypair(path: &Path) -> ChainResult<Keypair> {
    let raw = fs::read_to_string(path)?;
    let stored: StoredKeypair = toml::from_str(&raw)
        .map_err(|err| ChainError::Config(format!("failed to decode keypair: {err}")))?;
    let secret = hex::decode(stored.secret_key)
        .map_err(|err| ChainError::Config(format!("invalid secret key encoding: {err}")))?;
    keypair_from_secret(&secret)
}

pub fn load_or_generate_keypair(path: &Path) -> ChainResult<Keypair> {
    if path.exists() {
        load_keypair(path)
    } else {
        let keypair = generate_keypair();
        save_keypair(path, &keypair)?;
        Ok(keypair)
    }
}
