//! Decrypt pipeline
//!
//! Payloads are `IV (16 bytes) || AES-256-CBC ciphertext`. Padding removal is
//! lenient: a well-formed PKCS#7 tail is stripped, anything else is returned
//! as-is, because some clients send block-aligned data without padding.

mod secret;

pub use secret::{
    provider_from_config, EncryptionKey, FileSecret, SecretError, SecretProvider, StaticSecret,
};

use aes::Aes256;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

/// AES block size, also the IV length
pub const BLOCK_SIZE: usize = 16;
pub const IV_LEN: usize = BLOCK_SIZE;

type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

/// Decryption errors
#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("Encrypted payload is truncated: {len} bytes, need at least 16")]
    Truncated { len: usize },

    #[error("Ciphertext length {len} is not a multiple of 16")]
    BadLength { len: usize },

    #[error("Cipher failure: {0}")]
    Cipher(String),

    #[error(transparent)]
    Secret(#[from] SecretError),
}

/// IV and ciphertext borrowed from one payload
#[derive(Debug, Clone, Copy)]
pub struct EncryptedPayload<'a> {
    pub iv: &'a [u8],
    pub ciphertext: &'a [u8],
}

impl<'a> EncryptedPayload<'a> {
    /// Split and validate the structure of a payload
    pub fn parse(payload: &'a [u8]) -> Result<Self, DecryptError> {
        if payload.len() < IV_LEN {
            return Err(DecryptError::Truncated { len: payload.len() });
        }
        let (iv, ciphertext) = payload.split_at(IV_LEN);
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(DecryptError::BadLength {
                len: ciphertext.len(),
            });
        }
        Ok(Self { iv, ciphertext })
    }
}

/// Decrypted plaintext
#[derive(Debug, Clone)]
pub struct Decrypted {
    pub plaintext: Vec<u8>,
    /// Length straight out of the cipher, before unpadding
    pub original_len: usize,
    pub padding_stripped: bool,
}

/// Decrypt `IV || ciphertext` with AES-256-CBC
pub fn decrypt(payload: &[u8], key: &EncryptionKey) -> Result<Decrypted, DecryptError> {
    let parts = EncryptedPayload::parse(payload)?;

    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), parts.iv)
        .map_err(|e| DecryptError::Cipher(e.to_string()))?;
    let mut plaintext = cipher
        .decrypt_padded_vec_mut::<NoPadding>(parts.ciphertext)
        .map_err(|e| DecryptError::Cipher(e.to_string()))?;

    let original_len = plaintext.len();
    let unpadded_len = strip_pkcs7_lenient(&plaintext).len();
    plaintext.truncate(unpadded_len);

    tracing::debug!(
        size = original_len,
        padding = original_len - unpadded_len,
        "Payload decrypted"
    );

    Ok(Decrypted {
        plaintext,
        original_len,
        padding_stripped: unpadded_len != original_len,
    })
}

/// Encrypt with PKCS#7 padding, returning `IV || ciphertext`
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey, iv: &[u8; IV_LEN]) -> Vec<u8> {
    let cipher = Aes256CbcEnc::new(&(*key.as_bytes()).into(), &(*iv).into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut payload = Vec::with_capacity(IV_LEN + ciphertext.len());
    payload.extend_from_slice(iv);
    payload.extend_from_slice(&ciphertext);
    payload
}

/// Strip a PKCS#7 tail if one is present, otherwise return the input untouched
pub fn strip_pkcs7_lenient(data: &[u8]) -> &[u8] {
    let Some(&last) = data.last() else {
        return data;
    };
    let pad = last as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > data.len() {
        return data;
    }

    let (body, tail) = data.split_at(data.len() - pad);
    if tail.iter().all(|&b| b == last) {
        body
    } else {
        data
    }
}
