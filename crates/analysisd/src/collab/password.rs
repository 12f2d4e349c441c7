//! Admin password encryption.

use aes::Aes256;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor, Encryptor};
use rand::{RngCore, rng};
use sha2::{Digest, Sha256};
use thiserror::Error;

const IV_BYTES: usize = 16;

/// Failures while decrypting an admin password.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// The text is not `base64(iv):base64(ciphertext)`.
    #[error("malformed password cipher text")]
    Malformed,
    /// Decryption or unpadding failed.
    #[error("password cipher text could not be decrypted")]
    Decrypt,
    /// The plaintext is not UTF-8.
    #[error("decrypted password is not valid UTF-8")]
    Encoding,
}

/// Decrypts passwords carried by admin requests.
pub trait PasswordCipher: Send + Sync {
    /// Returns the plaintext of `cipher_text`.
    fn decrypt(&self, cipher_text: &str) -> Result<String, CipherError>;
}

/// AES-256-CBC with PKCS#7 padding and a random IV per message.
///
/// The key is the SHA-256 digest of a shared passphrase. Cipher text is
/// written as `base64(iv):base64(ciphertext)`.
#[derive(Clone)]
pub struct AesPasswordCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for AesPasswordCipher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("AesPasswordCipher").finish_non_exhaustive()
    }
}

impl AesPasswordCipher {
    /// Derives the key from `passphrase`.
    #[must_use]
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self {
            key: Sha256::digest(passphrase.as_bytes()).into(),
        }
    }

    /// Encrypts `plaintext` for transmission in an admin request.
    #[must_use]
    pub fn encrypt(&self, plaintext: &str) -> String {
        let mut iv = [0_u8; IV_BYTES];
        rng().fill_bytes(&mut iv);
        let encryptor = Encryptor::<Aes256>::new((&self.key).into(), (&iv).into());
        let cipher_text = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        format!("{}:{}", STANDARD.encode(iv), STANDARD.encode(cipher_text))
    }
}

impl PasswordCipher for AesPasswordCipher {
    fn decrypt(&self, cipher_text: &str) -> Result<String, CipherError> {
        let (encoded_iv, encoded_body) =
            cipher_text.split_once(':').ok_or(CipherError::Malformed)?;
        let iv = STANDARD
            .decode(encoded_iv)
            .map_err(|_| CipherError::Malformed)?;
        let body = STANDARD
            .decode(encoded_body)
            .map_err(|_| CipherError::Malformed)?;
        let decryptor = Decryptor::<Aes256>::new_from_slices(&self.key, &iv)
            .map_err(|_| CipherError::Malformed)?;
        let plaintext = decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(&body)
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::Encoding)
    }
}
