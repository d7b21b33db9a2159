//! Encryption of the secrets kept in the config file.
//!
//! Passwords and tokens are stored as `enc:<base64(nonce | ciphertext)>`
//! sealed with AES-256-GCM. The key lives in its own file, readable by the
//! owner only, and is generated on first use.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::prelude::*;
use derive_more::{Display, Error};

/// Key file used if none is given.
pub const DEFAULT_KEY_FILE: &str = "cx_backup.key";

/// Marks a sealed value.
pub const SEALED_PREFIX: &str = "enc:";

const NONCE_LEN: usize = 12;

#[derive(Debug, Display, Error)]
/// Errors on loading the key or sealing and opening secrets.
pub enum SecretError {
    #[display("Accessing key file {path:?} failed: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[display("Key file {_0:?} doesn't contain a valid key")]
    InvalidKey(#[error(ignore)] PathBuf),
    #[display("Encrypting a secret failed")]
    Seal,
    #[display("Decrypting a secret failed, it was sealed with another key or is damaged")]
    Open,
}

/// Seals and opens secrets with one key.
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}

impl SecretBox {
    /// Box with a fresh random key, which is lost once dropped.
    pub fn generate() -> Self {
        Self {
            cipher: Aes256Gcm::new(&Aes256Gcm::generate_key(OsRng)),
        }
    }

    /// Loads the key at `path`, creating it with mode `0600` if missing.
    pub fn load_or_create(path: &Path) -> Result<Self, SecretError> {
        let io_err = |source| SecretError::Io {
            path: path.to_path_buf(),
            source,
        };

        match fs::read_to_string(path) {
            Ok(encoded) => {
                let key = BASE64_STANDARD
                    .decode(encoded.trim())
                    .map_err(|_| SecretError::InvalidKey(path.to_path_buf()))?;
                let cipher = Aes256Gcm::new_from_slice(&key)
                    .map_err(|_| SecretError::InvalidKey(path.to_path_buf()))?;
                Ok(Self { cipher })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let key = Aes256Gcm::generate_key(OsRng);
                let mut file = create_key_file(path).map_err(io_err)?;
                file.write_all(BASE64_STANDARD.encode(key).as_bytes())
                    .map_err(io_err)?;
                log::info!(target: "secret", "Generated new key file {}", path.display());

                Ok(Self {
                    cipher: Aes256Gcm::new(&key),
                })
            }
            Err(source) => Err(io_err(source)),
        }
    }

    pub fn is_sealed(value: &str) -> bool {
        value.starts_with(SEALED_PREFIX)
    }

    pub fn seal(&self, plain: &str) -> Result<String, SecretError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|_| SecretError::Seal)?;

        let mut sealed = nonce.to_vec();
        sealed.extend(ciphertext);
        Ok(format!("{SEALED_PREFIX}{}", BASE64_STANDARD.encode(sealed)))
    }

    /// Decrypts a sealed `value`. Values without [SEALED_PREFIX] are returned as is.
    pub fn open(&self, value: &str) -> Result<String, SecretError> {
        let Some(encoded) = value.strip_prefix(SEALED_PREFIX) else {
            return Ok(value.to_string());
        };

        let sealed = BASE64_STANDARD
            .decode(encoded)
            .map_err(|_| SecretError::Open)?;
        if sealed.len() < NONCE_LEN {
            return Err(SecretError::Open);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecretError::Open)?;

        String::from_utf8(plain).map_err(|_| SecretError::Open)
    }
}

fn create_key_file(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}
