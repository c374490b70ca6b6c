//! Key pair persistence
//!
//! Keys live in one directory as two JSON files: `pubkey.json` holding
//! `{"n": "<decimal>"}` and `privkey.json` holding `{"p": "...", "q": "..."}`.
//! The public key file is checked against the private key on load.

use crate::error::KeyStoreError;
use crate::paillier::{generate_keypair, KeyPair, PrivateKey, PublicKey};
use log::{info, warn};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const PUBLIC_KEY_FILE: &str = "pubkey.json";
pub const PRIVATE_KEY_FILE: &str = "privkey.json";

/// Public key as published to producers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicKeyRecord {
    pub n: String,
}

impl From<&PublicKey> for PublicKeyRecord {
    fn from(key: &PublicKey) -> Self {
        Self {
            n: key.n().to_string(),
        }
    }
}

impl PublicKeyRecord {
    /// Rebuild the public key
    ///
    /// # Errors
    ///
    /// Returns `KeyStoreError::Format` when `n` is not a decimal integer and
    /// `KeyStoreError::Crypto` when it is not a usable modulus.
    pub fn to_public_key(&self) -> Result<PublicKey, KeyStoreError> {
        let n = parse_decimal(&self.n, "n")?;
        Ok(PublicKey::from_modulus(n)?)
    }
}

#[derive(Serialize, Deserialize)]
struct PrivateKeyRecord {
    p: String,
    q: String,
}

/// Directory-backed key store
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.dir.join(PUBLIC_KEY_FILE)
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }

    /// Whether a private key has been stored
    pub fn exists(&self) -> bool {
        self.private_key_path().is_file()
    }

    /// Load only the public key, as a producer would
    pub fn load_public_key(&self) -> Result<PublicKey, KeyStoreError> {
        let record: PublicKeyRecord = read_json(&self.public_key_path())?;
        record.to_public_key()
    }

    /// Load the full key pair
    ///
    /// # Errors
    ///
    /// Returns `KeyStoreError::Mismatch` when `pubkey.json` exists but does not
    /// belong to the stored private key.
    pub fn load(&self) -> Result<KeyPair, KeyStoreError> {
        let path = self.private_key_path();
        let record: PrivateKeyRecord = read_json(&path)?;
        let p = parse_decimal(&record.p, "p")?;
        let q = parse_decimal(&record.q, "q")?;
        let private = PrivateKey::from_primes(p, q)?;
        let public = private.public_key().clone();

        if self.public_key_path().exists() {
            let published = self.load_public_key()?;
            if published != public {
                return Err(KeyStoreError::Mismatch);
            }
        } else {
            warn!(
                "{} missing, using the public key derived from the private key",
                self.public_key_path().display()
            );
        }

        info!(
            "Loaded {}-bit key pair {} from {}",
            public.bits(),
            public.fingerprint(),
            self.dir.display()
        );
        Ok(KeyPair { public, private })
    }

    /// Write both key files
    ///
    /// # Errors
    ///
    /// Returns `KeyStoreError::AlreadyExists` when a private key is already
    /// stored and `overwrite` is false.
    pub fn save(&self, pair: &KeyPair, overwrite: bool) -> Result<(), KeyStoreError> {
        let private_path = self.private_key_path();
        if !overwrite && private_path.exists() {
            return Err(KeyStoreError::AlreadyExists(
                private_path.display().to_string(),
            ));
        }

        fs::create_dir_all(&self.dir).map_err(|source| KeyStoreError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;

        let (p, q) = pair.private.primes();
        let private_record = PrivateKeyRecord {
            p: p.to_string(),
            q: q.to_string(),
        };
        write_json(&private_path, &private_record, true)?;
        write_json(
            &self.public_key_path(),
            &PublicKeyRecord::from(&pair.public),
            false,
        )?;

        info!(
            "Saved key pair {} to {}",
            pair.public.fingerprint(),
            self.dir.display()
        );
        Ok(())
    }

    /// Load the stored key pair, generating and saving one if none exists
    pub fn load_or_generate(&self, bits: u64) -> Result<KeyPair, KeyStoreError> {
        if self.exists() {
            return self.load();
        }

        info!("No key pair in {}, generating {} bits", self.dir.display(), bits);
        let pair = generate_keypair(bits)?;
        self.save(&pair, false)?;
        Ok(pair)
    }
}

fn parse_decimal(text: &str, field: &str) -> Result<BigUint, KeyStoreError> {
    text.trim()
        .parse::<BigUint>()
        .map_err(|_| KeyStoreError::Format(format!("field {} is not a decimal integer", field)))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, KeyStoreError> {
    let text = fs::read_to_string(path).map_err(|source| KeyStoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| KeyStoreError::Json {
        path: path.display().to_string(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T, secret: bool) -> Result<(), KeyStoreError> {
    let io_error = |source| KeyStoreError::Io {
        path: path.display().to_string(),
        source,
    };
    let json = serde_json::to_string_pretty(value).map_err(|source| KeyStoreError::Json {
        path: path.display().to_string(),
        source,
    })?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if secret {
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = secret;

    let mut file = options.open(path).map_err(io_error)?;
    file.write_all(json.as_bytes()).map_err(io_error)?;
    file.write_all(b"\n").map_err(io_error)?;
    Ok(())
}
