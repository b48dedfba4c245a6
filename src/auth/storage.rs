//! Cookie jar persistence with optional encryption at rest.
//!
//! The jar is stored as a single blob, `cookies.bin`, inside the directory the
//! caller chooses. Encrypted blobs use XChaCha20-Poly1305 with a key derived
//! from key material found in `GHTOKEN_MASTER_KEY` or the system keychain.

use std::env;
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use cookie_store::CookieStore;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// File name of the persisted jar inside the persistence directory.
pub const COOKIE_FILE_NAME: &str = "cookies.bin";
/// Environment variable overriding the keychain-held encryption key.
pub const MASTER_KEY_ENV: &str = "GHTOKEN_MASTER_KEY";

const KEYRING_SERVICE: &str = "ghtoken";
const KEYRING_ENTRY_NAME: &str = "cookie-master-key-v1";
const MAGIC: &[u8; 4] = b"GHT1";
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

/// Errors for persisted cookie storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The jar could not be serialized or deserialized.
    #[error("cookie jar serialization failed: {0}")]
    Serialization(String),
    /// No env key and the keychain is unreachable.
    #[error(
        "unable to access system keychain for cookie encryption key; set GHTOKEN_MASTER_KEY or use plaintext cookies"
    )]
    KeychainUnavailable,
    /// Stored payload is malformed.
    #[error("persisted cookie payload is invalid")]
    InvalidPayload,
    /// Encryption failed.
    #[error("failed to encrypt persisted cookies")]
    EncryptionFailed,
    /// Decryption failed (wrong key or tampered payload).
    #[error("failed to decrypt persisted cookies")]
    DecryptionFailed,
}

/// How the persisted jar is protected on disk.
#[derive(Clone, Default)]
pub enum CookieEncryption {
    /// Serialized jar written as-is.
    Plaintext,
    /// Encrypt with the given key material.
    Key(String),
    /// Encrypt with key material from `GHTOKEN_MASTER_KEY` or the keychain.
    #[default]
    Keychain,
}

impl std::fmt::Debug for CookieEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plaintext => f.write_str("Plaintext"),
            Self::Key(_) => f.write_str("Key(<redacted>)"),
            Self::Keychain => f.write_str("Keychain"),
        }
    }
}

type KeySource = fn() -> Result<String, StorageError>;

/// Reads and writes the jar blob at a fixed location.
///
/// Keychain key material is looked up on first use and reused for every later
/// load and save, clones included.
#[derive(Clone)]
pub struct CookieBlobStore {
    path: PathBuf,
    encryption: CookieEncryption,
    resolved_key: Arc<OnceLock<String>>,
    key_source: KeySource,
}

impl std::fmt::Debug for CookieBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieBlobStore")
            .field("path", &self.path)
            .field("encryption", &self.encryption)
            .finish_non_exhaustive()
    }
}

impl CookieBlobStore {
    /// Blob store for `dir/cookies.bin`.
    #[must_use]
    pub fn new(dir: &Path, encryption: CookieEncryption) -> Self {
        Self {
            path: dir.join(COOKIE_FILE_NAME),
            encryption,
            resolved_key: Arc::new(OnceLock::new()),
            key_source: load_or_create_key,
        }
    }

    #[cfg(test)]
    fn with_key_source(mut self, key_source: KeySource) -> Self {
        self.key_source = key_source;
        self
    }

    /// Full path of the blob.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted jar. `Ok(None)` when nothing has been saved yet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when reading, decryption, or parsing fails.
    pub fn load(&self) -> Result<Option<CookieStore>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)?;
        let plaintext = match self.key_material()? {
            Some(key) => decrypt_bytes(&bytes, &key)?,
            None => bytes,
        };
        let store = cookie_store::serde::json::load(plaintext.as_slice())
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(Some(store))
    }

    /// Saves the jar, including session cookies, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when serialization, encryption, or writing fails.
    pub fn save(&self, store: &CookieStore) -> Result<(), StorageError> {
        let mut plaintext = Vec::new();
        cookie_store::serde::json::save_incl_expired_and_nonpersistent(store, &mut plaintext)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let payload = match self.key_material()? {
            Some(key) => encrypt_bytes(&plaintext, &key)?,
            None => plaintext,
        };
        write_payload(&self.path, &payload)
    }

    fn key_material(&self) -> Result<Option<String>, StorageError> {
        match &self.encryption {
            CookieEncryption::Plaintext => Ok(None),
            CookieEncryption::Key(key) => Ok(Some(key.clone())),
            CookieEncryption::Keychain => {
                if let Some(key) = self.resolved_key.get() {
                    return Ok(Some(key.clone()));
                }
                let key = (self.key_source)()?;
                Ok(Some(self.resolved_key.get_or_init(|| key).clone()))
            }
        }
    }
}

fn write_payload(path: &Path, payload: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, payload)?;
    set_owner_only_permissions(path)?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

fn load_or_create_key() -> Result<String, StorageError> {
    if let Some(from_env) = env::var_os(MASTER_KEY_ENV) {
        let key = from_env.to_string_lossy().trim().to_string();
        if !key.is_empty() {
            return Ok(key);
        }
    }

    // keyring backends can panic on headless systems
    let entry = catch_unwind(|| keyring::Entry::new(KEYRING_SERVICE, KEYRING_ENTRY_NAME))
        .map_err(|_| StorageError::KeychainUnavailable)?
        .map_err(|_| StorageError::KeychainUnavailable)?;

    let lookup = catch_unwind(AssertUnwindSafe(|| entry.get_password()))
        .map_err(|_| StorageError::KeychainUnavailable)?;
    existing_or_generated(lookup, |generated| {
        catch_unwind(AssertUnwindSafe(|| entry.set_password(generated)))
            .map_err(|_| StorageError::KeychainUnavailable)?
            .map_err(|_| StorageError::KeychainUnavailable)
    })
}

/// A fresh key is generated only when the keychain has no entry. Any other
/// lookup failure is an error and the stored key is left in place.
fn existing_or_generated(
    lookup: Result<String, keyring::Error>,
    store: impl FnOnce(&str) -> Result<(), StorageError>,
) -> Result<String, StorageError> {
    match lookup {
        Ok(existing) if !existing.trim().is_empty() => Ok(existing),
        Ok(_) | Err(keyring::Error::NoEntry) => {
            let generated = generate_key_material();
            store(&generated)?;
            Ok(generated)
        }
        Err(_) => Err(StorageError::KeychainUnavailable),
    }
}

fn generate_key_material() -> String {
    let mut bytes = [0_u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn derive_key_bytes(key_material: &str) -> [u8; KEY_LEN] {
    let digest = Sha256::digest(key_material.as_bytes());
    let mut key = [0_u8; KEY_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    key
}

fn encrypt_bytes(plaintext: &[u8], key_material: &str) -> Result<Vec<u8>, StorageError> {
    let key_bytes = derive_key_bytes(key_material);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key_bytes));

    let mut nonce = [0_u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| StorageError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    output.extend_from_slice(MAGIC);
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

fn decrypt_bytes(payload: &[u8], key_material: &str) -> Result<Vec<u8>, StorageError> {
    if payload.len() < MAGIC.len() + NONCE_LEN || &payload[..MAGIC.len()] != MAGIC {
        return Err(StorageError::InvalidPayload);
    }

    let key_bytes = derive_key_bytes(key_material);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key_bytes));
    let (nonce, ciphertext) = payload[MAGIC.len()..].split_at(NONCE_LEN);

    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| StorageError::DecryptionFailed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;
    use url::Url;

    use super::*;

    fn store_with_session_cookie() -> CookieStore {
        let mut store = CookieStore::default();
        let url = Url::parse("https://github.com/").unwrap();
        store
            .parse("user_session=secret; Path=/; Secure; HttpOnly", &url)
            .unwrap();
        store
    }

    fn has_session_cookie(store: &CookieStore) -> bool {
        store
            .iter_any()
            .any(|cookie| cookie.name() == "user_session" && cookie.value() == "secret")
    }

    #[test]
    fn test_round_trip_with_explicit_key_keeps_session_cookies() {
        let tempdir = TempDir::new().unwrap();
        let blob = CookieBlobStore::new(tempdir.path(), CookieEncryption::Key("k".into()));

        blob.save(&store_with_session_cookie()).unwrap();
        let loaded = blob.load().unwrap().unwrap();
        assert!(has_session_cookie(&loaded));
    }

    #[test]
    fn test_round_trip_plaintext() {
        let tempdir = TempDir::new().unwrap();
        let blob = CookieBlobStore::new(tempdir.path(), CookieEncryption::Plaintext);

        blob.save(&store_with_session_cookie()).unwrap();
        let raw = fs::read_to_string(blob.path()).unwrap();
        assert!(raw.contains("user_session"));
        assert!(has_session_cookie(&blob.load().unwrap().unwrap()));
    }

    #[test]
    fn test_encrypted_blob_does_not_leak_cookie_value() {
        let tempdir = TempDir::new().unwrap();
        let blob = CookieBlobStore::new(tempdir.path(), CookieEncryption::Key("k".into()));
        blob.save(&store_with_session_cookie()).unwrap();

        let raw = fs::read(blob.path()).unwrap();
        assert!(raw.starts_with(MAGIC));
        assert!(!raw.windows(6).any(|window| window == b"secret"));
    }

    #[test]
    fn test_missing_blob_loads_as_none() {
        let tempdir = TempDir::new().unwrap();
        let blob = CookieBlobStore::new(tempdir.path(), CookieEncryption::Plaintext);
        assert!(blob.load().unwrap().is_none());
    }

    #[test]
    fn test_wrong_key_fails_to_decrypt() {
        let tempdir = TempDir::new().unwrap();
        CookieBlobStore::new(tempdir.path(), CookieEncryption::Key("key-a".into()))
            .save(&store_with_session_cookie())
            .unwrap();

        let result =
            CookieBlobStore::new(tempdir.path(), CookieEncryption::Key("key-b".into())).load();
        assert!(matches!(result, Err(StorageError::DecryptionFailed)));
    }

    #[test]
    fn test_garbage_payload_is_invalid() {
        let tempdir = TempDir::new().unwrap();
        let blob = CookieBlobStore::new(tempdir.path(), CookieEncryption::Key("k".into()));
        fs::write(blob.path(), b"not-encrypted").unwrap();
        assert!(matches!(blob.load(), Err(StorageError::InvalidPayload)));

        let plain = CookieBlobStore::new(tempdir.path(), CookieEncryption::Plaintext);
        assert!(matches!(plain.load(), Err(StorageError::Serialization(_))));
    }

    #[test]
    fn test_save_creates_missing_directories() {
        let tempdir = TempDir::new().unwrap();
        let nested = tempdir.path().join("a").join("b");
        let blob = CookieBlobStore::new(&nested, CookieEncryption::Plaintext);
        blob.save(&CookieStore::default()).unwrap();
        assert!(nested.join(COOKIE_FILE_NAME).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tempdir = TempDir::new().unwrap();
        let blob = CookieBlobStore::new(tempdir.path(), CookieEncryption::Key("k".into()));
        blob.save(&store_with_session_cookie()).unwrap();

        let mode = fs::metadata(blob.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_encryption_debug_redacts_key() {
        let debug = format!("{:?}", CookieEncryption::Key("hunter2".into()));
        assert!(!debug.contains("hunter2"));
    }

    static KEY_LOOKUPS: AtomicUsize = AtomicUsize::new(0);

    fn counting_key_source() -> Result<String, StorageError> {
        KEY_LOOKUPS.fetch_add(1, Ordering::SeqCst);
        Ok("keychain-key".to_string())
    }

    #[test]
    fn test_keychain_key_is_resolved_once_across_saves_and_clones() {
        let tempdir = TempDir::new().unwrap();
        let blob = CookieBlobStore::new(tempdir.path(), CookieEncryption::Keychain)
            .with_key_source(counting_key_source);
        let clone = blob.clone();

        for _ in 0..5 {
            blob.save(&store_with_session_cookie()).unwrap();
        }
        assert!(has_session_cookie(&clone.load().unwrap().unwrap()));
        assert_eq!(KEY_LOOKUPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_keychain_entry_generates_and_stores_key() {
        let mut stored = None;
        let key = existing_or_generated(Err(keyring::Error::NoEntry), |generated| {
            stored = Some(generated.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(stored.as_deref(), Some(key.as_str()));
    }

    #[test]
    fn test_keychain_failure_does_not_replace_key() {
        let failure = keyring::Error::NoStorageAccess("locked".into());
        let result = existing_or_generated(Err(failure), |_| {
            panic!("key must not be overwritten");
        });
        assert!(matches!(result, Err(StorageError::KeychainUnavailable)));
    }

    #[test]
    fn test_existing_keychain_key_is_reused() {
        let key = existing_or_generated(Ok("stored".to_string()), |_| {
            panic!("key must not be overwritten");
        })
        .unwrap();
        assert_eq!(key, "stored");
    }

    #[test]
    fn test_debug_omits_resolved_key() {
        let tempdir = TempDir::new().unwrap();
        let blob = CookieBlobStore::new(tempdir.path(), CookieEncryption::Keychain)
            .with_key_source(|| Ok("very-secret-key".to_string()));
        blob.save(&CookieStore::default()).unwrap();
        assert!(!format!("{blob:?}").contains("very-secret-key"));
    }

    #[test]
    fn test_generated_key_material_is_hex() {
        let key = generate_key_material();
        assert_eq!(key.len(), KEY_LEN * 2);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
