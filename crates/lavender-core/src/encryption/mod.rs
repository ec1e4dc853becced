//! ============================================================================
//! Encryption Layer - AES-256-GCM at-rest protection
//! ============================================================================
//! Key derivation (Argon2id preferred, PBKDF2-HMAC-SHA256 fallback) plus
//! authenticated encryption of byte payloads, whole files and text strings.
//!
//! ## Envelope
//! ```text
//! nonce (12 bytes) ‖ ciphertext ‖ GCM tag (16 bytes)
//! ```
//! String variants wrap the envelope in URL-safe base64.
//! ============================================================================

mod sealed;

pub use sealed::SealedDatabase;

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::{LavenderError, Result};

/// Salt for databases that never leave this machine
pub const LOCAL_SALT: &str = "violet-soul-salt-local-2026";

/// Salt for payloads committed to a shared git repository
pub const GIT_SALT: &str = "violet-soul-salt-git-2026";

/// Environment variable holding the passphrase
pub const PASSPHRASE_ENV: &str = "VIOLET_SOUL_KEY";

pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;

const PBKDF2_ITERATIONS: u32 = 600_000;
const ARGON2_MIN_SALT_LEN: usize = 16;

/// Which logical context a key is derived for.
/// The salt is a domain separator, not a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaltContext {
    #[default]
    Local,
    Git,
}

impl SaltContext {
    pub fn salt(&self) -> &'static str {
        match self {
            SaltContext::Local => LOCAL_SALT,
            SaltContext::Git => GIT_SALT,
        }
    }
}

/// Key derivation function and its cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kdf {
    /// Memory-hard Argon2id. `memory_kib` is in KiB.
    Argon2id {
        time_cost: u32,
        memory_kib: u32,
        parallelism: u32,
    },
    Pbkdf2Sha256 { iterations: u32 },
}

impl Default for Kdf {
    fn default() -> Self {
        Kdf::Argon2id {
            time_cost: 3,
            memory_kib: 64 * 1024,
            parallelism: 4,
        }
    }
}

impl Kdf {
    /// PBKDF2 with the production iteration count
    pub fn pbkdf2() -> Self {
        Kdf::Pbkdf2Sha256 {
            iterations: PBKDF2_ITERATIONS,
        }
    }
}

/// Derive a 32-byte key with the default KDF (Argon2id, falling back to
/// PBKDF2 if Argon2 cannot run).
pub fn derive_key(passphrase: &str, salt: &str) -> Zeroizing<[u8; KEY_SIZE]> {
    derive_key_with(passphrase, salt, Kdf::default())
}

/// Derive a 32-byte key with an explicit KDF
pub fn derive_key_with(passphrase: &str, salt: &str, kdf: Kdf) -> Zeroizing<[u8; KEY_SIZE]> {
    match kdf {
        Kdf::Argon2id {
            time_cost,
            memory_kib,
            parallelism,
        } => match derive_argon2(passphrase, salt, time_cost, memory_kib, parallelism) {
            Ok(key) => key,
            Err(e) => {
                warn!("Argon2id unavailable ({}), falling back to PBKDF2", e);
                derive_pbkdf2(passphrase, salt, PBKDF2_ITERATIONS)
            }
        },
        Kdf::Pbkdf2Sha256 { iterations } => derive_pbkdf2(passphrase, salt, iterations),
    }
}

fn derive_argon2(
    passphrase: &str,
    salt: &str,
    time_cost: u32,
    memory_kib: u32,
    parallelism: u32,
) -> std::result::Result<Zeroizing<[u8; KEY_SIZE]>, argon2::Error> {
    // Short salts are NUL-padded to 16 bytes. Longer ones are used whole so
    // the local and git contexts stay distinct.
    let mut salt_bytes = salt.as_bytes().to_vec();
    if salt_bytes.len() < ARGON2_MIN_SALT_LEN {
        salt_bytes.resize(ARGON2_MIN_SALT_LEN, 0);
    }

    let params = Params::new(memory_kib, time_cost, parallelism, Some(KEY_SIZE))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2.hash_password_into(passphrase.as_bytes(), &salt_bytes, &mut key[..])?;
    Ok(key)
}

fn derive_pbkdf2(passphrase: &str, salt: &str, iterations: u32) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha256>(
        passphrase.as_bytes(),
        salt.as_bytes(),
        iterations,
        &mut key[..],
    );
    key
}

/// AES-256-GCM encryption bound to one derived key
pub struct EncryptionLayer {
    cipher: Aes256Gcm,
    context: SaltContext,
}

impl std::fmt::Debug for EncryptionLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionLayer")
            .field("context", &self.context)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl EncryptionLayer {
    /// Create a layer from an explicit passphrase, or from `VIOLET_SOUL_KEY`
    /// when `passphrase` is `None`.
    pub fn new(passphrase: Option<&str>, context: SaltContext) -> Result<Self> {
        Self::with_kdf(passphrase, context, Kdf::default())
    }

    /// Like [`EncryptionLayer::new`] with a chosen KDF
    pub fn with_kdf(passphrase: Option<&str>, context: SaltContext, kdf: Kdf) -> Result<Self> {
        let passphrase = resolve_passphrase(passphrase, |key| std::env::var(key).ok())?;

        debug!("Deriving {:?} encryption key ({:?})", context, kdf);
        let key = derive_key_with(&passphrase, context.salt(), kdf);
        Ok(Self::from_key(&key, context))
    }

    /// Build directly from raw key material
    pub fn from_key(key: &[u8; KEY_SIZE], context: SaltContext) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
            context,
        }
    }

    pub fn context(&self) -> SaltContext {
        self.context
    }

    // ========================================================================
    // Raw bytes
    // ========================================================================

    /// Encrypt with a fresh random nonce; returns `nonce ‖ ciphertext ‖ tag`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| LavenderError::InvalidCiphertext("AES-GCM encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(LavenderError::InvalidCiphertext(format!(
                "{} bytes is too short to contain nonce + tag",
                data.len()
            )));
        }

        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| LavenderError::AuthenticationFailed)
    }

    // ========================================================================
    // Files
    // ========================================================================

    pub fn encrypt_file(&self, src: &Path, dst: &Path) -> Result<()> {
        let plaintext = Zeroizing::new(std::fs::read(src)?);
        let encrypted = self.encrypt(&plaintext)?;
        write_creating_parent(dst, &encrypted)?;
        debug!("Encrypted {} -> {}", src.display(), dst.display());
        Ok(())
    }

    pub fn decrypt_file(&self, src: &Path, dst: &Path) -> Result<()> {
        let encrypted = std::fs::read(src)?;
        let plaintext = Zeroizing::new(self.decrypt(&encrypted)?);
        write_creating_parent(dst, &plaintext)?;
        debug!("Decrypted {} -> {}", src.display(), dst.display());
        Ok(())
    }

    // ========================================================================
    // Strings
    // ========================================================================

    pub fn encrypt_string(&self, text: &str) -> Result<String> {
        let raw = self.encrypt(text.as_bytes())?;
        Ok(URL_SAFE.encode(raw))
    }

    pub fn decrypt_string(&self, data: &str) -> Result<String> {
        let raw = URL_SAFE
            .decode(data.as_bytes())
            .map_err(|e| LavenderError::InvalidCiphertext(format!("bad base64: {}", e)))?;
        let plaintext = self.decrypt(&raw)?;
        String::from_utf8(plaintext)
            .map_err(|e| LavenderError::InvalidCiphertext(format!("plaintext is not UTF-8: {}", e)))
    }
}

/// Explicit passphrase if non-empty, else `VIOLET_SOUL_KEY` from `lookup`
fn resolve_passphrase<F>(passphrase: Option<&str>, lookup: F) -> Result<Zeroizing<String>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(p) = passphrase.filter(|p| !p.is_empty()) {
        return Ok(Zeroizing::new(p.to_string()));
    }

    match lookup(PASSPHRASE_ENV) {
        Some(key) if !key.is_empty() => Ok(Zeroizing::new(key)),
        _ => Err(LavenderError::ConfigurationMissing(format!(
            "{} is not set. Export it or pass a passphrase explicitly.",
            PASSPHRASE_ENV
        ))),
    }
}

fn write_creating_parent(dst: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dst.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(dst, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer() -> EncryptionLayer {
        EncryptionLayer::from_key(&[7u8; KEY_SIZE], SaltContext::Local)
    }

    // Cheap parameters so the KDF tests stay fast in debug builds
    fn light_argon2() -> Kdf {
        Kdf::Argon2id {
            time_cost: 1,
            memory_kib: 64,
            parallelism: 1,
        }
    }

    #[test]
    fn test_roundtrip_various_lengths() {
        let layer = layer();
        for len in [0usize, 1, 10_240] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let encrypted = layer.encrypt(&plaintext).unwrap();
            assert_eq!(encrypted.len(), NONCE_SIZE + len + TAG_SIZE);
            assert_eq!(layer.decrypt(&encrypted).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let layer = layer();
        let a = layer.encrypt(b"same plaintext").unwrap();
        let b = layer.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b);
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let encrypted = layer().encrypt(b"secret memory").unwrap();
        let other = EncryptionLayer::from_key(&[8u8; KEY_SIZE], SaltContext::Local);
        assert!(matches!(
            other.decrypt(&encrypted),
            Err(LavenderError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_any_flipped_byte_fails_authentication() {
        let layer = layer();
        let encrypted = layer.encrypt(b"tamper with me").unwrap();
        for i in 0..encrypted.len() {
            let mut tampered = encrypted.clone();
            tampered[i] ^= 0x01;
            assert!(
                matches!(layer.decrypt(&tampered), Err(LavenderError::AuthenticationFailed)),
                "flipping byte {} was not detected",
                i
            );
        }
    }

    #[test]
    fn test_short_input_is_invalid_ciphertext() {
        let layer = layer();
        assert!(matches!(
            layer.decrypt(&[0u8; NONCE_SIZE + TAG_SIZE - 1]),
            Err(LavenderError::InvalidCiphertext(_))
        ));
        assert!(matches!(layer.decrypt(&[]), Err(LavenderError::InvalidCiphertext(_))));
    }

    #[test]
    fn test_string_roundtrip_is_url_safe() {
        let layer = layer();
        let encoded = layer.encrypt_string("héllo / world + ?").unwrap();
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert_eq!(layer.decrypt_string(&encoded).unwrap(), "héllo / world + ?");
    }

    #[test]
    fn test_decrypt_string_rejects_bad_base64() {
        assert!(matches!(
            layer().decrypt_string("not base64 at all!!"),
            Err(LavenderError::InvalidCiphertext(_))
        ));
    }

    #[test]
    fn test_file_roundtrip_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("plain.db");
        let enc = dir.path().join("nested/deeper/plain.db.enc");
        let out = dir.path().join("restored/plain.db");
        std::fs::write(&src, b"SQLite format 3\0 fake payload").unwrap();

        let layer = layer();
        layer.encrypt_file(&src, &enc).unwrap();
        assert_ne!(std::fs::read(&enc).unwrap(), std::fs::read(&src).unwrap());

        layer.decrypt_file(&enc, &out).unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), std::fs::read(&src).unwrap());
    }

    #[test]
    fn test_default_kdf_parameters() {
        assert_eq!(
            Kdf::default(),
            Kdf::Argon2id {
                time_cost: 3,
                memory_kib: 65536,
                parallelism: 4
            }
        );
        assert_eq!(Kdf::pbkdf2(), Kdf::Pbkdf2Sha256 { iterations: 600_000 });
    }

    #[test]
    fn test_argon2_derivation_is_deterministic_and_salt_separated() {
        let a = derive_key_with("hunter2", LOCAL_SALT, light_argon2());
        let b = derive_key_with("hunter2", LOCAL_SALT, light_argon2());
        let c = derive_key_with("hunter2", GIT_SALT, light_argon2());
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn test_short_salts_are_padded() {
        let short = derive_key_with("pw", "tiny", light_argon2());
        let padded = derive_key_with("pw", "tiny\0\0\0\0\0\0\0\0\0\0\0\0", light_argon2());
        assert_eq!(*short, *padded);
    }

    #[test]
    fn test_pbkdf2_derivation_differs_from_argon2() {
        let pbkdf = derive_key_with("hunter2", LOCAL_SALT, Kdf::Pbkdf2Sha256 { iterations: 1000 });
        let argon = derive_key_with("hunter2", LOCAL_SALT, light_argon2());
        assert_ne!(*pbkdf, *argon);
    }

    #[test]
    fn test_invalid_argon2_params_fall_back_to_pbkdf2() {
        // parallelism 0 is rejected by argon2
        let broken = Kdf::Argon2id {
            time_cost: 1,
            memory_kib: 64,
            parallelism: 0,
        };
        let key = derive_key_with("pw", LOCAL_SALT, broken);
        let expected = derive_key_with("pw", LOCAL_SALT, Kdf::pbkdf2());
        assert_eq!(*key, *expected);
    }

    #[test]
    fn test_missing_passphrase_is_configuration_missing() {
        let unset = |_: &str| -> Option<String> { None };
        assert!(matches!(
            resolve_passphrase(None, unset),
            Err(LavenderError::ConfigurationMissing(_))
        ));
        assert!(matches!(
            resolve_passphrase(Some(""), unset),
            Err(LavenderError::ConfigurationMissing(_))
        ));

        let blank = |_: &str| Some(String::new());
        assert!(matches!(
            resolve_passphrase(None, blank),
            Err(LavenderError::ConfigurationMissing(_))
        ));
    }

    #[test]
    fn test_passphrase_falls_back_to_environment_key() {
        let lookup = |key: &str| (key == PASSPHRASE_ENV).then(|| "from-env".to_string());
        assert_eq!(resolve_passphrase(None, lookup).unwrap().as_str(), "from-env");
        assert_eq!(resolve_passphrase(Some(""), lookup).unwrap().as_str(), "from-env");
        assert_eq!(resolve_passphrase(Some("explicit"), lookup).unwrap().as_str(), "explicit");
    }

    #[test]
    fn test_explicit_passphrase_layers_interoperate() {
        let kdf = light_argon2();
        let a = EncryptionLayer::with_kdf(Some("pw"), SaltContext::Git, kdf).unwrap();
        let b = EncryptionLayer::with_kdf(Some("pw"), SaltContext::Git, kdf).unwrap();
        let encrypted = a.encrypt(b"shared").unwrap();
        assert_eq!(b.decrypt(&encrypted).unwrap(), b"shared");

        let local = EncryptionLayer::with_kdf(Some("pw"), SaltContext::Local, kdf).unwrap();
        assert!(matches!(
            local.decrypt(&encrypted),
            Err(LavenderError::AuthenticationFailed)
        ));
    }
}
