//! Talkie crypto gateway.
//!
//! All asymmetric encryption goes through [`CryptoGateway`]. The production
//! implementation shells out to GnuPG; [`memory::MemoryGateway`] keeps a
//! keyring in memory so the relay can be exercised without a subprocess.

pub mod error;
#[cfg(feature = "gpg")]
pub mod gpg;
pub mod keys;
pub mod memory;

use std::io::Read;

pub use error::CryptoError;
#[cfg(feature = "gpg")]
pub use gpg::GpgGateway;
pub use keys::{Key, ListingFormat};
pub use memory::MemoryGateway;

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Narrow interface over the asymmetric-encryption tool.
///
/// Calls block, possibly for hundreds of milliseconds; async callers should
/// go through `spawn_blocking`.
pub trait CryptoGateway: Send + Sync {
    /// Sign as `sender` and encrypt for `recipient`.
    fn encrypt(&self, sender: &str, recipient: &str, plaintext: &mut dyn Read) -> Result<Vec<u8>>;

    /// Decrypt with the private key held for `identity`.
    fn decrypt(&self, identity: &str, ciphertext: &mut dyn Read) -> Result<Vec<u8>>;

    fn list_public_keys(&self, search: &str) -> Result<Vec<Key>>;

    fn list_secret_keys(&self, search: &str) -> Result<Vec<Key>>;

    /// Import `fingerprint` from a remote key directory.
    fn fetch_remote_key(&self, fingerprint: &str) -> Result<()>;
}
