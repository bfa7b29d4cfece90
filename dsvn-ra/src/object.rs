//! Content addressing for file texts
//!
//! Both the repository object store and the working-copy pristine store key
//! file texts by SHA-256, and lay them out as `{hash[0..2]}/{hash[2..]}`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Identifier of a stored file text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// Compute ObjectId from data
    pub fn from_data(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(hash.into())
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Sharded location of this object below `base`
    pub fn shard_path(&self, base: &Path) -> PathBuf {
        let hex = self.to_hex();
        base.join(&hex[..2]).join(&hex[2..])
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Hex checksum of a file text, as recorded in metadata and sent by editors
pub fn checksum(data: &[u8]) -> String {
    ObjectId::from_data(data).to_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex_roundtrip() {
        let id = ObjectId::from_data(b"hello world");
        let parsed = ObjectId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
        assert!(ObjectId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_shard_path_layout() {
        let id = ObjectId::from_data(b"x");
        let hex = id.to_hex();
        let path = id.shard_path(Path::new("/objects"));
        assert_eq!(path, Path::new("/objects").join(&hex[..2]).join(&hex[2..]));
    }

    #[test]
    fn test_checksum_is_stable() {
        assert_eq!(checksum(b"abc"), checksum(b"abc"));
        assert_ne!(checksum(b"abc"), checksum(b"abd"));
    }
}
