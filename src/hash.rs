//! Object identity for the repository core.
//!
//! An [`ObjectId`] is the SHA-1 of an object's type-prefixed form
//! (`"<type> <size>\0"` followed by the payload). The all-zero id is a
//! reserved sentinel meaning "absent" in ref updates. [`AbbreviatedId`]
//! carries a hex prefix of an id for short-hash lookups.

use std::fmt::{self, Display};
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::errors::GitError;
use crate::internal::object::types::ObjectType;

/// Byte length of a SHA-1 object id.
pub const OBJECT_ID_LEN: usize = 20;

/// Hex string length of a SHA-1 object id.
pub const OBJECT_ID_HEX_LEN: usize = 40;

/// A 20-byte SHA-1 object id.
///
/// Immutable once constructed. Hex form is 40 lowercase characters.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// The all-zero sentinel id, meaning "absent" in ref updates.
    pub const ZERO: ObjectId = ObjectId([0u8; OBJECT_ID_LEN]);

    /// Whether this id is the zero sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; OBJECT_ID_LEN]
    }

    /// Compute the id of raw data (no object header).
    pub fn hash_of(data: &[u8]) -> ObjectId {
        let digest = Sha1::digest(data);
        let mut bytes = [0u8; OBJECT_ID_LEN];
        bytes.copy_from_slice(&digest);
        ObjectId(bytes)
    }

    /// Compute an object id from its type and payload, hashing the
    /// canonical `"<type> <size>\0"` prefixed form.
    pub fn from_type_and_data(object_type: ObjectType, data: &[u8]) -> ObjectId {
        let mut hasher = Sha1::new();
        hasher.update(object_type.to_bytes());
        hasher.update(b" ");
        hasher.update(data.len().to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(data);
        let digest = hasher.finalize();
        let mut bytes = [0u8; OBJECT_ID_LEN];
        bytes.copy_from_slice(&digest);
        ObjectId(bytes)
    }

    /// Create an `ObjectId` from exactly 20 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<ObjectId, GitError> {
        if bytes.len() != OBJECT_ID_LEN {
            return Err(GitError::Corrupt(
                hex::encode(bytes),
                format!("invalid id length: got {}, expected {}", bytes.len(), OBJECT_ID_LEN),
            ));
        }
        let mut h = [0u8; OBJECT_ID_LEN];
        h.copy_from_slice(bytes);
        Ok(ObjectId(h))
    }

    /// Read 20 id bytes from a stream.
    pub fn from_stream(data: &mut impl io::Read) -> io::Result<ObjectId> {
        let mut h = [0u8; OBJECT_ID_LEN];
        data.read_exact(&mut h)?;
        Ok(ObjectId(h))
    }

    /// Lowercase 40-character hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Conventional 7-character short form for display.
    pub fn short(&self) -> String {
        self.to_hex()[..7].to_string()
    }

    /// Raw id bytes.
    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    /// First byte, used for fanout-table lookups.
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Parse 40 hex characters into an `ObjectId`.
impl FromStr for ObjectId {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != OBJECT_ID_HEX_LEN {
            return Err(GitError::Corrupt(
                s.to_string(),
                format!("invalid hex id length {}", s.len()),
            ));
        }
        let bytes = hex::decode(s)
            .map_err(|e| GitError::Corrupt(s.to_string(), format!("invalid hex id: {e}")))?;
        ObjectId::from_bytes(&bytes)
    }
}

/// A hex prefix of an object id.
///
/// Stored as (bytes, nibble count); the bit length is four times the
/// nibble count and lies in `[4, 160]`. Two ids match the prefix iff
/// they agree on the first `bit_length` bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct AbbreviatedId {
    bytes: [u8; OBJECT_ID_LEN],
    nibbles: usize,
}

impl AbbreviatedId {
    /// Parse a hex prefix of 1 to 40 characters.
    pub fn from_hex_prefix(s: &str) -> Result<AbbreviatedId, GitError> {
        if s.is_empty() || s.len() > OBJECT_ID_HEX_LEN {
            return Err(GitError::Corrupt(
                s.to_string(),
                format!("abbreviated id must be 1..=40 hex chars, got {}", s.len()),
            ));
        }
        let mut bytes = [0u8; OBJECT_ID_LEN];
        for (i, c) in s.chars().enumerate() {
            let v = c.to_digit(16).ok_or_else(|| {
                GitError::Corrupt(s.to_string(), format!("`{c}` is not a hex digit"))
            })? as u8;
            if i % 2 == 0 {
                bytes[i / 2] |= v << 4;
            } else {
                bytes[i / 2] |= v;
            }
        }
        Ok(AbbreviatedId {
            bytes,
            nibbles: s.len(),
        })
    }

    /// Truncate a full id to its first `nibbles` hex digits.
    pub fn from_id(id: &ObjectId, nibbles: usize) -> AbbreviatedId {
        let nibbles = nibbles.clamp(1, OBJECT_ID_HEX_LEN);
        let mut bytes = *id.as_bytes();
        // Zero everything past the prefix so equality stays canonical.
        for i in nibbles..OBJECT_ID_HEX_LEN {
            if i % 2 == 0 {
                bytes[i / 2] &= 0x0f;
            } else {
                bytes[i / 2] &= 0xf0;
            }
        }
        AbbreviatedId { bytes, nibbles }
    }

    /// Number of significant bits in the prefix.
    pub fn bit_length(&self) -> usize {
        self.nibbles * 4
    }

    /// Whether the prefix is a complete 40-digit id.
    pub fn is_complete(&self) -> bool {
        self.nibbles == OBJECT_ID_HEX_LEN
    }

    /// The complete id, if the prefix is 40 digits.
    pub fn to_object_id(&self) -> Option<ObjectId> {
        self.is_complete().then(|| ObjectId(self.bytes))
    }

    /// Whether `id` agrees with this prefix on the first
    /// `bit_length` bits.
    pub fn matches(&self, id: &ObjectId) -> bool {
        let full = self.nibbles / 2;
        if self.bytes[..full] != id.as_bytes()[..full] {
            return false;
        }
        if self.nibbles % 2 == 1 {
            return self.bytes[full] >> 4 == id.as_bytes()[full] >> 4;
        }
        true
    }

    /// The hex digits of the prefix.
    pub fn hex_prefix(&self) -> String {
        hex::encode(self.bytes)[..self.nibbles].to_string()
    }
}

impl Display for AbbreviatedId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.hex_prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hashing "Hello, world!" should match the known SHA-1 value.
    #[test]
    fn test_hash_of() {
        let id = ObjectId::hash_of("Hello, world!".as_bytes());
        assert_eq!(id.to_hex(), "943a702d06f34599aee1f8da8ef9f7296031d699");
    }

    /// A blob's id must hash the `"blob <size>\0"` prefixed form.
    #[test]
    fn test_from_type_and_data() {
        // Known id of the blob containing "what is up, doc?"
        let id = ObjectId::from_type_and_data(ObjectType::Blob, b"what is up, doc?");
        assert_eq!(id.to_hex(), "bd9dbf5aae1a3862dd1526723246b20206e5fc37");
    }

    /// Hex round-trip.
    #[test]
    fn test_from_str_round_trip() {
        let hex = "8ab686eafeb1f44702738c8b0f24f2567c36da6d";
        let id = ObjectId::from_str(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
        assert_eq!(id.short(), "8ab686e");
    }

    /// Wrong-length hex is rejected.
    #[test]
    fn test_from_str_rejects_bad_length() {
        assert!(ObjectId::from_str("8ab686e").is_err());
        assert!(ObjectId::from_str("").is_err());
    }

    /// Reading an id from a stream consumes exactly 20 bytes.
    #[test]
    fn test_from_stream() {
        let source = [
            0x8a, 0xb6, 0x86, 0xea, 0xfe, 0xb1, 0xf4, 0x47, 0x02, 0x73, 0x8c, 0x8b, 0x0f, 0x24,
            0xf2, 0x56, 0x7c, 0x36, 0xda, 0x6d,
        ];
        let mut reader = io::Cursor::new(source);
        let id = ObjectId::from_stream(&mut reader).unwrap();
        assert_eq!(id.to_hex(), "8ab686eafeb1f44702738c8b0f24f2567c36da6d");
    }

    /// The zero sentinel is recognised and distinct from real ids.
    #[test]
    fn test_zero_sentinel() {
        assert!(ObjectId::ZERO.is_zero());
        assert!(!ObjectId::hash_of(b"x").is_zero());
        assert_eq!(
            ObjectId::ZERO.to_hex(),
            "0000000000000000000000000000000000000000"
        );
    }

    /// Even-length prefixes match on whole bytes.
    #[test]
    fn test_abbrev_even_match() {
        let id = ObjectId::from_str("8ab686eafeb1f44702738c8b0f24f2567c36da6d").unwrap();
        let abbrev = AbbreviatedId::from_hex_prefix("8ab686").unwrap();
        assert_eq!(abbrev.bit_length(), 24);
        assert!(abbrev.matches(&id));
        let other = ObjectId::from_str("8ab687eafeb1f44702738c8b0f24f2567c36da6d").unwrap();
        assert!(!abbrev.matches(&other));
    }

    /// Odd-length prefixes compare the final half byte.
    #[test]
    fn test_abbrev_odd_match() {
        let id = ObjectId::from_str("8ab686eafeb1f44702738c8b0f24f2567c36da6d").unwrap();
        let abbrev = AbbreviatedId::from_hex_prefix("8ab68").unwrap();
        assert!(abbrev.matches(&id));
        // Differs in the fifth nibble only.
        let other = ObjectId::from_str("8ab696eafeb1f44702738c8b0f24f2567c36da6d").unwrap();
        assert!(!abbrev.matches(&other));
    }

    /// Truncating a full id and re-rendering gives the prefix back.
    #[test]
    fn test_abbrev_from_id() {
        let id = ObjectId::from_str("8ab686eafeb1f44702738c8b0f24f2567c36da6d").unwrap();
        let abbrev = AbbreviatedId::from_id(&id, 9);
        assert_eq!(abbrev.hex_prefix(), "8ab686eaf");
        assert!(abbrev.matches(&id));
    }

    /// A 40-digit prefix is complete and converts back to an id.
    #[test]
    fn test_abbrev_complete() {
        let hex = "8ab686eafeb1f44702738c8b0f24f2567c36da6d";
        let abbrev = AbbreviatedId::from_hex_prefix(hex).unwrap();
        assert!(abbrev.is_complete());
        assert_eq!(abbrev.to_object_id().unwrap().to_hex(), hex);
    }

    /// Non-hex input is rejected.
    #[test]
    fn test_abbrev_rejects_non_hex() {
        assert!(AbbreviatedId::from_hex_prefix("8ab68g").is_err());
        assert!(AbbreviatedId::from_hex_prefix("").is_err());
    }
}
