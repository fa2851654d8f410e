//! Fixed-width coin addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::ADDRESS_LEN;

/// A coin address as carried on the wire: printable ASCII, at most
/// `ADDRESS_LEN - 1` characters so the terminating NUL always fits.
#[derive(Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Address(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address longer than {max} characters")]
    TooLong { max: usize },
    #[error("address contains non-printable or non-ASCII characters")]
    InvalidCharacters,
    #[error("address field is not NUL-terminated")]
    Unterminated,
}

impl Address {
    pub fn new(s: impl Into<String>) -> Result<Self, AddressError> {
        let s = s.into();
        if s.len() > ADDRESS_LEN - 1 {
            return Err(AddressError::TooLong {
                max: ADDRESS_LEN - 1,
            });
        }
        if !s.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(AddressError::InvalidCharacters);
        }
        Ok(Self(s))
    }

    /// The empty address. Full nodes treat it as "use the logged-in one".
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// NUL-padded wire field.
    pub fn to_field(&self) -> [u8; ADDRESS_LEN] {
        let mut field = [0u8; ADDRESS_LEN];
        field[..self.0.len()].copy_from_slice(self.0.as_bytes());
        field
    }

    /// Parses a wire field. Bytes after the first NUL are ignored.
    pub fn from_field(field: &[u8; ADDRESS_LEN]) -> Result<Self, AddressError> {
        let end = field
            .iter()
            .position(|&b| b == 0)
            .ok_or(AddressError::Unterminated)?;
        let text =
            std::str::from_utf8(&field[..end]).map_err(|_| AddressError::InvalidCharacters)?;
        Self::new(text)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}
