//! Secondary keys into compound datums: container keys and struct
//! field-index paths (spec §3, "Struct").
//!
//! A subscript is fundamentally an opaque byte string — it is used as a
//! container's binary hash key and as the packed key in the subscription
//! tables (§4.2: `(id ‖ subscript-bytes)`). Struct paths are the one case
//! where the bytes have structure: `"3.1.4"` addresses field 4 of field 1
//! of field 3. Per `data_structs.h`'s `xlb_struct_lookup`, a path is
//! consumed one field index at a time while it descends through nested
//! structs; once it reaches a non-struct field, any remaining bytes are an
//! arbitrary binary key into that field (e.g. a container subscript).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A subscript: raw bytes, interpreted by the value type they index into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subscript(pub Vec<u8>);

impl Subscript {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Subscript(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Build a struct field-index path subscript, e.g. `&[3, 1, 4]` -> `"3.1.4"`.
    pub fn struct_path(indices: &[usize]) -> Self {
        let s = indices
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(".");
        Subscript(s.into_bytes())
    }

    /// Packed key combining a datum id with this subscript, as used by the
    /// subscription tables' `(id, subscript)` lookups (§4.2).
    pub fn pack_with(&self, id: i64) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.0.len());
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&self.0);
        out
    }

    /// If this subscript begins with a decimal field index (optionally
    /// followed by `.` and more path components, or by an arbitrary
    /// trailing key), split off that first index and return the remainder
    /// as a fresh `Subscript`. Returns `None` if the subscript does not
    /// begin with an ASCII-decimal field index.
    pub fn split_leading_index(&self) -> Option<(usize, Subscript)> {
        let bytes = &self.0;
        let mut i = 0;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == 0 {
            return None;
        }
        let idx: usize = std::str::from_utf8(&bytes[..i]).ok()?.parse().ok()?;
        let rest = if i < bytes.len() && bytes[i] == b'.' {
            Subscript(bytes[i + 1..].to_vec())
        } else {
            Subscript(bytes[i..].to_vec())
        };
        Some((idx, rest))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Subscript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

impl From<&str> for Subscript {
    fn from(s: &str) -> Self {
        Subscript(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Subscript {
    fn from(v: Vec<u8>) -> Self {
        Subscript(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_path_round_trips_through_split() {
        let sub = Subscript::struct_path(&[3, 1, 4]);
        assert_eq!(sub.to_string(), "3.1.4");
        let (first, rest) = sub.split_leading_index().unwrap();
        assert_eq!(first, 3);
        let (second, rest) = rest.split_leading_index().unwrap();
        assert_eq!(second, 1);
        let (third, rest) = rest.split_leading_index().unwrap();
        assert_eq!(third, 4);
        assert!(rest.is_empty());
    }

    #[test]
    fn arbitrary_binary_key_after_path_is_preserved() {
        let mut bytes = b"3.".to_vec();
        bytes.extend_from_slice(&[0xff, 0x00, 0x01]);
        let sub = Subscript::from_bytes(bytes);
        let (idx, rest) = sub.split_leading_index().unwrap();
        assert_eq!(idx, 3);
        assert_eq!(rest.as_bytes(), &[0xff, 0x00, 0x01]);
    }

    #[test]
    fn non_numeric_subscript_has_no_leading_index() {
        let sub = Subscript::from("k");
        assert_eq!(sub.split_leading_index(), None);
    }
}
