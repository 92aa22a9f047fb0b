//! Wire format for one checkpoint record (spec §6, "Persisted state"):
//! `{key-length (varint), key, value-length (varint), value, CRC}`. Reuses
//! `dflow_types::varint`, the same length-prefix codec the pack/unpack
//! layer uses for container and multiset entries, so the checkpoint log
//! shares its variable-length-integer convention with the rest of the
//! wire format instead of inventing a second one.

use dflow_types::varint;

use crate::error::{CheckpointError, Result};

/// Encode one `(key, value)` record, appending to `out`. Returns the
/// number of bytes written, which the caller uses to decide whether the
/// record still fits in the current block.
pub fn encode_record(key: &[u8], value: &[u8], out: &mut Vec<u8>) -> Result<usize> {
    if key.len() > i64::MAX as usize {
        return Err(CheckpointError::KeyTooLarge(key.len()));
    }
    if value.len() > i64::MAX as usize {
        return Err(CheckpointError::ValueTooLarge(value.len()));
    }
    let start = out.len();
    varint::encode(key.len() as i64, out);
    out.extend_from_slice(key);
    varint::encode(value.len() as i64, out);
    out.extend_from_slice(value);
    let crc = crc32fast::hash(&out[start..]);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out.len() - start)
}

/// One decoded record plus the number of bytes it consumed from `buf`.
pub struct DecodedRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub consumed: usize,
}

/// Decode one record from the front of `buf`. `None` means `buf` does not
/// hold a complete record (truncated block tail, not an error — the
/// caller treats this the same as a CRC mismatch: skip and move on, per
/// spec §6: "corrupted or truncated records are skipped").
pub fn decode_record(buf: &[u8]) -> Option<DecodedRecord> {
    let mut pos = 0usize;

    let (key_len, n) = varint::decode(buf.get(pos..)?).ok()?;
    pos += n;
    let key_len = usize::try_from(key_len).ok()?;
    let key = buf.get(pos..pos + key_len)?.to_vec();
    pos += key_len;

    let (val_len, n) = varint::decode(buf.get(pos..)?).ok()?;
    pos += n;
    let val_len = usize::try_from(val_len).ok()?;
    let value = buf.get(pos..pos + val_len)?.to_vec();
    pos += val_len;

    let crc_bytes = buf.get(pos..pos + 4)?;
    let stored_crc = u32::from_le_bytes(crc_bytes.try_into().ok()?);
    pos += 4;

    let actual_crc = crc32fast::hash(&buf[..pos - 4]);
    if actual_crc != stored_crc {
        return None;
    }

    Some(DecodedRecord { key, value, consumed: pos })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let mut buf = Vec::new();
        let written = encode_record(b"k1", b"value-bytes", &mut buf).unwrap();
        assert_eq!(written, buf.len());
        let decoded = decode_record(&buf).unwrap();
        assert_eq!(decoded.key, b"k1");
        assert_eq!(decoded.value, b"value-bytes");
        assert_eq!(decoded.consumed, buf.len());
    }

    #[test]
    fn truncated_tail_is_not_a_complete_record() {
        let mut buf = Vec::new();
        encode_record(b"k1", b"value-bytes", &mut buf).unwrap();
        let truncated = &buf[..buf.len() - 3];
        assert!(decode_record(truncated).is_none());
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let mut buf = Vec::new();
        encode_record(b"k1", b"value-bytes", &mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        assert!(decode_record(&buf).is_none());
    }

    #[test]
    fn empty_key_and_value_round_trip() {
        let mut buf = Vec::new();
        encode_record(b"", b"", &mut buf).unwrap();
        let decoded = decode_record(&buf).unwrap();
        assert!(decoded.key.is_empty());
        assert!(decoded.value.is_empty());
    }
}
