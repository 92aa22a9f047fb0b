//! Canonical byte representation for every datum type (spec §4.1,
//! "Pack/unpack") plus a small self-describing type tag used inside
//! container/multiset headers so a reply can carry type information the
//! receiver didn't already know.

use crate::error::Code;
use crate::id::DatumId;
use crate::value::{
    Container, ContainerSlot, DatumType, Multiset, StructTypeRegistry, StructValue, Value,
};
use crate::varint;

const TAG_INT: u8 = 0;
const TAG_FLOAT: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_BLOB: u8 = 3;
const TAG_REF: u8 = 4;
const TAG_FILE_REF: u8 = 5;
const TAG_CONTAINER: u8 = 6;
const TAG_MULTISET: u8 = 7;
const TAG_STRUCT: u8 = 8;

/// Pack a `DatumType` header (used by container/multiset wire headers, and
/// by any reply that must describe a type it didn't assume beforehand).
pub fn pack_type(ty: &DatumType, out: &mut Vec<u8>) {
    match ty {
        DatumType::Int => out.push(TAG_INT),
        DatumType::Float => out.push(TAG_FLOAT),
        DatumType::Str => out.push(TAG_STR),
        DatumType::Blob => out.push(TAG_BLOB),
        DatumType::Ref => out.push(TAG_REF),
        DatumType::FileRef => out.push(TAG_FILE_REF),
        DatumType::Container { key_type, val_type } => {
            out.push(TAG_CONTAINER);
            pack_type(key_type, out);
            pack_type(val_type, out);
        }
        DatumType::Multiset { val_type } => {
            out.push(TAG_MULTISET);
            pack_type(val_type, out);
        }
        DatumType::Struct { type_index } => {
            out.push(TAG_STRUCT);
            varint::encode(*type_index as i64, out);
        }
    }
}

/// Unpack a `DatumType` header. Returns `(type, bytes_consumed)`.
pub fn unpack_type(buf: &[u8]) -> Result<(DatumType, usize), Code> {
    let tag = *buf.first().ok_or(Code::Invalid)?;
    let mut pos = 1;
    let ty = match tag {
        TAG_INT => DatumType::Int,
        TAG_FLOAT => DatumType::Float,
        TAG_STR => DatumType::Str,
        TAG_BLOB => DatumType::Blob,
        TAG_REF => DatumType::Ref,
        TAG_FILE_REF => DatumType::FileRef,
        TAG_CONTAINER => {
            let (key_type, n) = unpack_type(&buf[pos..])?;
            pos += n;
            let (val_type, n) = unpack_type(&buf[pos..])?;
            pos += n;
            DatumType::container(key_type, val_type)
        }
        TAG_MULTISET => {
            let (val_type, n) = unpack_type(&buf[pos..])?;
            pos += n;
            DatumType::multiset(val_type)
        }
        TAG_STRUCT => {
            let (type_index, n) = varint::decode(&buf[pos..])?;
            pos += n;
            DatumType::Struct {
                type_index: type_index as i32,
            }
        }
        _ => return Err(Code::Invalid),
    };
    Ok((ty, pos))
}

fn push_len_prefixed(bytes: &[u8], out: &mut Vec<u8>) {
    varint::encode(bytes.len() as i64, out);
    out.extend_from_slice(bytes);
}

fn take_len_prefixed(buf: &[u8]) -> Result<(&[u8], usize), Code> {
    let (len, n) = varint::decode(buf)?;
    if len < 0 {
        return Err(Code::Invalid);
    }
    let len = len as usize;
    let start = n;
    let end = start
        .checked_add(len)
        .ok_or(Code::Invalid)?;
    if end > buf.len() {
        return Err(Code::Invalid);
    }
    Ok((&buf[start..end], end))
}

/// Pack a value into its canonical byte representation, appending to `out`.
pub fn pack(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(i) => out.extend_from_slice(&i.to_le_bytes()),
        Value::Float(f) => out.extend_from_slice(&f.to_le_bytes()),
        Value::Ref(id) | Value::FileRef(id) => out.extend_from_slice(&id.to_le_bytes()),
        Value::Str(s) => {
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        Value::Blob(b) => push_len_prefixed(b, out),
        Value::Container(c) => pack_container(c, out),
        Value::Multiset(m) => pack_multiset(m, out),
        Value::Struct(s) => pack_struct(s, out),
    }
}

/// Convenience: pack into a fresh `Vec<u8>`.
pub fn pack_new(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    pack(value, &mut out);
    out
}

fn pack_container(c: &Container, out: &mut Vec<u8>) {
    pack_type(&c.key_type, out);
    pack_type(&c.val_type, out);
    // Only filled slots are wire-visible; an outstanding atomic reservation
    // is internal bookkeeping, not part of the published value.
    let filled: Vec<_> = c
        .entries_ordered()
        .filter_map(|(k, slot)| match slot {
            ContainerSlot::Filled(v) => Some((k, v)),
            _ => None,
        })
        .collect();
    varint::encode(filled.len() as i64, out);
    for (key, val) in filled {
        push_len_prefixed(key, out);
        let mut vbytes = Vec::new();
        pack(val, &mut vbytes);
        push_len_prefixed(&vbytes, out);
    }
}

fn pack_multiset(m: &Multiset, out: &mut Vec<u8>) {
    pack_type(&m.val_type, out);
    varint::encode(m.len() as i64, out);
    for v in m.iter() {
        let mut vbytes = Vec::new();
        pack(v, &mut vbytes);
        push_len_prefixed(&vbytes, out);
    }
}

fn pack_struct(s: &StructValue, out: &mut Vec<u8>) {
    varint::encode(s.type_index as i64, out);
    let fields = s.fields();
    // Presence bitmap: one bit per field, 1 = initialized.
    let mut bitmap = vec![0u8; fields.len().div_ceil(8)];
    for (i, f) in fields.iter().enumerate() {
        if f.is_some() {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    varint::encode(fields.len() as i64, out);
    out.extend_from_slice(&bitmap);
    for f in fields.iter().flatten() {
        let mut vbytes = Vec::new();
        pack(f, &mut vbytes);
        push_len_prefixed(&vbytes, out);
    }
}

/// Unpack a value of declared type `ty` from the front of `buf`. `registry`
/// resolves struct-type field counts/types, needed whenever `ty` is, or
/// contains, a `Struct`.
pub fn unpack(buf: &[u8], ty: &DatumType, registry: &StructTypeRegistry) -> Result<Value, Code> {
    Ok(match ty {
        DatumType::Int => {
            let arr: [u8; 8] = buf.try_into().map_err(|_| Code::Invalid)?;
            Value::Int(i64::from_le_bytes(arr))
        }
        DatumType::Float => {
            let arr: [u8; 8] = buf.try_into().map_err(|_| Code::Invalid)?;
            Value::Float(f64::from_le_bytes(arr))
        }
        DatumType::Ref => {
            let arr: [u8; 8] = buf.try_into().map_err(|_| Code::Invalid)?;
            Value::Ref(DatumId::from_le_bytes(arr))
        }
        DatumType::FileRef => {
            let arr: [u8; 8] = buf.try_into().map_err(|_| Code::Invalid)?;
            Value::FileRef(DatumId::from_le_bytes(arr))
        }
        DatumType::Str => {
            if buf.last() != Some(&0) {
                return Err(Code::Invalid);
            }
            let s = std::str::from_utf8(&buf[..buf.len() - 1]).map_err(|_| Code::Invalid)?;
            Value::Str(s.to_string())
        }
        DatumType::Blob => {
            let (bytes, consumed) = take_len_prefixed(buf)?;
            if consumed != buf.len() {
                return Err(Code::Invalid);
            }
            Value::Blob(bytes.to_vec())
        }
        DatumType::Container { key_type: _, val_type } => {
            unpack_container(buf, ty, val_type, registry)?
        }
        DatumType::Multiset { val_type } => unpack_multiset(buf, val_type, registry)?,
        DatumType::Struct { type_index } => unpack_struct(buf, *type_index, registry)?,
    })
}

fn unpack_container(
    buf: &[u8],
    declared: &DatumType,
    val_type: &DatumType,
    registry: &StructTypeRegistry,
) -> Result<Value, Code> {
    let (key_type, n1) = unpack_type(buf)?;
    let (wire_val_type, n2) = unpack_type(&buf[n1..])?;
    if &wire_val_type != val_type {
        return Err(Code::Type);
    }
    let mut pos = n1 + n2;
    let (count, n) = varint::decode(&buf[pos..])?;
    pos += n;
    let mut container = Container::new(
        key_type,
        match declared {
            DatumType::Container { val_type, .. } => (**val_type).clone(),
            _ => val_type.clone(),
        },
    );
    for _ in 0..count {
        let (key, n) = take_len_prefixed(&buf[pos..])?;
        pos += n;
        let (vbytes, n) = take_len_prefixed(&buf[pos..])?;
        pos += n;
        let val = unpack(vbytes, val_type, registry)?;
        container
            .store(key.to_vec(), val)
            .map_err(|_| Code::Invalid)?;
    }
    if pos != buf.len() {
        return Err(Code::Invalid);
    }
    Ok(Value::Container(container))
}

fn unpack_multiset(
    buf: &[u8],
    val_type: &DatumType,
    registry: &StructTypeRegistry,
) -> Result<Value, Code> {
    let (wire_val_type, n1) = unpack_type(buf)?;
    if &wire_val_type != val_type {
        return Err(Code::Type);
    }
    let mut pos = n1;
    let (count, n) = varint::decode(&buf[pos..])?;
    pos += n;
    let mut multiset = Multiset::new(val_type.clone());
    for _ in 0..count {
        let (vbytes, n) = take_len_prefixed(&buf[pos..])?;
        pos += n;
        multiset.append(unpack(vbytes, val_type, registry)?);
    }
    if pos != buf.len() {
        return Err(Code::Invalid);
    }
    Ok(Value::Multiset(multiset))
}

fn unpack_struct(
    buf: &[u8],
    type_index: i32,
    registry: &StructTypeRegistry,
) -> Result<Value, Code> {
    let (wire_type_index, mut pos) = varint::decode(buf)?;
    if wire_type_index as i32 != type_index {
        return Err(Code::Type);
    }
    let info = registry.get(type_index)?;
    let (field_count, n) = varint::decode(&buf[pos..])?;
    pos += n;
    let field_count = field_count as usize;
    if field_count != info.field_count() {
        return Err(Code::Type);
    }
    let bitmap_len = field_count.div_ceil(8);
    let bitmap = buf.get(pos..pos + bitmap_len).ok_or(Code::Invalid)?;
    pos += bitmap_len;

    let mut sv = registry.new_struct(type_index)?;
    for i in 0..field_count {
        let present = (bitmap[i / 8] >> (i % 8)) & 1 == 1;
        if !present {
            continue;
        }
        let (vbytes, n) = take_len_prefixed(&buf[pos..])?;
        pos += n;
        let field_ty = &info.fields[i].field_type;
        let val = unpack(vbytes, field_ty, registry)?;
        sv.set_field(i, val).map_err(|_| Code::Invalid)?;
    }
    if pos != buf.len() {
        return Err(Code::Invalid);
    }
    Ok(Value::Struct(sv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{StructFieldInfo, StructTypeInfo};

    fn registry() -> StructTypeRegistry {
        let mut reg = StructTypeRegistry::new();
        reg.declare(
            0,
            StructTypeInfo {
                name: "pair".into(),
                fields: vec![
                    StructFieldInfo {
                        name: "a".into(),
                        field_type: DatumType::Int,
                    },
                    StructFieldInfo {
                        name: "b".into(),
                        field_type: DatumType::Str,
                    },
                ],
            },
        )
        .unwrap();
        reg
    }

    #[test]
    fn scalar_round_trips() {
        let reg = registry();
        for v in [
            Value::Int(-42),
            Value::Float(3.5),
            Value::Str("hello".into()),
            Value::Blob(vec![1, 2, 3]),
            Value::Ref(99),
            Value::FileRef(100),
        ] {
            let ty = v.datum_type();
            let bytes = pack_new(&v);
            let back = unpack(&bytes, &ty, &reg).unwrap();
            assert_eq!(back, v);
        }
    }

    #[test]
    fn string_requires_null_terminator() {
        let reg = registry();
        let bad = b"no-terminator".to_vec();
        assert_eq!(unpack(&bad, &DatumType::Str, &reg), Err(Code::Invalid));
    }

    #[test]
    fn container_round_trip_skips_reservations() {
        let reg = registry();
        let mut c = Container::new(DatumType::Str, DatumType::Int);
        c.insert_atomic(b"reserved-only".to_vec());
        c.store(b"k1".to_vec(), Value::Int(1)).unwrap();
        c.store(b"k2".to_vec(), Value::Int(2)).unwrap();
        let v = Value::Container(c);
        let ty = v.datum_type();
        let bytes = pack_new(&v);
        let back = unpack(&bytes, &ty, &reg).unwrap();
        match back {
            Value::Container(c2) => assert_eq!(c2.len(), 2),
            _ => panic!("expected container"),
        }
    }

    #[test]
    fn multiset_round_trip_preserves_order() {
        let reg = registry();
        let mut m = Multiset::new(DatumType::Int);
        for i in 0..10 {
            m.append(Value::Int(i));
        }
        let v = Value::Multiset(m);
        let ty = v.datum_type();
        let bytes = pack_new(&v);
        let back = unpack(&bytes, &ty, &reg).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn struct_round_trip_with_partial_initialization() {
        let reg = registry();
        let mut sv = reg.new_struct(0).unwrap();
        sv.set_field(0, Value::Int(7)).unwrap();
        // field 1 left uninitialized
        let v = Value::Struct(sv);
        let bytes = pack_new(&v);
        let back = unpack(&bytes, &DatumType::Struct { type_index: 0 }, &reg).unwrap();
        match back {
            Value::Struct(s) => {
                assert_eq!(s.get_field(0).unwrap(), Some(&Value::Int(7)));
                assert_eq!(s.get_field(1).unwrap(), None);
            }
            _ => panic!("expected struct"),
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_int_round_trip(i: i64) {
            let reg = registry();
            let v = Value::Int(i);
            let bytes = pack_new(&v);
            let back = unpack(&bytes, &DatumType::Int, &reg).unwrap();
            prop_assert_eq!(back, v);
        }

        #[test]
        fn prop_string_round_trip(s in "\\PC*") {
            let reg = registry();
            let v = Value::Str(s);
            let bytes = pack_new(&v);
            let back = unpack(&bytes, &DatumType::Str, &reg).unwrap();
            prop_assert_eq!(back, v);
        }
    }
}
