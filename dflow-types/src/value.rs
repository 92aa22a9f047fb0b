//! The closed value-type set (spec §3) and the in-memory representations
//! of container, multiset, and struct values.

use crate::error::Code;
use crate::id::DatumId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The closed set of datum types. Container, multiset, and struct carry the
/// type information needed to pack/unpack their contents without external
/// context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatumType {
    Int,
    Float,
    Str,
    Blob,
    Ref,
    FileRef,
    Container {
        key_type: Box<DatumType>,
        val_type: Box<DatumType>,
    },
    Multiset {
        val_type: Box<DatumType>,
    },
    /// Index into the process-wide `StructTypeRegistry`.
    Struct {
        type_index: i32,
    },
}

impl DatumType {
    pub fn container(key_type: DatumType, val_type: DatumType) -> Self {
        DatumType::Container {
            key_type: Box::new(key_type),
            val_type: Box::new(val_type),
        }
    }

    pub fn multiset(val_type: DatumType) -> Self {
        DatumType::Multiset {
            val_type: Box::new(val_type),
        }
    }
}

/// A decoded datum value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Blob(Vec<u8>),
    Ref(DatumId),
    FileRef(DatumId),
    Container(Container),
    Multiset(Multiset),
    Struct(StructValue),
}

impl Value {
    /// The `DatumType` this value is an instance of. For scalar variants
    /// this is exact; for compound variants it reflects the element types
    /// actually stored.
    pub fn datum_type(&self) -> DatumType {
        match self {
            Value::Int(_) => DatumType::Int,
            Value::Float(_) => DatumType::Float,
            Value::Str(_) => DatumType::Str,
            Value::Blob(_) => DatumType::Blob,
            Value::Ref(_) => DatumType::Ref,
            Value::FileRef(_) => DatumType::FileRef,
            Value::Container(c) => DatumType::container(c.key_type.clone(), c.val_type.clone()),
            Value::Multiset(m) => DatumType::multiset(m.val_type.clone()),
            Value::Struct(s) => DatumType::Struct {
                type_index: s.type_index,
            },
        }
    }

    /// If this value is (or references) a datum id — `Ref`/`FileRef` — the
    /// referand id. Used to walk the reference graph for refcount
    /// scavenging (spec §3, "Reference-count semantics").
    pub fn referand(&self) -> Option<DatumId> {
        match self {
            Value::Ref(id) | Value::FileRef(id) => Some(*id),
            _ => None,
        }
    }

    /// All referand ids reachable directly from this value (recursing into
    /// containers, multisets, and structs one level of their own values,
    /// which is all that's needed since referands are leaf-level ids).
    pub fn referands(&self) -> Vec<DatumId> {
        let mut out = Vec::new();
        self.collect_referands(&mut out);
        out
    }

    fn collect_referands(&self, out: &mut Vec<DatumId>) {
        match self {
            Value::Ref(id) | Value::FileRef(id) => out.push(*id),
            Value::Container(c) => {
                for (_, slot) in c.entries_ordered() {
                    if let ContainerSlot::Filled(v) = slot {
                        v.collect_referands(out);
                    }
                }
            }
            Value::Multiset(m) => {
                for v in m.iter() {
                    v.collect_referands(out);
                }
            }
            Value::Struct(s) => {
                for field in s.fields.iter().flatten() {
                    field.collect_referands(out);
                }
            }
            _ => {}
        }
    }
}

/// Result of looking up a container key.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerSlot<'a> {
    /// No entry under this key at all.
    Absent,
    /// An atomic reservation: a writer has claimed the key but not filled it.
    Reserved,
    /// A value has been stored under this key.
    Filled(&'a Value),
}

/// A container: fixed key/value types, insertion-ordered hash map from
/// binary keys to optionally-filled values (spec §3, "Container").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub key_type: DatumType,
    pub val_type: DatumType,
    // `None` = atomic reservation (key claimed, not yet filled).
    entries: Vec<(Vec<u8>, Option<Value>)>,
    #[serde(skip)]
    index: HashMap<Vec<u8>, usize>,
}

impl Container {
    pub fn new(key_type: DatumType, val_type: DatumType) -> Self {
        Container {
            key_type,
            val_type,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Rebuild the key index after deserialization (serde skips it).
    pub fn reindex(&mut self) {
        self.index.clear();
        for (i, (key, _)) in self.entries.iter().enumerate() {
            self.index.insert(key.clone(), i);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|(_, v)| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &[u8]) -> ContainerSlot<'_> {
        match self.index.get(key) {
            None => ContainerSlot::Absent,
            Some(&i) => match &self.entries[i].1 {
                None => ContainerSlot::Reserved,
                Some(v) => ContainerSlot::Filled(v),
            },
        }
    }

    /// Insert or fill `key`. A normal `store` onto a container: a fresh key
    /// is filled immediately, a reserved key is filled, an already-filled
    /// key is a double-write.
    pub fn store(&mut self, key: Vec<u8>, value: Value) -> Result<(), Code> {
        match self.index.get(&key) {
            None => {
                let i = self.entries.len();
                self.entries.push((key.clone(), Some(value)));
                self.index.insert(key, i);
                Ok(())
            }
            Some(&i) => match &self.entries[i].1 {
                None => {
                    self.entries[i].1 = Some(value);
                    Ok(())
                }
                Some(_) => Err(Code::DoubleWrite),
            },
        }
    }

    /// `insert_atomic` (spec §4.1): reserve `key` if unclaimed. Returns
    /// `(created, existing_value)`: `created = true` on a fresh
    /// reservation; `created = false, existing = None` if already reserved
    /// by someone else; `created = false, existing = Some(v)` if already
    /// filled.
    pub fn insert_atomic(&mut self, key: Vec<u8>) -> (bool, Option<Value>) {
        match self.index.get(&key) {
            None => {
                let i = self.entries.len();
                self.entries.push((key.clone(), None));
                self.index.insert(key, i);
                (true, None)
            }
            Some(&i) => match &self.entries[i].1 {
                None => (false, None),
                Some(v) => (false, Some(v.clone())),
            },
        }
    }

    /// Entries in insertion order, including unfilled reservations.
    pub fn entries_ordered(&self) -> impl Iterator<Item = (&[u8], ContainerSlot<'_>)> {
        self.entries.iter().map(|(k, v)| {
            (
                k.as_slice(),
                match v {
                    None => ContainerSlot::Reserved,
                    Some(val) => ContainerSlot::Filled(val),
                },
            )
        })
    }

    /// Filled entries only, in insertion order, paginated — used by
    /// `enumerate` (spec §4.1).
    pub fn filled_page(&self, offset: usize, count: Option<usize>) -> Vec<(&[u8], &Value)> {
        let filled = self
            .entries
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|val| (k.as_slice(), val)));
        let skipped = filled.skip(offset);
        match count {
            Some(n) => skipped.take(n).collect(),
            None => skipped.collect(),
        }
    }
}

/// An append-only chunked sequence of typed elements (spec §3, "Multiset").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Multiset {
    pub val_type: DatumType,
    chunks: Vec<Vec<Value>>,
    chunk_capacity: usize,
}

const DEFAULT_MULTISET_CHUNK: usize = 64;

impl Multiset {
    pub fn new(val_type: DatumType) -> Self {
        Multiset {
            val_type,
            chunks: Vec::new(),
            chunk_capacity: DEFAULT_MULTISET_CHUNK,
        }
    }

    pub fn append(&mut self, value: Value) {
        match self.chunks.last_mut() {
            Some(chunk) if chunk.len() < self.chunk_capacity => chunk.push(value),
            _ => self.chunks.push(vec![value]),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.chunks.iter().flat_map(|c| c.iter())
    }

    pub fn page(&self, offset: usize, count: Option<usize>) -> Vec<&Value> {
        let skipped = self.iter().skip(offset);
        match count {
            Some(n) => skipped.take(n).collect(),
            None => skipped.collect(),
        }
    }
}

/// A struct field: `initialized` tracks whether it has been set, distinct
/// from the zero value of its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructValue {
    pub type_index: i32,
    fields: Vec<Option<Value>>,
}

impl StructValue {
    pub fn new(type_index: i32, field_count: usize) -> Self {
        StructValue {
            type_index,
            fields: vec![None; field_count],
        }
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn get_field(&self, ix: usize) -> Result<Option<&Value>, Code> {
        self.fields.get(ix).map(|f| f.as_ref()).ok_or(Code::Invalid)
    }

    pub fn get_field_mut(&mut self, ix: usize) -> Result<&mut Option<Value>, Code> {
        self.fields.get_mut(ix).ok_or(Code::Invalid)
    }

    pub fn set_field(&mut self, ix: usize, value: Value) -> Result<(), Code> {
        let slot = self.fields.get_mut(ix).ok_or(Code::Invalid)?;
        if slot.is_some() {
            return Err(Code::DoubleWrite);
        }
        *slot = Some(value);
        Ok(())
    }

    pub fn fields(&self) -> &[Option<Value>] {
        &self.fields
    }
}

/// Declared type information for one struct field (spec §4.1, "Type
/// declaration").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructFieldInfo {
    pub name: String,
    pub field_type: DatumType,
}

/// Declared type information for one struct type, registered once by
/// numeric index (identical on every process, per spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructTypeInfo {
    pub name: String,
    pub fields: Vec<StructFieldInfo>,
}

impl StructTypeInfo {
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// Process-wide registry of declared struct types. Declarations are
/// append-or-once per index; redeclaring an index is `DOUBLE_DECLARE`.
#[derive(Debug, Default)]
pub struct StructTypeRegistry {
    types: HashMap<i32, StructTypeInfo>,
}

impl StructTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, index: i32, info: StructTypeInfo) -> Result<(), Code> {
        if self.types.contains_key(&index) {
            return Err(Code::DoubleDeclare);
        }
        self.types.insert(index, info);
        Ok(())
    }

    pub fn get(&self, index: i32) -> Result<&StructTypeInfo, Code> {
        self.types.get(&index).ok_or(Code::Invalid)
    }

    pub fn new_struct(&self, index: i32) -> Result<StructValue, Code> {
        let info = self.get(index)?;
        Ok(StructValue::new(index, info.field_count()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_store_and_insert_atomic_race() {
        let mut c = Container::new(DatumType::Str, DatumType::Int);
        let (created, existing) = c.insert_atomic(b"k".to_vec());
        assert!(created);
        assert_eq!(existing, None);

        // A second racer sees the reservation, not a fresh slot.
        let (created2, existing2) = c.insert_atomic(b"k".to_vec());
        assert!(!created2);
        assert_eq!(existing2, None);

        c.store(b"k".to_vec(), Value::Int(7)).unwrap();
        assert_eq!(c.get(b"k"), ContainerSlot::Filled(&Value::Int(7)));

        // Now a double-write is an error.
        assert_eq!(c.store(b"k".to_vec(), Value::Int(8)), Err(Code::DoubleWrite));
    }

    #[test]
    fn container_store_without_reservation_still_works() {
        let mut c = Container::new(DatumType::Str, DatumType::Int);
        c.store(b"fresh".to_vec(), Value::Int(1)).unwrap();
        assert_eq!(c.get(b"fresh"), ContainerSlot::Filled(&Value::Int(1)));
    }

    #[test]
    fn multiset_chunks_and_preserves_order() {
        let mut m = Multiset::new(DatumType::Int);
        for i in 0..200 {
            m.append(Value::Int(i));
        }
        assert_eq!(m.len(), 200);
        let vals: Vec<i64> = m
            .iter()
            .map(|v| match v {
                Value::Int(i) => *i,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(vals, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn struct_field_double_write() {
        let mut s = StructValue::new(0, 3);
        s.set_field(1, Value::Int(4)).unwrap();
        assert_eq!(s.get_field(1).unwrap(), Some(&Value::Int(4)));
        assert_eq!(s.set_field(1, Value::Int(5)), Err(Code::DoubleWrite));
        assert_eq!(s.get_field(10), Err(Code::Invalid));
    }

    #[test]
    fn struct_registry_rejects_redeclaration() {
        let mut reg = StructTypeRegistry::new();
        let info = StructTypeInfo {
            name: "point".into(),
            fields: vec![
                StructFieldInfo { name: "x".into(), field_type: DatumType::Int },
                StructFieldInfo { name: "y".into(), field_type: DatumType::Int },
            ],
        };
        reg.declare(0, info.clone()).unwrap();
        assert_eq!(reg.declare(0, info), Err(Code::DoubleDeclare));
    }
}
