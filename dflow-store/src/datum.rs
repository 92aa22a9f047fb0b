//! The in-memory datum record (spec §3, "Datum record").

use dflow_types::{
    Code, Container, DatumId, DatumType, Multiset, Rank, StructTypeRegistry, StructValue, Value,
    WorkType,
};

/// The type-specific body of a datum. Scalars track `set` explicitly since
/// a scalar's "zero value" is not the same as "never written" (spec §3,
/// "Scalar invariants"); compound bodies are always present from creation
/// and accumulate state through per-subscript writes.
#[derive(Debug, Clone)]
pub enum Body {
    Scalar { set: bool, value: Option<Value> },
    Container(Container),
    Multiset(Multiset),
    Struct(StructValue),
}

impl Body {
    pub fn new(ty: &DatumType, registry: &StructTypeRegistry) -> Result<Self, Code> {
        Ok(match ty {
            DatumType::Container { key_type, val_type } => {
                Body::Container(Container::new((**key_type).clone(), (**val_type).clone()))
            }
            DatumType::Multiset { val_type } => Body::Multiset(Multiset::new((**val_type).clone())),
            DatumType::Struct { type_index } => Body::Struct(registry.new_struct(*type_index)?),
            _ => Body::Scalar {
                set: false,
                value: None,
            },
        })
    }

    /// A snapshot `Value` of the body's current contents, or `None` for an
    /// unset scalar.
    pub fn current_value(&self) -> Option<Value> {
        match self {
            Body::Scalar { set: true, value } => value.clone(),
            Body::Scalar { .. } => None,
            Body::Container(c) => Some(Value::Container(c.clone())),
            Body::Multiset(m) => Some(Value::Multiset(m.clone())),
            Body::Struct(s) => Some(Value::Struct(s.clone())),
        }
    }
}

/// One server's in-memory record for a datum it owns (spec §3).
#[derive(Debug, Clone)]
pub struct Datum {
    pub id: DatumId,
    pub ty: DatumType,
    /// Permanent data ignores refcounts and is never garbage-collected.
    pub permanent: bool,
    /// Propagate write-refcount releases into referands on free, in
    /// addition to the read-refcount release every free performs.
    pub release_write_refs: bool,
    /// At least one per-subscript listener or reference-binding exists;
    /// maintained by the subscription layer as a fast-path hint.
    pub subscript_notifs: bool,
    pub read_refcount: i64,
    pub write_refcount: i64,
    /// Whole-datum listeners: (rank, work-type) pairs waiting for close.
    pub listeners: Vec<(Rank, WorkType)>,
    pub body: Body,
}

impl Datum {
    pub fn new(
        id: DatumId,
        ty: DatumType,
        read_refcount: i64,
        write_refcount: i64,
        permanent: bool,
        registry: &StructTypeRegistry,
    ) -> Result<Self, Code> {
        let body = Body::new(&ty, registry)?;
        Ok(Datum {
            id,
            ty,
            permanent,
            release_write_refs: false,
            subscript_notifs: false,
            read_refcount,
            write_refcount,
            listeners: Vec::new(),
            body,
        })
    }

    pub fn is_garbage(&self) -> bool {
        !self.permanent && self.read_refcount <= 0 && self.write_refcount <= 0
    }

    pub fn referands(&self) -> Vec<DatumId> {
        self.body
            .current_value()
            .map(|v| v.referands())
            .unwrap_or_default()
    }
}
