//! Shared data model for the data-flow store: datum identifiers, the closed
//! value-type set, the error taxonomy every core operation reports through,
//! and the varint/pack wire codec that backs §4.1's canonical byte
//! representation.
//!
//! This crate has no dependency on any other workspace crate: it is the
//! vocabulary the store, subscription tables, dependency engine, queues,
//! and network layer all share.

pub mod error;
pub mod id;
pub mod pack;
pub mod routing;
pub mod subscript;
pub mod value;
pub mod varint;
pub mod work;

pub use error::{Code, Result};
pub use id::{locate, DatumId, IdAllocator, Topology, NULL_ID};
pub use pack::{pack, pack_new, pack_type, unpack, unpack_type};
pub use routing::{Accuracy, Host, Priority, Rank, RcDelta, Strictness, Target, WorkType};
pub use subscript::Subscript;
pub use value::{
    Container, ContainerSlot, DatumType, Multiset, StructFieldInfo, StructTypeInfo,
    StructTypeRegistry, StructValue, Value,
};
pub use work::{Request, WorkUnit};
