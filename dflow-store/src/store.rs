//! The per-server datum store (spec §4.1): creation, storage, retrieval,
//! refcount maintenance, and garbage collection for the shard of datums
//! this server owns.
//!
//! Subscription/listener bookkeeping lives in `dflow-subscribe` and
//! `dflow-depend`; this crate reports the facts those layers react to
//! (a datum closed, a subscript closed, a set of ids were garbage
//! collected) without knowing what, if anything, is listening. That split
//! mirrors the original `data.c` / `notifications.c` separation.

use std::collections::HashMap;

use dflow_types::{
    Code, ContainerSlot, DatumId, DatumType, IdAllocator, RcDelta, StructTypeInfo,
    StructTypeRegistry, Subscript, Topology, Value, NULL_ID,
};
use tracing::{debug, trace};

use crate::datum::{Body, Datum};

/// What a `store`/`retrieve`/`refcount_incr` call did, beyond the
/// requested read, for the caller (normally `dflow-server`) to react to.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Effects {
    /// Ids local to this shard that were garbage collected as a direct or
    /// cascading result of this call.
    pub collected: Vec<DatumId>,
    /// Refcount deltas owed to ids owned by other servers, to be applied
    /// via the cross-server refcount-sync protocol (spec §4.6).
    pub remote: Vec<(DatumId, RcDelta)>,
}

impl Effects {
    fn merge(&mut self, other: Effects) {
        self.collected.extend(other.collected);
        self.remote.extend(other.remote);
    }
}

/// Outcome of a `store` call: which subscript (if any) just closed, in
/// addition to whatever `Effects` the accompanying refcount change caused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOutcome {
    /// `true` if this write drove the datum's write refcount from >0 to 0
    /// (spec §3, "closing writes"): whole-datum listeners should fire.
    pub whole_datum_closed: bool,
    /// The subscript that was just filled, if this was a per-subscript
    /// write (container key or struct field path): per-subscript
    /// listeners/reference-bindings on this subscript should fire.
    pub subscript_closed: Option<Subscript>,
    pub effects: Effects,
}

/// Outcome of a `retrieve` call: the packed bytes plus whatever `Effects`
/// the accompanying refcount change (release and/or acquire) caused.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieveOutcome {
    pub ty: DatumType,
    pub bytes: Vec<u8>,
    pub effects: Effects,
}

/// One server's shard of the datum store.
pub struct DatumStore {
    topology: Topology,
    alloc: IdAllocator,
    registry: StructTypeRegistry,
    data: HashMap<DatumId, Datum>,
}

impl DatumStore {
    pub fn new(topology: Topology) -> Self {
        let alloc = IdAllocator::new(topology.rank, topology.servers);
        DatumStore {
            topology,
            alloc,
            registry: StructTypeRegistry::new(),
            data: HashMap::new(),
        }
    }

    pub fn is_local(&self, id: DatumId) -> bool {
        self.topology.is_local(id)
    }

    pub fn declare_struct_type(&mut self, index: i32, info: StructTypeInfo) -> Result<(), Code> {
        self.registry.declare(index, info)
    }

    pub fn struct_registry(&self) -> &StructTypeRegistry {
        &self.registry
    }

    /// `create` (spec §4.1). If `id` is `None`, allocates a fresh id owned
    /// by this server. A request with both refcounts zero and not
    /// permanent is accepted but never actually allocated: nothing will
    /// ever hold a reference to read or write it, so the record would be
    /// garbage the instant it was created.
    pub fn create(
        &mut self,
        id: Option<DatumId>,
        ty: DatumType,
        read_refcount: i64,
        write_refcount: i64,
        permanent: bool,
    ) -> Result<DatumId, Code> {
        let id = match id {
            Some(NULL_ID) => return Err(Code::Null),
            Some(id) => {
                if self.data.contains_key(&id) {
                    return Err(Code::DoubleDeclare);
                }
                id
            }
            None => self.alloc.next(),
        };

        if !permanent && read_refcount <= 0 && write_refcount <= 0 {
            trace!(id, "skipping allocation: datum created with no outstanding refcounts");
            return Ok(id);
        }

        let datum = Datum::new(id, ty, read_refcount, write_refcount, permanent, &self.registry)?;
        self.data.insert(id, datum);
        Ok(id)
    }

    pub fn exists(&self, id: DatumId) -> bool {
        self.data.contains_key(&id)
    }

    fn get(&self, id: DatumId) -> Result<&Datum, Code> {
        if id == NULL_ID {
            return Err(Code::Null);
        }
        self.data.get(&id).ok_or(Code::NotFound)
    }

    fn get_mut(&mut self, id: DatumId) -> Result<&mut Datum, Code> {
        if id == NULL_ID {
            return Err(Code::Null);
        }
        self.data.get_mut(&id).ok_or(Code::NotFound)
    }

    /// `store` (spec §4.1): write `value` at `subscript` (or the whole
    /// scalar, if `subscript` is `None`), then subtract `rc_decr` (a
    /// non-negative decrement magnitude per side) from this datum's
    /// refcounts as part of the same call.
    pub fn store(
        &mut self,
        id: DatumId,
        subscript: Option<&Subscript>,
        value: Value,
        rc_decr: RcDelta,
    ) -> Result<StoreOutcome, Code> {
        let datum = self.get_mut(id)?;
        let old_write = datum.write_refcount;

        match (&mut datum.body, subscript) {
            (Body::Scalar { set, value: slot }, None) => {
                // A scalar is also closed to further writes once its write
                // refcount has already reached zero (spec §3, "Writing a
                // scalar whose write_refcount is already zero is an
                // error"), independent of whether anyone ever actually
                // stored into it — permanent data ignores refcounts
                // entirely and is exempt (spec §3, "Permanent data never
                // has refcounts applied").
                if *set || (!datum.permanent && datum.write_refcount <= 0) {
                    return Err(Code::DoubleWrite);
                }
                if value.datum_type() != datum.ty {
                    return Err(Code::Type);
                }
                *slot = Some(value);
                *set = true;
            }
            (Body::Scalar { .. }, Some(_)) => return Err(Code::Type),
            (Body::Container(c), Some(sub)) => {
                expect_val_type(&c.val_type, &value)?;
                c.store(sub.as_bytes().to_vec(), value)?;
            }
            (Body::Container(_), None) => return Err(Code::Invalid),
            (Body::Multiset(m), None) => {
                expect_val_type(&m.val_type, &value)?;
                m.append(value);
            }
            (Body::Multiset(_), Some(_)) => return Err(Code::Invalid),
            (Body::Struct(s), Some(sub)) => {
                crate::structs::set_at_path(s, &self.registry, sub, value)?;
            }
            (Body::Struct(_), None) => return Err(Code::Invalid),
        }

        let whole_datum_closed = old_write > 0 && old_write - rc_decr.write <= 0;
        let mut effects = self.refcount_incr(id, rc_decr.negate())?;
        let subscript_closed = subscript.cloned();

        effects.collected.sort_unstable();
        effects.collected.dedup();
        Ok(StoreOutcome {
            whole_datum_closed,
            subscript_closed,
            effects,
        })
    }

    /// `retrieve` (spec §4.1): read `value` at `subscript` (or the whole
    /// datum), pack it, subtract the decrement magnitude `rc_decr`, and
    /// optionally acquire `acquire` on every referand reachable from the
    /// value just read. Acquire and any garbage-collection release
    /// triggered by `rc_decr` are folded into one net delta per referand
    /// so neither is ever separately observable (spec §3, "acquire while
    /// releasing must be atomic").
    pub fn retrieve(
        &mut self,
        id: DatumId,
        subscript: Option<&Subscript>,
        rc_decr: RcDelta,
        acquire: RcDelta,
    ) -> Result<RetrieveOutcome, Code> {
        let datum = self.get(id)?;
        let (value, ty) = read_slot(datum, subscript, &self.registry)?;
        let bytes = dflow_types::pack_new(&value);
        let acquire_targets = if acquire.is_zero() {
            Vec::new()
        } else {
            value.referands()
        };

        let mut effects = self.refcount_incr(id, rc_decr.negate())?;
        for referand in acquire_targets {
            let sub_effects = self.refcount_incr(referand, acquire)?;
            effects.merge(sub_effects);
        }

        effects.collected.sort_unstable();
        effects.collected.dedup();
        Ok(RetrieveOutcome { ty, bytes, effects })
    }

    /// `insert_atomic` (spec §4.1): race-free container key reservation.
    /// Returns `(created, existing_packed_value)`.
    pub fn insert_atomic(
        &mut self,
        id: DatumId,
        key: &Subscript,
    ) -> Result<(bool, Option<Vec<u8>>), Code> {
        let datum = self.get_mut(id)?;
        let Body::Container(c) = &mut datum.body else {
            return Err(Code::Type);
        };
        let (created, existing) = c.insert_atomic(key.as_bytes().to_vec());
        Ok((created, existing.map(|v| dflow_types::pack_new(&v))))
    }

    /// Non-consuming query: whether `id` (optionally at `subscript`) already
    /// holds a published value, without touching refcounts. Used by the
    /// dependency engine's already-closed determination (spec §4.3 step 2)
    /// and by the cross-server subscribe-sync reply (spec §4.6).
    pub fn is_closed(&self, id: DatumId, subscript: Option<&Subscript>) -> Result<bool, Code> {
        let datum = self.get(id)?;
        match (&datum.body, subscript) {
            (Body::Scalar { set, .. }, None) => Ok(*set),
            (Body::Scalar { .. }, Some(_)) => Err(Code::Type),
            (Body::Container(c), Some(sub)) => {
                Ok(matches!(c.get(sub.as_bytes()), ContainerSlot::Filled(_)))
            }
            (Body::Container(_), None) => Ok(true),
            (Body::Multiset(_), Some(_)) => Err(Code::Invalid),
            (Body::Multiset(_), None) => Ok(true),
            (Body::Struct(s), Some(sub)) => {
                Ok(crate::structs::get_at_path(s, &self.registry, sub)?.is_some())
            }
            (Body::Struct(_), None) => Ok(true),
        }
    }

    /// `enumerate` (spec §4.1): list container entries or multiset
    /// elements, paginated.
    pub fn enumerate(
        &self,
        id: DatumId,
        offset: usize,
        count: Option<usize>,
    ) -> Result<Vec<(Option<Vec<u8>>, Vec<u8>)>, Code> {
        let datum = self.get(id)?;
        match &datum.body {
            Body::Container(c) => Ok(c
                .filled_page(offset, count)
                .into_iter()
                .map(|(k, v)| (Some(k.to_vec()), dflow_types::pack_new(v)))
                .collect()),
            Body::Multiset(m) => Ok(m
                .page(offset, count)
                .into_iter()
                .map(|v| (None, dflow_types::pack_new(v)))
                .collect()),
            _ => Err(Code::Type),
        }
    }

    /// Apply `delta` to `id`'s refcounts in a single step, garbage
    /// collecting and cascading into referands as needed. Returns the
    /// ids collected locally and the remote deltas still owed.
    pub fn refcount_incr(&mut self, id: DatumId, delta: RcDelta) -> Result<Effects, Code> {
        if delta.is_zero() {
            return Ok(Effects::default());
        }
        let datum = self.get_mut(id)?;
        if datum.permanent {
            return Ok(Effects::default());
        }

        let new_read = datum.read_refcount + delta.read;
        let new_write = datum.write_refcount + delta.write;
        if new_read < 0 || new_write < 0 {
            return Err(Code::SlotsNegative);
        }
        datum.read_refcount = new_read;
        datum.write_refcount = new_write;

        let mut effects = Effects::default();
        if datum.is_garbage() {
            self.collect(id, &mut effects)?;
        }
        Ok(effects)
    }

    /// Remove a garbage datum and propagate refcount release into its
    /// referands: always release a read-reference, plus a write-reference
    /// if `release_write_refs` is set (spec §3, "garbage collection").
    fn collect(&mut self, id: DatumId, effects: &mut Effects) -> Result<(), Code> {
        let datum = self.data.remove(&id).expect("checked garbage before removal");
        debug!(id, "garbage collected");
        effects.collected.push(id);

        let release = RcDelta::new(
            -1,
            if datum.release_write_refs { -1 } else { 0 },
        );
        if release.is_zero() {
            return Ok(());
        }

        for referand in datum.referands() {
            if self.is_local(referand) {
                if self.data.contains_key(&referand) {
                    let sub = self.refcount_incr(referand, release)?;
                    effects.merge(sub);
                } else {
                    // Already collected (or never allocated because it was
                    // created with zero refcounts) — nothing to release.
                }
            } else {
                effects.remote.push((referand, release));
            }
        }
        Ok(())
    }
}

fn expect_val_type(expected: &DatumType, value: &Value) -> Result<(), Code> {
    if &value.datum_type() != expected {
        return Err(Code::Type);
    }
    Ok(())
}

fn read_slot<'a>(
    datum: &'a Datum,
    subscript: Option<&Subscript>,
    registry: &StructTypeRegistry,
) -> Result<(Value, DatumType), Code> {
    match (&datum.body, subscript) {
        (Body::Scalar { set: true, value: Some(v) }, None) => Ok((v.clone(), datum.ty.clone())),
        (Body::Scalar { .. }, None) => Err(Code::Unset),
        (Body::Scalar { .. }, Some(_)) => Err(Code::Type),
        (Body::Container(c), Some(sub)) => match c.get(sub.as_bytes()) {
            ContainerSlot::Filled(v) => Ok((v.clone(), c.val_type.clone())),
            ContainerSlot::Reserved => Err(Code::Unset),
            ContainerSlot::Absent => Err(Code::SubscriptNotFound),
        },
        (Body::Container(c), None) => Ok((Value::Container(c.clone()), datum.ty.clone())),
        (Body::Multiset(_), Some(_)) => Err(Code::Invalid),
        (Body::Multiset(m), None) => Ok((Value::Multiset(m.clone()), datum.ty.clone())),
        (Body::Struct(s), Some(sub)) => {
            let v = crate::structs::get_at_path(s, registry, sub)?.ok_or(Code::Unset)?;
            Ok((v.clone(), v.datum_type()))
        }
        (Body::Struct(s), None) => Ok((Value::Struct(s.clone()), datum.ty.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> Topology {
        Topology { rank: 0, servers: 1 }
    }

    #[test]
    fn create_skips_allocation_when_refcounts_are_zero() {
        let mut store = DatumStore::new(topology());
        let id = store.create(Some(5), DatumType::Int, 0, 0, false).unwrap();
        assert!(!store.exists(id));
    }

    #[test]
    fn create_rejects_double_declare() {
        let mut store = DatumStore::new(topology());
        store.create(Some(5), DatumType::Int, 1, 1, false).unwrap();
        assert_eq!(
            store.create(Some(5), DatumType::Int, 1, 1, false),
            Err(Code::DoubleDeclare)
        );
    }

    #[test]
    fn store_and_retrieve_scalar_round_trip() {
        let mut store = DatumStore::new(topology());
        let id = store.create(Some(1), DatumType::Int, 1, 1, false).unwrap();
        let outcome = store.store(id, None, Value::Int(42), RcDelta::write(1)).unwrap();
        assert!(outcome.whole_datum_closed);

        let out = store.retrieve(id, None, RcDelta::ZERO, RcDelta::ZERO).unwrap();
        assert_eq!(out.ty, DatumType::Int);
        let v = dflow_types::unpack(&out.bytes, &DatumType::Int, &StructTypeRegistry::new()).unwrap();
        assert_eq!(v, Value::Int(42));
    }

    #[test]
    fn double_write_on_scalar_is_rejected_and_state_unchanged() {
        let mut store = DatumStore::new(topology());
        let id = store.create(Some(1), DatumType::Int, 1, 1, false).unwrap();
        store.store(id, None, Value::Int(1), RcDelta::ZERO).unwrap();
        assert_eq!(
            store.store(id, None, Value::Int(2), RcDelta::ZERO),
            Err(Code::DoubleWrite)
        );
        let out = store.retrieve(id, None, RcDelta::ZERO, RcDelta::ZERO).unwrap();
        let v = dflow_types::unpack(&out.bytes, &DatumType::Int, &StructTypeRegistry::new()).unwrap();
        assert_eq!(v, Value::Int(1));
    }

    #[test]
    fn store_on_scalar_with_zero_write_refcount_is_rejected_even_if_never_set() {
        let mut store = DatumStore::new(topology());
        // write_rc = 0 but read_rc > 0 so `create` still allocates: no one
        // can ever publish a value here, so the first store must fail as
        // a double-write rather than silently succeeding (spec §3).
        let id = store.create(Some(1), DatumType::Int, 1, 0, false).unwrap();
        assert_eq!(
            store.store(id, None, Value::Int(1), RcDelta::ZERO),
            Err(Code::DoubleWrite)
        );
    }

    #[test]
    fn read_to_zero_after_write_closed_garbage_collects_and_cascades_referand() {
        let mut store = DatumStore::new(topology());
        let referand = store.create(Some(2), DatumType::Int, 1, 1, false).unwrap();
        store.store(referand, None, Value::Int(9), RcDelta::write(1)).unwrap();

        let holder = store.create(Some(1), DatumType::Ref, 1, 1, false).unwrap();
        let outcome = store
            .store(holder, None, Value::Ref(referand), RcDelta::write(1))
            .unwrap();
        assert!(outcome.whole_datum_closed);
        assert!(outcome.effects.collected.is_empty());

        // Dropping the holder's read refcount to zero (writes already
        // closed) collects it and releases one read-ref on its referand.
        let effects = store.refcount_incr(holder, RcDelta::read(-1)).unwrap();
        assert_eq!(effects.collected, vec![holder]);
        assert!(!store.exists(holder));

        // The referand's own read refcount drops to zero next, collecting
        // it too, cascading from the same call.
        let effects2 = store.refcount_incr(referand, RcDelta::read(-1)).unwrap();
        assert_eq!(effects2.collected, vec![referand]);
        assert!(!store.exists(referand));
    }

    #[test]
    fn negative_refcount_is_rejected() {
        let mut store = DatumStore::new(topology());
        let id = store.create(Some(1), DatumType::Int, 0, 1, false).unwrap();
        assert_eq!(store.refcount_incr(id, RcDelta::read(-1)), Err(Code::SlotsNegative));
    }

    #[test]
    fn permanent_data_ignores_refcount_changes() {
        let mut store = DatumStore::new(topology());
        let id = store.create(Some(1), DatumType::Int, 0, 0, true).unwrap();
        assert!(store.exists(id));
        store.refcount_incr(id, RcDelta::read(-5)).unwrap();
        assert!(store.exists(id));
    }

    #[test]
    fn insert_atomic_race_then_store_and_retrieve() {
        let mut store = DatumStore::new(topology());
        let id = store
            .create(
                Some(1),
                DatumType::container(DatumType::Str, DatumType::Int),
                1,
                1,
                false,
            )
            .unwrap();
        let key = Subscript::from("k");
        let (created, existing) = store.insert_atomic(id, &key).unwrap();
        assert!(created);
        assert_eq!(existing, None);

        let (created2, _) = store.insert_atomic(id, &key).unwrap();
        assert!(!created2);

        store.store(id, Some(&key), Value::Int(7), RcDelta::ZERO).unwrap();
        let out = store.retrieve(id, Some(&key), RcDelta::ZERO, RcDelta::ZERO).unwrap();
        let v = dflow_types::unpack(&out.bytes, &DatumType::Int, &StructTypeRegistry::new()).unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn retrieve_unfilled_reservation_is_unset_not_subscript_not_found() {
        let mut store = DatumStore::new(topology());
        let id = store
            .create(
                Some(1),
                DatumType::container(DatumType::Str, DatumType::Int),
                1,
                1,
                false,
            )
            .unwrap();
        let key = Subscript::from("k");
        store.insert_atomic(id, &key).unwrap();
        assert_eq!(
            store.retrieve(id, Some(&key), RcDelta::ZERO, RcDelta::ZERO).unwrap_err(),
            Code::Unset
        );

        let missing = Subscript::from("nope");
        assert_eq!(
            store
                .retrieve(id, Some(&missing), RcDelta::ZERO, RcDelta::ZERO)
                .unwrap_err(),
            Code::SubscriptNotFound
        );
    }
}
