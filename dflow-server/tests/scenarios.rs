//! End-to-end, single-shard scenarios driven straight through
//! `Server::handle`, bypassing the network layer entirely: every concrete
//! walkthrough below only ever needs one server, so there is nothing the
//! transport would add except noise.

use dflow_net::{
    ContainerReferenceRequest, CreateRequest, GetRequest, InsertAtomicRequest, PutRequest,
    PutRuleRequest, RefcPolicy, Reply, Request, RetrieveRequest, StoreRequest,
};
use dflow_server::Server;
use dflow_types::{
    Accuracy, DatumType, Priority, RcDelta, Strictness, Subscript, Target, Topology, Value,
};

fn server() -> Server {
    Server::new(Topology::new(0, 1), 64, true)
}

fn put(payload: &[u8], work_type: i32, priority: Priority, target: Target, accuracy: Accuracy, strictness: Strictness) -> PutRequest {
    PutRequest {
        putter_rank: 0,
        payload: payload.to_vec(),
        target,
        answer: 0,
        work_type,
        priority,
        parallelism: 1,
        accuracy,
        strictness,
    }
}

#[test]
fn scalar_publish_then_retrieve() {
    let mut s = server();
    let create = s.handle(Request::Create(CreateRequest {
        id: 10,
        ty: DatumType::Int,
        read_rc: 1,
        write_rc: 1,
        permanent: false,
    }));
    assert!(matches!(create.reply, Reply::Create { id: 10 }));

    let store = s.handle(Request::Store(StoreRequest {
        id: 10,
        subscript: None,
        ty: DatumType::Int,
        bytes: dflow_types::pack_new(&Value::Int(42)),
        rc_decr: RcDelta::write(1),
    }));
    assert!(matches!(store.reply, Reply::Store));

    let retrieve = s.handle(Request::Retrieve(RetrieveRequest {
        id: 10,
        subscript: None,
        refc_policy: RefcPolicy::default(),
    }));
    match retrieve.reply {
        Reply::Retrieve { ty, bytes } => {
            assert_eq!(ty, DatumType::Int);
            let registry = dflow_types::StructTypeRegistry::new();
            assert_eq!(dflow_types::unpack(&bytes, &ty, &registry).unwrap(), Value::Int(42));
        }
        other => panic!("expected Retrieve, got {other:?}"),
    }
}

#[test]
fn container_insert_atomic_race_then_store_and_retrieve() {
    let mut s = server();
    s.handle(Request::Create(CreateRequest {
        id: 20,
        ty: DatumType::container(DatumType::Str, DatumType::Int),
        read_rc: 1,
        write_rc: 1,
        permanent: false,
    }));

    let key = Subscript::from("k");
    let first = s.handle(Request::InsertAtomic(InsertAtomicRequest {
        id: 20,
        subscript: key.clone(),
        refc_policy: RefcPolicy::default(),
    }));
    assert!(matches!(first.reply, Reply::InsertAtomic { created: true, existing: None }));

    let second = s.handle(Request::InsertAtomic(InsertAtomicRequest {
        id: 20,
        subscript: key.clone(),
        refc_policy: RefcPolicy::default(),
    }));
    assert!(matches!(second.reply, Reply::InsertAtomic { created: false, existing: None }));

    s.handle(Request::Store(StoreRequest {
        id: 20,
        subscript: Some(key.clone()),
        ty: DatumType::Int,
        bytes: dflow_types::pack_new(&Value::Int(7)),
        rc_decr: RcDelta::ZERO,
    }));

    let retrieve = s.handle(Request::Retrieve(RetrieveRequest {
        id: 20,
        subscript: Some(key),
        refc_policy: RefcPolicy::default(),
    }));
    match retrieve.reply {
        Reply::Retrieve { ty, bytes } => {
            let registry = dflow_types::StructTypeRegistry::new();
            assert_eq!(dflow_types::unpack(&bytes, &ty, &registry).unwrap(), Value::Int(7));
        }
        other => panic!("expected Retrieve, got {other:?}"),
    }
}

/// A reference bound onto an unfilled container slot is held with a
/// reservation on the container itself; filling the slot delivers the
/// reference downstream and releases that reservation back.
#[test]
fn container_reference_delivers_on_deferred_fill() {
    let mut s = server();
    s.handle(Request::Create(CreateRequest {
        id: 31,
        ty: DatumType::Int,
        read_rc: 1,
        write_rc: 1,
        permanent: false,
    }));
    s.handle(Request::Store(StoreRequest {
        id: 31,
        subscript: None,
        ty: DatumType::Int,
        bytes: dflow_types::pack_new(&Value::Int(99)),
        rc_decr: RcDelta::write(1),
    }));

    s.handle(Request::Create(CreateRequest {
        id: 30,
        ty: DatumType::container(DatumType::Str, DatumType::Ref),
        read_rc: 1,
        write_rc: 1,
        permanent: false,
    }));

    s.handle(Request::Create(CreateRequest {
        id: 32,
        ty: DatumType::Ref,
        read_rc: 1,
        write_rc: 1,
        permanent: false,
    }));

    let slot = Subscript::from("slot");
    let registered = s.handle(Request::ContainerReference(ContainerReferenceRequest {
        id: 30,
        subscript: slot.clone(),
        ref_id: 32,
        ref_subscript: None,
        ref_type: DatumType::Ref,
        transfer_refs: RcDelta::read(1),
    }));
    assert!(matches!(registered.reply, Reply::ContainerReference { value: None }));

    // Filling the slot fires the deferred binding: the reference lands in
    // 32, referand 31 gains the transferred read-reference, and the
    // reservation held on 30 is released.
    let stored = s.handle(Request::Store(StoreRequest {
        id: 30,
        subscript: Some(slot),
        ty: DatumType::Ref,
        bytes: dflow_types::pack_new(&Value::Ref(31)),
        rc_decr: RcDelta::ZERO,
    }));
    assert!(matches!(stored.reply, Reply::Store));

    let retrieve = s.handle(Request::Retrieve(RetrieveRequest {
        id: 32,
        subscript: None,
        refc_policy: RefcPolicy::default(),
    }));
    match retrieve.reply {
        Reply::Retrieve { ty, bytes } => {
            let registry = dflow_types::StructTypeRegistry::new();
            assert_eq!(dflow_types::unpack(&bytes, &ty, &registry).unwrap(), Value::Ref(31));
        }
        other => panic!("expected Retrieve, got {other:?}"),
    }

    // The referand's read refcount went up by the transfer, so dropping the
    // container's own read-ref doesn't collect 31 yet.
    let exists = s.handle(Request::Exists(dflow_net::ExistsRequest {
        id: 31,
        subscript: None,
        decr: RcDelta::ZERO,
    }));
    assert!(matches!(exists.reply, Reply::Exists { exists: true, .. }));
}

#[test]
fn work_priority_order_beats_arrival_order() {
    let mut s = server();
    s.handle(Request::Put(put(b"low", 1, 0, Target::Any, Accuracy::Rank, Strictness::Strict)));
    s.handle(Request::Put(put(b"high", 1, 10, Target::Any, Accuracy::Rank, Strictness::Strict)));
    s.handle(Request::Put(put(b"mid", 1, 5, Target::Any, Accuracy::Rank, Strictness::Strict)));

    let first = s.handle(Request::Get(GetRequest { requester_rank: 0, requested_type: 1, blocking: false, count: 1 }));
    let second = s.handle(Request::Get(GetRequest { requester_rank: 0, requested_type: 1, blocking: false, count: 1 }));
    let third = s.handle(Request::Get(GetRequest { requester_rank: 0, requested_type: 1, blocking: false, count: 1 }));

    fn payload(reply: Reply) -> Vec<u8> {
        match reply {
            Reply::Get { payload, .. } => payload,
            other => panic!("expected Get, got {other:?}"),
        }
    }
    assert_eq!(payload(first.reply), b"high");
    assert_eq!(payload(second.reply), b"mid");
    assert_eq!(payload(third.reply), b"low");
}

#[test]
fn soft_host_target_falls_back_to_untargeted() {
    let mut s = server();
    s.set_host(0, "hostA".to_string());
    s.set_host(1, "hostA".to_string());
    s.set_host(2, "hostB".to_string());

    s.handle(Request::Put(put(b"soft", 1, 0, Target::Rank(0), Accuracy::Host, Strictness::Soft)));

    let miss = s.handle(Request::Get(GetRequest { requester_rank: 2, requested_type: 1, blocking: true, count: 1 }));
    match miss.reply {
        Reply::Get { payload, .. } => assert_eq!(payload, b"soft"),
        other => panic!("expected Get via untargeted fallback, got {other:?}"),
    }
}

#[test]
fn dependency_fan_in_releases_exactly_once() {
    let mut s = server();
    for id in [40, 41, 42] {
        s.handle(Request::Create(CreateRequest { id, ty: DatumType::Int, read_rc: 1, write_rc: 1, permanent: false }));
    }

    let rule = s.handle(Request::PutRule(PutRuleRequest {
        put: put(b"fan-in", 2, 0, Target::Any, Accuracy::Rank, Strictness::Strict),
        name: "fan_in".to_string(),
        wait_ids: vec![40, 41, 42],
        wait_id_subs: vec![],
    }));
    assert!(matches!(rule.reply, Reply::PutRule { ready: false }));

    for id in [40, 41] {
        let r = s.handle(Request::Store(StoreRequest {
            id,
            subscript: None,
            ty: DatumType::Int,
            bytes: dflow_types::pack_new(&Value::Int(1)),
            rc_decr: RcDelta::write(1),
        }));
        assert!(matches!(r.reply, Reply::Store));
        let still_pending = s.handle(Request::Get(GetRequest { requester_rank: 0, requested_type: 2, blocking: false, count: 1 }));
        assert!(matches!(still_pending.reply, Reply::NoWork));
    }

    s.handle(Request::Store(StoreRequest {
        id: 42,
        subscript: None,
        ty: DatumType::Int,
        bytes: dflow_types::pack_new(&Value::Int(1)),
        rc_decr: RcDelta::write(1),
    }));

    let ready = s.handle(Request::Get(GetRequest { requester_rank: 0, requested_type: 2, blocking: false, count: 1 }));
    match ready.reply {
        Reply::Get { payload, .. } => assert_eq!(payload, b"fan-in"),
        other => panic!("expected Get, got {other:?}"),
    }
}

#[test]
fn duplicate_input_within_one_task_is_idempotent() {
    let mut s = server();
    for id in [50, 51] {
        s.handle(Request::Create(CreateRequest { id, ty: DatumType::Int, read_rc: 1, write_rc: 1, permanent: false }));
    }

    let rule = s.handle(Request::PutRule(PutRuleRequest {
        put: put(b"dup", 3, 0, Target::Any, Accuracy::Rank, Strictness::Strict),
        name: "dup".to_string(),
        wait_ids: vec![50, 50, 51],
        wait_id_subs: vec![],
    }));
    assert!(matches!(rule.reply, Reply::PutRule { ready: false }));

    // One close of 50 satisfies both occurrences in this task's input list.
    s.handle(Request::Store(StoreRequest {
        id: 50,
        subscript: None,
        ty: DatumType::Int,
        bytes: dflow_types::pack_new(&Value::Int(1)),
        rc_decr: RcDelta::write(1),
    }));
    let still_pending = s.handle(Request::Get(GetRequest { requester_rank: 0, requested_type: 3, blocking: false, count: 1 }));
    assert!(matches!(still_pending.reply, Reply::NoWork));

    s.handle(Request::Store(StoreRequest {
        id: 51,
        subscript: None,
        ty: DatumType::Int,
        bytes: dflow_types::pack_new(&Value::Int(1)),
        rc_decr: RcDelta::write(1),
    }));
    let ready = s.handle(Request::Get(GetRequest { requester_rank: 0, requested_type: 3, blocking: false, count: 1 }));
    match ready.reply {
        Reply::Get { payload, .. } => assert_eq!(payload, b"dup"),
        other => panic!("expected Get, got {other:?}"),
    }
}

#[test]
fn parallel_task_is_assembled_from_the_idle_request_pool() {
    let mut s = server();
    let mut wu = put(b"parallel-job", 9, 0, Target::Any, Accuracy::Rank, Strictness::Strict);
    wu.parallelism = 2;
    s.handle(Request::Put(wu));

    // Rank 1 polls first: nothing assembled yet, it registers as idle.
    let first = s.handle(Request::Get(GetRequest { requester_rank: 1, requested_type: 9, blocking: true, count: 1 }));
    assert!(matches!(first.reply, Reply::NoWork));

    // Rank 2 polls next: together with rank 1's registered idle slot, the
    // width-2 task can now be assembled. Rank 2 is claimed directly...
    let second = s.handle(Request::Get(GetRequest { requester_rank: 2, requested_type: 9, blocking: true, count: 1 }));
    match second.reply {
        Reply::Get { payload, .. } => assert_eq!(payload, b"parallel-job"),
        other => panic!("expected Get, got {other:?}"),
    }

    // ...and rank 1 picks up the same payload on its next poll, since its
    // earlier registration was consumed and re-enqueued rank-targeted.
    let echoed = s.handle(Request::Get(GetRequest { requester_rank: 1, requested_type: 9, blocking: true, count: 1 }));
    match echoed.reply {
        Reply::Get { payload, .. } => assert_eq!(payload, b"parallel-job"),
        other => panic!("expected Get, got {other:?}"),
    }
}

#[test]
fn shutdown_reports_leaked_pending_task() {
    let mut s = server();
    s.handle(Request::Create(CreateRequest { id: 99, ty: DatumType::Int, read_rc: 1, write_rc: 1, permanent: false }));
    s.handle(Request::PutRule(PutRuleRequest {
        put: put(b"never", 4, 0, Target::Any, Accuracy::Rank, Strictness::Strict),
        name: "leaked".to_string(),
        wait_ids: vec![99],
        wait_id_subs: vec![],
    }));
    let shutdown = s.handle(Request::Shutdown);
    assert!(matches!(shutdown.reply, Reply::Success));
}
