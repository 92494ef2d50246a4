//! Tests for the transaction protocol.

mod common;

use common::{b, expect_size, expect_update, Driver};
use keystone::map::events::EventKind;
use keystone::map::listener::{ListenerEvent, ListenerFilters};
use keystone::map::ops::{Operation, Response};
use keystone::map::store::UpdateStatus;
use keystone::map::txn::{
    CommitResult, PrepareResult, RollbackResult, StagedUpdate, TransactionId, TransactionLog,
};

fn begin(driver: &mut Driver, id: &str) -> u64 {
    match driver.query(Operation::Begin {
        id: TransactionId::from(id),
    }) {
        Response::BeginVersion(version) => version,
        other => panic!("unexpected response {:?}", other),
    }
}

fn prepare(driver: &mut Driver, id: &str, version: u64, updates: Vec<StagedUpdate>) -> PrepareResult {
    match driver.apply(Operation::Prepare {
        log: TransactionLog {
            id: TransactionId::from(id),
            version,
            updates,
        },
    }) {
        Response::Prepare(result) => result,
        other => panic!("unexpected response {:?}", other),
    }
}

fn commit(driver: &mut Driver, id: &str) -> CommitResult {
    match driver.apply(Operation::Commit {
        id: TransactionId::from(id),
    }) {
        Response::Commit(result) => result,
        other => panic!("unexpected response {:?}", other),
    }
}

fn rollback(driver: &mut Driver, id: &str) -> RollbackResult {
    match driver.apply(Operation::Rollback {
        id: TransactionId::from(id),
    }) {
        Response::Rollback(result) => result,
        other => panic!("unexpected response {:?}", other),
    }
}

fn staged_put(key: &str, value: &str, expect: u64) -> StagedUpdate {
    StagedUpdate::Put {
        key: key.to_string(),
        value: b(value),
        expect: Some(expect),
    }
}

// ============================================================================
// Begin
// ============================================================================

#[test]
fn begin_returns_current_version_idempotently() {
    let mut driver = Driver::new();
    driver.put("a", "1");
    driver.put("b", "2");

    let v = begin(&mut driver, "t1");
    assert_eq!(v, 2);

    driver.put("c", "3");
    // Repeated begin returns the originally issued version.
    assert_eq!(begin(&mut driver, "t1"), v);
    // A different transaction observes the newer counter.
    assert_eq!(begin(&mut driver, "t2"), 3);
}

// ============================================================================
// Prepare / commit
// ============================================================================

#[test]
fn committed_updates_get_consecutive_versions() {
    let mut driver = Driver::new();
    driver.put("a", "1");
    driver.put("b", "2");

    let start = begin(&mut driver, "t1");
    let result = prepare(
        &mut driver,
        "t1",
        start,
        vec![staged_put("a", "9", 1), staged_put("b", "8", 2)],
    );
    assert_eq!(result, PrepareResult::Ok);
    assert_eq!(commit(&mut driver, "t1"), CommitResult::Ok);

    let va = driver.get("a").unwrap();
    let vb = driver.get("b").unwrap();
    assert_eq!(va.value, b("9"));
    assert_eq!(vb.value, b("8"));
    assert!(va.version > start && vb.version > start);
    assert_eq!(vb.version, va.version + 1);
}

#[test]
fn second_prepare_on_locked_key_is_a_concurrent_transaction() {
    let mut driver = Driver::new();

    begin(&mut driver, "t1");
    assert_eq!(
        prepare(&mut driver, "t1", 0, vec![staged_put("k", "1", 0)]),
        PrepareResult::Ok
    );

    begin(&mut driver, "t2");
    assert_eq!(
        prepare(&mut driver, "t2", 0, vec![staged_put("k", "2", 0)]),
        PrepareResult::ConcurrentTransaction
    );
}

#[test]
fn version_mismatch_fails_prepare_and_erases_the_record() {
    let mut driver = Driver::new();
    driver.put("a", "1");

    assert_eq!(
        prepare(&mut driver, "t1", 0, vec![staged_put("a", "2", 999)]),
        PrepareResult::OptimisticLockFailure
    );
    // The conflict edge rolled the transaction back.
    assert_eq!(commit(&mut driver, "t1"), CommitResult::UnknownTransactionId);
    assert!(driver.service.transactions().locks().is_empty());
}

#[test]
fn first_failing_update_decides_the_error() {
    let mut driver = Driver::new();
    driver.put("a", "1");

    begin(&mut driver, "other");
    prepare(&mut driver, "other", 0, vec![staged_put("locked", "x", 0)]);

    // Update order: version mismatch on "a" comes before the lock
    // conflict on "locked".
    let result = prepare(
        &mut driver,
        "t1",
        0,
        vec![staged_put("a", "2", 999), staged_put("locked", "y", 0)],
    );
    assert_eq!(result, PrepareResult::OptimisticLockFailure);

    // And in the reverse order the lock conflict wins.
    let result = prepare(
        &mut driver,
        "t2",
        0,
        vec![staged_put("locked", "y", 0), staged_put("a", "2", 999)],
    );
    assert_eq!(result, PrepareResult::ConcurrentTransaction);
}

#[test]
fn staged_remove_applies_at_commit() {
    let mut driver = Driver::new();
    driver.put("a", "1");

    prepare(
        &mut driver,
        "t1",
        0,
        vec![StagedUpdate::Remove {
            key: "a".into(),
            expect: Some(1),
        }],
    );
    assert_eq!(commit(&mut driver, "t1"), CommitResult::Ok);
    assert!(driver.get("a").is_none());
}

#[test]
fn lock_updates_validate_but_do_not_write() {
    let mut driver = Driver::new();
    driver.put("guard", "1");

    prepare(
        &mut driver,
        "t1",
        0,
        vec![
            StagedUpdate::Lock {
                key: "guard".into(),
                expect: 1,
            },
            staged_put("out", "2", 0),
        ],
    );
    assert_eq!(commit(&mut driver, "t1"), CommitResult::Ok);

    // The guard key kept its version; only the write drew one.
    assert_eq!(driver.get("guard").unwrap().version, 1);
    assert_eq!(driver.get("out").unwrap().version, 2);
}

#[test]
fn commit_emits_one_event_per_write() {
    let mut driver = Driver::new();
    driver.put("a", "1");
    driver.apply(Operation::AddListener {
        filters: ListenerFilters::empty(),
    });

    prepare(
        &mut driver,
        "t1",
        0,
        vec![
            staged_put("a", "9", 1),
            StagedUpdate::Put {
                key: "b".into(),
                value: b("new"),
                expect: None,
            },
        ],
    );
    commit(&mut driver, "t1");

    let events = driver.service.drain_events(driver.session);
    let kinds: Vec<(EventKind, &str)> = events
        .iter()
        .map(|e| match e {
            ListenerEvent::Event(e) => (e.kind, e.key.as_str()),
            other => panic!("unexpected event {:?}", other),
        })
        .collect();
    assert_eq!(
        kinds,
        [(EventKind::Update, "a"), (EventKind::Insert, "b")]
    );
}

#[test]
fn prepare_and_commit_is_a_single_shot() {
    let mut driver = Driver::new();
    driver.put("a", "1");

    let response = driver.apply(Operation::PrepareAndCommit {
        log: TransactionLog {
            id: TransactionId::from("t1"),
            version: 0,
            updates: vec![staged_put("a", "2", 1)],
        },
    });
    assert_eq!(response, Response::Prepare(PrepareResult::Ok));
    assert_eq!(driver.get("a").unwrap().value, b("2"));
    assert!(driver.service.transactions().locks().is_empty());
}

#[test]
fn prepare_and_commit_propagates_prepare_failures() {
    let mut driver = Driver::new();
    driver.put("a", "1");

    let response = driver.apply(Operation::PrepareAndCommit {
        log: TransactionLog {
            id: TransactionId::from("t1"),
            version: 0,
            updates: vec![staged_put("a", "2", 999)],
        },
    });
    assert_eq!(
        response,
        Response::Prepare(PrepareResult::OptimisticLockFailure)
    );
    assert_eq!(driver.get("a").unwrap().value, b("1"));
}

// ============================================================================
// Lock safety
// ============================================================================

#[test]
fn direct_writes_to_locked_keys_are_rejected() {
    let mut driver = Driver::new();
    driver.put("k", "1");
    prepare(&mut driver, "t1", 0, vec![staged_put("k", "2", 1)]);

    let result = driver.put("k", "intruder");
    assert_eq!(result.status, UpdateStatus::WriteLock);
    assert_eq!(driver.get("k").unwrap().value, b("1"));

    let result = expect_update(driver.apply(Operation::Remove { key: "k".into() }));
    assert_eq!(result.status, UpdateStatus::WriteLock);
}

#[test]
fn clear_skips_locked_keys() {
    let mut driver = Driver::new();
    driver.put("a", "1");
    driver.put("k", "2");
    prepare(&mut driver, "t1", 0, vec![staged_put("k", "9", 2)]);

    driver.apply(Operation::Clear);
    assert_eq!(expect_size(driver.query(Operation::Size)), 1);
    assert!(driver.get("k").is_some());
}

#[test]
fn expiry_defers_while_a_key_is_locked() {
    let mut driver = Driver::new();
    driver.at(0).put_ttl("k", "1", 5);
    driver.at(1).apply(Operation::Prepare {
        log: TransactionLog {
            id: TransactionId::from("t1"),
            version: 0,
            updates: vec![StagedUpdate::Lock {
                key: "k".into(),
                expect: 1,
            }],
        },
    });

    // Long past the deadline, but the lock holds the entry in place.
    driver.at(50).put("tick", "x");
    assert!(driver.get("k").is_some());

    // The rollback command itself still observes the lock during its
    // sweep; the first command after release fires the expiry.
    assert_eq!(rollback(&mut driver, "t1"), RollbackResult::Ok);
    driver.at(60).put("tick2", "x");
    assert!(driver.get("k").is_none());
}

// ============================================================================
// Rollback and lifecycle edges
// ============================================================================

#[test]
fn rollback_releases_locks_and_discards_updates() {
    let mut driver = Driver::new();
    driver.put("a", "1");
    prepare(&mut driver, "t1", 0, vec![staged_put("a", "2", 1)]);

    assert_eq!(rollback(&mut driver, "t1"), RollbackResult::Ok);
    assert_eq!(driver.get("a").unwrap().value, b("1"));

    // The key is writable again.
    assert_eq!(driver.put("a", "3").status, UpdateStatus::Ok);
}

#[test]
fn unknown_transaction_ids_are_reported() {
    let mut driver = Driver::new();
    assert_eq!(commit(&mut driver, "ghost"), CommitResult::UnknownTransactionId);
    assert_eq!(
        rollback(&mut driver, "ghost"),
        RollbackResult::UnknownTransactionId
    );
}

#[test]
fn commit_of_an_unprepared_transaction_fails() {
    let mut driver = Driver::new();
    begin(&mut driver, "t1");
    assert_eq!(commit(&mut driver, "t1"), CommitResult::FailureDuringCommit);
    // Still rollbackable.
    assert_eq!(rollback(&mut driver, "t1"), RollbackResult::Ok);
}

#[test]
fn session_expire_gcs_active_but_keeps_prepared() {
    let mut driver = Driver::new();
    driver.put("k", "1");

    begin(&mut driver, "active");
    prepare(&mut driver, "prepared", 0, vec![staged_put("k", "2", 1)]);

    driver.apply(Operation::SessionExpire {
        session: driver.session,
    });

    // The ACTIVE record is gone.
    assert_eq!(
        rollback(&mut driver, "active"),
        RollbackResult::UnknownTransactionId
    );
    // The PREPARED record still commits.
    assert_eq!(commit(&mut driver, "prepared"), CommitResult::Ok);
    assert_eq!(driver.get("k").unwrap().value, b("2"));
}

#[test]
fn session_expire_drops_listener_queues() {
    let mut driver = Driver::new();
    driver.apply(Operation::AddListener {
        filters: ListenerFilters::empty(),
    });
    driver.put("a", "1");

    driver.apply(Operation::SessionExpire {
        session: driver.session,
    });
    assert!(driver.service.drain_events(driver.session).is_empty());
}
