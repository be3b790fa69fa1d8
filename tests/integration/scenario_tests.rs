//! Сценарии с несколькими транзакциями

use super::common::*;
use granlock::common::{Error, LockConfig};
use granlock::{ensure_sufficient_lock_held_for, release_all_locks, LockType, TransactionId};
use std::sync::Arc;
use std::thread;

#[test]
fn test_readers_share_writer_waits() {
    let ctx = TestContext::new();
    let page = ctx.page(0, 1);
    let (reader1, reader2, writer) = (ctx.transaction(1), ctx.transaction(2), ctx.transaction(3));

    ensure_sufficient_lock_held_for(&page, &reader1, LockType::Shared).unwrap();
    ensure_sufficient_lock_held_for(&page, &reader2, LockType::Shared).unwrap();

    let writer_thread = {
        let page = Arc::clone(&page);
        let writer = Arc::clone(&writer);
        thread::spawn(move || ensure_sufficient_lock_held_for(&page, &writer, LockType::Exclusive).unwrap())
    };
    wait_until("writer to queue", || {
        ctx.lock_manager.get_queued_locks(page.resource_name()).len() == 1
    });
    assert!(writer.is_blocked());
    // Intention-блокировки писателя уже получены
    assert_eq!(
        ctx.table(0).get_explicit_lock_type(TransactionId(3)),
        LockType::IntentionExclusive
    );

    release_all_locks(&ctx.lock_manager, &reader1).unwrap();
    assert!(writer.is_blocked());
    release_all_locks(&ctx.lock_manager, &reader2).unwrap();
    writer_thread.join().unwrap();

    assert_eq!(page.get_explicit_lock_type(TransactionId(3)), LockType::Exclusive);
    assert_eq!(ctx.database.num_children(TransactionId(3)), 2);
}

#[test]
fn test_table_scan_blocks_page_writer() {
    let ctx = TestContext::new();
    let table = ctx.table(0);
    let (scanner, writer) = (ctx.transaction(1), ctx.transaction(2));

    ensure_sufficient_lock_held_for(&table, &scanner, LockType::Shared).unwrap();

    let writer_thread = {
        let page = ctx.page(0, 5);
        let writer = Arc::clone(&writer);
        thread::spawn(move || ensure_sufficient_lock_held_for(&page, &writer, LockType::Exclusive).unwrap())
    };
    // IX на таблице несовместима с S
    wait_until("writer to queue on table", || {
        ctx.lock_manager.get_queued_locks(table.resource_name()).len() == 1
    });

    release_all_locks(&ctx.lock_manager, &scanner).unwrap();
    writer_thread.join().unwrap();
    assert_eq!(
        ctx.page(0, 5).get_explicit_lock_type(TransactionId(2)),
        LockType::Exclusive
    );
}

#[test]
fn test_six_allows_intent_shared_readers() {
    let ctx = TestContext::new();
    let table = ctx.table(1);
    let (updater, reader, writer) = (ctx.transaction(1), ctx.transaction(2), ctx.transaction(3));

    ensure_sufficient_lock_held_for(&ctx.page(1, 0), &updater, LockType::Exclusive).unwrap();
    ensure_sufficient_lock_held_for(&table, &updater, LockType::Shared).unwrap();
    assert_eq!(
        table.get_explicit_lock_type(TransactionId(1)),
        LockType::Exclusive,
        "IX with an exclusive child escalates"
    );
    release_all_locks(&ctx.lock_manager, &updater).unwrap();

    ensure_sufficient_lock_held_for(&ctx.page(1, 0), &updater, LockType::Shared).unwrap();
    ctx.database.promote(&updater, LockType::IntentionExclusive).unwrap();
    table.promote(&updater, LockType::IntentionExclusive).unwrap();
    ensure_sufficient_lock_held_for(&table, &updater, LockType::Shared).unwrap();
    assert_eq!(
        table.get_explicit_lock_type(TransactionId(1)),
        LockType::SharedIntentionExclusive
    );

    // IS совместима с SIX, IX - нет
    ensure_sufficient_lock_held_for(&ctx.page(1, 1), &reader, LockType::Shared).unwrap();
    let writer_thread = {
        let page = ctx.page(1, 2);
        let writer = Arc::clone(&writer);
        thread::spawn(move || ensure_sufficient_lock_held_for(&page, &writer, LockType::Exclusive).unwrap())
    };
    wait_until("writer to queue", || {
        ctx.lock_manager.get_queued_locks(table.resource_name()).len() == 1
    });

    release_all_locks(&ctx.lock_manager, &updater).unwrap();
    writer_thread.join().unwrap();
    assert_eq!(
        table.get_explicit_lock_type(TransactionId(3)),
        LockType::IntentionExclusive
    );
}

#[test]
fn test_escalation_waits_as_a_unit() {
    let ctx = TestContext::new();
    let table = ctx.table(0);
    let (reader, writer) = (ctx.transaction(1), ctx.transaction(2));

    ensure_sufficient_lock_held_for(&ctx.page(0, 1), &reader, LockType::Shared).unwrap();
    ensure_sufficient_lock_held_for(&ctx.page(0, 2), &writer, LockType::Exclusive).unwrap();

    let escalation = {
        let table = Arc::clone(&table);
        let reader = Arc::clone(&reader);
        thread::spawn(move || table.escalate(&reader).unwrap())
    };
    wait_until("escalation to queue", || {
        ctx.lock_manager.get_queued_locks(table.resource_name()).len() == 1
    });

    // Пока запрос ждет, блокировка на странице сохраняется
    assert_eq!(
        ctx.page(0, 1).get_explicit_lock_type(TransactionId(1)),
        LockType::Shared
    );

    release_all_locks(&ctx.lock_manager, &writer).unwrap();
    escalation.join().unwrap();

    assert_eq!(table.get_explicit_lock_type(TransactionId(1)), LockType::Shared);
    assert_eq!(
        ctx.page(0, 1).get_explicit_lock_type(TransactionId(1)),
        LockType::NoLock
    );
    assert_eq!(ctx.database.num_children(TransactionId(1)), 1);
}

#[test]
fn test_configured_database_name() {
    let config = LockConfig {
        database_name: "warehouse".to_string(),
        ..LockConfig::default()
    };
    let ctx = TestContext::with_config(config);
    let t1 = ctx.transaction(1);

    ensure_sufficient_lock_held_for(&ctx.page(0, 0), &t1, LockType::Shared).unwrap();

    let names: Vec<String> = ctx
        .lock_manager
        .get_transaction_locks(TransactionId(1))
        .iter()
        .map(|lock| lock.name.to_string())
        .collect();
    assert_eq!(names, vec!["warehouse", "warehouse/table0", "warehouse/table0/0"]);
}

#[test]
fn test_index_contexts_are_readonly() {
    let ctx = TestContext::new();
    let t1 = ctx.transaction(1);
    let table = ctx.table(0);
    let index = table.child_context("index");
    index.disable_child_locks();
    let leaf = index.child_context("leaf7");

    ensure_sufficient_lock_held_for(&table, &t1, LockType::Shared).unwrap();
    // Неявной S от таблицы достаточно, изменять read-only контекст не нужно
    ensure_sufficient_lock_held_for(&leaf, &t1, LockType::Shared).unwrap();
    assert!(matches!(
        ensure_sufficient_lock_held_for(&leaf, &t1, LockType::Exclusive),
        Err(Error::Unsupported { .. }) | Err(Error::InvalidLock { .. })
    ));
}
