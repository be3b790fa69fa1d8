//! Декларативный уровень получения блокировок
//!
//! Код выполнения запросов не работает с контекстами напрямую: он
//! сообщает, какой доступ нужен к ресурсу (NL, S или X), а
//! `ensure_sufficient_lock_held` получает, повышает или эскалирует
//! минимально необходимый набор блокировок на ресурсе и его предках.

use crate::common::{Error, Result};
use crate::core::lock_context::LockContext;
use crate::core::lock_manager::LockManager;
use crate::core::lock_type::LockType;
use crate::core::transaction::{get_transaction, TransactionHandle};
use std::cmp::Reverse;
use tracing::debug;

/// Гарантирует, что текущая транзакция потока может выполнять на
/// `lock_context` действия, требующие `request_type`
///
/// Без текущей транзакции ничего не делает.
pub fn ensure_sufficient_lock_held(lock_context: &LockContext, request_type: LockType) -> Result<()> {
    match get_transaction() {
        Some(transaction) => ensure_sufficient_lock_held_for(lock_context, &transaction, request_type),
        None => Ok(()),
    }
}

/// То же, что `ensure_sufficient_lock_held`, для явно переданной транзакции
pub fn ensure_sufficient_lock_held_for(
    lock_context: &LockContext,
    transaction: &TransactionHandle,
    request_type: LockType,
) -> Result<()> {
    use LockType::*;
    if !matches!(request_type, Shared | Exclusive | NoLock) {
        return Err(Error::invalid_lock(format!(
            "request type must be S, X or NL, got {}",
            request_type
        )));
    }
    if request_type == NoLock {
        return Ok(());
    }

    let transaction_id = transaction.trans_num();
    let explicit = lock_context.get_explicit_lock_type(transaction_id);
    let effective = lock_context.get_effective_lock_type(transaction_id);
    if LockType::substitutable(explicit, request_type) || LockType::substitutable(effective, request_type) {
        return Ok(());
    }

    debug!(
        transaction = %transaction_id,
        resource = %lock_context.resource_name(),
        explicit = %explicit,
        requested = %request_type,
        "недостаточно блокировок, выполняется повышение"
    );

    if explicit == IntentionExclusive && request_type == Shared {
        // SIX не может быть родителем IX и X: в этом случае эскалируем до X
        let has_exclusive_children = lock_context.children_snapshot().iter().any(|child| {
            matches!(
                child.get_explicit_lock_type(transaction_id),
                IntentionExclusive | Exclusive
            )
        });
        if has_exclusive_children {
            lock_context.escalate(transaction)
        } else {
            lock_context.promote(transaction, SharedIntentionExclusive)
        }
    } else if explicit.is_intent() {
        lock_context.escalate(transaction)?;
        let escalated = lock_context.get_explicit_lock_type(transaction_id);
        if !LockType::substitutable(escalated, request_type) {
            ensure_ancestors_hold_intent(lock_context, transaction, request_type)?;
            lock_context.promote(transaction, request_type)?;
        }
        Ok(())
    } else {
        ensure_ancestors_hold_intent(lock_context, transaction, request_type)?;
        if explicit == NoLock {
            lock_context.acquire(transaction, request_type)
        } else {
            lock_context.promote(transaction, request_type)
        }
    }
}

/// Получает на всех предках, от корня вниз, intention-блокировку,
/// достаточную для `request_type` на потомке
fn ensure_ancestors_hold_intent(
    lock_context: &LockContext,
    transaction: &TransactionHandle,
    request_type: LockType,
) -> Result<()> {
    let intent = match request_type {
        LockType::Shared => LockType::IntentionShared,
        _ => LockType::IntentionExclusive,
    };
    let transaction_id = transaction.trans_num();

    for ancestor in lock_context.ancestors() {
        let current = ancestor.get_explicit_lock_type(transaction_id);
        if current == LockType::NoLock {
            ancestor.acquire(transaction, intent)?;
        } else if !LockType::substitutable(current, intent) {
            ancestor.promote(transaction, intent)?;
        }
    }
    Ok(())
}

/// Освобождает все блокировки транзакции, начиная с самых глубоких ресурсов
///
/// Вызывается при фиксации или откате транзакции. Освобождение идет через
/// контексты, поэтому счетчики блокировок потомков остаются точными.
pub fn release_all_locks(lockman: &LockManager, transaction: &TransactionHandle) -> Result<()> {
    let mut locks = lockman.get_transaction_locks(transaction.trans_num());
    locks.sort_by_key(|lock| Reverse(lock.name.depth()));

    for lock in &locks {
        let context = LockContext::from_resource_name(lockman, &lock.name)?;
        if context.is_readonly() {
            lockman.release(transaction, &lock.name)?;
        } else {
            context.release(transaction)?;
        }
    }

    if !locks.is_empty() {
        debug!(
            transaction = %transaction.trans_num(),
            released = locks.len(),
            "все блокировки транзакции освобождены"
        );
    }
    Ok(())
}
