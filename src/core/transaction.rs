//! Транзакция с точки зрения менеджера блокировок
//!
//! Менеджеру нужны только стабильный идентификатор транзакции и
//! кооперативный протокол приостановки из трех шагов: `prepare_block`
//! (взвести), `block` (уснуть до пробуждения) и `unblock` (разбудить).

use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::sync::Arc;

/// Уникальный идентификатор транзакции
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TXN{}", self.0)
    }
}

/// Интерфейс транзакции, потребляемый менеджером блокировок
///
/// `prepare_block` вызывается внутри критической секции менеджера, пока
/// еще видно, что ожидание необходимо; `block` - уже после выхода из нее.
/// Пробуждение между этими шагами не теряется: `block` сразу вернется.
pub trait TransactionContext: Send + Sync {
    /// Идентификатор транзакции
    fn trans_num(&self) -> TransactionId;

    /// Взводит транзакцию для блокировки
    fn prepare_block(&self);

    /// Приостанавливает поток транзакции до вызова `unblock`
    fn block(&self);

    /// Пробуждает транзакцию; может вызываться из любого потока
    fn unblock(&self);

    /// Ожидает ли транзакция сейчас выдачи блокировки
    fn is_blocked(&self) -> bool;
}

/// Разделяемая ссылка на транзакцию
pub type TransactionHandle = Arc<dyn TransactionContext>;

/// Простая транзакция на основе мьютекса и условной переменной
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    blocked: Mutex<bool>,
    unblocked: Condvar,
}

impl Transaction {
    /// Создает транзакцию с номером `id`
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: TransactionId::new(id),
            blocked: Mutex::new(false),
            unblocked: Condvar::new(),
        })
    }

    /// Создает транзакцию и сразу возвращает ее как `TransactionHandle`
    pub fn handle(id: u64) -> TransactionHandle {
        Self::new(id)
    }
}

impl TransactionContext for Transaction {
    fn trans_num(&self) -> TransactionId {
        self.id
    }

    fn prepare_block(&self) {
        *self.blocked.lock() = true;
    }

    fn block(&self) {
        let mut blocked = self.blocked.lock();
        while *blocked {
            self.unblocked.wait(&mut blocked);
        }
    }

    fn unblock(&self) {
        let mut blocked = self.blocked.lock();
        *blocked = false;
        self.unblocked.notify_all();
    }

    fn is_blocked(&self) -> bool {
        *self.blocked.lock()
    }
}

thread_local! {
    static CURRENT_TRANSACTION: RefCell<Vec<TransactionHandle>> = const { RefCell::new(Vec::new()) };
}

/// Делает `transaction` текущей транзакцией потока
///
/// Вызовы вкладываются: `unset_transaction` восстанавливает предыдущую.
pub fn set_transaction(transaction: TransactionHandle) {
    CURRENT_TRANSACTION.with(|stack| stack.borrow_mut().push(transaction));
}

/// Текущая транзакция потока, если она установлена
pub fn get_transaction() -> Option<TransactionHandle> {
    CURRENT_TRANSACTION.with(|stack| stack.borrow().last().cloned())
}

/// Снимает текущую транзакцию потока
pub fn unset_transaction() -> Option<TransactionHandle> {
    CURRENT_TRANSACTION.with(|stack| stack.borrow_mut().pop())
}

/// RAII-область, в которой транзакция является текущей для потока
pub struct TransactionScope {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl TransactionScope {
    pub fn enter(transaction: TransactionHandle) -> Self {
        set_transaction(transaction);
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        unset_transaction();
    }
}
