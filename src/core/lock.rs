//! Значения блокировок и запросов на блокировку

use crate::core::lock_type::LockType;
use crate::core::resource_name::ResourceName;
use crate::core::transaction::{TransactionHandle, TransactionId};

/// Выданная (или запрошенная) блокировка: ресурс, тип и транзакция
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lock {
    /// Имя ресурса
    pub name: ResourceName,
    /// Тип блокировки
    pub lock_type: LockType,
    /// Транзакция-владелец
    pub transaction_id: TransactionId,
}

impl Lock {
    pub fn new(name: ResourceName, lock_type: LockType, transaction_id: TransactionId) -> Self {
        Self {
            name,
            lock_type,
            transaction_id,
        }
    }
}

impl std::fmt::Display for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}({})", self.transaction_id, self.lock_type, self.name)
    }
}

/// Запрос в очереди ожидания ресурса
///
/// Представляет заблокированный acquire, promote или acquire-and-release.
/// `released_locks` освобождаются только после выдачи `lock`.
#[derive(Clone)]
pub struct LockRequest {
    /// Ожидающая транзакция
    pub transaction: TransactionHandle,
    /// Запрошенная блокировка
    pub lock: Lock,
    /// Блокировки, освобождаемые вместе с выдачей
    pub released_locks: Vec<Lock>,
}

impl LockRequest {
    pub fn new(transaction: TransactionHandle, lock: Lock) -> Self {
        Self::with_released(transaction, lock, Vec::new())
    }

    pub fn with_released(transaction: TransactionHandle, lock: Lock, released_locks: Vec<Lock>) -> Self {
        Self {
            transaction,
            lock,
            released_locks,
        }
    }

    /// Идентификатор ожидающей транзакции
    pub fn transaction_id(&self) -> TransactionId {
        self.lock.transaction_id
    }
}

impl std::fmt::Debug for LockRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRequest")
            .field("lock", &self.lock)
            .field("released_locks", &self.released_locks)
            .finish()
    }
}

impl std::fmt::Display for LockRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Request for {}", self.lock)?;
        if !self.released_locks.is_empty() {
            let released: Vec<String> = self.released_locks.iter().map(ToString::to_string).collect();
            write!(f, " (releasing {})", released.join(", "))?;
        }
        Ok(())
    }
}
