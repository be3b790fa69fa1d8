//! Ядро granlock: многогранулярные блокировки

pub mod lock;
pub mod lock_context;
pub mod lock_manager;
pub mod lock_type;
pub mod lock_util;
pub mod resource_name;
pub mod transaction;

// Переэкспортируем основные типы
pub use lock::{Lock, LockRequest};
pub use lock_context::LockContext;
pub use lock_manager::{LockManager, LockManagerStats};
pub use lock_type::LockType;
pub use lock_util::{ensure_sufficient_lock_held, ensure_sufficient_lock_held_for, release_all_locks};
pub use resource_name::ResourceName;
pub use transaction::{
    get_transaction, set_transaction, unset_transaction, Transaction, TransactionContext,
    TransactionHandle, TransactionId, TransactionScope,
};

#[cfg(test)]
pub mod tests;
