//! granlock - многогранулярный менеджер блокировок для rustdb
//!
//! Этот модуль предоставляет ядро управления конкурентностью: алгебру
//! типов блокировок, менеджер блокировок с FIFO-очередями, дерево
//! контекстов блокировок, повторяющее иерархию ресурсов
//! (база данных → таблица → страница), и декларативный уровень,
//! вычисляющий минимально необходимые блокировки.

pub mod cli;
pub mod common;
pub mod core;

pub use common::error::{Error, Result};
pub use crate::core::{
    ensure_sufficient_lock_held, ensure_sufficient_lock_held_for, release_all_locks, Lock,
    LockContext, LockManager, LockType, ResourceName, Transaction, TransactionHandle,
    TransactionId,
};

/// Версия библиотеки
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
