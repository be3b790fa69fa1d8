//! Общие утилиты для интеграционных тестов

use granlock::common::LockConfig;
use granlock::{LockContext, LockManager, Transaction, TransactionHandle};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Иерархия `database -> tableN -> page` поверх одного менеджера блокировок
pub struct TestContext {
    pub lock_manager: Arc<LockManager>,
    pub database: Arc<LockContext>,
}

impl TestContext {
    /// Создает контекст с конфигурацией по умолчанию
    pub fn new() -> Self {
        Self::with_config(LockConfig::default())
    }

    /// Создает контекст с заданной конфигурацией
    pub fn with_config(config: LockConfig) -> Self {
        let lock_manager = LockManager::with_config(config);
        let database = lock_manager.database_context();
        Self {
            lock_manager,
            database,
        }
    }

    pub fn table(&self, table: usize) -> Arc<LockContext> {
        self.database.child_context(format!("table{}", table))
    }

    pub fn page(&self, table: usize, page: usize) -> Arc<LockContext> {
        self.table(table).child_context(page)
    }

    pub fn transaction(&self, id: u64) -> TransactionHandle {
        Transaction::handle(id)
    }
}

/// Ждет выполнения условия, опрашивая его; паникует по таймауту
pub fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for: {}", description);
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
