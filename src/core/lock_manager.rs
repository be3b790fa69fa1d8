//! Менеджер блокировок для granlock
//!
//! Ведет учет того, какие транзакции держат какие блокировки на каких
//! ресурсах, и обслуживает очереди ожидания. Иерархия ресурсов здесь не
//! учитывается: многогранулярный протокол реализует `LockContext`, и
//! обычно менеджер используется через него.
//!
//! У каждого ресурса своя FIFO-очередь запросов, которые не удалось
//! удовлетворить сразу. Очередь обрабатывается при каждом освобождении
//! блокировки на ресурсе, с начала и до первого запроса, который выдать
//! нельзя. Поэтому для очереди `S(A) X(A) S(A)` после освобождения `X(A)`
//! из очереди уйдет только первый запрос.

use crate::common::config::LockConfig;
use crate::common::{Error, Result};
use crate::core::lock::{Lock, LockRequest};
use crate::core::lock_context::LockContext;
use crate::core::lock_type::LockType;
use crate::core::resource_name::ResourceName;
use crate::core::transaction::{TransactionHandle, TransactionId};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Статистика менеджера блокировок
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockManagerStats {
    /// Общее количество принятых запросов (acquire, promote, acquire-and-release)
    pub total_lock_requests: u64,
    /// Количество выданных блокировок, включая выданные из очереди
    pub locks_acquired: u64,
    /// Количество освобожденных блокировок
    pub locks_released: u64,
    /// Количество повышений блокировок
    pub locks_promoted: u64,
    /// Количество запросов, поставленных в очередь
    pub blocked_requests: u64,
    /// Количество запросов, выданных при обработке очереди
    pub granted_from_queue: u64,
    /// Количество активных блокировок
    pub active_locks: u64,
    /// Количество запросов в очередях ожидания
    pub waiting_requests: u64,
}

/// Состояние одного ресурса: выданные блокировки и очередь ожидания
#[derive(Debug, Default)]
struct ResourceEntry {
    /// Выданные блокировки в порядке получения
    locks: Vec<Lock>,
    /// Запросы, которые пока нельзя удовлетворить
    waiting_queue: VecDeque<LockRequest>,
}

impl ResourceEntry {
    /// Проверяет совместимость `lock_type` с выданными блокировками и очередью
    ///
    /// Блокировки транзакции `except` конфликтом не считаются. Запросы в
    /// очереди, стоящие до запроса самой `except`, должны быть совместимы.
    fn check_compatible(&self, lock_type: LockType, except: TransactionId) -> bool {
        let held_ok = self
            .locks
            .iter()
            .all(|lock| lock.transaction_id == except || LockType::compatible(lock_type, lock.lock_type));
        if !held_ok {
            return false;
        }

        for request in &self.waiting_queue {
            if request.transaction_id() == except {
                return true;
            }
            if !LockType::compatible(request.lock.lock_type, lock_type) {
                return false;
            }
        }
        true
    }

    /// Тип блокировки транзакции на этом ресурсе
    fn transaction_lock_type(&self, transaction_id: TransactionId) -> LockType {
        self.locks
            .iter()
            .find(|lock| lock.transaction_id == transaction_id)
            .map_or(LockType::NoLock, |lock| lock.lock_type)
    }

    fn add_to_queue(&mut self, request: LockRequest, add_front: bool) {
        if add_front {
            self.waiting_queue.push_front(request);
        } else {
            self.waiting_queue.push_back(request);
        }
    }
}

impl std::fmt::Display for ResourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let locks: Vec<String> = self.locks.iter().map(ToString::to_string).collect();
        let queue: Vec<String> = self.waiting_queue.iter().map(ToString::to_string).collect();
        write!(f, "Active Locks: [{}], Queue: [{}]", locks.join(", "), queue.join(", "))
    }
}

/// Таблица блокировок; защищается единственным мьютексом менеджера
#[derive(Debug, Default)]
struct LockTable {
    /// Транзакция -> блокировки в порядке получения
    transaction_locks: HashMap<TransactionId, Vec<Lock>>,
    /// Ресурс -> выданные блокировки и очередь
    resource_entries: HashMap<ResourceName, ResourceEntry>,
    stats: LockManagerStats,
}

impl LockTable {
    fn lock_type(&self, transaction_id: TransactionId, name: &ResourceName) -> LockType {
        self.resource_entries
            .get(name)
            .map_or(LockType::NoLock, |entry| entry.transaction_lock_type(transaction_id))
    }

    fn check_compatible(&self, name: &ResourceName, lock_type: LockType, except: TransactionId) -> bool {
        self.resource_entries
            .get(name)
            .map_or(true, |entry| entry.check_compatible(lock_type, except))
    }

    /// Выдает блокировку, заменяя на месте уже имеющуюся у транзакции
    ///
    /// Замена не меняет позицию блокировки ни в списке ресурса, ни в
    /// списке транзакции.
    fn grant_or_update(&mut self, lock: Lock) {
        let entry = self.resource_entries.entry(lock.name.clone()).or_default();
        match entry
            .locks
            .iter_mut()
            .find(|held| held.transaction_id == lock.transaction_id)
        {
            Some(held) => *held = lock.clone(),
            None => {
                entry.locks.push(lock.clone());
                self.stats.active_locks += 1;
            }
        }

        let held_by_transaction = self.transaction_locks.entry(lock.transaction_id).or_default();
        match held_by_transaction.iter_mut().find(|held| held.name == lock.name) {
            Some(held) => *held = lock,
            None => held_by_transaction.push(lock),
        }
        self.stats.locks_acquired += 1;
    }

    /// Удаляет блокировку транзакции из обоих представлений без обработки очереди
    fn remove_lock(&mut self, transaction_id: TransactionId, name: &ResourceName) -> bool {
        let removed = match self.resource_entries.get_mut(name) {
            Some(entry) => {
                let before = entry.locks.len();
                entry.locks.retain(|lock| lock.transaction_id != transaction_id);
                before != entry.locks.len()
            }
            None => false,
        };

        if let Some(held) = self.transaction_locks.get_mut(&transaction_id) {
            held.retain(|lock| &lock.name != name);
            if held.is_empty() {
                self.transaction_locks.remove(&transaction_id);
            }
        }

        if removed {
            self.stats.active_locks = self.stats.active_locks.saturating_sub(1);
            self.stats.locks_released += 1;
        }
        removed
    }

    fn enqueue(&mut self, request: LockRequest, add_front: bool) {
        self.resource_entries
            .entry(request.lock.name.clone())
            .or_default()
            .add_to_queue(request, add_front);
        self.stats.blocked_requests += 1;
        self.stats.waiting_requests += 1;
    }

    /// Освобождает блокировки и обрабатывает очереди всех затронутых ресурсов
    ///
    /// Запросы, выданные из очереди, могут освободить свои блокировки на
    /// других ресурсах; их очереди тоже обрабатываются.
    fn release_locks(&mut self, locks: &[Lock], log_waits: bool) {
        let mut pending: VecDeque<ResourceName> = VecDeque::new();
        for lock in locks {
            if self.remove_lock(lock.transaction_id, &lock.name) {
                pending.push_back(lock.name.clone());
            }
        }

        while let Some(name) = pending.pop_front() {
            let released = self.process_queue(&name, log_waits);
            pending.extend(released);
        }
    }

    /// Выдает блокировки запросам с начала очереди, пока это возможно
    ///
    /// Возвращает ресурсы, на которых выданные запросы освободили блокировки.
    fn process_queue(&mut self, name: &ResourceName, log_waits: bool) -> Vec<ResourceName> {
        let mut released_names = Vec::new();

        loop {
            let request = {
                let Some(entry) = self.resource_entries.get_mut(name) else {
                    break;
                };
                let Some(front) = entry.waiting_queue.front() else {
                    break;
                };
                if !entry.check_compatible(front.lock.lock_type, front.transaction_id()) {
                    trace!(resource = %name, request = %front, "первый запрос очереди несовместим, обработка остановлена");
                    break;
                }
                match entry.waiting_queue.pop_front() {
                    Some(request) => request,
                    None => break,
                }
            };

            self.stats.waiting_requests = self.stats.waiting_requests.saturating_sub(1);
            self.stats.granted_from_queue += 1;
            self.grant_or_update(request.lock.clone());

            for released in &request.released_locks {
                if released.name != request.lock.name
                    && self.remove_lock(released.transaction_id, &released.name)
                {
                    released_names.push(released.name.clone());
                }
            }

            if log_waits {
                debug!(
                    transaction = %request.transaction_id(),
                    resource = %name,
                    lock_type = %request.lock.lock_type,
                    "блокировка выдана из очереди, транзакция пробуждается"
                );
            }
            request.transaction.unblock();
        }

        released_names
    }
}

/// Менеджер блокировок
///
/// Все изменяющие операции выполняются внутри одной критической секции.
/// Решение о блокировке транзакции принимается внутри нее (там же
/// транзакция взводится через `prepare_block`), а засыпает транзакция
/// уже после выхода из секции.
pub struct LockManager {
    /// Таблица блокировок
    table: Mutex<LockTable>,
    /// Корневые контексты по имени
    contexts: DashMap<String, Arc<LockContext>>,
    /// Конфигурация
    config: LockConfig,
    /// Слабая ссылка на себя для создания контекстов
    self_ref: Weak<LockManager>,
}

impl LockManager {
    /// Создает новый менеджер блокировок с конфигурацией по умолчанию
    pub fn new() -> Arc<Self> {
        Self::with_config(LockConfig::default())
    }

    /// Создает новый менеджер блокировок
    pub fn with_config(config: LockConfig) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            table: Mutex::new(LockTable::default()),
            contexts: DashMap::new(),
            config,
            self_ref: self_ref.clone(),
        })
    }

    /// Конфигурация менеджера
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Получает блокировку `lock_type` на `name` и атомарно освобождает
    /// блокировки транзакции на `release_names`
    ///
    /// Все проверки выполняются до любых изменений. Если новая блокировка
    /// несовместима, запрос целиком ставится в НАЧАЛО очереди ресурса, а
    /// освобождения откладываются до его выдачи. Если `name` входит в
    /// `release_names`, время получения блокировки на `name` сохраняется.
    pub fn acquire_and_release(
        &self,
        transaction: &TransactionHandle,
        name: &ResourceName,
        lock_type: LockType,
        release_names: &[ResourceName],
    ) -> Result<()> {
        let transaction_id = transaction.trans_num();
        let should_block = {
            let mut table = self.table.lock();
            Self::check_not_no_lock(lock_type, name)?;
            if table.lock_type(transaction_id, name) == lock_type {
                return Err(Error::duplicate_lock_request(format!(
                    "{} already holds {}({})",
                    transaction_id, lock_type, name
                )));
            }

            let mut released_locks = Vec::with_capacity(release_names.len());
            for release_name in release_names {
                let held = table.lock_type(transaction_id, release_name);
                if held == LockType::NoLock {
                    return Err(Error::no_lock_held(format!(
                        "{} holds no lock on {}",
                        transaction_id, release_name
                    )));
                }
                released_locks.push(Lock::new(release_name.clone(), held, transaction_id));
            }

            table.stats.total_lock_requests += 1;
            let lock = Lock::new(name.clone(), lock_type, transaction_id);
            if table.check_compatible(name, lock_type, transaction_id) {
                table.grant_or_update(lock);
                released_locks.retain(|released| &released.name != name);
                table.release_locks(&released_locks, self.config.log_waits);
                false
            } else {
                table.enqueue(LockRequest::with_released(Arc::clone(transaction), lock, released_locks), true);
                transaction.prepare_block();
                true
            }
        };

        self.block_if_needed(transaction, name, lock_type, should_block);
        Ok(())
    }

    /// Получает блокировку `lock_type` на `name`
    ///
    /// Если блокировка несовместима с выданными блокировками других
    /// транзакций или с уже стоящими в очереди запросами, запрос ставится
    /// в КОНЕЦ очереди ресурса и транзакция блокируется.
    ///
    /// Запрос NL отклоняется с `InvalidLock` (а не `DuplicateLockRequest`),
    /// даже если транзакция не держит блокировку на `name`.
    pub fn acquire(&self, transaction: &TransactionHandle, name: &ResourceName, lock_type: LockType) -> Result<()> {
        let transaction_id = transaction.trans_num();
        let should_block = {
            let mut table = self.table.lock();
            Self::check_not_no_lock(lock_type, name)?;
            if table.lock_type(transaction_id, name) == lock_type {
                return Err(Error::duplicate_lock_request(format!(
                    "{} already holds {}({})",
                    transaction_id, lock_type, name
                )));
            }

            table.stats.total_lock_requests += 1;
            let lock = Lock::new(name.clone(), lock_type, transaction_id);
            if table.check_compatible(name, lock_type, transaction_id) {
                table.grant_or_update(lock);
                false
            } else {
                table.enqueue(LockRequest::new(Arc::clone(transaction), lock), false);
                transaction.prepare_block();
                true
            }
        };

        self.block_if_needed(transaction, name, lock_type, should_block);
        Ok(())
    }

    /// Освобождает блокировку транзакции на `name` и обрабатывает очередь
    pub fn release(&self, transaction: &TransactionHandle, name: &ResourceName) -> Result<()> {
        let transaction_id = transaction.trans_num();
        let mut table = self.table.lock();
        let held = table.lock_type(transaction_id, name);
        if held == LockType::NoLock {
            return Err(Error::no_lock_held(format!(
                "{} holds no lock on {}",
                transaction_id, name
            )));
        }

        table.release_locks(&[Lock::new(name.clone(), held, transaction_id)], self.config.log_waits);
        Ok(())
    }

    /// Повышает блокировку транзакции на `name` до `new_lock_type`
    ///
    /// Время получения блокировки не меняется. Несовместимый запрос
    /// ставится в НАЧАЛО очереди, чтобы транзакция, уже держащая более
    /// слабую блокировку, не голодала.
    pub fn promote(&self, transaction: &TransactionHandle, name: &ResourceName, new_lock_type: LockType) -> Result<()> {
        let transaction_id = transaction.trans_num();
        let should_block = {
            let mut table = self.table.lock();
            let current = table.lock_type(transaction_id, name);
            if current == new_lock_type {
                return Err(Error::duplicate_lock_request(format!(
                    "{} already holds {}({})",
                    transaction_id, new_lock_type, name
                )));
            }
            if current == LockType::NoLock {
                return Err(Error::no_lock_held(format!(
                    "{} holds no lock on {}",
                    transaction_id, name
                )));
            }
            if LockType::can_be_parent_lock(current, new_lock_type) {
                return Err(Error::invalid_lock(format!(
                    "{} -> {} on {} is not a promotion",
                    current, new_lock_type, name
                )));
            }

            table.stats.total_lock_requests += 1;
            table.stats.locks_promoted += 1;
            let lock = Lock::new(name.clone(), new_lock_type, transaction_id);
            if table.check_compatible(name, new_lock_type, transaction_id) {
                table.grant_or_update(lock);
                false
            } else {
                table.enqueue(LockRequest::new(Arc::clone(transaction), lock), true);
                transaction.prepare_block();
                true
            }
        };

        self.block_if_needed(transaction, name, new_lock_type, should_block);
        Ok(())
    }

    /// Тип блокировки транзакции на `name` или NL
    pub fn get_lock_type(&self, transaction_id: TransactionId, name: &ResourceName) -> LockType {
        self.table.lock().lock_type(transaction_id, name)
    }

    /// Блокировки на `name` в порядке получения
    pub fn get_locks(&self, name: &ResourceName) -> Vec<Lock> {
        self.table
            .lock()
            .resource_entries
            .get(name)
            .map(|entry| entry.locks.clone())
            .unwrap_or_default()
    }

    /// Блокировки транзакции в порядке получения
    pub fn get_transaction_locks(&self, transaction_id: TransactionId) -> Vec<Lock> {
        self.table
            .lock()
            .transaction_locks
            .get(&transaction_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Запрошенные блокировки в очереди `name`, от начала к концу
    pub fn get_queued_locks(&self, name: &ResourceName) -> Vec<Lock> {
        self.table
            .lock()
            .resource_entries
            .get(name)
            .map(|entry| entry.waiting_queue.iter().map(|request| request.lock.clone()).collect())
            .unwrap_or_default()
    }

    /// Текстовое описание состояния ресурса (для отладки)
    pub fn describe_resource(&self, name: &ResourceName) -> String {
        self.table
            .lock()
            .resource_entries
            .get(name)
            .map(ToString::to_string)
            .unwrap_or_else(|| ResourceEntry::default().to_string())
    }

    /// Получает статистику менеджера блокировок
    pub fn get_statistics(&self) -> LockManagerStats {
        self.table.lock().stats.clone()
    }

    /// Корневой контекст с именем `name`; создается при первом обращении
    pub fn context(&self, name: &str) -> Arc<LockContext> {
        let context = self.contexts.entry(name.to_string()).or_insert_with(|| {
            Arc::new(LockContext::new(
                self.self_ref.clone(),
                None,
                ResourceName::new(name),
                false,
            ))
        });
        Arc::clone(context.value())
    }

    /// Контекст базы данных (корень иерархии)
    pub fn database_context(&self) -> Arc<LockContext> {
        self.context(&self.config.database_name)
    }

    fn check_not_no_lock(lock_type: LockType, name: &ResourceName) -> Result<()> {
        if lock_type == LockType::NoLock {
            return Err(Error::invalid_lock(format!("cannot request NL on {}", name)));
        }
        Ok(())
    }

    fn block_if_needed(&self, transaction: &TransactionHandle, name: &ResourceName, lock_type: LockType, should_block: bool) {
        if !should_block {
            return;
        }
        if self.config.log_waits {
            debug!(
                transaction = %transaction.trans_num(),
                resource = %name,
                lock_type = %lock_type,
                "запрос несовместим, транзакция ожидает в очереди"
            );
        }
        transaction.block();
    }
}
