//! Контексты блокировок: иерархический уровень над `LockManager`
//!
//! Каждый контекст соответствует одному ресурсу (база данных, таблица,
//! страница) и проверяет ограничения многогранулярного протокола перед
//! обращением к менеджеру. Дерево контекстов повторяет иерархию ресурсов
//! и создается лениво.
//!
//! Для каждой транзакции контекст хранит число ее явных блокировок на
//! потомках (`num_child_locks`). Счетчик обновляется каждой изменяющей
//! операцией и никогда не пересчитывается обходом дерева.

use crate::common::{Error, Result};
use crate::core::lock_manager::LockManager;
use crate::core::lock_type::LockType;
use crate::core::resource_name::ResourceName;
use crate::core::transaction::{TransactionHandle, TransactionId};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Контекст блокировок одного ресурса
pub struct LockContext {
    /// Менеджер блокировок
    lockman: Weak<LockManager>,
    /// Родительский контекст, `None` для корня
    parent: Option<Weak<LockContext>>,
    /// Имя ресурса
    name: ResourceName,
    /// Через read-only контекст нельзя менять блокировки
    readonly: bool,
    /// Все новые дочерние контексты создаются read-only
    child_locks_disabled: AtomicBool,
    /// Транзакция -> число ее явных блокировок на потомках
    num_child_locks: DashMap<TransactionId, usize>,
    /// Дочерние контексты по имени
    children: DashMap<String, Arc<LockContext>>,
}

impl LockContext {
    pub(crate) fn new(
        lockman: Weak<LockManager>,
        parent: Option<Weak<LockContext>>,
        name: ResourceName,
        readonly: bool,
    ) -> Self {
        Self {
            lockman,
            parent,
            name,
            readonly,
            child_locks_disabled: AtomicBool::new(readonly),
            num_child_locks: DashMap::new(),
            children: DashMap::new(),
        }
    }

    /// Находит контекст по полному имени ресурса
    pub fn from_resource_name(lockman: &LockManager, name: &ResourceName) -> Result<Arc<LockContext>> {
        let (root, rest) = name
            .names()
            .split_first()
            .ok_or_else(|| Error::invalid_lock("empty resource name"))?;
        let mut context = lockman.context(root);
        for component in rest {
            context = context.child_context(component);
        }
        Ok(context)
    }

    /// Имя ресурса этого контекста
    pub fn resource_name(&self) -> &ResourceName {
        &self.name
    }

    /// Является ли контекст read-only
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Родительский контекст
    pub fn parent_context(&self) -> Option<Arc<LockContext>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Получает блокировку `lock_type` для транзакции
    ///
    /// # Ошибки
    /// - `Unsupported`, если контекст read-only;
    /// - `DuplicateLockRequest`, если блокировка этого типа уже есть;
    /// - `InvalidLock`, если блокировка родителя не допускает `lock_type`.
    pub fn acquire(&self, transaction: &TransactionHandle, lock_type: LockType) -> Result<()> {
        self.check_writable("acquire")?;
        let lockman = self.lock_manager()?;
        let transaction_id = transaction.trans_num();
        let current = lockman.get_lock_type(transaction_id, &self.name);
        if current == lock_type {
            return Err(Error::duplicate_lock_request(format!(
                "{} already holds {}({})",
                transaction_id, lock_type, self.name
            )));
        }
        self.check_parent_allows(transaction_id, lock_type)?;
        self.check_children_allow(transaction_id, lock_type, &[])?;

        lockman.acquire(transaction, &self.name, lock_type)?;
        if current == LockType::NoLock {
            self.adjust_ancestor_counts(transaction_id, 1);
        }
        Ok(())
    }

    /// Освобождает блокировку транзакции на этом уровне
    ///
    /// # Ошибки
    /// - `Unsupported`, если контекст read-only;
    /// - `NoLockHeld`, если явной блокировки нет;
    /// - `InvalidLock`, если у транзакции остались блокировки на дочерних ресурсах.
    pub fn release(&self, transaction: &TransactionHandle) -> Result<()> {
        self.check_writable("release")?;
        let lockman = self.lock_manager()?;
        let transaction_id = transaction.trans_num();
        if lockman.get_lock_type(transaction_id, &self.name) == LockType::NoLock {
            return Err(Error::no_lock_held(format!(
                "{} holds no lock on {}",
                transaction_id, self.name
            )));
        }
        for child in self.children_snapshot() {
            let child_type = child.get_explicit_lock_type(transaction_id);
            if child_type != LockType::NoLock {
                return Err(Error::invalid_lock(format!(
                    "cannot release {}: {} still holds {}({})",
                    self.name, transaction_id, child_type, child.name
                )));
            }
        }

        lockman.release(transaction, &self.name)?;
        self.adjust_ancestor_counts(transaction_id, -1);
        Ok(())
    }

    /// Повышает блокировку транзакции до `new_lock_type`
    ///
    /// Повышение до SIX с IS/IX одновременно освобождает все S и IS
    /// блокировки транзакции на потомках.
    ///
    /// # Ошибки
    /// - `Unsupported`, если контекст read-only;
    /// - `NoLockHeld`, если явной блокировки нет;
    /// - `DuplicateLockRequest`, если блокировка уже `new_lock_type`;
    /// - `InvalidLock`, если это не повышение или результат нарушил бы протокол.
    pub fn promote(&self, transaction: &TransactionHandle, new_lock_type: LockType) -> Result<()> {
        self.check_writable("promote")?;
        let lockman = self.lock_manager()?;
        let transaction_id = transaction.trans_num();
        let current = lockman.get_lock_type(transaction_id, &self.name);
        if current == LockType::NoLock {
            return Err(Error::no_lock_held(format!(
                "{} holds no lock on {}",
                transaction_id, self.name
            )));
        }
        if current == new_lock_type {
            return Err(Error::duplicate_lock_request(format!(
                "{} already holds {}({})",
                transaction_id, new_lock_type, self.name
            )));
        }
        // Корень не проверяется на взаимозаменяемость
        if self.parent.is_some() {
            if !LockType::substitutable(new_lock_type, current) {
                return Err(Error::invalid_lock(format!(
                    "{} -> {} on {} is not a promotion",
                    current, new_lock_type, self.name
                )));
            }
            self.check_parent_allows(transaction_id, new_lock_type)?;
        }

        if new_lock_type == LockType::SharedIntentionExclusive && current.is_intent() {
            let released = self.sis_descendants(&lockman, transaction_id);
            let mut release_names: Vec<ResourceName> =
                released.iter().map(|context| context.name.clone()).collect();
            self.check_children_allow(transaction_id, new_lock_type, &release_names)?;

            release_names.push(self.name.clone());
            lockman.acquire_and_release(transaction, &self.name, new_lock_type, &release_names)?;

            for context in &released {
                context.adjust_ancestor_counts(transaction_id, -1);
            }
        } else {
            self.check_children_allow(transaction_id, new_lock_type, &[])?;
            lockman.promote(transaction, &self.name, new_lock_type)?;
        }
        Ok(())
    }

    /// Эскалирует блокировки транзакции с потомков на этот уровень
    ///
    /// Результат - одна блокировка S или X, покрывающая текущую блокировку
    /// и все блокировки потомков: X, если среди них есть IX, SIX или X,
    /// иначе S. Если блокировки не меняются (например, при повторном
    /// вызове), менеджер не вызывается.
    pub fn escalate(&self, transaction: &TransactionHandle) -> Result<()> {
        self.check_writable("escalate")?;
        let lockman = self.lock_manager()?;
        let transaction_id = transaction.trans_num();
        let current = lockman.get_lock_type(transaction_id, &self.name);
        if current == LockType::NoLock {
            return Err(Error::no_lock_held(format!(
                "{} holds no lock on {}",
                transaction_id, self.name
            )));
        }

        let descendants = self.descendant_locks(&lockman, transaction_id);
        let exclusive = std::iter::once(current)
            .chain(descendants.iter().map(|(_, lock_type)| *lock_type))
            .any(|lock_type| {
                matches!(
                    lock_type,
                    LockType::IntentionExclusive | LockType::SharedIntentionExclusive | LockType::Exclusive
                )
            });
        let escalated = if exclusive {
            LockType::Exclusive
        } else {
            LockType::Shared
        };

        if escalated != current {
            self.check_parent_allows(transaction_id, escalated)?;
            let mut release_names: Vec<ResourceName> = descendants
                .iter()
                .map(|(context, _)| context.name.clone())
                .collect();
            release_names.push(self.name.clone());
            lockman.acquire_and_release(transaction, &self.name, escalated, &release_names)?;
            debug!(
                transaction = %transaction_id,
                resource = %self.name,
                from = %current,
                to = %escalated,
                released = descendants.len(),
                "блокировки эскалированы"
            );
        } else if !descendants.is_empty() {
            // S под S или X под X: тип не меняется, остаются только освобождения.
            // Это отдельные вызовы release, а не один атомарный acquire-and-release:
            // другие транзакции могут увидеть частично освобожденное поддерево.
            let mut names: Vec<&ResourceName> = descendants.iter().map(|(context, _)| &context.name).collect();
            names.sort_by_key(|name| std::cmp::Reverse(name.depth()));
            for name in names {
                lockman.release(transaction, name)?;
            }
        }

        // Каждая освобожденная блокировка уменьшает счетчики всех своих предков
        for (context, _) in &descendants {
            context.adjust_ancestor_counts(transaction_id, -1);
        }
        self.num_child_locks.insert(transaction_id, 0);
        Ok(())
    }

    /// Тип явной блокировки транзакции на этом уровне или NL
    pub fn get_explicit_lock_type(&self, transaction_id: TransactionId) -> LockType {
        self.lockman
            .upgrade()
            .map_or(LockType::NoLock, |lockman| lockman.get_lock_type(transaction_id, &self.name))
    }

    /// Тип блокировки транзакции на этом уровне, явной или унаследованной
    ///
    /// Явная S на таблице означает неявную S на всех ее страницах. SIX
    /// дает на своем уровне доступ S. Intention-блокировка на корне
    /// доступа не дает.
    pub fn get_effective_lock_type(&self, transaction_id: TransactionId) -> LockType {
        let explicit = self.get_explicit_lock_type(transaction_id);
        let Some(parent) = self.parent_context() else {
            return if explicit.is_intent() {
                LockType::NoLock
            } else {
                explicit
            };
        };
        match explicit {
            LockType::NoLock => parent.get_effective_lock_type(transaction_id),
            LockType::SharedIntentionExclusive => LockType::Shared,
            other => other,
        }
    }

    /// Запрещает блокировки потомков: все новые дочерние контексты будут read-only
    ///
    /// Используется для индексов и временных таблиц. Уже созданные дочерние
    /// контексты не меняются.
    pub fn disable_child_locks(&self) {
        self.child_locks_disabled.store(true, Ordering::Release);
    }

    /// Дочерний контекст с именем `name`; создается ровно один раз
    pub fn child_context(self: &Arc<Self>, name: impl ToString) -> Arc<LockContext> {
        let name = name.to_string();
        let readonly = self.readonly || self.child_locks_disabled.load(Ordering::Acquire);
        let child = self.children.entry(name.clone()).or_insert_with(|| {
            Arc::new(LockContext::new(
                self.lockman.clone(),
                Some(Arc::downgrade(self)),
                self.name.child(name),
                readonly,
            ))
        });
        Arc::clone(child.value())
    }

    /// Число явных блокировок транзакции на потомках этого контекста
    pub fn num_children(&self, transaction_id: TransactionId) -> usize {
        self.num_child_locks
            .get(&transaction_id)
            .map_or(0, |count| *count)
    }

    /// Предки от корня до непосредственного родителя
    pub fn ancestors(&self) -> Vec<Arc<LockContext>> {
        let mut ancestors = Vec::new();
        let mut current = self.parent_context();
        while let Some(context) = current {
            current = context.parent_context();
            ancestors.push(context);
        }
        ancestors.reverse();
        ancestors
    }

    /// Уже созданные дочерние контексты
    pub fn children_snapshot(&self) -> Vec<Arc<LockContext>> {
        self.children
            .iter()
            .map(|child| Arc::clone(child.value()))
            .collect()
    }

    fn lock_manager(&self) -> Result<Arc<LockManager>> {
        self.lockman
            .upgrade()
            .ok_or_else(|| Error::internal(format!("lock manager for {} has been dropped", self.name)))
    }

    fn check_writable(&self, operation: &str) -> Result<()> {
        if self.readonly {
            return Err(Error::unsupported(format!(
                "{} on read-only context {}",
                operation, self.name
            )));
        }
        Ok(())
    }

    /// Проверяет, что явная блокировка родителя допускает `lock_type` здесь
    fn check_parent_allows(&self, transaction_id: TransactionId, lock_type: LockType) -> Result<()> {
        if let Some(parent) = self.parent_context() {
            let parent_type = parent.get_explicit_lock_type(transaction_id);
            if !LockType::can_be_parent_lock(parent_type, lock_type) {
                return Err(Error::invalid_lock(format!(
                    "{}({}) cannot be held under {}({})",
                    lock_type, self.name, parent_type, parent.name
                )));
            }
        }
        Ok(())
    }

    /// Проверяет, что `lock_type` здесь допускает блокировки дочерних ресурсов,
    /// кроме освобождаемых вместе с изменением
    fn check_children_allow(
        &self,
        transaction_id: TransactionId,
        lock_type: LockType,
        released: &[ResourceName],
    ) -> Result<()> {
        for child in self.children_snapshot() {
            if released.contains(&child.name) {
                continue;
            }
            let child_type = child.get_explicit_lock_type(transaction_id);
            if !LockType::can_be_parent_lock(lock_type, child_type) {
                return Err(Error::invalid_lock(format!(
                    "{}({}) cannot parent {}({})",
                    lock_type, self.name, child_type, child.name
                )));
            }
        }
        Ok(())
    }

    /// Явные блокировки транзакции на потомках, кроме read-only контекстов
    fn descendant_locks(
        &self,
        lockman: &LockManager,
        transaction_id: TransactionId,
    ) -> Vec<(Arc<LockContext>, LockType)> {
        let held: HashMap<ResourceName, LockType> = lockman
            .get_transaction_locks(transaction_id)
            .into_iter()
            .filter(|lock| lock.name.is_descendant_of(&self.name))
            .map(|lock| (lock.name, lock.lock_type))
            .collect();

        let mut found = Vec::new();
        if held.is_empty() {
            return found;
        }
        let mut stack = self.children_snapshot();
        while let Some(context) = stack.pop() {
            if !context.readonly {
                if let Some(lock_type) = held.get(&context.name) {
                    found.push((Arc::clone(&context), *lock_type));
                }
            }
            stack.extend(context.children_snapshot());
        }
        found
    }

    /// Потомки, на которых транзакция держит S или IS
    fn sis_descendants(&self, lockman: &LockManager, transaction_id: TransactionId) -> Vec<Arc<LockContext>> {
        self.descendant_locks(lockman, transaction_id)
            .into_iter()
            .filter(|(_, lock_type)| matches!(lock_type, LockType::Shared | LockType::IntentionShared))
            .map(|(context, _)| context)
            .collect()
    }

    fn adjust_count(&self, transaction_id: TransactionId, delta: isize) {
        let mut count = self.num_child_locks.entry(transaction_id).or_insert(0);
        *count = count.saturating_add_signed(delta);
    }

    fn adjust_ancestor_counts(&self, transaction_id: TransactionId, delta: isize) {
        if delta == 0 {
            return;
        }
        let mut current = self.parent_context();
        while let Some(context) = current {
            context.adjust_count(transaction_id, delta);
            current = context.parent_context();
        }
    }
}

impl std::fmt::Display for LockContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LockContext({})", self.name)
    }
}

impl std::fmt::Debug for LockContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockContext")
            .field("name", &self.name)
            .field("readonly", &self.readonly)
            .field("child_locks_disabled", &self.child_locks_disabled.load(Ordering::Relaxed))
            .field("children", &self.children.len())
            .finish()
    }
}
