//! Типы блокировок и отношения между ними
//!
//! Реализует алгебру многогранулярного протокола: совместимость,
//! требуемую блокировку родителя и взаимозаменяемость блокировок.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Режим блокировки ресурса
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockType {
    /// Разделяемая блокировка (S) - для чтения
    Shared,
    /// Исключительная блокировка (X) - для записи
    Exclusive,
    /// Intention Shared (IS) - намерение читать потомков
    IntentionShared,
    /// Intention Exclusive (IX) - намерение писать потомков
    IntentionExclusive,
    /// Shared Intention Exclusive (SIX) - S на уровне + намерение IX
    SharedIntentionExclusive,
    /// Нет блокировки (NL)
    #[default]
    NoLock,
}

impl LockType {
    /// Все типы блокировок в порядке таблиц протокола
    pub const ALL: [LockType; 6] = [
        LockType::NoLock,
        LockType::IntentionShared,
        LockType::IntentionExclusive,
        LockType::Shared,
        LockType::SharedIntentionExclusive,
        LockType::Exclusive,
    ];

    /// Проверяет совместимость режимов блокировки
    ///
    /// Типы совместимы, если одна транзакция может держать `a` на ресурсе
    /// одновременно с тем, как другая держит `b` на том же ресурсе.
    pub fn compatible(a: LockType, b: LockType) -> bool {
        use LockType::*;
        match (a, b) {
            (NoLock, _) | (_, NoLock) => true,
            (Exclusive, _) | (_, Exclusive) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (SharedIntentionExclusive, _) | (_, SharedIntentionExclusive) => false,
            // Остались IX и S: совместимы только с самими собой
            (a, b) => a == b,
        }
    }

    /// Блокировка, которую нужно держать на родителе, чтобы получить `self` на потомке
    pub fn parent_lock(self) -> LockType {
        use LockType::*;
        match self {
            Shared => IntentionShared,
            Exclusive => IntentionExclusive,
            IntentionShared => IntentionShared,
            IntentionExclusive => IntentionExclusive,
            SharedIntentionExclusive => IntentionExclusive,
            NoLock => NoLock,
        }
    }

    /// Проверяет, позволяет ли `parent` на родителе держать `child` на потомке
    pub fn can_be_parent_lock(parent: LockType, child: LockType) -> bool {
        if child == LockType::NoLock {
            return true;
        }
        if parent == LockType::NoLock {
            return false;
        }
        if parent == LockType::IntentionExclusive || parent == child {
            return true;
        }
        parent == child.parent_lock()
    }

    /// Проверяет, может ли `substitute` использоваться там, где требуется `required`
    ///
    /// Например, X заменяет S: исключительная блокировка разрешает всё,
    /// что разрешала разделяемая.
    pub fn substitutable(substitute: LockType, required: LockType) -> bool {
        use LockType::*;
        if substitute == required {
            return true;
        }
        match (substitute, required) {
            (NoLock, _) => false,
            (_, Exclusive) => false,
            (IntentionShared, _) => false,
            (IntentionExclusive, Shared) => false,
            _ => true,
        }
    }

    /// Является ли блокировка intention-блокировкой (IS, IX, SIX)
    pub fn is_intent(self) -> bool {
        matches!(
            self,
            LockType::IntentionShared
                | LockType::IntentionExclusive
                | LockType::SharedIntentionExclusive
        )
    }

    /// Короткое обозначение типа (`S`, `IX`, ...)
    pub fn as_str(self) -> &'static str {
        match self {
            LockType::Shared => "S",
            LockType::Exclusive => "X",
            LockType::IntentionShared => "IS",
            LockType::IntentionExclusive => "IX",
            LockType::SharedIntentionExclusive => "SIX",
            LockType::NoLock => "NL",
        }
    }
}

impl std::fmt::Display for LockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S" => Ok(LockType::Shared),
            "X" => Ok(LockType::Exclusive),
            "IS" => Ok(LockType::IntentionShared),
            "IX" => Ok(LockType::IntentionExclusive),
            "SIX" => Ok(LockType::SharedIntentionExclusive),
            "NL" => Ok(LockType::NoLock),
            other => Err(Error::invalid_lock(format!("unknown lock type '{}'", other))),
        }
    }
}
