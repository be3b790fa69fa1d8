//! Обработка ошибок для granlock

use thiserror::Error;

/// Основной тип ошибки для granlock
#[derive(Error, Debug)]
pub enum Error {
    /// Ошибка I/O операций
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка сериализации/десериализации
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Транзакция уже владеет блокировкой запрошенного типа
    #[error("Duplicate lock request: {message}")]
    DuplicateLockRequest { message: String },

    /// Операция требует явной блокировки, которой у транзакции нет
    #[error("No lock held: {message}")]
    NoLockHeld { message: String },

    /// Запрос нарушил бы протокол многогранулярных блокировок
    #[error("Invalid lock: {message}")]
    InvalidLock { message: String },

    /// Ошибка конфигурации
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Неподдерживаемая операция (например, изменение через read-only контекст)
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Внутренняя ошибка
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Тип результата для granlock
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Создает ошибку повторного запроса блокировки
    pub fn duplicate_lock_request(message: impl Into<String>) -> Self {
        Self::DuplicateLockRequest {
            message: message.into(),
        }
    }

    /// Создает ошибку отсутствующей блокировки
    pub fn no_lock_held(message: impl Into<String>) -> Self {
        Self::NoLockHeld {
            message: message.into(),
        }
    }

    /// Создает ошибку недопустимой блокировки
    pub fn invalid_lock(message: impl Into<String>) -> Self {
        Self::InvalidLock {
            message: message.into(),
        }
    }

    /// Создает ошибку конфигурации
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Создает ошибку неподдерживаемой операции
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Создает внутреннюю ошибку
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Возвращает `true`, если ошибка относится к протоколу блокировок
    pub fn is_lock_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateLockRequest { .. }
                | Self::NoLockHeld { .. }
                | Self::InvalidLock { .. }
                | Self::Unsupported { .. }
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::configuration(err.to_string())
    }
}
