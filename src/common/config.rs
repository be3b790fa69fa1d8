//! Конфигурация для granlock
//!
//! Предоставляет структуры конфигурации менеджера блокировок и логирования

use crate::common::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Имя корневого контекста по умолчанию
pub const DEFAULT_DATABASE_NAME: &str = "database";

/// Основная конфигурация
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Настройки менеджера блокировок
    pub lock: LockConfig,
    /// Настройки логирования
    pub logging: LoggingConfig,
}

/// Конфигурация менеджера блокировок
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Имя корневого ресурса иерархии (контекст базы данных)
    pub database_name: String,
    /// Логировать постановку в очередь и пробуждение транзакций
    pub log_waits: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            log_waits: true,
        }
    }
}

/// Конфигурация логирования
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень логирования (директива `EnvFilter`)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Загружает конфигурацию из TOML файла
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Разбирает конфигурацию из строки TOML
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Сохраняет конфигурацию в TOML файл
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Представляет конфигурацию в виде TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Загружает конфигурацию из переменных окружения
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Переопределяет значения переменными окружения `GRANLOCK_*`
    pub fn merge_env(mut self) -> Result<Self> {
        if let Ok(name) = std::env::var("GRANLOCK_DATABASE_NAME") {
            self.lock.database_name = name;
        }

        if let Ok(level) = std::env::var("GRANLOCK_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(log_waits) = std::env::var("GRANLOCK_LOG_WAITS") {
            self.lock.log_waits = log_waits.parse().map_err(|_| {
                Error::configuration(format!("GRANLOCK_LOG_WAITS: expected bool, got '{}'", log_waits))
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Проверяет корректность конфигурации
    pub fn validate(&self) -> Result<()> {
        let name = &self.lock.database_name;
        if name.is_empty() {
            return Err(Error::configuration("lock.database_name must not be empty"));
        }
        if name.contains('/') {
            return Err(Error::configuration(format!(
                "lock.database_name must not contain '/': '{}'",
                name
            )));
        }
        if self.logging.level.trim().is_empty() {
            return Err(Error::configuration("logging.level must not be empty"));
        }
        Ok(())
    }
}
