//! Интеграционные тесты для granlock
//!
//! Этот модуль содержит тесты, которые проверяют взаимодействие
//! между различными компонентами системы.

pub mod cli_tests;
pub mod common;
pub mod scenario_tests;
pub mod stress_tests;

// Re-export common utilities
pub use common::*;
