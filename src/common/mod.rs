//! Общие типы и утилиты для granlock

pub mod config;
pub mod error;

#[cfg(test)]
pub mod tests;

pub use config::*;
pub use error::{Error, Result};
