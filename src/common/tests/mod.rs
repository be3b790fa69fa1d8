//! Тесты для общих модулей granlock
