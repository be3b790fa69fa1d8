//! Тесты для модулей ядра granlock


use std::time::{Duration, Instant};

/// Ждет выполнения условия, опрашивая его; паникует по таймауту
pub fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for: {}", description);
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
