//! Тесты командной строки и симуляции

use clap::Parser;
use granlock::cli::{render_matrix, run_simulation, Cli, Commands};
use granlock::common::Config;
use tempfile::TempDir;

#[test]
fn test_load_config_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("granlock.toml");
    std::fs::write(&path, "[lock]\nlog_waits = false\n\n[logging]\nlevel = \"warn\"\n").unwrap();

    let cli = Cli::try_parse_from(["granlock", "--config", path.to_str().unwrap(), "config"]).unwrap();
    assert!(matches!(cli.command, Some(Commands::Config)));

    let config = cli.load_config().unwrap();
    assert!(!config.lock.log_waits);
    assert_eq!(config.logging.level, "warn");
    cli.execute(&config).unwrap();
}

#[test]
fn test_simulation_report() {
    let report = run_simulation(&Config::default(), 6, 3, 5).unwrap();

    assert_eq!(report.transactions, 6);
    assert_eq!(report.reads + report.writes, 6 * 3 * 5);
    assert!(report.writes > 0);
    assert_eq!(report.statistics.active_locks, 0);
    assert_eq!(report.statistics.waiting_requests, 0);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["statistics"]["active_locks"], 0);
}

#[test]
fn test_matrix_lists_all_types() {
    let matrix = render_matrix();
    for lock_type in ["NL", "IS", "IX", "S", "SIX", "X"] {
        assert!(matrix.contains(lock_type));
    }
}
