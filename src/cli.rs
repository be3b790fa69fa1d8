//! CLI интерфейс для granlock
//!
//! Предоставляет командную строку для просмотра конфигурации, таблиц
//! протокола блокировок и запуска нагрузочной симуляции

use crate::common::{Config, Result};
use crate::core::{
    ensure_sufficient_lock_held_for, release_all_locks, LockContext, LockManager, LockManagerStats,
    LockType, Transaction, TransactionHandle,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// granlock - многогранулярный менеджер блокировок
#[derive(Parser, Debug)]
#[command(name = "granlock")]
#[command(about = "granlock - A hierarchical multigranularity lock manager")]
#[command(version)]
pub struct Cli {
    /// Конфигурационный файл
    #[arg(short, long, value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Уровень детализации логирования
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Запустить конкурентную симуляцию транзакций
    Simulate {
        /// Количество транзакций (потоков)
        #[arg(short, long, default_value = "4")]
        transactions: u64,

        /// Количество таблиц
        #[arg(long, default_value = "2")]
        tables: usize,

        /// Количество страниц в каждой таблице
        #[arg(short, long, default_value = "8")]
        pages: usize,

        /// Вывести отчет в формате JSON
        #[arg(long)]
        json: bool,
    },

    /// Показать действующую конфигурацию
    Config,

    /// Показать таблицы совместимости и взаимозаменяемости
    Matrix,
}

/// Итоги симуляции
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub transactions: u64,
    pub tables: usize,
    pub pages: usize,
    pub reads: u64,
    pub writes: u64,
    pub elapsed_ms: u128,
    pub statistics: LockManagerStats,
}

impl Cli {
    /// Загружает конфигурацию: файл, затем переменные окружения, затем аргументы
    pub fn load_config(&self) -> Result<Config> {
        let config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        let mut config = config.merge_env()?;

        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Выполняет команду
    pub fn execute(&self, config: &Config) -> Result<()> {
        match &self.command {
            Some(Commands::Simulate {
                transactions,
                tables,
                pages,
                json,
            }) => {
                let report = run_simulation(config, *transactions, *tables, *pages)?;
                print_report(&report, *json)
            }
            Some(Commands::Config) => {
                print!("{}", config.to_toml_string()?);
                Ok(())
            }
            Some(Commands::Matrix) => {
                print!("{}", render_matrix());
                Ok(())
            }
            None => {
                println!("granlock {}", crate::VERSION);
                println!("Используйте --help для получения справки");
                Ok(())
            }
        }
    }
}

/// Инициализирует подписчика tracing
///
/// Приоритет: `--log-level`, затем `RUST_LOG`, затем конфигурация.
pub fn init_logging(cli: &Cli, config: &Config) {
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
    };
    // Подписчик уже мог быть установлен (например, в тестах)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Запускает `transactions` потоков, каждый из которых читает и пишет
/// страницы через `ensure_sufficient_lock_held_for`
///
/// Страницы обходятся в одном и том же порядке всеми транзакциями, а на
/// таблицах и базе данных берутся только intention-блокировки, поэтому
/// взаимоблокировок не возникает.
pub fn run_simulation(config: &Config, transactions: u64, tables: usize, pages: usize) -> Result<SimulationReport> {
    let lockman = LockManager::with_config(config.lock.clone());
    let database = lockman.database_context();
    let started = Instant::now();

    info!(transactions, tables, pages, "запуск симуляции");

    let workers: Vec<_> = (1..=transactions)
        .map(|id| {
            let lockman = Arc::clone(&lockman);
            let database = Arc::clone(&database);
            thread::spawn(move || run_worker(&lockman, &database, Transaction::handle(id), tables, pages))
        })
        .collect();

    let mut reads = 0;
    let mut writes = 0;
    for worker in workers {
        let (worker_reads, worker_writes) = worker
            .join()
            .map_err(|_| crate::common::Error::internal("simulation worker panicked"))??;
        reads += worker_reads;
        writes += worker_writes;
    }

    let report = SimulationReport {
        transactions,
        tables,
        pages,
        reads,
        writes,
        elapsed_ms: started.elapsed().as_millis(),
        statistics: lockman.get_statistics(),
    };
    info!(reads, writes, elapsed_ms = report.elapsed_ms as u64, "симуляция завершена");
    Ok(report)
}

fn run_worker(
    lockman: &LockManager,
    database: &Arc<LockContext>,
    transaction: TransactionHandle,
    tables: usize,
    pages: usize,
) -> Result<(u64, u64)> {
    let id = transaction.trans_num().value();
    let mut reads = 0;
    let mut writes = 0;

    for table in 0..tables {
        let table_context = database.child_context(format!("table{}", table));
        for page in 0..pages {
            let page_context = table_context.child_context(page);
            if is_write(id, table, page) {
                ensure_sufficient_lock_held_for(&page_context, &transaction, LockType::Exclusive)?;
                writes += 1;
            } else {
                ensure_sufficient_lock_held_for(&page_context, &transaction, LockType::Shared)?;
                reads += 1;
            }
        }
    }

    debug!(transaction = %transaction.trans_num(), reads, writes, "транзакция завершает работу");
    release_all_locks(lockman, &transaction)?;
    Ok((reads, writes))
}

/// Детерминированный выбор: примерно каждая третья страница записывается
fn is_write(transaction: u64, table: usize, page: usize) -> bool {
    (transaction as usize)
        .wrapping_mul(31)
        .wrapping_add(table * 7)
        .wrapping_add(page)
        % 3
        == 0
}

fn print_report(report: &SimulationReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let stats = &report.statistics;
    println!(
        "Симуляция: {} транзакций, {} таблиц x {} страниц",
        report.transactions, report.tables, report.pages
    );
    println!("  Чтений: {}, записей: {}", report.reads, report.writes);
    println!("  Время: {} мс", report.elapsed_ms);
    println!("  Запросов блокировок: {}", stats.total_lock_requests);
    println!("  Выдано блокировок: {}", stats.locks_acquired);
    println!("  Освобождено блокировок: {}", stats.locks_released);
    println!("  Повышений: {}", stats.locks_promoted);
    println!("  Ожиданий в очереди: {}", stats.blocked_requests);
    println!("  Выдано из очереди: {}", stats.granted_from_queue);
    println!("  Активных блокировок: {}", stats.active_locks);
    Ok(())
}

/// Таблицы `compatible` и `substitutable` по всем типам блокировок
pub fn render_matrix() -> String {
    let mut out = String::new();
    render_table(&mut out, "compatible(row, col)", LockType::compatible);
    out.push('\n');
    render_table(&mut out, "substitutable(row, col)", LockType::substitutable);
    out.push('\n');
    render_table(&mut out, "can_be_parent_lock(row, col)", LockType::can_be_parent_lock);
    out
}

fn render_table(out: &mut String, title: &str, relation: fn(LockType, LockType) -> bool) {
    out.push_str(title);
    out.push('\n');
    out.push_str("     ");
    for column in LockType::ALL {
        out.push_str(&format!("{:>4}", column.as_str()));
    }
    out.push('\n');
    for row in LockType::ALL {
        out.push_str(&format!("{:>4} ", row.as_str()));
        for column in LockType::ALL {
            let mark = if relation(row, column) { "T" } else { "." };
            out.push_str(&format!("{:>4}", mark));
        }
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = vec!["granlock", "--log-level", "debug", "simulate", "--transactions", "3", "--json"];
        let cli = Cli::try_parse_from(args).unwrap();

        assert_eq!(cli.log_level, Some("debug".to_string()));
        match cli.command {
            Some(Commands::Simulate {
                transactions,
                tables,
                pages,
                json,
            }) => {
                assert_eq!(transactions, 3);
                assert_eq!(tables, 2);
                assert_eq!(pages, 8);
                assert!(json);
            }
            other => panic!("Expected simulate command, got {:?}", other),
        }
    }

    #[test]
    fn test_matrix_command() {
        let cli = Cli::try_parse_from(vec!["granlock", "matrix"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Matrix)));
    }

    #[test]
    fn test_render_matrix() {
        let matrix = render_matrix();
        assert!(matrix.starts_with("compatible(row, col)"));
        assert!(matrix.contains("substitutable(row, col)"));
        // Заголовок и 6 строк на каждую из трех таблиц
        let rows = matrix.lines().filter(|line| line.trim_start().starts_with("SIX")).count();
        assert_eq!(rows, 3);
    }

    #[test]
    fn test_log_level_overrides_config() {
        let cli = Cli::try_parse_from(vec!["granlock", "--log-level", "trace", "config"]).unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_simulation_releases_everything() {
        let config = Config::default();
        let report = run_simulation(&config, 4, 2, 6).unwrap();

        assert_eq!(report.reads + report.writes, 4 * 2 * 6);
        assert_eq!(report.statistics.active_locks, 0);
        assert_eq!(report.statistics.waiting_requests, 0);
        assert_eq!(report.statistics.locks_acquired, report.statistics.locks_released + report.statistics.locks_promoted);
    }
}
