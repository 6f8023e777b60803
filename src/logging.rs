use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const LOG_FILE: &str = "feed-playback.log";
const DEFAULT_FILTER: &str = "info,reqwest=warn,hyper=warn";

/// 持有后台写线程；drop 时把剩余日志刷到文件
pub struct LogGuard(#[allow(dead_code)] Option<WorkerGuard>);

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub dir: Option<PathBuf>,
    pub filter: Option<String>,
    /// 额外把 WARN 及以上输出到 stderr
    pub console: bool,
}

pub fn init(data_dir: &Path, cfg: LogConfig) -> LogGuard {
    let log_dir = cfg.dir.unwrap_or_else(|| data_dir.join("logs"));

    let log_dir = match fs::create_dir_all(&log_dir) {
        Ok(()) => log_dir,
        Err(_) => std::env::temp_dir().join("feed-playback-logs"),
    };
    let _ = fs::create_dir_all(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = build_filter(cfg.filter.as_deref());

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_writer);

    let console_layer = cfg.console.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(LevelFilter::from_level(Level::WARN))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();
    tracing::info!(log_dir = %log_dir.display(), "tracing 已初始化");

    LogGuard(Some(guard))
}

fn build_filter(explicit: Option<&str>) -> EnvFilter {
    match explicit {
        Some(s) if !s.trim().is_empty() => {
            EnvFilter::try_new(s).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
        _ => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    }
}
