/// 日志初始化
///
/// 进程启动时调用一次 [`init_logging`]，之后各模块直接使用 `tracing` 宏；
/// 文件日志经后台线程写入，返回的 [`WorkerGuard`] 被释放时刷新剩余日志
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// 日志目录（相对当前工作目录）
pub const LOG_DIR: &str = "logs";

/// 日志文件名前缀，按天滚动时追加日期后缀
pub const LOG_FILE_NAME: &str = "mb-log.log";

/// 时间戳格式
const TIME_FORMAT: &str = "[%H:%M:%S]";

/// 日志输出位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LoggerType {
    /// 标准输出
    #[serde(rename = "con", alias = "console")]
    #[value(name = "con", alias = "console")]
    Console,
    /// logs/mb-log.log.YYYY-MM-DD，按天滚动
    #[default]
    File,
}

/// 最低日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(rename = "warning", alias = "warn")]
    #[value(name = "warning", alias = "warn")]
    Warn,
    #[serde(alias = "err")]
    #[value(alias = "err")]
    Error,
    /// tracing 没有 critical 级别，按 error 处理
    Critical,
    Off,
}

impl LogLevel {
    /// 对应的 `EnvFilter` 指令
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
            LogLevel::Off => "off",
        }
    }
}

/// 初始化全局日志订阅者
///
/// 设置了 `RUST_LOG` 时以环境变量为准；文件日志需要调用方持有返回的 guard 直到退出
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));

    match config.log_type {
        LoggerType::Console => {
            install(std::io::stdout, true, filter)?;
            Ok(None)
        }
        LoggerType::File => {
            let appender = daily_appender(Path::new(LOG_DIR))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            install(writer, false, filter)?;
            Ok(Some(guard))
        }
    }
}

/// 按天滚动的日志文件，目录不存在时自动创建
pub fn daily_appender(dir: &Path) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_NAME)
        .build(dir)
        .with_context(|| format!("Failed to open log file in {:?}", dir))
}

fn install<W>(writer: W, ansi: bool, filter: EnvFilter) -> Result<()>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
