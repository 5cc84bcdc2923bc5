use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::config::{AppConfig, RunMode};
use crate::logging::{LogLevel, LoggerType};

const USAGE_SAMPLES: &str = "Command line samples:
    market-bridge
    market-bridge -p 8080
    market-bridge -l info
    market-bridge -t con -r single_request";

#[derive(Parser, Debug)]
#[command(name = "market-bridge")]
#[command(version, about = "Binance proxy server", long_about = None)]
#[command(after_help = USAGE_SAMPLES)]
pub struct Cli {
    /// 监听端口（默认 8080）
    #[arg(short, long)]
    pub port: Option<u16>,

    /// 日志输出 (file, con)
    #[arg(short = 't', long = "log_type", visible_alias = "log-type", value_enum)]
    pub log_type: Option<LoggerType>,

    /// 运行模式 (persist, single_request)
    #[arg(short, long = "run_mode", visible_alias = "run-mode", value_enum)]
    pub run_mode: Option<RunMode>,

    /// 日志级别 (trace, debug, info, warning, error, critical, off)
    #[arg(short, long = "log_level", visible_alias = "log-level", value_enum)]
    pub log_level: Option<LogLevel>,

    /// 配置文件路径（TOML，可选）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 工作线程数（默认 3）
    #[arg(short, long)]
    pub workers: Option<usize>,
}

impl Cli {
    /// 合并配置文件与命令行参数，命令行优先
    pub fn into_config(self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::default(),
        };

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(run_mode) = self.run_mode {
            config.server.run_mode = run_mode;
        }
        if let Some(workers) = self.workers {
            config.server.workers = workers;
        }
        if let Some(log_type) = self.log_type {
            config.log.log_type = log_type;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }

        config.validate()?;
        Ok(config)
    }
}
