use anyhow::{bail, Context};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::logging::{LogLevel, LoggerType};
use crate::upstream::{sni_name, DEFAULT_UPSTREAM_HOST, DEFAULT_UPSTREAM_PORT, DEFAULT_USER_AGENT};

/// 默认监听端口
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// 默认工作线程数
pub const DEFAULT_WORKERS: usize = 3;

/// 服务器运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
pub enum RunMode {
    /// 持续接受连接
    #[default]
    #[serde(rename = "persist")]
    #[value(name = "persist")]
    Persistent,
    /// 只处理一个连接，然后退出
    #[serde(rename = "single_request")]
    #[value(name = "single_request")]
    SingleRequest,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Persistent => write!(f, "persist"),
            RunMode::SingleRequest => write!(f, "single_request"),
        }
    }
}

/// 监听端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址
    pub bind_addr: String,
    /// 监听端口
    pub port: u16,
    /// 运行模式
    pub run_mode: RunMode,
    /// 运行时工作线程数
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_HTTP_PORT,
            run_mode: RunMode::default(),
            workers: DEFAULT_WORKERS,
        }
    }
}

/// 上游配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// 上游主机名，同时用作 SNI、证书校验和 Host 头
    pub host: String,
    pub port: u16,
    /// 入站请求没有 User-Agent 时使用
    pub user_agent: String,
    /// CA 证书路径（可选，缺省使用系统 CA）
    pub ca_cert_path: Option<PathBuf>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_UPSTREAM_HOST.to_string(),
            port: DEFAULT_UPSTREAM_PORT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            ca_cert_path: None,
        }
    }
}

/// 大小限制（缺省不限制）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_header_bytes: Option<usize>,
}

/// 日志配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub log_type: LoggerType,
    pub level: LogLevel,
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub limits: LimitsConfig,
    pub log: LogConfig,
}

impl AppConfig {
    /// 从 TOML 文件加载配置并验证
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {:?}", path))?;
        let config: AppConfig =
            toml::from_str(&content).context("Failed to parse configuration")?;
        config
            .validate()
            .context("Configuration validation failed")?;
        Ok(config)
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.workers == 0 {
            bail!("server.workers must be at least 1");
        }
        if self.server.bind_addr.trim().is_empty() {
            bail!("server.bind_addr cannot be empty");
        }
        if self.upstream.host.trim().is_empty() {
            bail!("upstream.host cannot be empty");
        }
        sni_name(&self.upstream.host).context("upstream.host must be a DNS name")?;
        if self.upstream.port == 0 {
            bail!("upstream.port cannot be 0");
        }
        if let Some(limit) = self.limits.max_header_bytes {
            if limit < 4 {
                bail!("limits.max_header_bytes must be at least 4 (got {})", limit);
            }
        }
        Ok(())
    }
}
