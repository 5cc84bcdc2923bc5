/// 错误类型与统一的错误检查辅助函数
///
/// 会话内部的每一步异步操作都通过 [`check`] 记录失败原因，
/// 然后放弃当前会话，不做任何重试
use std::io;
use thiserror::Error;
use tracing::error;

/// Market Bridge 的主要错误类型
#[derive(Error, Debug)]
pub enum ProxyError {
    /// 上游地址解析失败
    #[error("Failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// 所有候选地址均连接失败
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 主机名无法用作 SNI
    #[error("Failed to set SNI host name {0}")]
    InvalidServerName(String),

    /// TLS 握手失败（证书或主机名校验失败）
    #[error("TLS handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: io::Error,
    },

    /// 会话中某个 I/O 操作失败
    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// 请求头超过配置的上限
    #[error("Request header exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 其他错误（保留与 anyhow 的兼容性）
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// 创建 I/O 错误，附带失败的操作名
    pub fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }

    /// 创建配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 底层 I/O 错误码（如果有）
    pub fn code(&self) -> Option<i32> {
        self.io_source().and_then(io::Error::raw_os_error)
    }

    /// 是否为 TLS 层面的失败（SNI 或握手）
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::InvalidServerName(_) | Self::Handshake { .. })
    }

    fn io_source(&self) -> Option<&io::Error> {
        match self {
            Self::Resolve { source, .. }
            | Self::Connect { source, .. }
            | Self::Handshake { source, .. }
            | Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// 检查异步操作的结果，失败时以 `操作名: 错误信息 code: 错误码` 的格式记录
pub fn check<T, E>(op: &str, result: std::result::Result<T, E>) -> Option<T>
where
    E: Into<ProxyError>,
{
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            let e = e.into();
            error!("{}: {} code: {}", op, e, e.code().unwrap_or(-1));
            None
        }
    }
}

impl From<io::Error> for ProxyError {
    fn from(source: io::Error) -> Self {
        Self::io("io", source)
    }
}
