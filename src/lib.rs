/// Market Bridge 库入口
///
/// 将核心模块导出为库，方便测试和复用
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod server;
pub mod session;
pub mod tls;
pub mod upstream;

// 重新导出常用类型
pub use config::{AppConfig, RunMode, ServerConfig, UpstreamConfig};
pub use error::{ProxyError, Result};
pub use http::{HttpRequest, HttpResponse, StatusCode};
pub use server::Server;
pub use session::{InboundSession, ProxyContext, SessionId};
pub use upstream::{OutboundSession, TlsUpstreamConnector, UpstreamConnector, UpstreamResponse};
