/// 出站会话：到固定上游的一次 HTTPS 请求
///
/// 每个入站请求创建一个新的出站会话，依次完成地址解析、TCP 连接、
/// TLS 握手（证书 + 主机名校验，SNI）、发送请求和读取响应，
/// 把上游返回的原始字节交还给入站会话，不做任何解析或重试
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use rustls::pki_types::ServerName;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{rustls, TlsConnector};
use tracing::{debug, error, info, trace, warn};

use crate::config::UpstreamConfig;
use crate::error::{ProxyError, Result};
use crate::http::HttpRequest;
use crate::session::SessionId;

pub const DEFAULT_UPSTREAM_HOST: &str = "api.binance.com";
pub const DEFAULT_UPSTREAM_PORT: u16 = 443;
pub const DEFAULT_USER_AGENT: &str = "market-bridge/1.0.0";

/// 每次从上游读取的块大小
const READ_BUFFER_SIZE: usize = 4096;

/// 主机名转换为 SNI 使用的服务器名称，只接受 DNS 名称
///
/// rustls 同时用它做证书的主机名校验；IP 地址不会发送 SNI，因此拒绝
pub fn sni_name(host: &str) -> Result<ServerName<'static>> {
    match ServerName::try_from(host.to_string()) {
        Ok(name @ ServerName::DnsName(_)) => Ok(name),
        _ => Err(ProxyError::InvalidServerName(host.to_string())),
    }
}

/// 到上游的加密连接
pub trait UpstreamStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> UpstreamStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// 上游连接器接口
///
/// 出站会话按 解析 → 连接 → 握手 的顺序调用，每一步失败都直接返回，不重试
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// 上游主机名（用作 SNI、证书校验和 Host 头）
    fn host(&self) -> &str;

    /// SNI 使用的服务器名称
    fn server_name(&self) -> Result<ServerName<'static>> {
        sni_name(self.host())
    }

    /// 解析上游地址
    async fn resolve(&self) -> Result<Vec<SocketAddr>>;

    /// 按顺序尝试连接，第一个成功的即为结果
    async fn connect(&self, addrs: &[SocketAddr]) -> Result<TcpStream>;

    /// 在已建立的 TCP 连接上完成 TLS 握手
    async fn handshake(
        &self,
        server_name: ServerName<'static>,
        stream: TcpStream,
    ) -> Result<Pin<Box<dyn UpstreamStream>>>;
}

/// 基于 rustls 的上游连接器
pub struct TlsUpstreamConnector {
    host: String,
    port: u16,
    connector: TlsConnector,
}

impl TlsUpstreamConnector {
    pub fn new(host: impl Into<String>, port: u16, tls_config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            host: host.into(),
            port,
            connector: TlsConnector::from(tls_config),
        }
    }

    /// 根据配置加载信任的 CA 并创建连接器
    pub fn from_config(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let tls_config = crate::tls::load_client_config(config.ca_cert_path.as_deref())?;
        Ok(Self::new(config.host.clone(), config.port, tls_config))
    }

    fn resolve_error(&self, source: io::Error) -> ProxyError {
        ProxyError::Resolve {
            host: self.host.clone(),
            port: self.port,
            source,
        }
    }
}

#[async_trait]
impl UpstreamConnector for TlsUpstreamConnector {
    fn host(&self) -> &str {
        &self.host
    }

    async fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| self.resolve_error(e))?
            .collect();

        if addrs.is_empty() {
            return Err(self.resolve_error(io::Error::new(
                io::ErrorKind::NotFound,
                "no addresses resolved",
            )));
        }
        trace!("Resolved {} to {:?}", self.host, addrs);
        Ok(addrs)
    }

    async fn connect(&self, addrs: &[SocketAddr]) -> Result<TcpStream> {
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!("Connected to upstream endpoint {}", addr);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Upstream endpoint {} refused: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(ProxyError::Connect {
            addr: format!("{}:{}", self.host, self.port),
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no endpoints")),
        })
    }

    async fn handshake(
        &self,
        server_name: ServerName<'static>,
        stream: TcpStream,
    ) -> Result<Pin<Box<dyn UpstreamStream>>> {
        let tls_stream = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(|source| ProxyError::Handshake {
                host: self.host.clone(),
                source,
            })?;
        debug!("TLS handshake with {} completed", self.host);

        Ok(Box::pin(tls_stream))
    }
}

/// 出站会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundState {
    Created,
    Resolving,
    Connecting,
    Handshaking,
    Sending,
    Reading,
    Done,
}

impl fmt::Display for OutboundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 上游读取循环的结束方式
#[derive(Debug)]
pub enum ReadTermination {
    /// 上游正常关闭连接
    Eof,
    /// 读取出错，此前累积的数据仍然有效
    Error(io::Error),
}

impl ReadTermination {
    pub fn is_clean(&self) -> bool {
        matches!(self, ReadTermination::Eof)
    }
}

/// 上游返回的原始响应（未解析）
#[derive(Debug)]
pub struct UpstreamResponse {
    pub bytes: Bytes,
    pub termination: ReadTermination,
}

/// 出站会话从入站会话借用的只读上下文
pub struct OutboundContext<'a> {
    pub session_id: SessionId,
    pub request: &'a HttpRequest,
    pub connector: &'a dyn UpstreamConnector,
    /// 入站请求没有 User-Agent 时使用
    pub default_user_agent: &'a str,
}

/// 出站会话
pub struct OutboundSession<'a> {
    ctx: OutboundContext<'a>,
    state: OutboundState,
}

impl<'a> OutboundSession<'a> {
    pub fn new(ctx: OutboundContext<'a>) -> Self {
        Self {
            ctx,
            state: OutboundState::Created,
        }
    }

    pub fn state(&self) -> OutboundState {
        self.state
    }

    fn transition(&mut self, next: OutboundState) {
        trace!("Outbound session {} -> {}", self.state, next);
        self.state = next;
    }

    /// 执行一次完整的上游请求
    ///
    /// SNI、解析、连接、握手或发送阶段失败时返回错误；进入读取阶段后总是返回
    /// 已累积的响应，结束方式记录在 [`UpstreamResponse::termination`] 中
    pub async fn run(mut self) -> Result<UpstreamResponse> {
        info!("Outbound session started, id: {}", self.ctx.session_id);
        let connector = self.ctx.connector;

        // SNI 设置失败时不发起任何连接
        let server_name = connector.server_name()?;

        self.transition(OutboundState::Resolving);
        let addrs = connector.resolve().await?;

        self.transition(OutboundState::Connecting);
        let tcp_stream = connector.connect(&addrs).await?;

        self.transition(OutboundState::Handshaking);
        let mut stream = connector.handshake(server_name, tcp_stream).await?;
        info!("Outbound session connected, id: {}", self.ctx.session_id);

        self.transition(OutboundState::Sending);
        let request = build_upstream_request(
            self.ctx.request,
            self.ctx.connector.host(),
            self.ctx.default_user_agent,
        );
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| ProxyError::io("send_request", e))?;
        stream
            .flush()
            .await
            .map_err(|e| ProxyError::io("send_request", e))?;

        self.transition(OutboundState::Reading);
        let response = read_response(&mut stream).await;

        self.transition(OutboundState::Done);
        Ok(response)
    }
}

impl Drop for OutboundSession<'_> {
    fn drop(&mut self) {
        trace!(
            "Outbound session dropped, id: {} (state: {})",
            self.ctx.session_id,
            self.state
        );
    }
}

/// 读取直到上游关闭连接或出错
async fn read_response<S>(stream: &mut S) -> UpstreamResponse
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut response = BytesMut::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    let termination = loop {
        match stream.read(&mut buffer).await {
            Ok(0) => break ReadTermination::Eof,
            Ok(n) => response.extend_from_slice(&buffer[..n]),
            Err(e) => {
                error!("read_response: {} code: {}", e, e.raw_os_error().unwrap_or(-1));
                break ReadTermination::Error(e);
            }
        }
    };

    if !termination.is_clean() {
        warn!(
            "Upstream read ended abnormally after {} bytes",
            response.len()
        );
    }

    UpstreamResponse {
        bytes: response.freeze(),
        termination,
    }
}

/// 生成发往上游的请求
///
/// 方法固定为 GET，只保留入站请求的 target 和 User-Agent
pub fn build_upstream_request(request: &HttpRequest, host: &str, default_user_agent: &str) -> String {
    let user_agent = request.header("User-Agent").unwrap_or(default_user_agent);

    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         User-Agent: {}\r\n\
         Accept: */*\r\n\
         Connection: close\r\n\
         \r\n",
        request.target, host, user_agent
    )
}
