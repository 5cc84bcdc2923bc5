/// 入站会话：一个客户端明文连接的完整生命周期
///
/// 每个会话运行在自己的 tokio 任务里并独占自身状态，
/// 出站会话在同一任务中被等待，因此同一会话的各个步骤不会并发执行；
/// 不同会话之间完全并行，唯一共享的可变状态是会话 ID 计数器
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::config::AppConfig;
use crate::error::{check, ProxyError, Result};
use crate::http::{find_header_end, HttpRequest, HEADER_DELIMITER};
use crate::upstream::{
    OutboundContext, OutboundSession, ReadTermination, TlsUpstreamConnector, UpstreamConnector,
    UpstreamResponse,
};

/// 会话 ID，仅用于日志关联
pub type SessionId = u64;

/// 读取请求头时每次预留的缓冲区大小
const HEADER_READ_CHUNK: usize = 4096;

/// 单调递增的会话 ID 生成器
#[derive(Debug)]
pub struct SessionIdGenerator {
    next: AtomicU64,
}

impl SessionIdGenerator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// 分配下一个 ID，无锁且永不重复
    pub fn next_id(&self) -> SessionId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// 已分配的 ID 数量
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

static SESSION_IDS: SessionIdGenerator = SessionIdGenerator::new();

/// 从进程级生成器分配会话 ID
pub fn next_session_id() -> SessionId {
    SESSION_IDS.next_id()
}

/// 所有会话共享的只读状态
pub struct ProxyContext {
    pub connector: Arc<dyn UpstreamConnector>,
    /// 入站请求没有 User-Agent 时使用
    pub user_agent: String,
    /// 请求头大小上限，`None` 表示不限制
    pub max_header_bytes: Option<usize>,
}

impl ProxyContext {
    pub fn new(connector: Arc<dyn UpstreamConnector>, user_agent: impl Into<String>) -> Self {
        Self {
            connector,
            user_agent: user_agent.into(),
            max_header_bytes: None,
        }
    }

    /// 根据配置创建（加载 CA 证书）
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let connector = TlsUpstreamConnector::from_config(&config.upstream)?;
        let mut context = Self::new(Arc::new(connector), config.upstream.user_agent.clone());
        context.max_header_bytes = config.limits.max_header_bytes;
        Ok(context)
    }
}

/// 入站会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    ReadingHeader,
    Parsed,
    AwaitingUpstream,
    WritingResponse,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 入站会话
pub struct InboundSession {
    id: SessionId,
    socket: TcpStream,
    peer: SocketAddr,
    context: Arc<ProxyContext>,
    request: HttpRequest,
    state: SessionState,
}

impl InboundSession {
    pub fn new(
        id: SessionId,
        socket: TcpStream,
        peer: SocketAddr,
        context: Arc<ProxyContext>,
    ) -> Self {
        trace!("Inbound session constructed, id: {}", id);
        Self {
            id,
            socket,
            peer,
            context,
            request: HttpRequest::default(),
            state: SessionState::Created,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        trace!("Inbound session {} -> {}", self.state, next);
        self.state = next;
    }

    /// 运行会话直到关闭
    ///
    /// 任何一步失败都只记录日志并关闭连接，不会向客户端写入任何数据
    pub async fn start(mut self) -> SessionState {
        info!("Inbound session started, id: {} (peer: {})", self.id, self.peer);

        self.transition(SessionState::ReadingHeader);
        let header = read_header(&mut self.socket, self.context.max_header_bytes).await;
        let Some(raw) = check("inbound_session", header) else {
            self.close().await;
            return self.state;
        };

        self.request = HttpRequest::parse(&raw);
        self.transition(SessionState::Parsed);
        debug!(
            "Request parsed: {} {} {} ({} headers, {} body bytes)",
            self.request.method,
            self.request.target,
            self.request.version,
            self.request.headers.len(),
            self.request.body.len()
        );

        self.transition(SessionState::AwaitingUpstream);
        let outcome = OutboundSession::new(self.outbound_context()).run().await;
        let Some(response) = check("outbound_session", outcome) else {
            self.close().await;
            return self.state;
        };

        self.on_outbound_completed(response).await;
        self.state
    }

    /// 出站会话借用的上下文
    fn outbound_context(&self) -> OutboundContext<'_> {
        OutboundContext {
            session_id: self.id,
            request: &self.request,
            connector: self.context.connector.as_ref(),
            default_user_agent: &self.context.user_agent,
        }
    }

    async fn on_outbound_completed(&mut self, response: UpstreamResponse) {
        info!("Outbound session completed, id: {}", self.id);
        if let ReadTermination::Error(ref e) = response.termination {
            warn!(
                "Forwarding {} bytes received before upstream error: {}",
                response.bytes.len(),
                e
            );
        }
        trace!("Response {}", String::from_utf8_lossy(&response.bytes));

        self.transition(SessionState::WritingResponse);
        let written = self
            .socket
            .write_all(&response.bytes)
            .await
            .map_err(|e| ProxyError::io("write_response", e));
        if check("inbound_session", written).is_some() {
            debug!("Wrote {} bytes to client", response.bytes.len());
        }

        self.close().await;
    }

    /// 关闭写方向，连接随会话一起释放
    async fn close(&mut self) {
        if let Err(e) = self.socket.shutdown().await {
            debug!("Shutdown of client socket failed: {}", e);
        }
        self.transition(SessionState::Closed);
    }
}

/// 读取直到出现 `\r\n\r\n`，返回目前为止收到的全部字节
///
/// 设置了 `limit` 时，请求头（含分隔符）超过上限即失败，不论分隔符是否已经到达
pub async fn read_header<R>(reader: &mut R, limit: Option<usize>) -> Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buffer = BytesMut::with_capacity(HEADER_READ_CHUNK);
    let mut searched = 0;

    loop {
        buffer.reserve(HEADER_READ_CHUNK);
        let n = reader
            .read_buf(&mut buffer)
            .await
            .map_err(|e| ProxyError::io("read_header", e))?;
        if n == 0 {
            return Err(ProxyError::io(
                "read_header",
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before end of header",
                ),
            ));
        }

        let header_end = find_header_end(&buffer[searched..]).map(|end| searched + end);
        if let Some(limit) = limit {
            if header_end.unwrap_or(buffer.len()) > limit {
                return Err(ProxyError::HeaderTooLarge { limit });
            }
        }
        if header_end.is_some() {
            return Ok(buffer.freeze());
        }
        // 分隔符可能跨越两次读取
        searched = buffer.len().saturating_sub(HEADER_DELIMITER.len() - 1);
    }
}

impl Drop for InboundSession {
    fn drop(&mut self) {
        trace!("Inbound session destructed, id: {}", self.id);
    }
}
