use crate::config::{RunMode, ServerConfig};
use crate::error::{check, ProxyError};
use crate::session::{next_session_id, InboundSession, ProxyContext};
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, info_span, Instrument};

/// 监听客户端连接并为每个连接创建入站会话
pub struct Server {
    listener: TcpListener,
    run_mode: RunMode,
    context: Arc<ProxyContext>,
}

impl Server {
    /// 绑定监听端口；失败属于启动错误
    pub async fn bind(config: &ServerConfig, context: Arc<ProxyContext>) -> Result<Self> {
        let addr = format!("{}:{}", config.bind_addr, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        info!(
            "Listening on {} (mode: {})",
            listener.local_addr().context("Failed to read local address")?,
            config.run_mode
        );

        Ok(Self {
            listener,
            run_mode: config.run_mode,
            context,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    /// 运行接受循环，直到单次模式处理完一个连接
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// 运行接受循环，`shutdown` 完成时停止接受新连接
    ///
    /// 持续模式下 accept 出错只记录日志；单次模式下 accept 出错直接返回
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Server running ...");

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let accepted = accepted.map_err(|e| ProxyError::io("accept", e));
                    let Some((socket, peer)) = check("server", accepted) else {
                        if self.run_mode == RunMode::SingleRequest {
                            break;
                        }
                        continue;
                    };

                    let id = next_session_id();
                    info!("Server accepted connection from {}, session id: {}", peer, id);

                    let session = InboundSession::new(id, socket, peer, Arc::clone(&self.context));
                    let handle = tokio::spawn(
                        session.start().instrument(info_span!("session", id)),
                    );

                    if self.run_mode == RunMode::SingleRequest {
                        if let Err(e) = handle.await {
                            error!("Session {} task failed: {}", id, e);
                        }
                        break;
                    }
                }
                _ = &mut shutdown => {
                    info!("Received shutdown signal, stopping server...");
                    break;
                }
            }
        }

        info!("Server finished");
        Ok(())
    }
}
