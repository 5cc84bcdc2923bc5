/// Common utilities for integration tests
use market_bridge::config::{AppConfig, RunMode, ServerConfig};
use market_bridge::{ProxyContext, Server};
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::{rustls, TlsAcceptor};

/// Generate temporary certificate files for testing
pub fn generate_test_certs() -> (PathBuf, PathBuf) {
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let temp_dir = std::env::temp_dir();
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
    let unique_id = format!("{}-{}-{}", timestamp, counter, std::process::id());

    let cert_path = temp_dir.join(format!("mb-test-cert-{}.pem", unique_id));
    let key_path = temp_dir.join(format!("mb-test-key-{}.pem", unique_id));

    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("Failed to generate test certificates");
    std::fs::write(&cert_path, generated.cert.pem()).expect("Failed to write certificate");
    std::fs::write(&key_path, generated.signing_key.serialize_pem())
        .expect("Failed to write private key");

    (cert_path, key_path)
}

/// Load a server TLS config for the mock upstream
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Arc<rustls::ServerConfig> {
    let mut cert_reader = BufReader::new(File::open(cert_path).expect("Failed to open cert file"));
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .expect("Failed to parse certificates");

    let mut key_reader = BufReader::new(File::open(key_path).expect("Failed to open key file"));
    let key = rustls_pemfile::private_key(&mut key_reader)
        .expect("Failed to parse private key")
        .expect("No private key found");

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .expect("Failed to create server config");
    Arc::new(config)
}

/// A TLS upstream that records every request header and answers with fixed bytes
pub struct MockUpstream {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<String>>>,
    pub cert_path: PathBuf,
    _cleanup: TestCleanup,
}

impl MockUpstream {
    pub async fn start(response: &'static [u8]) -> Self {
        let (cert_path, key_path) = generate_test_certs();
        let acceptor = TlsAcceptor::from(load_server_config(&cert_path, &key_path));

        let listener = TokioTcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock upstream");
        let port = listener.local_addr().unwrap().port();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let Ok(mut stream) = acceptor.accept(socket).await else {
                        return;
                    };

                    let mut header = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !header.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => header.extend_from_slice(&buf[..n]),
                        }
                    }
                    recorded
                        .lock()
                        .unwrap()
                        .push(String::from_utf8_lossy(&header).into_owned());

                    let _ = stream.write_all(response).await;
                    // Sends close_notify so the proxy sees a clean EOF
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            port,
            requests,
            cert_path: cert_path.clone(),
            _cleanup: TestCleanup::new(cert_path, key_path),
        }
    }

    pub fn recorded(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Proxy configuration pointing at this upstream and trusting its certificate
    pub fn app_config(&self, run_mode: RunMode) -> AppConfig {
        let mut config = AppConfig::default();
        config.server = ServerConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            run_mode,
            workers: 1,
        };
        config.upstream.host = "localhost".to_string();
        config.upstream.port = self.port;
        config.upstream.ca_cert_path = Some(self.cert_path.clone());
        config
    }
}

/// Bind a proxy for `config` and return it with its listening address
pub async fn bind_proxy(config: &AppConfig) -> (Server, SocketAddr) {
    let context = ProxyContext::from_config(config).expect("Failed to build proxy context");
    bind_proxy_with(config, context).await
}

/// Bind a proxy using a custom context (e.g. an injected connector)
pub async fn bind_proxy_with(config: &AppConfig, context: ProxyContext) -> (Server, SocketAddr) {
    let server = Server::bind(&config.server, Arc::new(context))
        .await
        .expect("Failed to bind proxy");
    let addr = server.local_addr().expect("Failed to get proxy address");
    (server, addr)
}

/// Send raw bytes to the proxy and read until it closes the connection
pub async fn send_request(
    addr: SocketAddr,
    request: &[u8],
    timeout_duration: Duration,
) -> Result<Vec<u8>, String> {
    timeout(timeout_duration, async {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| format!("Failed to connect to proxy: {}", e))?;

        stream
            .write_all(request)
            .await
            .map_err(|e| format!("Failed to write request: {}", e))?;

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .await
            .map_err(|e| format!("Failed to read response: {}", e))?;

        Ok(response)
    })
    .await
    .map_err(|_| "Timeout waiting for response".to_string())?
}

/// Cleanup function for test resources
pub struct TestCleanup {
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
}

impl TestCleanup {
    pub fn new(cert_path: PathBuf, key_path: PathBuf) -> Self {
        Self {
            cert_path: Some(cert_path),
            key_path: Some(key_path),
        }
    }
}

impl Drop for TestCleanup {
    fn drop(&mut self) {
        if let Some(cert) = self.cert_path.take() {
            let _ = std::fs::remove_file(cert);
        }
        if let Some(key) = self.key_path.take() {
            let _ = std::fs::remove_file(key);
        }
    }
}
