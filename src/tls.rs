use anyhow::{Context, Result};
use rustls::pki_types::CertificateDer;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls;
use tracing::{debug, warn};

/// 加载上游连接使用的客户端 TLS 配置
///
/// 证书校验始终开启：指定了 CA 文件时只信任该文件中的证书，
/// 否则使用系统 CA 证书
pub fn load_client_config(ca_cert_path: Option<&Path>) -> Result<Arc<rustls::ClientConfig>> {
    let mut root_store = rustls::RootCertStore::empty();

    if let Some(ca_path) = ca_cert_path {
        for cert in load_certs(ca_path)? {
            root_store
                .add(cert)
                .context("Failed to add CA certificate")?;
        }
    } else {
        let native_certs = rustls_native_certs::load_native_certs();
        for err in &native_certs.errors {
            warn!("Failed to load a native CA certificate: {}", err);
        }
        for cert in native_certs.certs {
            root_store.add(cert).ok();
        }
    }

    if root_store.is_empty() {
        anyhow::bail!("No trusted CA certificates available for upstream verification");
    }
    debug!("Loaded {} trusted CA certificates", root_store.len());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open cert file: {:?}", path))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificates in {:?}", path))
}
