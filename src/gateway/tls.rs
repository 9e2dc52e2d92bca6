//! HTTPS termination for the gateway.
//!
//! `axum::serve` only speaks plain TCP, so with TLS configured each accepted
//! connection goes through a rustls handshake and is then driven by
//! hyper-util with upgrade support (the agent WebSocket needs it).

use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::Service;

/// Pause after a failed `accept` (e.g. EMFILE) before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    EmptyCertChain(String),

    #[error("no private key found in {0}")]
    EmptyPrivateKey(String),

    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

impl TlsError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader =
        std::io::BufReader::new(std::fs::File::open(path).map_err(|e| TlsError::io(path, e))?);
    let cert_chain = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::io(path, e))?;
    if cert_chain.is_empty() {
        return Err(TlsError::EmptyCertChain(path.display().to_string()));
    }
    Ok(cert_chain)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader =
        std::io::BufReader::new(std::fs::File::open(path).map_err(|e| TlsError::io(path, e))?);
    private_key(&mut reader)
        .map_err(|e| TlsError::io(path, e))?
        .ok_or_else(|| TlsError::EmptyPrivateKey(path.display().to_string()))
}

/// Build a rustls acceptor from PEM certificate chain and key files.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let cert_chain = load_cert_chain(cert_path)?;
    let key = load_private_key(key_path)?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Accept TLS connections until `shutdown` resolves.
pub async fn serve_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    tokio::pin!(shutdown);

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = &mut shutdown => break,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("TLS listener accept failed: {e}");
                tokio::select! {
                    () = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => continue,
                    () = &mut shutdown => break,
                }
            }
        };

        let acceptor = acceptor.clone();
        let tower_service = app.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::debug!(%peer, "TLS handshake failed: {e}");
                    return;
                }
            };

            let hyper_service =
                hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                    tower_service.clone().call(request)
                });

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(tls_stream), hyper_service)
                .await
            {
                tracing::debug!(%peer, "TLS connection ended with error: {e}");
            }
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_errors_back_off() {
        assert!(ACCEPT_ERROR_BACKOFF >= Duration::from_millis(100));
    }

    #[test]
    fn missing_cert_file_is_io_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = load_acceptor(&tmp.path().join("cert.pem"), &tmp.path().join("key.pem"))
            .err()
            .unwrap();
        assert!(matches!(err, TlsError::Io { .. }));
        assert!(err.to_string().contains("cert.pem"));
    }

    #[test]
    fn empty_cert_file_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cert = tmp.path().join("cert.pem");
        std::fs::write(&cert, "").unwrap();

        let err = load_cert_chain(&cert).unwrap_err();
        assert!(matches!(err, TlsError::EmptyCertChain(_)));
    }

    #[test]
    fn key_file_without_key_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let key = tmp.path().join("key.pem");
        std::fs::write(&key, "just some text\n").unwrap();

        let err = load_private_key(&key).unwrap_err();
        assert!(matches!(err, TlsError::EmptyPrivateKey(_)));
    }
}
