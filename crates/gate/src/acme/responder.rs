//! Temporary challenge listeners
//!
//! Used while an order is being validated when nothing else is listening on
//! the challenge port. When the port is already taken, the registry listener
//! is expected to answer through [`AcmeCertResolver`].

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, trace, warn};

use super::challenge::ChallengeManager;
use super::error::AcmeError;
use super::resolver::{AcmeCertResolver, ACME_TLS_ALPN_NAME};
use crate::tls::server_config_builder;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Which challenge a responder answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderKind {
    Http01,
    TlsAlpn01,
}

/// A listener answering ACME validation requests until dropped
#[derive(Debug)]
pub struct ChallengeResponder {
    kind: ResponderKind,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ChallengeResponder {
    /// Start answering `kind` challenges on `addr`.
    ///
    /// Returns `Ok(None)` when the address is already in use.
    pub async fn bind(
        kind: ResponderKind,
        addr: SocketAddr,
        challenges: ChallengeManager,
    ) -> Result<Option<Self>, AcmeError> {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                info!(
                    addr = %addr,
                    kind = ?kind,
                    "Challenge port in use, assuming the registry listener answers"
                );
                return Ok(None);
            }
            Err(source) => return Err(AcmeError::Responder { addr, source }),
        };
        let local_addr = listener
            .local_addr()
            .map_err(|source| AcmeError::Responder { addr, source })?;

        let task = match kind {
            ResponderKind::Http01 => tokio::spawn(accept_loop(listener, kind, move |stream, peer| {
                answer_http01(stream, peer, challenges.clone())
            })),
            ResponderKind::TlsAlpn01 => {
                let mut config = server_config_builder()?
                    .with_no_client_auth()
                    .with_cert_resolver(Arc::new(AcmeCertResolver::new(challenges)));
                config.alpn_protocols = vec![ACME_TLS_ALPN_NAME.to_vec()];
                let acceptor = TlsAcceptor::from(Arc::new(config));
                tokio::spawn(accept_loop(listener, kind, move |stream, peer| {
                    answer_tls_alpn01(stream, peer, acceptor.clone())
                }))
            }
        };

        info!(addr = %local_addr, kind = ?kind, "Started ACME challenge responder");
        Ok(Some(Self {
            kind,
            local_addr,
            task,
        }))
    }

    pub fn kind(&self) -> ResponderKind {
        self.kind
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for ChallengeResponder {
    fn drop(&mut self) {
        // Aborting the accept loop drops its JoinSet, which aborts every connection
        self.task.abort();
        debug!(addr = %self.local_addr, kind = ?self.kind, "Stopped ACME challenge responder");
    }
}

/// Accept connections until aborted; connection tasks live in a set owned here
async fn accept_loop<F, Fut>(listener: TcpListener, kind: ResponderKind, handle: F)
where
    F: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!(peer = %peer, kind = ?kind, "Accepted challenge connection");
                    connections.spawn(handle(stream, peer));
                }
                Err(e) => warn!(error = %e, kind = ?kind, "Challenge responder accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn answer_http01(stream: TcpStream, peer: SocketAddr, challenges: ChallengeManager) {
    let service = service_fn(move |req: Request<Incoming>| {
        let response = http01_response(&req, &challenges);
        async move { Ok::<_, Infallible>(response) }
    });
    let connection = http1::Builder::new()
        .keep_alive(false)
        .serve_connection(TokioIo::new(stream), service);

    match tokio::time::timeout(CONNECTION_TIMEOUT, connection).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(peer = %peer, error = %e, "HTTP-01 connection failed"),
        Err(_) => debug!(peer = %peer, "HTTP-01 connection timed out"),
    }
}

/// Answer one HTTP-01 request: the key authorization for a known token, else 404
fn http01_response<B>(req: &Request<B>, challenges: &ChallengeManager) -> Response<Full<Bytes>> {
    let path = req.uri().path();
    trace!(method = %req.method(), uri = %req.uri(), "HTTP-01 request");

    let key_authorization = match *req.method() {
        Method::GET | Method::HEAD => {
            ChallengeManager::extract_token(path).and_then(|token| challenges.http01_response(token))
        }
        _ => None,
    };

    match key_authorization {
        Some(key_authorization) => {
            debug!(path = %path, "Served ACME HTTP-01 challenge");
            let mut response = Response::new(Full::new(Bytes::from(key_authorization)));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            response
        }
        None => {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    }
}

async fn answer_tls_alpn01(stream: TcpStream, peer: SocketAddr, acceptor: TlsAcceptor) {
    // Validation is complete once the handshake succeeds
    match tokio::time::timeout(CONNECTION_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(mut tls)) => {
            debug!(peer = %peer, "Completed ACME TLS-ALPN-01 handshake");
            let _ = tls.shutdown().await;
        }
        Ok(Err(e)) => debug!(peer = %peer, error = %e, "TLS-ALPN-01 handshake failed"),
        Err(_) => debug!(peer = %peer, "TLS-ALPN-01 handshake timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tokio::io::AsyncReadExt;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn send(addr: SocketAddr, method: &str, target: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request =
            format!("{method} {target} HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn request(method: Method, uri: &str) -> Request<()> {
        Request::builder().method(method).uri(uri).body(()).unwrap()
    }

    async fn body(response: Response<Full<Bytes>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_http01_response() {
        let challenges = ChallengeManager::new();
        challenges.add_http01("tok", "tok.thumb");

        let ok = http01_response(
            &request(Method::GET, "/.well-known/acme-challenge/tok"),
            &challenges,
        );
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(body(ok).await, Bytes::from_static(b"tok.thumb"));

        let head = http01_response(
            &request(Method::HEAD, "/.well-known/acme-challenge/tok"),
            &challenges,
        );
        assert_eq!(head.status(), StatusCode::OK);

        let absolute = http01_response(
            &request(Method::GET, "http://example.com/.well-known/acme-challenge/tok"),
            &challenges,
        );
        assert_eq!(absolute.status(), StatusCode::OK);
        assert_eq!(body(absolute).await, Bytes::from_static(b"tok.thumb"));

        let post = http01_response(
            &request(Method::POST, "/.well-known/acme-challenge/tok"),
            &challenges,
        );
        assert_eq!(post.status(), StatusCode::NOT_FOUND);

        let other = http01_response(&request(Method::GET, "/index.html"), &challenges);
        assert_eq!(other.status(), StatusCode::NOT_FOUND);
        assert!(body(other).await.is_empty());
    }

    #[tokio::test]
    async fn test_http01_responder_serves_tokens() {
        let challenges = ChallengeManager::new();
        challenges.add_http01("abc", "abc.thumbprint");

        let responder = ChallengeResponder::bind(ResponderKind::Http01, localhost(), challenges)
            .await
            .unwrap()
            .expect("bound");
        let addr = responder.local_addr();

        let found = send(addr, "GET", "/.well-known/acme-challenge/abc").await;
        assert!(found.starts_with("HTTP/1.1 200 OK"), "{found}");
        assert!(found.ends_with("abc.thumbprint"));

        let head = send(addr, "HEAD", "/.well-known/acme-challenge/abc").await;
        assert!(head.starts_with("HTTP/1.1 200 OK"), "{head}");
        assert!(!head.contains("abc.thumbprint"));

        let absolute = send(
            addr,
            "GET",
            &format!("http://{addr}/.well-known/acme-challenge/abc"),
        )
        .await;
        assert!(absolute.starts_with("HTTP/1.1 200 OK"), "{absolute}");

        let missing = send(addr, "GET", "/.well-known/acme-challenge/nope").await;
        assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");
    }

    #[tokio::test]
    async fn test_drop_closes_open_connections() {
        let responder =
            ChallengeResponder::bind(ResponderKind::Http01, localhost(), ChallengeManager::new())
                .await
                .unwrap()
                .expect("bound");
        let mut idle = TcpStream::connect(responder.local_addr()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(responder);

        // Without a request the connection would otherwise stay open for CONNECTION_TIMEOUT
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(2), idle.read(&mut buf)).await;
        assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))), "{read:?}");
    }

    #[tokio::test]
    async fn test_port_in_use_is_not_an_error() {
        let taken = TcpListener::bind(localhost()).await.unwrap();
        let addr = taken.local_addr().unwrap();

        let responder = ChallengeResponder::bind(ResponderKind::Http01, addr, ChallengeManager::new())
            .await
            .unwrap();
        assert!(responder.is_none());
    }

    #[tokio::test]
    async fn test_drop_releases_port() {
        let responder =
            ChallengeResponder::bind(ResponderKind::TlsAlpn01, localhost(), ChallengeManager::new())
                .await
                .unwrap()
                .expect("bound");
        assert_eq!(responder.kind(), ResponderKind::TlsAlpn01);
        let addr = responder.local_addr();
        drop(responder);

        // Abort is processed at the task's next poll
        let mut rebound = None;
        for _ in 0..50 {
            if let Ok(listener) = TcpListener::bind(addr).await {
                rebound = Some(listener);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(rebound.is_some());
    }
}
