use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use hyper_util::rt::TokioIo;
use tracing::{debug, error, info, warn};
use crate::plugin::Scheme;
use crate::tls::SniAcceptor;
use super::handler::RequestHandler;
use super::Result;

struct HttpsListener {
    listener: TcpListener,
    acceptor: SniAcceptor,
}

pub struct ServerListener {
    http_listener: TcpListener,
    https: Option<HttpsListener>,
}

impl ServerListener {
    /// HTTP 포트와, TLS 수락기가 있으면 HTTPS 포트를 엽니다.
    pub async fn bind(
        bind_address: &str,
        http_port: u16,
        https: Option<(u16, SniAcceptor)>,
    ) -> Result<Self> {
        let http_listener = TcpListener::bind((bind_address, http_port))
            .await
            .map_err(|e| {
                error!(error = %e, port = http_port, "HTTP 포트 바인딩 실패");
                e
            })?;
        info!(addr = %http_listener.local_addr()?, "HTTP 리스너 시작");

        let https = match https {
            Some((port, acceptor)) => {
                let listener = TcpListener::bind((bind_address, port)).await.map_err(|e| {
                    error!(error = %e, port = port, "HTTPS 포트 바인딩 실패");
                    e
                })?;
                info!(addr = %listener.local_addr()?, "HTTPS 리스너 시작");
                Some(HttpsListener { listener, acceptor })
            }
            None => None,
        };

        Ok(Self {
            http_listener,
            https,
        })
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        Ok(self.http_listener.local_addr()?)
    }

    pub fn https_addr(&self) -> Result<Option<SocketAddr>> {
        match &self.https {
            Some(https) => Ok(Some(https.listener.local_addr()?)),
            None => Ok(None),
        }
    }

    pub async fn run(self, handler: Arc<RequestHandler>) -> Result<()> {
        loop {
            tokio::select! {
                result = self.http_listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                if let Err(err) = handler.handle_connection(io, Scheme::Http, remote_addr).await {
                                    debug!(error = %err, remote = %remote_addr, "HTTP 연결 처리 실패");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "HTTP 연결 수락 실패");
                        }
                    }
                }

                result = async {
                    match &self.https {
                        Some(https) => https.listener.accept().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            let Some(acceptor) = self.https.as_ref().map(|h| h.acceptor.clone()) else {
                                continue;
                            };
                            let handler = handler.clone();

                            tokio::spawn(async move {
                                match acceptor.accept(stream).await {
                                    Ok((tls_stream, server_name)) => {
                                        debug!(server_name = ?server_name, remote = %remote_addr, "TLS 연결 수립");
                                        let io = TokioIo::new(tls_stream);
                                        if let Err(err) = handler.handle_connection(io, Scheme::Https, remote_addr).await {
                                            debug!(error = %err, remote = %remote_addr, "HTTPS 연결 처리 실패");
                                        }
                                    }
                                    Err(e) => {
                                        warn!(error = %e, remote = %remote_addr, "TLS 핸드셰이크 실패");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "HTTPS 연결 수락 실패");
                        }
                    }
                }
            }
        }
    }
}
