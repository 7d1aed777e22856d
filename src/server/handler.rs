use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, SERVER};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioTimer;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use crate::plugin::context::text_response;
use crate::plugin::{Context, Response, Scheme};
use crate::tls::CertificateStore;
use super::error::{error_response, timeout_response};
use super::routes::Routes;

pub const SERVER_HEADER: &str = concat!("edgeward/", env!("CARGO_PKG_VERSION"));

/// 요청 처리 옵션
#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    /// 요청 본문 최대 크기. 라우팅 전에 적용되며 `None`이면 제한 없음
    pub max_body: Option<usize>,
    /// 공개키 고정 헤더의 max-age. `None`이면 헤더를 붙이지 않음
    pub pin_max_age: Option<u64>,
}

pub struct RequestHandler {
    routes: Arc<RwLock<Arc<Routes>>>,
    store: Option<Arc<CertificateStore>>,
    options: HandlerOptions,
}

impl RequestHandler {
    pub fn new(
        routes: Arc<RwLock<Arc<Routes>>>,
        store: Option<Arc<CertificateStore>>,
        options: HandlerOptions,
    ) -> Self {
        Self {
            routes,
            store,
            options,
        }
    }

    pub async fn handle_request(
        &self,
        req: Request<Incoming>,
        scheme: Scheme,
        remote_addr: SocketAddr,
    ) -> Result<Response, Infallible> {
        let (parts, body) = req.into_parts();
        let body = match self.read_body(&parts, body).await {
            Ok(body) => body,
            Err(res) => {
                debug!(remote = %remote_addr, status = %res.status(), "요청 본문 거부");
                return Ok(self.finish(res, scheme, ""));
            }
        };

        let ctx = Context::new(Request::from_parts(parts, body))
            .with_scheme(scheme)
            .with_remote_addr(remote_addr);
        let host = ctx.host().to_ascii_lowercase();

        // 진행 중인 요청은 교체 전 트리를 끝까지 사용
        let handler = self.routes.read().await.handler();
        let call = handler.call(ctx);
        let result = match self.options.write_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(host = %host, timeout = ?limit, "응답 생성 시간 초과");
                    return Ok(self.finish(timeout_response(), scheme, &host));
                }
            },
            None => call.await,
        };

        let res = match result {
            Ok(res) => res,
            Err(e) => error_response(&e),
        };
        Ok(self.finish(res, scheme, &host))
    }

    /// 요청 본문을 모두 읽습니다. 상한을 넘는 본문은 끝까지 받지 않고 413으로
    /// 거절하며, `Content-Length`가 상한보다 크면 읽기 전에 거절합니다.
    async fn read_body(&self, parts: &hyper::http::request::Parts, body: Incoming) -> Result<Bytes, Response> {
        let Some(limit) = self.options.max_body else {
            return body.collect().await.map(|c| c.to_bytes()).map_err(|e| {
                warn!(error = %e, "요청 본문 읽기 실패");
                text_response(StatusCode::BAD_REQUEST, "Bad Request")
            });
        };

        let declared = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        if declared.map_or(false, |n| n > limit as u64) {
            return Err(payload_too_large());
        }

        match Limited::new(body, limit).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(payload_too_large()),
            Err(e) => {
                warn!(error = %e, "요청 본문 읽기 실패");
                Err(text_response(StatusCode::BAD_REQUEST, "Bad Request"))
            }
        }
    }

    /// 모든 응답에 공통 헤더를 붙입니다.
    fn finish(&self, mut res: Response, scheme: Scheme, host: &str) -> Response {
        res.headers_mut()
            .insert(SERVER, HeaderValue::from_static(SERVER_HEADER));

        if scheme == Scheme::Https && !host.is_empty() {
            if let (Some(store), Some(max_age)) = (&self.store, self.options.pin_max_age) {
                let value = store
                    .pins()
                    .header_value(host, max_age)
                    .and_then(|v| HeaderValue::from_str(&v).ok());
                if let Some(value) = value {
                    res.headers_mut()
                        .insert(HeaderName::from_static("public-key-pins"), value);
                }
            }
        }
        res
    }

    pub async fn handle_connection<I>(
        &self,
        io: I,
        scheme: Scheme,
        remote_addr: SocketAddr,
    ) -> Result<(), hyper::Error>
    where
        I: hyper::rt::Read + hyper::rt::Write + Send + Unpin + 'static,
    {
        let mut builder = http1::Builder::new();
        if let Some(timeout) = self.options.read_timeout {
            builder.timer(TokioTimer::new()).header_read_timeout(timeout);
        }

        debug!(remote = %remote_addr, scheme = scheme.as_str(), "연결 처리 시작");
        builder
            .serve_connection(
                io,
                service_fn(|req| self.handle_request(req, scheme, remote_addr)),
            )
            .await
    }
}

fn payload_too_large() -> Response {
    text_response(StatusCode::PAYLOAD_TOO_LARGE, "Request Entity Too Large")
}
