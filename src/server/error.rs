use std::fmt;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::StatusCode;
use tracing::{error, warn};
use crate::plugin::{PipelineError, PluginError, Response};
use crate::settings::SettingsError;
use crate::tls::TlsError;

#[derive(Debug)]
pub enum Error {
    Config(String),
    Io(std::io::Error),
    Settings(SettingsError),
    Pipeline(PipelineError),
    Tls(TlsError),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<SettingsError> for Error {
    fn from(err: SettingsError) -> Self {
        Error::Settings(err)
    }
}

impl From<PipelineError> for Error {
    fn from(err: PipelineError) -> Self {
        Error::Pipeline(err)
    }
}

impl From<TlsError> for Error {
    fn from(err: TlsError) -> Self {
        Error::Tls(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "설정 오류: {}", msg),
            Error::Io(e) => write!(f, "IO 오류: {}", e),
            Error::Settings(e) => write!(f, "{}", e),
            Error::Pipeline(e) => write!(f, "파이프라인 오류: {}", e),
            Error::Tls(e) => write!(f, "TLS 오류: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Settings(e) => Some(e),
            Error::Pipeline(e) => Some(e),
            Error::Tls(e) => Some(e),
            Error::Config(_) => None,
        }
    }
}

/// 플러그인 에러를 HTTP 응답으로 변환합니다.
///
/// 4xx는 에러 메시지를 그대로 보여 주고, 5xx는 내부 정보를 숨깁니다.
pub fn error_response(err: &PluginError) -> Response {
    let status = err.status_code();
    let body = if status.is_server_error() {
        error!(status = %status, error = %err, "요청 처리 실패");
        status.canonical_reason().unwrap_or("Internal Server Error").to_string()
    } else {
        warn!(status = %status, error = %err, "요청 거부");
        match err {
            PluginError::Status { message, .. } if !message.is_empty() => message.clone(),
            _ => status.canonical_reason().unwrap_or_default().to_string(),
        }
    };

    let mut res = hyper::Response::new(Full::new(Bytes::from(body)));
    *res.status_mut() = status;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    res
}

/// 응답 생성 시간 초과
pub fn timeout_response() -> Response {
    error_response(&PluginError::status(StatusCode::GATEWAY_TIMEOUT, ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_hides_server_errors() {
        let res = error_response(&PluginError::Upstream("10.0.0.1:80 refused".to_string()));
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

        let res = error_response(&PluginError::status(StatusCode::PAYLOAD_TOO_LARGE, "본문이 너무 큽니다"));
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(timeout_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
