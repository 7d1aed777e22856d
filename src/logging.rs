use tracing::{debug, error, info, warn, Level, span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};
use crate::plugin::Context;
use crate::settings::{LogFormat, LogOutput, LogSettings};

/// 전역 subscriber를 설치합니다.
///
/// non-blocking writer의 guard를 돌려주며, 호출한 쪽이 프로세스가
/// 끝날 때까지 들고 있어야 버퍼가 비워집니다.
pub fn init_logging(settings: &LogSettings) -> WorkerGuard {
    let filter = build_filter(settings.level);

    let (writer, guard) = match &settings.output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::File(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "edgeward.log".into());
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name))
        }
    };
    let ansi = matches!(settings.output, LogOutput::Stdout);

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // 이미 설치되어 있으면(테스트 등) 무시
    let result = match settings.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.with_ansi(ansi).try_init(),
    };
    if let Err(e) = result {
        debug!(error = %e, "로깅이 이미 초기화되어 있습니다");
    }

    guard
}

fn build_filter(level: Level) -> EnvFilter {
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    match format!("edgeward={}", level.as_str().to_lowercase()).parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

#[derive(Debug)]
pub struct RequestLog {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub host: String,
    pub remote_addr: Option<String>,
    pub status_code: u16,
    pub duration_ms: u64,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl RequestLog {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            method: String::new(),
            path: String::new(),
            host: String::new(),
            remote_addr: None,
            status_code: 0,
            duration_ms: 0,
            message: None,
            error: None,
        }
    }

    pub fn with_context(&mut self, ctx: &Context) {
        self.method = ctx.method().to_string();
        self.path = ctx.request_uri().to_string();
        self.host = ctx.host().to_string();
        self.remote_addr = ctx.remote_addr().map(|addr| addr.to_string());

        debug!(
            request_id = %self.request_id,
            method = %self.method,
            path = %self.path,
            host = %self.host,
            "요청 수신"
        );
    }

    pub fn with_response(&mut self, status: hyper::StatusCode) {
        self.status_code = status.as_u16();
    }

    pub fn with_error(&mut self, error: impl std::fmt::Display) {
        self.error = Some(error.to_string());
    }

    /// 결과에 따른 로그 레벨. 에러나 5xx는 ERROR, 4xx는 WARN
    pub fn level(&self) -> Level {
        if self.error.is_some() || self.status_code >= 500 {
            Level::ERROR
        } else if self.status_code >= 400 {
            Level::WARN
        } else {
            Level::INFO
        }
    }
}

pub fn log_request(log: &RequestLog) {
    let level = log.level();

    let span = span!(
        Level::INFO,
        "request",
        request_id = %log.request_id,
        method = %log.method,
        path = %log.path,
        host = %log.host,
        status = %log.status_code,
        duration_ms = %log.duration_ms
    );
    let _enter = span.enter();

    let message = log.message.as_deref().unwrap_or_default();
    match level {
        Level::ERROR => error!(
            remote = ?log.remote_addr,
            error = ?log.error,
            "{}", message
        ),
        Level::WARN => warn!(remote = ?log.remote_addr, "{}", message),
        _ => info!(remote = ?log.remote_addr, "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use hyper::StatusCode;

    #[test]
    fn test_request_log_level() {
        let ctx = Context::new(
            hyper::Request::builder()
                .method("POST")
                .uri("/submit?x=1")
                .header("host", "example.com:8080")
                .body(Bytes::new())
                .unwrap(),
        );
        let mut log = RequestLog::new(ctx.request_id().to_string());
        log.with_context(&ctx);
        assert_eq!(log.method, "POST");
        assert_eq!(log.path, "/submit?x=1");
        assert_eq!(log.host, "example.com");

        log.with_response(StatusCode::OK);
        assert_eq!(log.level(), Level::INFO);
        log.with_response(StatusCode::NOT_FOUND);
        assert_eq!(log.level(), Level::WARN);
        log.with_error("boom");
        assert_eq!(log.level(), Level::ERROR);
        log_request(&log);
    }
}
