use std::time::Instant;
use async_trait::async_trait;
use crate::logging::{log_request, RequestLog};
use crate::plugin::error::{DecodeError, PluginError};
use crate::plugin::record::RawPlugin;
use crate::plugin::template::Template;
use crate::plugin::{Base, Context, Handler, Plugin, Response};

/// 요청 로그 플러그인
///
/// 응답 상태와 처리 시간을 `RequestLog`로 남깁니다. `format`이 있으면
/// 요청 기준으로 렌더링한 문자열이 로그 메시지에 함께 기록됩니다.
pub struct Logger {
    base: Base,
    format: Option<Template>,
}

impl Logger {
    pub fn new(base: Base) -> Self {
        Self { base, format: None }
    }
}

#[async_trait]
impl Plugin for Logger {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn configure(&mut self, record: &RawPlugin) -> Result<(), DecodeError> {
        if let Some(format) = record.get_str("format")? {
            self.format = Some(Template::new(&format)?);
        }
        Ok(())
    }

    async fn process(&self, ctx: Context, next: &dyn Handler) -> Result<Response, PluginError> {
        let start = Instant::now();
        let mut log = RequestLog::new(ctx.request_id().to_string());
        log.with_context(&ctx);
        if let Some(format) = &self.format {
            log.message = Some(format.render(&ctx));
        }

        let result = next.call(ctx).await;
        match &result {
            Ok(res) => log.with_response(res.status()),
            Err(e) => {
                log.with_response(e.status_code());
                log.with_error(e);
            }
        }
        log.duration_ms = start.elapsed().as_millis() as u64;
        log_request(&log);

        result
    }
}
