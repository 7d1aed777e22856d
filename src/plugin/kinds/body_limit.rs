use async_trait::async_trait;
use hyper::{header, StatusCode};
use tracing::debug;
use crate::plugin::error::{DecodeError, PluginError};
use crate::plugin::record::RawPlugin;
use crate::plugin::{Base, Context, Handler, Plugin, Response};

const DEFAULT_LIMIT: &str = "2M";

/// 요청 본문 크기 제한
pub struct BodyLimit {
    base: Base,
    limit: String,
    bytes: u64,
}

impl BodyLimit {
    pub fn new(base: Base) -> Self {
        Self {
            base,
            limit: DEFAULT_LIMIT.to_string(),
            bytes: 0,
        }
    }

    pub fn limit_bytes(&self) -> u64 {
        self.bytes
    }
}

/// `"512"`, `"4K"`, `"2M"`, `"1G"` 형식의 크기를 바이트로 변환합니다.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let (digits, unit) = match text.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => text.split_at(i),
        None => (text, ""),
    };
    let n: u64 = digits.parse().ok()?;
    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1 << 10,
        "M" | "MB" => 1 << 20,
        "G" | "GB" => 1 << 30,
        _ => return None,
    };
    n.checked_mul(multiplier)
}

#[async_trait]
impl Plugin for BodyLimit {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn configure(&mut self, record: &RawPlugin) -> Result<(), DecodeError> {
        if let Some(limit) = record.get_str("limit")? {
            self.limit = limit;
        }
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), PluginError> {
        self.bytes = parse_size(&self.limit)
            .ok_or_else(|| PluginError::initialize(self.base.name(), format!("잘못된 크기: {}", self.limit)))?;
        Ok(())
    }

    async fn process(&self, ctx: Context, next: &dyn Handler) -> Result<Response, PluginError> {
        let declared = ctx
            .header(header::CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse::<u64>().ok());

        let too_large = declared.map_or(false, |n| n > self.bytes) || ctx.body().len() as u64 > self.bytes;
        if too_large {
            debug!(limit = self.bytes, size = ?declared, "요청 본문 크기 초과");
            return Err(PluginError::status(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request Entity Too Large",
            ));
        }

        next.call(ctx).await
    }
}
