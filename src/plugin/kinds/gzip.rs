use std::io::Write;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use http_body_util::{BodyExt, Full};
use hyper::header::{self, HeaderValue};
use hyper::Method;
use crate::plugin::error::{DecodeError, PluginError};
use crate::plugin::record::RawPlugin;
use crate::plugin::{Base, Context, Handler, Plugin, Response};

const DEFAULT_LEVEL: u32 = 6;

/// gzip 응답 압축
pub struct Gzip {
    base: Base,
    level: u32,
    min_length: usize,
}

impl Gzip {
    pub fn new(base: Base) -> Self {
        Self {
            base,
            level: DEFAULT_LEVEL,
            min_length: 0,
        }
    }

    fn accepts_gzip(ctx: &Context) -> bool {
        ctx.header(header::ACCEPT_ENCODING.as_str())
            .map(|v| {
                v.split(',').any(|enc| {
                    let mut parts = enc.trim().split(';');
                    let name = parts.next().unwrap_or_default().trim();
                    let rejected = parts.any(|p| p.trim().replace(' ', "") == "q=0");
                    (name.eq_ignore_ascii_case("gzip") || name == "*") && !rejected
                })
            })
            .unwrap_or(false)
    }

    pub fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(self.level));
        encoder.write_all(data)?;
        encoder.finish()
    }
}

#[async_trait]
impl Plugin for Gzip {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn configure(&mut self, record: &RawPlugin) -> Result<(), DecodeError> {
        if let Some(level) = record.get_int("level")? {
            self.level = u32::try_from(level)
                .ok()
                .filter(|l| *l <= 9)
                .ok_or_else(|| DecodeError::invalid("level", "0에서 9 사이여야 함"))?;
        }
        if let Some(min) = record.get_int("min_length")? {
            self.min_length = usize::try_from(min).map_err(|e| DecodeError::invalid("min_length", e))?;
        }
        Ok(())
    }

    async fn process(&self, ctx: Context, next: &dyn Handler) -> Result<Response, PluginError> {
        let wants_gzip = Self::accepts_gzip(&ctx) && ctx.method() != Method::HEAD;
        let res = next.call(ctx).await?;

        if !wants_gzip || res.headers().contains_key(header::CONTENT_ENCODING) {
            return Ok(res);
        }

        let (mut parts, body) = res.into_parts();
        let bytes = body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
        parts.headers.append(header::VARY, HeaderValue::from_static("Accept-Encoding"));

        if bytes.is_empty() || bytes.len() < self.min_length {
            return Ok(hyper::Response::from_parts(parts, Full::new(bytes)));
        }

        let compressed = self.compress(&bytes)?;
        parts.headers.remove(header::CONTENT_LENGTH);
        parts
            .headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        Ok(hyper::Response::from_parts(parts, Full::new(Bytes::from(compressed))))
    }
}
