//! 내장 플러그인 종류

pub mod body_limit;
pub mod cors;
pub mod file;
pub mod gzip;
pub mod header;
pub mod logger;
pub mod proxy;
pub mod redirect;
pub mod rewrite;
pub mod secure;

use hyper::header::{HeaderName, HeaderValue};
use super::error::DecodeError;

/// 설정 문자열을 헤더 이름/값으로 변환합니다.
pub(crate) fn parse_header(field: &str, name: &str, value: &str) -> Result<(HeaderName, HeaderValue), DecodeError> {
    let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| DecodeError::invalid(field, e))?;
    let value = HeaderValue::from_str(value).map_err(|e| DecodeError::invalid(field, e))?;
    Ok((name, value))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use bytes::Bytes;
    use http_body_util::Full;
    use crate::plugin::{handler_fn, Context, Handler};

    pub fn request(method: &str, uri: &str, headers: &[(&str, &str)]) -> Context {
        let mut builder = hyper::Request::builder().method(method).uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        Context::new(builder.body(Bytes::new()).unwrap())
    }

    /// 요청 경로를 본문으로 돌려주는 최종 핸들러
    pub fn echo() -> Arc<dyn Handler> {
        handler_fn(|ctx: Context| async move {
            Ok(hyper::Response::new(Full::new(Bytes::from(ctx.request_uri().to_string()))))
        })
    }

    pub async fn body_of(res: crate::plugin::Response) -> Bytes {
        use http_body_util::BodyExt;
        res.into_body().collect().await.unwrap().to_bytes()
    }
}
