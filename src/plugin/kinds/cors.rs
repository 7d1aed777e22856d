use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Method, StatusCode};
use tracing::debug;
use crate::plugin::error::{DecodeError, PluginError};
use crate::plugin::record::RawPlugin;
use crate::plugin::{Base, Context, Handler, Plugin, Response};

fn default_methods() -> Vec<String> {
    ["GET", "HEAD", "PUT", "PATCH", "POST", "DELETE"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// CORS 플러그인
pub struct Cors {
    base: Base,
    /// 허용할 Origin 목록
    allow_origins: Vec<String>,
    /// 허용할 HTTP 메서드 목록
    allow_methods: Vec<String>,
    /// 허용할 헤더 목록. 비어 있으면 요청한 헤더를 그대로 허용
    allow_headers: Vec<String>,
    /// 노출할 헤더 목록
    expose_headers: Vec<String>,
    /// preflight 요청 캐시 시간 (초)
    max_age: i64,
    /// credentials 허용 여부
    allow_credentials: bool,
}

impl Cors {
    pub fn new(base: Base) -> Self {
        Self {
            base,
            allow_origins: vec!["*".to_string()],
            allow_methods: default_methods(),
            allow_headers: Vec::new(),
            expose_headers: Vec::new(),
            max_age: 0,
            allow_credentials: false,
        }
    }

    /// 응답에 넣을 Allow-Origin 값. 허용되지 않은 Origin이면 `None`
    fn allowed_origin(&self, origin: &str) -> Option<String> {
        self.allow_origins.iter().find_map(|allowed| {
            if allowed == "*" {
                // credentials와 함께 쓰면 와일드카드 대신 요청 Origin을 돌려줌
                Some(if self.allow_credentials { origin.to_string() } else { "*".to_string() })
            } else if allowed.eq_ignore_ascii_case(origin) {
                Some(origin.to_string())
            } else {
                None
            }
        })
    }

    /// 공통 CORS 헤더 설정
    fn set_cors_headers(&self, headers: &mut HeaderMap, allow_origin: &str) -> Result<(), hyper::http::Error> {
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_str(allow_origin)?);

        if self.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        Ok(())
    }

    /// Preflight 요청 처리
    fn preflight(&self, ctx: &Context) -> Result<Response, hyper::http::Error> {
        let mut res = hyper::Response::new(Full::new(Bytes::new()));
        *res.status_mut() = StatusCode::NO_CONTENT;

        let origin = ctx.header(header::ORIGIN.as_str()).unwrap_or_default();
        let Some(allow_origin) = self.allowed_origin(origin) else {
            debug!(origin = %origin, "허용되지 않은 preflight Origin");
            return Ok(res);
        };

        let headers = res.headers_mut();
        self.set_cors_headers(headers, &allow_origin)?;
        headers.append(header::VARY, HeaderValue::from_static("Access-Control-Request-Method"));
        headers.append(header::VARY, HeaderValue::from_static("Access-Control-Request-Headers"));
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_str(&self.allow_methods.join(","))?,
        );

        if !self.allow_headers.is_empty() {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_str(&self.allow_headers.join(","))?,
            );
        } else if let Some(requested) = ctx.header(header::ACCESS_CONTROL_REQUEST_HEADERS.as_str()) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_str(requested)?);
        }

        if self.max_age > 0 {
            headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(self.max_age));
        }
        Ok(res)
    }
}

#[async_trait]
impl Plugin for Cors {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn configure(&mut self, record: &RawPlugin) -> Result<(), DecodeError> {
        if let Some(v) = record.get_str_list("allow_origins")? {
            self.allow_origins = v;
        }
        if let Some(v) = record.get_str_list("allow_methods")? {
            self.allow_methods = v;
        }
        if let Some(v) = record.get_str_list("allow_headers")? {
            self.allow_headers = v;
        }
        if let Some(v) = record.get_str_list("expose_headers")? {
            self.expose_headers = v;
        }
        if let Some(v) = record.get_int("max_age")? {
            self.max_age = v;
        }
        if let Some(v) = record.get_bool("allow_credentials")? {
            self.allow_credentials = v;
        }
        Ok(())
    }

    async fn process(&self, ctx: Context, next: &dyn Handler) -> Result<Response, PluginError> {
        if ctx.method() == Method::OPTIONS && ctx.headers().contains_key(header::ORIGIN) {
            debug!("CORS preflight 요청 처리");
            return Ok(self.preflight(&ctx)?);
        }

        let allow_origin = ctx
            .header(header::ORIGIN.as_str())
            .and_then(|origin| self.allowed_origin(origin));

        let mut res = next.call(ctx).await?;
        if let Some(allow_origin) = allow_origin {
            let headers = res.headers_mut();
            self.set_cors_headers(headers, &allow_origin)?;
            if !self.expose_headers.is_empty() {
                headers.insert(
                    header::ACCESS_CONTROL_EXPOSE_HEADERS,
                    HeaderValue::from_str(&self.expose_headers.join(",")).map_err(hyper::http::Error::from)?,
                );
            }
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::kinds::testing::{echo, request};

    fn cors(record: RawPlugin) -> Cors {
        let mut plugin = Cors::new(Base::new("cors", 0));
        plugin.configure(&record).unwrap();
        plugin
    }

    #[tokio::test]
    async fn test_preflight() {
        let plugin = cors(
            RawPlugin::new()
                .with("allow_origins", "https://a.com")
                .with("max_age", 600),
        );
        let ctx = request(
            "OPTIONS",
            "/",
            &[("origin", "https://a.com"), ("access-control-request-headers", "X-Token")],
        );
        let res = plugin.process(ctx, echo().as_ref()).await.unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://a.com");
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS], "X-Token");
        assert_eq!(res.headers()[header::ACCESS_CONTROL_MAX_AGE], "600");
    }

    #[tokio::test]
    async fn test_simple_request() {
        let plugin = cors(RawPlugin::new().with("expose_headers", "X-Total"));
        let ctx = request("GET", "/", &[("origin", "https://b.com")]);
        let res = plugin.process(ctx, echo().as_ref()).await.unwrap();
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(res.headers()[header::ACCESS_CONTROL_EXPOSE_HEADERS], "X-Total");
    }

    #[tokio::test]
    async fn test_invalid_expose_header_is_error() {
        let plugin = cors(RawPlugin::new().with("expose_headers", "X-Total\nX-Bad"));
        let ctx = request("GET", "/", &[("origin", "https://b.com")]);
        let err = plugin.process(ctx, echo().as_ref()).await.unwrap_err();
        assert!(matches!(err, PluginError::Http(_)));
    }

    #[tokio::test]
    async fn test_disallowed_origin_gets_no_headers() {
        let plugin = cors(RawPlugin::new().with("allow_origins", serde_json::json!(["https://a.com"])));
        let ctx = request("GET", "/", &[("origin", "https://evil.com")]);
        let res = plugin.process(ctx, echo().as_ref()).await.unwrap();
        assert!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }
}
