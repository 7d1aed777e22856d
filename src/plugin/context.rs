use std::collections::HashMap;
use std::net::SocketAddr;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::http::request::Parts;
use hyper::{Method, StatusCode, Uri};
use uuid::Uuid;

pub type Body = Full<Bytes>;
pub type Request = hyper::Request<Body>;
pub type Response = hyper::Response<Body>;

/// 요청 스킴
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// 요청 컨텍스트
///
/// 요청 헤더와 이미 수집된 본문, 그리고 라우팅 과정에서 채워지는 경로 파라미터를
/// 담습니다. 플러그인 인스턴스는 모든 요청이 공유하므로 요청별 상태는 반드시
/// 여기에 저장해야 합니다.
#[derive(Debug)]
pub struct Context {
    parts: Parts,
    body: Bytes,
    scheme: Scheme,
    remote_addr: Option<SocketAddr>,
    params: HashMap<String, String>,
    request_id: String,
}

impl Context {
    pub fn new(request: hyper::Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            parts,
            body,
            scheme: Scheme::Http,
            remote_addr: None,
            params: HashMap::new(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Https
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// 경로와 쿼리를 포함한 요청 URI
    pub fn request_uri(&self) -> &str {
        self.parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.parts.uri.path())
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    /// 포트를 제외한 호스트 이름
    pub fn host(&self) -> &str {
        let raw = self
            .parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.parts.uri.host())
            .unwrap_or_default();
        strip_port(raw)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), value.into());
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// urlencoded 본문을 먼저 보고, 없으면 쿼리 문자열에서 찾습니다.
    pub fn form_value(&self, name: &str) -> Option<String> {
        let is_form = self
            .header(header::CONTENT_TYPE.as_str())
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);

        if is_form {
            let found = url::form_urlencoded::parse(&self.body)
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned());
            if found.is_some() {
                return found;
            }
        }
        self.query_param(name)
    }

    /// 요청 URI를 교체합니다. 경로만 주어지면 기존 쿼리는 유지됩니다.
    pub fn set_request_uri(&mut self, path_and_query: &str) -> Result<(), hyper::http::Error> {
        let target = if path_and_query.contains('?') {
            path_and_query.to_string()
        } else {
            match self.query() {
                Some(q) => format!("{}?{}", path_and_query, q),
                None => path_and_query.to_string(),
            }
        };

        let mut builder = Uri::builder();
        if let Some(scheme) = self.parts.uri.scheme() {
            builder = builder.scheme(scheme.clone());
        }
        if let Some(authority) = self.parts.uri.authority() {
            builder = builder.authority(authority.clone());
        }
        self.parts.uri = builder.path_and_query(target.as_str()).build()?;
        Ok(())
    }

    pub fn into_parts(self) -> (Parts, Bytes) {
        (self.parts, self.body)
    }

    /// hyper 요청으로 변환합니다.
    pub fn into_request(self) -> Request {
        hyper::Request::from_parts(self.parts, Full::new(self.body))
    }
}

pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 리터럴
        return host.split(']').next().map(|h| &host[..h.len() + 1]).unwrap_or(host);
    }
    host.rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
        .map(|(h, _)| h)
        .unwrap_or(host)
}

/// 텍스트 응답 생성
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response {
    let mut res = hyper::Response::new(Full::new(body.into()));
    *res.status_mut() = status;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    res
}

/// 리다이렉트 응답 생성
pub fn redirect_response(status: StatusCode, location: &str) -> Result<Response, hyper::http::Error> {
    hyper::Response::builder()
        .status(status)
        .header(header::LOCATION, location)
        .body(Full::new(Bytes::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(uri: &str) -> Context {
        Context::new(
            hyper::Request::builder()
                .uri(uri)
                .header(header::HOST, "example.com:8080")
                .body(Bytes::new())
                .unwrap(),
        )
    }

    #[test]
    fn test_host_strips_port() {
        let ctx = context("/a");
        assert_eq!(ctx.host(), "example.com");
        assert_eq!(strip_port("[::1]:443"), "[::1]");
        assert_eq!(strip_port("localhost"), "localhost");
    }

    #[test]
    fn test_query_param() {
        let ctx = context("/search?q=rust%20lang&page=2");
        assert_eq!(ctx.query_param("q").as_deref(), Some("rust lang"));
        assert_eq!(ctx.query_param("page").as_deref(), Some("2"));
        assert_eq!(ctx.query_param("missing"), None);
        assert_eq!(ctx.request_uri(), "/search?q=rust%20lang&page=2");
    }

    #[test]
    fn test_form_value_prefers_body() {
        let ctx = Context::new(
            hyper::Request::builder()
                .method("POST")
                .uri("/submit?user=query")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Bytes::from_static(b"user=body&x=1"))
                .unwrap(),
        );
        assert_eq!(ctx.form_value("user").as_deref(), Some("body"));
        assert_eq!(ctx.form_value("x").as_deref(), Some("1"));
    }

    #[test]
    fn test_set_request_uri_keeps_query() {
        let mut ctx = context("/old?a=1");
        ctx.set_request_uri("/new").unwrap();
        assert_eq!(ctx.request_uri(), "/new?a=1");
        ctx.set_request_uri("/other?b=2").unwrap();
        assert_eq!(ctx.request_uri(), "/other?b=2");
    }
}
