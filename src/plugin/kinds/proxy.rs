use std::sync::atomic::{AtomicUsize, Ordering};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::header::{self, HeaderName, HeaderValue};
use hyper::Uri;
use hyper_util::client::legacy;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, info, instrument};
use crate::plugin::error::{DecodeError, PluginError};
use crate::plugin::record::RawPlugin;
use crate::plugin::{Base, Body, Context, Handler, Plugin, Request, Response};

const BALANCE_ROUND_ROBIN: &str = "round-robin";

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// 업스트림 요청용 HTTP 클라이언트
///
/// 연결 풀을 공유하도록 레지스트리의 공유 의존성으로 한 번만 만들어집니다.
#[derive(Clone)]
pub struct ProxyClient {
    client: legacy::Client<HttpConnector, Body>,
}

impl ProxyClient {
    pub fn new() -> Self {
        let connector = HttpConnector::new();
        let client = legacy::Client::builder(TokioExecutor::new()).build::<_, Body>(connector);
        Self { client }
    }

    /// 요청을 보내고 응답 본문을 모두 읽어 돌려줍니다.
    pub async fn send(&self, req: Request) -> Result<Response, PluginError> {
        let res = self
            .client
            .request(req)
            .await
            .map_err(|e| PluginError::Upstream(format!("Backend request failed: {}", e)))?;

        let (parts, body) = res.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| PluginError::Upstream(format!("Failed to collect response body: {}", e)))?
            .to_bytes();
        debug!(bytes_size = bytes.len(), "Response body collected");
        Ok(hyper::Response::from_parts(parts, Full::new(bytes)))
    }
}

impl Default for ProxyClient {
    fn default() -> Self {
        Self::new()
    }
}

/// 업스트림 대상
#[derive(Debug, Clone)]
pub struct Target {
    pub name: Option<String>,
    pub url: Uri,
}

impl Target {
    fn parse(index: usize, record: &RawPlugin) -> Result<Self, DecodeError> {
        let field = format!("targets[{}].url", index);
        let url = record
            .get_str("url")?
            .ok_or_else(|| DecodeError::invalid(&field, "url이 필요함"))?;
        let url: Uri = url.parse().map_err(|e| DecodeError::invalid(&field, e))?;

        // TLS 커넥터가 없으므로 업스트림은 http만 지원
        if url.scheme_str() != Some("http") || url.authority().is_none() {
            return Err(DecodeError::invalid(&field, "http://host[:port] 형식이어야 함"));
        }

        Ok(Self {
            name: record.get_str("name")?,
            url,
        })
    }

    /// 대상 주소에 요청 URI를 붙인 업스트림 URI
    fn upstream_uri(&self, request_uri: &str) -> Result<Uri, hyper::http::Error> {
        let prefix = self.url.path().trim_end_matches('/');
        let authority = self.url.authority().map(|a| a.as_str()).unwrap_or_default();
        Ok(Uri::builder()
            .scheme("http")
            .authority(authority)
            .path_and_query(format!("{}{}", prefix, request_uri))
            .build()?)
    }
}

/// 리버스 프록시
pub struct Proxy {
    base: Base,
    client: ProxyClient,
    targets: Vec<Target>,
    balance: String,
    next_target: AtomicUsize,
}

impl Proxy {
    pub fn new(base: Base, client: ProxyClient) -> Self {
        Self {
            base,
            client,
            targets: Vec::new(),
            balance: BALANCE_ROUND_ROBIN.to_string(),
            next_target: AtomicUsize::new(0),
        }
    }

    /// 라운드 로빈으로 다음 대상을 고릅니다.
    pub fn next_target(&self) -> Option<&Target> {
        if self.targets.is_empty() {
            return None;
        }
        let i = self.next_target.fetch_add(1, Ordering::Relaxed) % self.targets.len();
        self.targets.get(i)
    }

    fn build_proxied_request(&self, target: &Target, ctx: Context) -> Result<Request, hyper::http::Error> {
        let uri = target.upstream_uri(ctx.request_uri())?;
        let scheme = ctx.scheme();
        let remote_ip = ctx.remote_addr().map(|a| a.ip().to_string());
        let host = ctx.header(header::HOST.as_str()).map(String::from);

        let mut req = ctx.into_request();
        *req.uri_mut() = uri;

        let headers = req.headers_mut();
        headers.remove(header::CONNECTION);
        if let Some(ip) = remote_ip {
            let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) => format!("{}, {}", prior, ip),
                None => ip.clone(),
            };
            headers.insert(X_FORWARDED_FOR.clone(), HeaderValue::from_str(&forwarded_for)?);
            if !headers.contains_key(&X_REAL_IP) {
                headers.insert(X_REAL_IP.clone(), HeaderValue::from_str(&ip)?);
            }
        }
        if let Some(host) = host {
            headers.insert(X_FORWARDED_HOST.clone(), HeaderValue::from_str(&host)?);
        }
        if !headers.contains_key(&X_FORWARDED_PROTO) {
            headers.insert(X_FORWARDED_PROTO.clone(), HeaderValue::from_static(scheme.as_str()));
        }
        Ok(req)
    }
}

#[async_trait]
impl Plugin for Proxy {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn configure(&mut self, record: &RawPlugin) -> Result<(), DecodeError> {
        if let Some(targets) = record.get_records("targets")? {
            self.targets = targets
                .iter()
                .enumerate()
                .map(|(i, t)| Target::parse(i, t))
                .collect::<Result<_, _>>()?;
        }
        if let Some(balance) = record.get_str("balance")? {
            self.balance = balance;
        }
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), PluginError> {
        if self.targets.is_empty() {
            return Err(PluginError::initialize(self.base.name(), "targets가 비어 있음"));
        }
        if self.balance != BALANCE_ROUND_ROBIN {
            return Err(PluginError::initialize(
                self.base.name(),
                format!("지원하지 않는 balance: {}", self.balance),
            ));
        }
        Ok(())
    }

    #[instrument(skip(self, ctx, _next), fields(request_id = %ctx.request_id()))]
    async fn process(&self, ctx: Context, _next: &dyn Handler) -> Result<Response, PluginError> {
        let target = self
            .next_target()
            .ok_or_else(|| PluginError::Upstream("사용 가능한 대상 없음".into()))?;

        info!(backend = %target.url, "Proxying request to backend");
        let req = self.build_proxied_request(target, ctx)?;
        self.client.send(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::plugin::kinds::testing::request;

    fn proxy(targets: serde_json::Value) -> Proxy {
        let mut plugin = Proxy::new(Base::new("proxy", 0), ProxyClient::new());
        plugin.configure(&RawPlugin::new().with("targets", targets)).unwrap();
        plugin.initialize().unwrap();
        plugin
    }

    #[tokio::test]
    async fn test_round_robin() {
        let plugin = proxy(json!([
            {"name": "a", "url": "http://127.0.0.1:9001"},
            {"name": "b", "url": "http://127.0.0.1:9002"},
        ]));
        let names: Vec<_> = (0..4)
            .map(|_| plugin.next_target().unwrap().name.clone().unwrap())
            .collect();
        assert_eq!(names, ["a", "b", "a", "b"]);
    }

    #[tokio::test]
    async fn test_forwarded_headers() {
        let plugin = proxy(json!([{"url": "http://127.0.0.1:9001/base/"}]));
        let ctx = request("GET", "/x?y=1", &[("host", "site.com")])
            .with_remote_addr("10.0.0.5:5000".parse().unwrap());

        let target = plugin.next_target().unwrap().clone();
        let req = plugin.build_proxied_request(&target, ctx).unwrap();
        assert_eq!(req.uri(), "http://127.0.0.1:9001/base/x?y=1");
        assert_eq!(req.headers()["x-forwarded-for"], "10.0.0.5");
        assert_eq!(req.headers()["x-forwarded-host"], "site.com");
        assert_eq!(req.headers()["x-forwarded-proto"], "http");
    }

    #[test]
    fn test_rejects_bad_targets() {
        let mut plugin = Proxy::new(Base::new("proxy", 0), ProxyClient::new());
        let err = plugin
            .configure(&RawPlugin::new().with("targets", json!([{"url": "ftp://x"}])))
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidValue { .. }));

        let mut plugin = Proxy::new(Base::new("proxy", 0), ProxyClient::new());
        assert!(plugin.initialize().is_err());
    }
}
