use async_trait::async_trait;
use hyper::{header, StatusCode};
use tracing::debug;
use crate::plugin::context::redirect_response;
use crate::plugin::error::{DecodeError, PluginError};
use crate::plugin::record::RawPlugin;
use crate::plugin::template::Template;
use crate::plugin::{Base, Context, Handler, Plugin, Response};

const WWW: &str = "www.";

/// 스킴/호스트 정규화 리다이렉트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `http://a` → `https://a`
    Https,
    /// `http://a` → `https://www.a` (www가 없을 때만)
    HttpsWww,
    /// `http://www.a` → `https://a`
    HttpsNonWww,
    /// `a` → `www.a`, 스킴 유지
    Www,
    /// `www.a` → `a`, 스킴 유지
    NonWww,
}

impl RedirectKind {
    /// 리다이렉트가 필요하면 대상 URL을 돌려줍니다.
    pub fn target(&self, scheme: &str, host: &str, uri: &str) -> Option<String> {
        let https = scheme == "https";
        let www = host.starts_with(WWW);
        match self {
            RedirectKind::Https if !https => Some(format!("https://{}{}", host, uri)),
            RedirectKind::HttpsWww if !https && !www => Some(format!("https://www.{}{}", host, uri)),
            RedirectKind::HttpsNonWww if !https => {
                Some(format!("https://{}{}", host.trim_start_matches(WWW), uri))
            }
            RedirectKind::Www if !www => Some(format!("{}://www.{}{}", scheme, host, uri)),
            RedirectKind::NonWww if www => Some(format!("{}://{}{}", scheme, &host[WWW.len()..], uri)),
            _ => None,
        }
    }
}

fn parse_code(field: &str, record: &RawPlugin) -> Result<Option<StatusCode>, DecodeError> {
    match record.get_int(field)? {
        None => Ok(None),
        Some(code) => {
            let status = u16::try_from(code)
                .ok()
                .and_then(|c| StatusCode::from_u16(c).ok())
                .filter(StatusCode::is_redirection)
                .ok_or_else(|| DecodeError::invalid(field, format!("리다이렉트 코드가 아님: {}", code)))?;
            Ok(Some(status))
        }
    }
}

/// 포트를 포함한 원래 호스트
fn raw_host(ctx: &Context) -> &str {
    ctx.header(header::HOST.as_str())
        .or_else(|| ctx.uri().authority().map(|a| a.as_str()))
        .unwrap_or_default()
}

/// `to` 템플릿으로 리다이렉트하거나, 정규화 종류에 따라 스킴/호스트를 바꿉니다.
pub struct Redirect {
    base: Base,
    kind: Option<RedirectKind>,
    to: Option<Template>,
    code: StatusCode,
}

impl Redirect {
    pub fn new(base: Base) -> Self {
        Self {
            base,
            kind: None,
            to: None,
            code: StatusCode::MOVED_PERMANENTLY,
        }
    }

    pub fn canonical(base: Base, kind: RedirectKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::new(base)
        }
    }

    fn location(&self, ctx: &Context) -> Option<String> {
        match (self.kind, &self.to) {
            (Some(kind), _) => kind.target(ctx.scheme().as_str(), raw_host(ctx), ctx.request_uri()),
            (None, Some(to)) => Some(to.render(ctx)).filter(|l| !l.is_empty()),
            (None, None) => None,
        }
    }
}

#[async_trait]
impl Plugin for Redirect {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn configure(&mut self, record: &RawPlugin) -> Result<(), DecodeError> {
        if self.kind.is_none() {
            if let Some(to) = record.get_str("to")? {
                self.to = Some(Template::new(&to)?);
            }
        }
        if let Some(code) = parse_code("code", record)? {
            self.code = code;
        }
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), PluginError> {
        if self.kind.is_none() && self.to.is_none() {
            return Err(PluginError::initialize(self.base.name(), "to 필드가 필요함"));
        }
        Ok(())
    }

    async fn process(&self, ctx: Context, next: &dyn Handler) -> Result<Response, PluginError> {
        match self.location(&ctx) {
            Some(location) => {
                debug!(plugin = %self.base.name(), location = %location, "리다이렉트");
                Ok(redirect_response(self.code, &location)?)
            }
            None => next.call(ctx).await,
        }
    }
}

/// 경로 끝의 `/`를 추가하거나 제거합니다.
///
/// `redirect_code`가 있으면 리다이렉트하고, 없으면 요청 경로를 바꾼 뒤 계속 진행합니다.
pub struct TrailingSlash {
    base: Base,
    add: bool,
    redirect_code: Option<StatusCode>,
}

impl TrailingSlash {
    pub fn add(base: Base) -> Self {
        Self {
            base,
            add: true,
            redirect_code: None,
        }
    }

    pub fn remove(base: Base) -> Self {
        Self {
            base,
            add: false,
            redirect_code: None,
        }
    }

    fn new_path(&self, path: &str) -> Option<String> {
        if self.add {
            (!path.ends_with('/')).then(|| format!("{}/", path))
        } else {
            (path.len() > 1 && path.ends_with('/')).then(|| path.trim_end_matches('/').to_string())
                .map(|p| if p.is_empty() { "/".to_string() } else { p })
        }
    }
}

#[async_trait]
impl Plugin for TrailingSlash {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn configure(&mut self, record: &RawPlugin) -> Result<(), DecodeError> {
        if let Some(code) = parse_code("redirect_code", record)? {
            self.redirect_code = Some(code);
        }
        Ok(())
    }

    async fn process(&self, mut ctx: Context, next: &dyn Handler) -> Result<Response, PluginError> {
        let Some(path) = self.new_path(ctx.path()) else {
            return next.call(ctx).await;
        };

        let uri = match ctx.query() {
            Some(q) => format!("{}?{}", path, q),
            None => path,
        };

        if let Some(code) = self.redirect_code {
            return Ok(redirect_response(code, &uri)?);
        }
        ctx.set_request_uri(&uri)?;
        next.call(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::kinds::testing::{body_of, echo, request};

    #[test]
    fn test_canonical_targets() {
        use RedirectKind::*;
        assert_eq!(Https.target("http", "a.com", "/x"), Some("https://a.com/x".into()));
        assert_eq!(Https.target("https", "a.com", "/x"), None);
        assert_eq!(HttpsWww.target("http", "a.com", "/"), Some("https://www.a.com/".into()));
        assert_eq!(HttpsWww.target("http", "www.a.com", "/"), None);
        assert_eq!(HttpsNonWww.target("http", "www.a.com", "/"), Some("https://a.com/".into()));
        assert_eq!(Www.target("https", "a.com", "/"), Some("https://www.a.com/".into()));
        assert_eq!(NonWww.target("http", "www.a.com", "/q"), Some("http://a.com/q".into()));
        assert_eq!(NonWww.target("http", "a.com", "/q"), None);
    }

    #[tokio::test]
    async fn test_redirect_template() {
        let mut plugin = Redirect::new(Base::new("redirect", 0));
        plugin
            .configure(&RawPlugin::new().with("to", "https://new.example${uri}").with("code", 302))
            .unwrap();
        plugin.initialize().unwrap();

        let res = plugin
            .process(request("GET", "/a?b=1", &[]), echo().as_ref())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers()[header::LOCATION], "https://new.example/a?b=1");
    }

    #[test]
    fn test_rejects_non_redirect_code() {
        let mut plugin = Redirect::new(Base::new("redirect", 0));
        let err = plugin
            .configure(&RawPlugin::new().with("to", "/x").with("code", 200))
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_trailing_slash_rewrites_in_place() {
        let plugin = TrailingSlash::add(Base::new("add-trailing-slash", 0));
        let res = plugin
            .process(request("GET", "/docs?x=1", &[]), echo().as_ref())
            .await
            .unwrap();
        assert_eq!(body_of(res).await, "/docs/?x=1");

        let plugin = TrailingSlash::remove(Base::new("remove-trailing-slash", 0));
        let res = plugin
            .process(request("GET", "/docs/", &[]), echo().as_ref())
            .await
            .unwrap();
        assert_eq!(body_of(res).await, "/docs");

        let res = plugin.process(request("GET", "/", &[]), echo().as_ref()).await.unwrap();
        assert_eq!(body_of(res).await, "/");
    }

    #[tokio::test]
    async fn test_trailing_slash_redirect() {
        let mut plugin = TrailingSlash::add(Base::new("add-trailing-slash", 0));
        plugin.configure(&RawPlugin::new().with("redirect_code", 308)).unwrap();
        let res = plugin
            .process(request("GET", "/docs", &[]), echo().as_ref())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(res.headers()[header::LOCATION], "/docs/");
    }
}
