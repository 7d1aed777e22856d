use async_trait::async_trait;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use crate::plugin::error::{DecodeError, PluginError};
use crate::plugin::record::RawPlugin;
use crate::plugin::{Base, Context, Handler, Plugin, Response};

/// 보안 관련 응답 헤더
///
/// 빈 문자열로 설정한 항목은 헤더를 붙이지 않습니다. HSTS는 TLS 요청에서
/// `hsts_max_age`가 0보다 클 때만 붙습니다.
pub struct Secure {
    base: Base,
    xss_protection: String,
    content_type_nosniff: String,
    x_frame_options: String,
    hsts_max_age: i64,
    hsts_exclude_subdomains: bool,
    hsts_preload: bool,
    content_security_policy: String,
    csp_report_only: bool,
    referrer_policy: String,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl Secure {
    pub fn new(base: Base) -> Self {
        Self {
            base,
            xss_protection: "1; mode=block".to_string(),
            content_type_nosniff: "nosniff".to_string(),
            x_frame_options: "SAMEORIGIN".to_string(),
            hsts_max_age: 0,
            hsts_exclude_subdomains: false,
            hsts_preload: false,
            content_security_policy: String::new(),
            csp_report_only: false,
            referrer_policy: String::new(),
            headers: Vec::new(),
        }
    }

    fn hsts_value(&self) -> Option<String> {
        if self.hsts_max_age <= 0 {
            return None;
        }
        let mut value = format!("max-age={}", self.hsts_max_age);
        if !self.hsts_exclude_subdomains {
            value.push_str("; includeSubdomains");
        }
        if self.hsts_preload {
            value.push_str("; preload");
        }
        Some(value)
    }

    fn apply(&self, headers: &mut HeaderMap, tls: bool) -> Result<(), PluginError> {
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        if tls {
            if let Some(hsts) = self.hsts_value() {
                headers.insert(header::STRICT_TRANSPORT_SECURITY, HeaderValue::from_str(&hsts).map_err(hyper::http::Error::from)?);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for Secure {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn configure(&mut self, record: &RawPlugin) -> Result<(), DecodeError> {
        if let Some(v) = record.get_str("xss_protection")? {
            self.xss_protection = v;
        }
        if let Some(v) = record.get_str("content_type_nosniff")? {
            self.content_type_nosniff = v;
        }
        if let Some(v) = record.get_str("x_frame_options")? {
            self.x_frame_options = v;
        }
        if let Some(v) = record.get_int("hsts_max_age")? {
            self.hsts_max_age = v;
        }
        if let Some(v) = record.get_bool("hsts_exclude_subdomains")? {
            self.hsts_exclude_subdomains = v;
        }
        if let Some(v) = record.get_bool("hsts_preload")? {
            self.hsts_preload = v;
        }
        if let Some(v) = record.get_str("content_security_policy")? {
            self.content_security_policy = v;
        }
        if let Some(v) = record.get_bool("csp_report_only")? {
            self.csp_report_only = v;
        }
        if let Some(v) = record.get_str("referrer_policy")? {
            self.referrer_policy = v;
        }
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), PluginError> {
        let csp = if self.csp_report_only {
            header::CONTENT_SECURITY_POLICY_REPORT_ONLY
        } else {
            header::CONTENT_SECURITY_POLICY
        };
        let candidates = [
            (header::X_XSS_PROTECTION, &self.xss_protection),
            (header::X_CONTENT_TYPE_OPTIONS, &self.content_type_nosniff),
            (header::X_FRAME_OPTIONS, &self.x_frame_options),
            (csp, &self.content_security_policy),
            (header::REFERRER_POLICY, &self.referrer_policy),
        ];

        let mut headers = Vec::new();
        for (name, value) in candidates {
            if value.is_empty() {
                continue;
            }
            let value = HeaderValue::from_str(value)
                .map_err(|e| PluginError::initialize(self.base.name(), format!("{}: {}", name, e)))?;
            headers.push((name, value));
        }
        self.headers = headers;
        Ok(())
    }

    async fn process(&self, ctx: Context, next: &dyn Handler) -> Result<Response, PluginError> {
        let tls = ctx.is_tls()
            || ctx
                .header("x-forwarded-proto")
                .map_or(false, |p| p.eq_ignore_ascii_case("https"));

        let mut res = next.call(ctx).await?;
        self.apply(res.headers_mut(), tls)?;
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::kinds::testing::{echo, request};
    use crate::plugin::Scheme;

    #[tokio::test]
    async fn test_default_headers() {
        let mut plugin = Secure::new(Base::new("secure", 0));
        plugin.initialize().unwrap();

        let res = plugin.process(request("GET", "/", &[]), echo().as_ref()).await.unwrap();
        assert_eq!(res.headers()[header::X_XSS_PROTECTION], "1; mode=block");
        assert_eq!(res.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(res.headers()[header::X_FRAME_OPTIONS], "SAMEORIGIN");
        assert!(res.headers().get(header::STRICT_TRANSPORT_SECURITY).is_none());
    }

    #[tokio::test]
    async fn test_hsts_only_over_tls() {
        let mut plugin = Secure::new(Base::new("secure", 0));
        plugin
            .configure(&RawPlugin::new().with("hsts_max_age", 3600).with("x_frame_options", ""))
            .unwrap();
        plugin.initialize().unwrap();

        let ctx = request("GET", "/", &[]).with_scheme(Scheme::Https);
        let res = plugin.process(ctx, echo().as_ref()).await.unwrap();
        assert_eq!(
            res.headers()[header::STRICT_TRANSPORT_SECURITY],
            "max-age=3600; includeSubdomains"
        );
        assert!(res.headers().get(header::X_FRAME_OPTIONS).is_none());
    }
}
