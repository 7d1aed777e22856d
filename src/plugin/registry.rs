use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use super::error::DecodeError;
use super::kinds::{
    body_limit::BodyLimit,
    cors::Cors,
    file::{File, Static},
    gzip::Gzip,
    header::Header,
    logger::Logger,
    proxy::{Proxy, ProxyClient},
    redirect::{Redirect, RedirectKind, TrailingSlash},
    rewrite::Rewrite,
    secure::Secure,
};
use super::record::RawPlugin;
use super::{Base, Plugin};

/// 이름에 대응하는 플러그인 생성 함수
pub type Factory = Arc<dyn Fn(Base, &Shared) -> Box<dyn Plugin> + Send + Sync>;

/// 디코딩 시 플러그인에 전달되는 공유 의존성
#[derive(Clone, Default)]
pub struct Shared {
    pub client: ProxyClient,
}

/// 플러그인 이름 → 생성 함수 테이블
///
/// `Registry::default()`는 내장 플러그인이 모두 등록된 테이블을 돌려줍니다.
/// 임베딩 코드는 `register`로 종류를 추가하거나 교체할 수 있습니다.
#[derive(Clone)]
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl Registry {
    /// 아무것도 등록되지 않은 레지스트리
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(Base, &Shared) -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.factories.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// 기본 식별 정보가 채워진 새 플러그인 값을 만듭니다.
    pub fn lookup(&self, base: Base, shared: &Shared) -> Option<Box<dyn Plugin>> {
        self.factories.get(base.name()).map(|factory| factory(base, shared))
    }

    /// 레코드를 플러그인으로 디코딩합니다. 파이프라인에 등록하지는 않습니다.
    pub fn decode(&self, record: &RawPlugin, shared: &Shared) -> Result<Box<dyn Plugin>, DecodeError> {
        let name = record.name()?;
        let order = record.order()?;

        let mut plugin = self
            .lookup(Base::new(name, order), shared)
            .ok_or_else(|| DecodeError::UnknownPlugin {
                name: name.to_string(),
            })?;

        plugin.base_mut().configure(record)?;
        plugin.configure(record)?;

        debug!(plugin = %name, order = order, "플러그인 디코딩 완료");
        Ok(plugin)
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(super::PLUGIN_BODY_LIMIT, |base, _| Box::new(BodyLimit::new(base)))
            .register(super::PLUGIN_LOGGER, |base, _| Box::new(Logger::new(base)))
            .register(super::PLUGIN_REDIRECT, |base, _| Box::new(Redirect::new(base)))
            .register(super::PLUGIN_HTTPS_REDIRECT, |base, _| {
                Box::new(Redirect::canonical(base, RedirectKind::Https))
            })
            .register(super::PLUGIN_HTTPS_WWW_REDIRECT, |base, _| {
                Box::new(Redirect::canonical(base, RedirectKind::HttpsWww))
            })
            .register(super::PLUGIN_HTTPS_NON_WWW_REDIRECT, |base, _| {
                Box::new(Redirect::canonical(base, RedirectKind::HttpsNonWww))
            })
            .register(super::PLUGIN_WWW_REDIRECT, |base, _| {
                Box::new(Redirect::canonical(base, RedirectKind::Www))
            })
            .register(super::PLUGIN_NON_WWW_REDIRECT, |base, _| {
                Box::new(Redirect::canonical(base, RedirectKind::NonWww))
            })
            .register(super::PLUGIN_ADD_TRAILING_SLASH, |base, _| {
                Box::new(TrailingSlash::add(base))
            })
            .register(super::PLUGIN_REMOVE_TRAILING_SLASH, |base, _| {
                Box::new(TrailingSlash::remove(base))
            })
            .register(super::PLUGIN_REWRITE, |base, _| Box::new(Rewrite::new(base)))
            .register(super::PLUGIN_SECURE, |base, _| Box::new(Secure::new(base)))
            .register(super::PLUGIN_CORS, |base, _| Box::new(Cors::new(base)))
            .register(super::PLUGIN_GZIP, |base, _| Box::new(Gzip::new(base)))
            .register(super::PLUGIN_HEADER, |base, _| Box::new(Header::new(base)))
            .register(super::PLUGIN_PROXY, |base, shared| {
                Box::new(Proxy::new(base, shared.client.clone()))
            })
            .register(super::PLUGIN_STATIC, |base, _| Box::new(Static::new(base)))
            .register(super::PLUGIN_FILE, |base, _| Box::new(File::new(base)));
        registry
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("names", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> RawPlugin {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_default_registry_has_builtins() {
        let registry = Registry::default();
        for name in [
            "body-limit", "logger", "redirect", "https-redirect", "https-www-redirect",
            "https-non-www-redirect", "www-redirect", "non-www-redirect", "add-trailing-slash",
            "remove-trailing-slash", "rewrite", "secure", "cors", "gzip", "header", "proxy",
            "static", "file",
        ] {
            assert!(registry.contains(name), "{} 누락", name);
        }
    }

    #[test]
    fn test_decode_presets_identity() {
        let registry = Registry::default();
        let plugin = registry
            .decode(&record(json!({"name": "gzip", "order": 7, "level": 9})), &Shared::default())
            .unwrap();
        assert_eq!(plugin.name(), "gzip");
        assert_eq!(plugin.order(), 7);
        assert_eq!(plugin.base().skip().source(), "false");
    }

    #[test]
    fn test_isolated_registries() {
        let mut custom = Registry::empty();
        custom.register("secure", |base, _| Box::new(Secure::new(base)));

        let r = record(json!({"name": "gzip", "order": 1}));
        assert!(matches!(
            custom.decode(&r, &Shared::default()),
            Err(DecodeError::UnknownPlugin { .. })
        ));
        assert!(Registry::default().decode(&r, &Shared::default()).is_ok());
    }
}
