//! 요청 처리 플러그인
//!
//! 설정 레코드를 [`Registry`]로 디코딩하고, [`Pipeline`]이 `order` 순서대로
//! 최종 핸들러를 감쌉니다. 각 플러그인은 요청마다 평가되는 `skip` 표현식을
//! 가지며, 참이면 해당 플러그인을 건너뜁니다.

pub mod context;
pub mod error;
pub mod expr;
pub mod kinds;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod template;

use std::future::Future;
use std::sync::Arc;
use async_trait::async_trait;

pub use context::{Body, Context, Request, Response, Scheme};
pub use error::{DecodeError, ExpressionError, PipelineError, PluginError};
pub use expr::Value;
pub use pipeline::{Pipeline, Staged};
pub use record::RawPlugin;
pub use registry::{Registry, Shared};
pub use template::{Expression, Template};

// 플러그인 이름
pub const PLUGIN_BODY_LIMIT: &str = "body-limit";
pub const PLUGIN_LOGGER: &str = "logger";
pub const PLUGIN_REDIRECT: &str = "redirect";
pub const PLUGIN_HTTPS_REDIRECT: &str = "https-redirect";
pub const PLUGIN_HTTPS_WWW_REDIRECT: &str = "https-www-redirect";
pub const PLUGIN_HTTPS_NON_WWW_REDIRECT: &str = "https-non-www-redirect";
pub const PLUGIN_WWW_REDIRECT: &str = "www-redirect";
pub const PLUGIN_NON_WWW_REDIRECT: &str = "non-www-redirect";
pub const PLUGIN_ADD_TRAILING_SLASH: &str = "add-trailing-slash";
pub const PLUGIN_REMOVE_TRAILING_SLASH: &str = "remove-trailing-slash";
pub const PLUGIN_REWRITE: &str = "rewrite";
pub const PLUGIN_SECURE: &str = "secure";
pub const PLUGIN_CORS: &str = "cors";
pub const PLUGIN_GZIP: &str = "gzip";
pub const PLUGIN_HEADER: &str = "header";
pub const PLUGIN_PROXY: &str = "proxy";
pub const PLUGIN_STATIC: &str = "static";
pub const PLUGIN_FILE: &str = "file";

/// 요청 핸들러
///
/// 파이프라인의 각 단계와 최종 핸들러가 구현합니다. 여러 요청에서 동시에
/// 호출되므로 `&self`만 받습니다.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: Context) -> Result<Response, PluginError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, PluginError>> + Send,
{
    async fn call(&self, ctx: Context) -> Result<Response, PluginError> {
        (self.0)(ctx).await
    }
}

/// 클로저로 핸들러를 만듭니다.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, PluginError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// 모든 플러그인이 공유하는 식별 정보와 skip 조건
#[derive(Debug, Clone)]
pub struct Base {
    name: String,
    order: i64,
    skip: Expression,
}

impl Base {
    pub fn new(name: impl Into<String>, order: i64) -> Self {
        Self {
            name: name.into(),
            order,
            skip: Expression::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> i64 {
        self.order
    }

    pub fn skip(&self) -> &Expression {
        &self.skip
    }

    pub fn set_skip(&mut self, skip: Expression) {
        self.skip = skip;
    }

    /// 레코드에 `skip`이 있으면 교체합니다. 이름과 순서는 바뀌지 않습니다.
    pub fn configure(&mut self, record: &RawPlugin) -> Result<(), DecodeError> {
        if let Some(skip) = record.get_str("skip")? {
            self.skip = Expression::new(&skip)?;
        }
        Ok(())
    }
}

/// 플러그인 인터페이스
#[async_trait]
pub trait Plugin: Send + Sync {
    fn base(&self) -> &Base;

    fn base_mut(&mut self) -> &mut Base;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn order(&self) -> i64 {
        self.base().order()
    }

    /// 같은 스코프에 여러 번 등록할 수 있는지 여부
    fn repeatable(&self) -> bool {
        false
    }

    /// 레코드에 있는 필드만 덮어씁니다. 디코딩과 갱신 모두 이 경로를 탑니다.
    fn configure(&mut self, record: &RawPlugin) -> Result<(), DecodeError>;

    /// 파이프라인 구성 시 한 번 호출됩니다.
    fn initialize(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn process(&self, ctx: Context, next: &dyn Handler) -> Result<Response, PluginError>;
}
