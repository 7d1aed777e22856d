//! HTTP/HTTPS 리스너와 라우팅 트리, 설정 재적재

pub mod error;
pub mod handler;
pub mod listener;
pub mod routes;

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use crate::plugin::{Registry, Shared};
use crate::settings::Settings;
use crate::tls::{CertificateBundle, CertificateProvisioner, CertificateStore, SniAcceptor};

pub use error::{error_response, Error};
pub use handler::{HandlerOptions, RequestHandler, SERVER_HEADER};
pub use listener::ServerListener;
pub use routes::{PathPattern, Routes, GLOBAL_SCOPE};

pub type Result<T> = std::result::Result<T, Error>;

/// 설정 재적재 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// 모든 플러그인을 제자리에서 갱신
    Updated,
    /// 라우팅 트리를 새로 만들어 교체
    Rebuilt,
}

/// 서버 전체 상태
///
/// 라우팅 트리와 인증서 저장소를 소유하며, 설정이 바뀌면 [`Server::reload`]로
/// 반영합니다.
pub struct Server {
    registry: Registry,
    shared: Shared,
    routes: Arc<RwLock<Arc<Routes>>>,
    store: Option<Arc<CertificateStore>>,
    settings: RwLock<Settings>,
}

impl Server {
    pub fn new(settings: Settings, provisioner: Option<Arc<dyn CertificateProvisioner>>) -> Result<Self> {
        Self::with_registry(settings, Registry::default(), provisioner)
    }

    /// 사용자 정의 플러그인이 등록된 레지스트리로 서버를 만듭니다.
    pub fn with_registry(
        settings: Settings,
        registry: Registry,
        provisioner: Option<Arc<dyn CertificateProvisioner>>,
    ) -> Result<Self> {
        let shared = Shared::default();
        let routes = Routes::build(&settings, &registry, &shared)?;

        let store = if settings.tls.enabled {
            let store = Arc::new(CertificateStore::new(settings.tls.store_options(), provisioner));
            store.replace_globals(global_bundles(&settings)?)?;
            store.load_hosts(&settings.host_tls_configs())?;
            Some(store)
        } else {
            None
        };

        Ok(Self {
            registry,
            shared,
            routes: Arc::new(RwLock::new(Arc::new(routes))),
            store,
            settings: RwLock::new(settings),
        })
    }

    pub fn store(&self) -> Option<&Arc<CertificateStore>> {
        self.store.as_ref()
    }

    pub async fn routes(&self) -> Arc<Routes> {
        self.routes.read().await.clone()
    }

    pub async fn handler(&self) -> Arc<RequestHandler> {
        let settings = self.settings.read().await;
        let options = HandlerOptions {
            read_timeout: settings.server.read_timeout(),
            write_timeout: settings.server.write_timeout(),
            max_body: settings.server.max_body(),
            pin_max_age: (settings.tls.enabled && settings.tls.key_pinning).then_some(settings.tls.pin_max_age),
        };
        Arc::new(RequestHandler::new(self.routes.clone(), self.store.clone(), options))
    }

    pub async fn bind(&self) -> Result<ServerListener> {
        let settings = self.settings.read().await;
        let https = self
            .store
            .as_ref()
            .map(|store| (settings.tls.port, SniAcceptor::new(store.clone())));
        ServerListener::bind(&settings.server.bind_address, settings.server.http_port, https).await
    }

    /// 새 설정을 반영합니다.
    ///
    /// 모든 스코프의 플러그인 구성이 같으면 각 플러그인을 제자리에서 갱신하고,
    /// 다르면 새 트리를 만들어 교체합니다. 어느 쪽이든 실패하면 기존 트리가 유지됩니다.
    /// 포트와 TLS 사용 여부 변경은 재시작해야 반영됩니다.
    pub async fn reload(&self, settings: Settings) -> Result<ReloadOutcome> {
        let current = self.routes().await;

        let outcome = if current.reconfigure(&settings).await? {
            ReloadOutcome::Updated
        } else {
            let routes = Routes::build(&settings, &self.registry, &self.shared)?;
            *self.routes.write().await = Arc::new(routes);
            ReloadOutcome::Rebuilt
        };

        let mut previous = self.settings.write().await;
        if let Some(store) = &self.store {
            let tls_changed = previous.tls.cert_file != settings.tls.cert_file
                || previous.tls.key_file != settings.tls.key_file;
            if tls_changed {
                store.replace_globals(global_bundles(&settings)?)?;
            }
            if tls_changed || previous.host_tls_configs() != settings.host_tls_configs() {
                store.load_hosts(&settings.host_tls_configs())?;
            }
        }
        if previous.tls.enabled != settings.tls.enabled
            || previous.tls.port != settings.tls.port
            || previous.server.http_port != settings.server.http_port
        {
            warn!("포트 또는 TLS 사용 여부 변경은 재시작 후 반영됩니다");
        }
        *previous = settings;

        info!(outcome = ?outcome, "설정 재적재 완료");
        Ok(outcome)
    }
}

fn global_bundles(settings: &Settings) -> Result<Vec<CertificateBundle>> {
    match (&settings.tls.cert_file, &settings.tls.key_file) {
        (Some(cert), Some(key)) => Ok(vec![CertificateBundle::from_files(cert, key)?]),
        _ => Ok(Vec::new()),
    }
}
