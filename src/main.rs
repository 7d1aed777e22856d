use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use edgeward::logging::init_logging;
use edgeward::server::Server;
use edgeward::settings::{ConfigWatcher, Settings};
use edgeward::tls::{CertificateProvisioner, DirCache};

#[tokio::main]
async fn main() {
    let settings = match Settings::load().await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("설정 로드 실패: {}", e);
            std::process::exit(1);
        }
    };

    let _guard = init_logging(&settings.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "edgeward 시작");

    if let Err(e) = run(settings).await {
        error!(error = %e, "서버 실행 실패");
        std::process::exit(1);
    }
}

async fn run(settings: Settings) -> Result<(), edgeward::server::Error> {
    // 발급 프로토콜은 외부 클라이언트가 담당하고, 결과물을 캐시 디렉터리에서 읽음
    let provisioner: Option<Arc<dyn CertificateProvisioner>> = if settings.tls.enabled && settings.tls.auto {
        let cache = DirCache::new(settings.tls.cache_dir());
        info!(
            cache_dir = %cache.dir().display(),
            directory_url = %settings.tls.directory_url,
            "자동 발급 인증서 캐시 사용"
        );
        Some(Arc::new(cache))
    } else {
        None
    };

    let server = Arc::new(Server::new(settings, provisioner)?);
    let listener = server.bind().await?;
    let handler = server.handler().await;

    if let Some(path) = Settings::config_path() {
        let server = server.clone();
        tokio::spawn(async move { watch_config(server, path).await });
    }

    listener.run(handler).await
}

async fn watch_config(server: Arc<Server>, path: PathBuf) {
    let mut watcher = ConfigWatcher::new();
    watcher.add_path(&path);
    if let Err(e) = watcher.start() {
        error!(error = %e, "설정 파일 감시 시작 실패");
        return;
    }
    info!(path = %path.display(), "설정 파일 감시 시작");

    while watcher.watch().await.is_some() {
        // 저장 한 번에 여러 이벤트가 연달아 옴
        tokio::time::sleep(Duration::from_millis(200)).await;
        watcher.drain();

        let settings = match Settings::from_toml_file(&path).await {
            Ok(settings) => settings,
            Err(e) => {
                error!(error = %e, "설정 파일 읽기 실패, 기존 설정 유지");
                continue;
            }
        };
        if let Err(e) = settings.validate().await {
            error!(error = %e, "설정 검증 실패, 기존 설정 유지");
            continue;
        }
        if let Err(e) = server.reload(settings).await {
            error!(error = %e, "설정 재적재 실패, 기존 설정 유지");
        }
    }
}
