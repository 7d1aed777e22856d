use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use async_trait::async_trait;
use tracing::{debug, info, warn};
use super::error::{ProvisionError, TlsError};
use super::loader::CertificateBundle;

/// 인증서 자동 발급 클라이언트
///
/// ACME 등 실제 발급 프로토콜은 이 trait 뒤에 숨겨집니다. 타임아웃은
/// 호출하는 쪽(`CertificateStore`)이 적용합니다.
#[async_trait]
pub trait CertificateProvisioner: Send + Sync {
    async fn obtain(&self, host: &str) -> Result<CertificateBundle, ProvisionError>;
}

/// 호스트별 PEM 파일 캐시 디렉터리
///
/// 파일 하나에 개인키, 인증서 체인 순서로 저장합니다. 외부 ACME 클라이언트가
/// 같은 형식으로 파일을 넣어 두면 그대로 발급기로 쓸 수 있습니다.
#[derive(Debug, Clone)]
pub struct DirCache {
    dir: PathBuf,
}

impl DirCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 호스트 이름에 대응하는 캐시 파일 경로
    pub fn path_for(&self, host: &str) -> PathBuf {
        let safe: String = host
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.pem", safe.trim_start_matches('.')))
    }

    pub async fn load(&self, host: &str) -> Result<Option<CertificateBundle>, ProvisionError> {
        let path = self.path_for(host);
        match tokio::fs::read(&path).await {
            Ok(data) => CertificateBundle::from_pem(&data)
                .map(Some)
                .map_err(|e| ProvisionError::Invalid(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProvisionError::Unavailable(format!("{}: {}", path.display(), e))),
        }
    }

    pub async fn store(&self, host: &str, bundle: &CertificateBundle) -> Result<(), TlsError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(host);
        let tmp = path.with_extension("pem.tmp");
        tokio::fs::write(&tmp, bundle.to_pem()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(host = %host, path = %path.display(), "인증서 캐시 저장");
        Ok(())
    }
}

#[async_trait]
impl CertificateProvisioner for DirCache {
    async fn obtain(&self, host: &str) -> Result<CertificateBundle, ProvisionError> {
        self.load(host)
            .await?
            .ok_or_else(|| ProvisionError::Unavailable(format!("{} 캐시 파일 없음", host)))
    }
}

/// 캐시 디렉터리를 먼저 확인하고, 없거나 갱신 시점이면 내부 발급기에 위임합니다.
pub struct CachedProvisioner<P> {
    cache: DirCache,
    inner: P,
    renew_before: Duration,
}

impl<P: CertificateProvisioner> CachedProvisioner<P> {
    pub fn new(cache: DirCache, inner: P, renew_before: Duration) -> Self {
        Self {
            cache,
            inner,
            renew_before,
        }
    }

    fn is_fresh(&self, bundle: &CertificateBundle) -> bool {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        bundle
            .not_after()
            .map(|not_after| not_after - now > self.renew_before.as_secs() as i64)
            .unwrap_or(false)
    }
}

#[async_trait]
impl<P: CertificateProvisioner> CertificateProvisioner for CachedProvisioner<P> {
    async fn obtain(&self, host: &str) -> Result<CertificateBundle, ProvisionError> {
        match self.cache.load(host).await {
            Ok(Some(bundle)) if self.is_fresh(&bundle) => {
                debug!(host = %host, "캐시된 인증서 사용");
                return Ok(bundle);
            }
            Ok(_) => {}
            Err(e) => warn!(host = %host, error = %e, "인증서 캐시 읽기 실패"),
        }

        let bundle = self.inner.obtain(host).await?;
        info!(host = %host, "인증서 발급 완료");
        if let Err(e) = self.cache.store(host, &bundle).await {
            warn!(host = %host, error = %e, "인증서 캐시 저장 실패");
        }
        Ok(bundle)
    }
}
