use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio_rustls::rustls::sign::{self, CertifiedKey};
use tokio_rustls::rustls::Certificate;
use tracing::{debug, info, warn};
use super::error::{ProvisionError, TlsError};
use super::loader::CertificateBundle;
use super::pinning::PinCache;
use super::provision::CertificateProvisioner;

const DEFAULT_RENEW_BEFORE: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const DEFAULT_PROVISION_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// 인증서 출처
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateSource {
    Manual,
    AutoProvisioned,
}

/// 로드된 인증서 한 벌
///
/// 생성 후에는 바뀌지 않으며, 갱신은 새 항목으로 교체하는 방식입니다.
pub struct CertificateEntry {
    host: String,
    names: Vec<String>,
    chain: Vec<Certificate>,
    source: CertificateSource,
    not_after: i64,
    certified: Arc<CertifiedKey>,
}

impl CertificateEntry {
    pub fn new(host: &str, bundle: CertificateBundle, source: CertificateSource) -> Result<Self, TlsError> {
        let not_after = bundle.not_after()?;
        let names = bundle.dns_names()?;
        let key = sign::any_supported_type(&bundle.key)
            .map_err(|e| TlsError::Certificate(format!("지원하지 않는 개인키: {}", e)))?;
        let certified = Arc::new(CertifiedKey::new(bundle.chain.clone(), key));

        Ok(Self {
            host: host.to_string(),
            names,
            chain: bundle.chain,
            source,
            not_after,
            certified,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// 인증서에 포함된 DNS 이름
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    pub fn source(&self) -> CertificateSource {
        self.source
    }

    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.certified.clone()
    }

    fn is_expired(&self, now: i64) -> bool {
        now >= self.not_after
    }

    fn needs_renewal(&self, renew_before: Duration, now: i64) -> bool {
        self.not_after - now <= renew_before.as_secs() as i64
    }
}

impl std::fmt::Debug for CertificateEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateEntry")
            .field("host", &self.host)
            .field("source", &self.source)
            .field("not_after", &self.not_after)
            .finish()
    }
}

/// 호스트별 TLS 설정
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostTlsConfig {
    pub host: String,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// 자동 발급 사용 여부
    pub auto: bool,
    /// 자동 발급 인증서의 공개키 고정 여부
    pub key_pinning: bool,
    /// 만료 전 이 기간 안에 들어오면 재발급
    pub renew_before: Duration,
    /// 발급 요청 하나의 최대 대기 시간
    pub provision_timeout: Duration,
    /// 발급 실패 후 같은 호스트를 다시 시도하기까지 기다리는 시간
    pub retry_backoff: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            auto: false,
            key_pinning: false,
            renew_before: DEFAULT_RENEW_BEFORE,
            provision_timeout: DEFAULT_PROVISION_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// 호스트 이름 조회 테이블. 호스트 구성이 바뀔 때마다 통째로 다시 만듭니다.
#[derive(Default)]
struct Table {
    names: HashMap<String, Arc<CertificateEntry>>,
    fallback: Option<Arc<CertificateEntry>>,
    auto_hosts: HashSet<String>,
}

impl Table {
    fn exact(&self, host: &str) -> Option<Arc<CertificateEntry>> {
        self.names.get(host).cloned()
    }

    /// 한 단계 아래 레이블만 와일드카드와 일치
    fn wildcard(&self, host: &str) -> Option<Arc<CertificateEntry>> {
        let (_, parent) = host.split_once('.')?;
        self.names.get(&format!("*.{}", parent)).cloned()
    }
}

/// 호스트별 인증서 저장소
///
/// 조회 순서는 이름이 정확히 일치하는 수동 인증서, 자동 발급 대상이면 발급/캐시,
/// 와일드카드 수동 인증서, 그 외에는 `NoCertificate`입니다. 같은 호스트의 동시
/// 발급 요청은 하나로 합쳐지고, 실패한 발급은 `retry_backoff` 동안 다시 시도하지
/// 않습니다.
pub struct CertificateStore {
    options: StoreOptions,
    provisioner: Option<Arc<dyn CertificateProvisioner>>,
    globals: RwLock<Vec<Arc<CertificateEntry>>>,
    table: RwLock<Arc<Table>>,
    provisioned: RwLock<HashMap<String, Arc<CertificateEntry>>>,
    flights: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    failures: Mutex<HashMap<String, (Instant, ProvisionError)>>,
    pins: PinCache,
}

impl CertificateStore {
    pub fn new(options: StoreOptions, provisioner: Option<Arc<dyn CertificateProvisioner>>) -> Self {
        Self {
            options,
            provisioner,
            globals: RwLock::new(Vec::new()),
            table: RwLock::new(Arc::new(Table::default())),
            provisioned: RwLock::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            pins: PinCache::new(),
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn pins(&self) -> &PinCache {
        &self.pins
    }

    /// 서버 전역 인증서를 추가합니다. 인증서의 DNS 이름으로 조회되며,
    /// 첫 번째 전역 인증서는 SNI 없는 연결에 사용됩니다.
    ///
    /// 반영은 다음 `load_hosts` 호출 때 이뤄집니다.
    pub fn add_global(&self, bundle: CertificateBundle) -> Result<(), TlsError> {
        let names = bundle.dns_names()?;
        let host = names.first().cloned().unwrap_or_default();
        let entry = Arc::new(CertificateEntry::new(&host, bundle, CertificateSource::Manual)?);
        self.globals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(())
    }

    /// 전역 인증서 목록을 통째로 교체합니다. 설정 재적재 때 사용합니다.
    pub fn replace_globals(&self, bundles: Vec<CertificateBundle>) -> Result<(), TlsError> {
        let entries = bundles
            .into_iter()
            .map(|bundle| {
                let host = bundle.dns_names()?.first().cloned().unwrap_or_default();
                CertificateEntry::new(&host, bundle, CertificateSource::Manual).map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;
        *self.globals.write().unwrap_or_else(PoisonError::into_inner) = entries;
        Ok(())
    }

    /// 호스트 구성을 읽고 조회 테이블을 다시 만듭니다.
    ///
    /// 인증서 파일이 있는 호스트는 수동 인증서로, 나머지는 자동 발급 대상으로
    /// 등록됩니다. 파일 하나라도 읽지 못하면 기존 테이블을 유지합니다.
    pub fn load_hosts(&self, hosts: &[HostTlsConfig]) -> Result<(), TlsError> {
        let mut manual = HashMap::new();
        let mut auto_hosts = HashSet::new();

        for config in hosts {
            let host = normalize_host(&config.host);
            match (&config.cert_file, &config.key_file) {
                (Some(cert), Some(key)) => {
                    let bundle = CertificateBundle::from_files(cert, key)?;
                    let entry = CertificateEntry::new(&host, bundle, CertificateSource::Manual)?;
                    debug!(host = %host, cert = %cert.display(), "수동 인증서 로드");
                    manual.insert(host, Arc::new(entry));
                }
                _ => {
                    auto_hosts.insert(host);
                }
            }
        }

        let globals = self.globals.read().unwrap_or_else(PoisonError::into_inner);
        let mut names = HashMap::new();
        for entry in globals.iter() {
            for name in entry.names() {
                names.entry(name.clone()).or_insert_with(|| entry.clone());
            }
        }
        // 호스트별 인증서가 전역 인증서보다 우선
        names.extend(manual);

        let table = Table {
            names,
            fallback: globals.first().cloned(),
            auto_hosts,
        };
        info!(
            names = table.names.len(),
            auto_hosts = table.auto_hosts.len(),
            "인증서 테이블 갱신"
        );
        self.prune(&table.auto_hosts);
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
        Ok(())
    }

    /// 자동 발급 대상에서 빠진 호스트의 캐시와 발급 상태를 지웁니다.
    fn prune(&self, auto_hosts: &HashSet<String>) {
        self.provisioned
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|host, _| auto_hosts.contains(host));
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|host, _| auto_hosts.contains(host));
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|host, _| auto_hosts.contains(host));
    }

    fn table(&self) -> Arc<Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 현재 테이블에 등록된 호스트 이름 (수동 + 자동 발급 대상)
    pub fn hosts(&self) -> Vec<String> {
        let table = self.table();
        let mut hosts: Vec<String> = table
            .names
            .keys()
            .chain(table.auto_hosts.iter())
            .cloned()
            .collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    /// 호스트에 사용할 인증서를 고릅니다.
    pub async fn resolve(&self, host: &str) -> Result<Arc<CertificateEntry>, TlsError> {
        let host = normalize_host(host);
        let table = self.table();

        if let Some(entry) = table.exact(&host) {
            return Ok(entry);
        }
        // 자동 발급 대상은 와일드카드 인증서보다 우선
        if self.options.auto && table.auto_hosts.contains(&host) {
            return self.resolve_auto(&host).await;
        }
        if let Some(entry) = table.wildcard(&host) {
            return Ok(entry);
        }
        Err(TlsError::NoCertificate { host })
    }

    /// TLS 핸드셰이크 훅. SNI가 없으면 첫 번째 전역 인증서를 사용합니다.
    pub async fn get_certificate_for_client_hello(
        &self,
        server_name: Option<&str>,
    ) -> Result<Arc<CertifiedKey>, TlsError> {
        match server_name {
            Some(name) => Ok(self.resolve(name).await?.certified_key()),
            None => self
                .table()
                .fallback
                .as_ref()
                .map(|entry| entry.certified_key())
                .ok_or_else(|| TlsError::NoCertificate { host: String::new() }),
        }
    }

    fn cached(&self, host: &str) -> Option<Arc<CertificateEntry>> {
        self.provisioned
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .cloned()
    }

    fn flight(&self, host: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(host.to_string())
            .or_default()
            .clone()
    }

    /// 최근 `retry_backoff` 안에 기록된 발급 실패
    fn recent_failure(&self, host: &str) -> Option<ProvisionError> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .filter(|(at, _)| at.elapsed() < self.options.retry_backoff)
            .map(|(_, error)| error.clone())
    }

    async fn resolve_auto(&self, host: &str) -> Result<Arc<CertificateEntry>, TlsError> {
        let renew_before = self.options.renew_before;
        let now_ts = now();
        let cached = self.cached(host);
        if let Some(entry) = cached.as_ref().filter(|e| !e.needs_renewal(renew_before, now_ts)) {
            return self.served(host, entry.clone());
        }

        // 호스트당 하나의 발급만 진행. 아직 유효한 인증서가 있으면 갱신을
        // 기다리지 않고 그대로 사용
        let flight = self.flight(host);
        let _guard = match cached.filter(|e| !e.is_expired(now_ts)) {
            Some(entry) => {
                if self.recent_failure(host).is_some() {
                    return self.served(host, entry);
                }
                match flight.try_lock() {
                    Ok(guard) => guard,
                    Err(_) => return self.served(host, entry),
                }
            }
            None => flight.lock().await,
        };

        // 기다린 쪽은 앞선 발급 결과를 다시 확인
        let now_ts = now();
        let cached = self.cached(host);
        if let Some(entry) = cached.as_ref().filter(|e| !e.needs_renewal(renew_before, now_ts)) {
            return self.served(host, entry.clone());
        }
        let usable = cached.filter(|e| !e.is_expired(now_ts));
        if let Some(source) = self.recent_failure(host) {
            return match usable {
                Some(entry) => self.served(host, entry),
                None => Err(TlsError::Provision {
                    host: host.to_string(),
                    source,
                }),
            };
        }

        let entry = match self.provision(host).await {
            Ok(entry) => {
                let entry = Arc::new(entry);
                self.provisioned
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(host.to_string(), entry.clone());
                self.failures
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(host);
                info!(host = %host, not_after = entry.not_after(), "자동 발급 인증서 등록");
                entry
            }
            Err(source) => {
                self.failures
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(host.to_string(), (Instant::now(), source.clone()));
                match usable {
                    Some(old) => {
                        warn!(host = %host, error = %source, "인증서 갱신 실패, 기존 인증서 계속 사용");
                        old
                    }
                    None => {
                        warn!(host = %host, error = %source, "인증서 발급 실패");
                        return Err(TlsError::Provision {
                            host: host.to_string(),
                            source,
                        });
                    }
                }
            }
        };

        self.served(host, entry)
    }

    async fn provision(&self, host: &str) -> Result<CertificateEntry, ProvisionError> {
        let provisioner = self
            .provisioner
            .as_ref()
            .ok_or_else(|| ProvisionError::Unavailable("발급 클라이언트가 설정되지 않음".into()))?;

        let timeout = self.options.provision_timeout;
        let bundle = tokio::time::timeout(timeout, provisioner.obtain(host))
            .await
            .map_err(|_| ProvisionError::Timeout(timeout))??;

        CertificateEntry::new(host, bundle, CertificateSource::AutoProvisioned)
            .map_err(|e| ProvisionError::Invalid(e.to_string()))
    }

    /// 자동 발급 인증서를 돌려주기 전에 키 고정 캐시를 갱신합니다.
    fn served(&self, host: &str, entry: Arc<CertificateEntry>) -> Result<Arc<CertificateEntry>, TlsError> {
        if self.options.key_pinning {
            self.pins.record_served_key(host, entry.chain())?;
        }
        Ok(entry)
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("Example.COM."), "example.com");
    }

    #[test]
    fn test_wildcard_lookup_one_label() {
        let generated = rcgen::generate_simple_self_signed(vec!["*.example.com".into()]).unwrap();
        let pem = format!("{}{}", generated.cert.pem(), generated.key_pair.serialize_pem());
        let bundle = CertificateBundle::from_pem(pem.as_bytes()).unwrap();

        let store = CertificateStore::new(StoreOptions::default(), None);
        store.add_global(bundle).unwrap();
        store.load_hosts(&[]).unwrap();

        let table = store.table();
        assert!(table.exact("api.example.com").is_none());
        assert!(table.wildcard("api.example.com").is_some());
        assert!(table.wildcard("a.b.example.com").is_none());
        assert!(table.wildcard("example.com").is_none());
    }
}
