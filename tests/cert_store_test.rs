use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use edgeward::tls::{
    public_key_der, spki_hash, CertificateBundle, CertificateProvisioner, CertificateSource,
    CertificateStore, HostTlsConfig, ProvisionError, StoreOptions, TlsError,
};

/// 자체 서명 인증서 PEM (인증서, 개인키). `days`가 있으면 그 날짜 뒤에 만료
fn self_signed(names: &[&str], days: Option<i64>) -> (String, String) {
    let mut params = rcgen::CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
    if let Some(days) = days {
        let until = time::OffsetDateTime::now_utc() + time::Duration::days(days);
        params.not_after = rcgen::date_time_ymd(until.year(), until.month() as u8, until.day());
    }
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

fn bundle(names: &[&str], days: Option<i64>) -> CertificateBundle {
    let (cert, key) = self_signed(names, days);
    CertificateBundle::from_pem(format!("{}{}", cert, key).as_bytes()).unwrap()
}

fn write_pair(dir: &Path, name: &str, names: &[&str]) -> (PathBuf, PathBuf) {
    let (cert, key) = self_signed(names, None);
    let cert_path = dir.join(format!("{}.crt", name));
    let key_path = dir.join(format!("{}.key", name));
    std::fs::write(&cert_path, cert).unwrap();
    std::fs::write(&key_path, key).unwrap();
    (cert_path, key_path)
}

fn auto_host(host: &str) -> HostTlsConfig {
    HostTlsConfig {
        host: host.to_string(),
        ..HostTlsConfig::default()
    }
}

/// 호출 횟수를 세고, 잠시 기다린 뒤 인증서를 돌려주는 발급기
struct Counting {
    calls: Arc<AtomicUsize>,
    delay: Duration,
    /// 몇 번째 호출부터 실패할지
    fail_from: Option<usize>,
    days: Option<i64>,
}

impl Counting {
    fn new(calls: Arc<AtomicUsize>) -> Self {
        Self {
            calls,
            delay: Duration::from_millis(50),
            fail_from: None,
            days: None,
        }
    }
}

#[async_trait]
impl CertificateProvisioner for Counting {
    async fn obtain(&self, host: &str) -> Result<CertificateBundle, ProvisionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail_from.map_or(false, |n| call >= n) {
            return Err(ProvisionError::Network("connection reset".to_string()));
        }
        Ok(bundle(&[host], self.days))
    }
}

fn auto_options() -> StoreOptions {
    StoreOptions {
        auto: true,
        ..StoreOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_certificate_overrides_global() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(dir.path(), "shop", &["shop.example.com"]);

        let store = CertificateStore::new(StoreOptions::default(), None);
        store.add_global(bundle(&["shop.example.com", "www.example.com"], None)).unwrap();
        store
            .load_hosts(&[HostTlsConfig {
                host: "Shop.Example.com".to_string(),
                cert_file: Some(cert.clone()),
                key_file: Some(key.clone()),
            }])
            .unwrap();

        let expected = CertificateBundle::from_files(&cert, &key).unwrap();
        let entry = store.resolve("shop.example.com").await.unwrap();
        assert_eq!(entry.source(), CertificateSource::Manual);
        assert_eq!(entry.chain()[0], expected.chain[0]);

        // 전역 인증서의 다른 이름은 그대로 조회됨
        let www = store.resolve("www.example.com").await.unwrap();
        assert_ne!(www.chain()[0], expected.chain[0]);
        assert_eq!(store.hosts(), vec!["shop.example.com", "www.example.com"]);
    }

    #[tokio::test]
    async fn test_unknown_host_has_no_certificate() {
        let store = CertificateStore::new(StoreOptions::default(), None);
        store.load_hosts(&[auto_host("auto.example.com")]).unwrap();

        // 자동 발급이 꺼져 있으면 목록에 있어도 인증서 없음
        assert!(matches!(
            store.resolve("auto.example.com").await,
            Err(TlsError::NoCertificate { .. })
        ));
        assert!(matches!(
            store.resolve("other.example.com").await,
            Err(TlsError::NoCertificate { host }) if host == "other.example.com"
        ));
    }

    #[tokio::test]
    async fn test_missing_certificate_file_keeps_previous_table() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(dir.path(), "a", &["a.example.com"]);
        let store = CertificateStore::new(StoreOptions::default(), None);
        store
            .load_hosts(&[HostTlsConfig {
                host: "a.example.com".to_string(),
                cert_file: Some(cert),
                key_file: Some(key),
            }])
            .unwrap();

        let err = store
            .load_hosts(&[HostTlsConfig {
                host: "b.example.com".to_string(),
                cert_file: Some(dir.path().join("missing.crt")),
                key_file: Some(dir.path().join("missing.key")),
            }])
            .unwrap_err();
        assert!(matches!(err, TlsError::Load { .. }));
        assert!(store.resolve("a.example.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_handshakes_provision_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(CertificateStore::new(
            auto_options(),
            Some(Arc::new(Counting::new(calls.clone()))),
        ));
        store.load_hosts(&[auto_host("auto.example.com")]).unwrap();

        let lookups = (0..8).map(|_| {
            let store = store.clone();
            async move { store.resolve("auto.example.com").await }
        });
        let results = futures_util::future::join_all(lookups).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let first = results[0].as_ref().unwrap();
        assert_eq!(first.source(), CertificateSource::AutoProvisioned);
        assert!(results
            .iter()
            .all(|r| r.as_ref().unwrap().chain()[0] == first.chain()[0]));

        store.resolve("auto.example.com").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provision_timeout() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut provisioner = Counting::new(calls);
        provisioner.delay = Duration::from_secs(5);

        let store = CertificateStore::new(
            StoreOptions {
                provision_timeout: Duration::from_millis(100),
                ..auto_options()
            },
            Some(Arc::new(provisioner)),
        );
        store.load_hosts(&[auto_host("slow.example.com")]).unwrap();

        let err = store.resolve("slow.example.com").await.unwrap_err();
        assert!(matches!(
            err,
            TlsError::Provision { source: ProvisionError::Timeout(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_renewal_keeps_valid_certificate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut provisioner = Counting::new(calls.clone());
        // 만료까지 며칠 남은 인증서 → 매번 갱신 대상
        provisioner.days = Some(3);
        provisioner.fail_from = Some(1);

        let store = CertificateStore::new(auto_options(), Some(Arc::new(provisioner)));
        store.load_hosts(&[auto_host("renew.example.com")]).unwrap();

        let first = store.resolve("renew.example.com").await.unwrap();
        let second = store.resolve("renew.example.com").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.chain()[0], second.chain()[0]);
    }

    #[tokio::test]
    async fn test_provision_failure_without_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut provisioner = Counting::new(calls);
        provisioner.fail_from = Some(0);

        let store = CertificateStore::new(auto_options(), Some(Arc::new(provisioner)));
        store.load_hosts(&[auto_host("down.example.com")]).unwrap();
        assert!(matches!(
            store.resolve("down.example.com").await,
            Err(TlsError::Provision { source: ProvisionError::Network(_), .. })
        ));

        // 발급기가 없으면 Unavailable
        let store = CertificateStore::new(auto_options(), None);
        store.load_hosts(&[auto_host("none.example.com")]).unwrap();
        assert!(matches!(
            store.resolve("none.example.com").await,
            Err(TlsError::Provision { source: ProvisionError::Unavailable(_), .. })
        ));
    }

    #[tokio::test]
    async fn test_manual_certificate_wins_with_auto_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(dir.path(), "shop", &["shop.example.com"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let store = CertificateStore::new(auto_options(), Some(Arc::new(Counting::new(calls.clone()))));
        store
            .load_hosts(&[
                HostTlsConfig {
                    host: "shop.example.com".to_string(),
                    cert_file: Some(cert),
                    key_file: Some(key),
                },
                auto_host("auto.example.com"),
            ])
            .unwrap();

        let entry = store.resolve("shop.example.com").await.unwrap();
        assert_eq!(entry.source(), CertificateSource::Manual);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wildcard_global_does_not_capture_auto_host() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = CertificateStore::new(auto_options(), Some(Arc::new(Counting::new(calls.clone()))));
        store.add_global(bundle(&["*.example.com"], None)).unwrap();
        store.load_hosts(&[auto_host("a.example.com")]).unwrap();

        let auto = store.resolve("a.example.com").await.unwrap();
        assert_eq!(auto.source(), CertificateSource::AutoProvisioned);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // 자동 발급 대상이 아닌 하위 도메인은 와일드카드 사용
        let other = store.resolve("b.example.com").await.unwrap();
        assert_eq!(other.source(), CertificateSource::Manual);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_renewal_failure_provisions_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut provisioner = Counting::new(calls.clone());
        provisioner.days = Some(3);
        provisioner.fail_from = Some(1);

        let store = Arc::new(CertificateStore::new(auto_options(), Some(Arc::new(provisioner))));
        store.load_hosts(&[auto_host("renew.example.com")]).unwrap();
        let first = store.resolve("renew.example.com").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let lookups = (0..8).map(|_| {
            let store = store.clone();
            async move { store.resolve("renew.example.com").await }
        });
        let results = futures_util::future::join_all(lookups).await;
        assert!(results
            .iter()
            .all(|r| r.as_ref().unwrap().chain()[0] == first.chain()[0]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // 실패 직후에는 다시 시도하지 않음
        store.resolve("renew.example.com").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_failure_without_cache_provisions_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut provisioner = Counting::new(calls.clone());
        provisioner.fail_from = Some(0);

        let store = Arc::new(CertificateStore::new(auto_options(), Some(Arc::new(provisioner))));
        store.load_hosts(&[auto_host("down.example.com")]).unwrap();

        let lookups = (0..8).map(|_| {
            let store = store.clone();
            async move { store.resolve("down.example.com").await }
        });
        let results = futures_util::future::join_all(lookups).await;
        assert!(results.iter().all(|r| matches!(
            r,
            Err(TlsError::Provision { source: ProvisionError::Network(_), .. })
        )));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_provision_retried_after_backoff() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut provisioner = Counting::new(calls.clone());
        provisioner.fail_from = Some(0);

        let store = CertificateStore::new(
            StoreOptions {
                retry_backoff: Duration::ZERO,
                ..auto_options()
            },
            Some(Arc::new(provisioner)),
        );
        store.load_hosts(&[auto_host("down.example.com")]).unwrap();

        assert!(store.resolve("down.example.com").await.is_err());
        assert!(store.resolve("down.example.com").await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_removed_host_drops_provisioned_certificate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = CertificateStore::new(auto_options(), Some(Arc::new(Counting::new(calls.clone()))));
        store.load_hosts(&[auto_host("gone.example.com")]).unwrap();
        store.resolve("gone.example.com").await.unwrap();

        store.load_hosts(&[]).unwrap();
        assert!(matches!(
            store.resolve("gone.example.com").await,
            Err(TlsError::NoCertificate { .. })
        ));

        // 다시 등록되면 새로 발급
        store.load_hosts(&[auto_host("gone.example.com")]).unwrap();
        store.resolve("gone.example.com").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_key_pinning_records_served_keys() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = CertificateStore::new(
            StoreOptions {
                key_pinning: true,
                ..auto_options()
            },
            Some(Arc::new(Counting::new(calls))),
        );
        store.load_hosts(&[auto_host("pin.example.com")]).unwrap();

        let entry = store.resolve("pin.example.com").await.unwrap();
        store.resolve("pin.example.com").await.unwrap();

        let pins = store.pins().pins_for("pin.example.com");
        assert_eq!(pins.len(), 1);
        let expected = spki_hash(&public_key_der(&entry.chain()[0]).unwrap());
        assert!(pins.contains(&expected));

        let header = store.pins().header_value("pin.example.com", 5_184_000).unwrap();
        assert_eq!(header, format!("pin-sha256=\"{}\"; max-age=5184000", expected));
    }

    #[tokio::test]
    async fn test_client_hello_without_sni() {
        let store = CertificateStore::new(StoreOptions::default(), None);
        store.load_hosts(&[]).unwrap();
        assert!(matches!(
            store.get_certificate_for_client_hello(None).await,
            Err(TlsError::NoCertificate { .. })
        ));

        store.add_global(bundle(&["default.example.com"], None)).unwrap();
        store.load_hosts(&[]).unwrap();
        assert!(store.get_certificate_for_client_hello(None).await.is_ok());
        assert!(store
            .get_certificate_for_client_hello(Some("default.example.com"))
            .await
            .is_ok());
    }
}
