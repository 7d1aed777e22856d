use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tokio_rustls::rustls::Certificate;
use tracing::debug;
use super::error::TlsError;
use super::loader::public_key_der;

/// 실제로 제공한 인증서의 공개키 해시를 호스트별로 모아 둡니다.
///
/// 해시는 `base64(SHA-256(SPKI DER))`이며 명시적으로 `reset`하기 전까지 줄지 않습니다.
/// 캐시 전체를 하나의 뮤텍스로 보호하고, 잠금은 메모리 갱신 동안에만 잡습니다.
#[derive(Debug, Default)]
pub struct PinCache {
    pins: Mutex<HashMap<String, HashSet<String>>>,
}

impl PinCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashSet<String>>> {
        // 패닉한 스레드가 있어도 집합 자체는 항상 일관된 상태
        self.pins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 체인의 각 인증서 공개키 해시를 추가합니다. 여러 번 호출해도 결과는 같습니다.
    pub fn record_served_key(&self, host: &str, chain: &[Certificate]) -> Result<(), TlsError> {
        // 해시 계산은 잠금 밖에서
        let hashes = chain
            .iter()
            .map(|cert| {
                public_key_der(cert)
                    .map(|spki| spki_hash(&spki))
                    .map_err(|e| TlsError::Pinning {
                        host: host.to_string(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut pins = self.lock();
        let set = pins.entry(host.to_string()).or_default();
        let before = set.len();
        set.extend(hashes);
        if set.len() != before {
            debug!(host = %host, pins = set.len(), "공개키 해시 추가");
        }
        Ok(())
    }

    /// 호스트의 해시 집합 복사본
    pub fn pins_for(&self, host: &str) -> HashSet<String> {
        self.lock().get(host).cloned().unwrap_or_default()
    }

    /// 한 호스트 또는 전체의 해시를 지웁니다. 키 교체 시 외부에서 호출합니다.
    pub fn reset(&self, host: Option<&str>) {
        let mut pins = self.lock();
        match host {
            Some(host) => {
                pins.remove(host);
            }
            None => pins.clear(),
        }
    }

    /// `Public-Key-Pins` 헤더 값. 해시가 없으면 `None`
    pub fn header_value(&self, host: &str, max_age: u64) -> Option<String> {
        let mut pins: Vec<String> = self.pins_for(host).into_iter().collect();
        if pins.is_empty() {
            return None;
        }
        pins.sort();

        let mut value: String = pins
            .iter()
            .map(|pin| format!("pin-sha256=\"{}\"; ", pin))
            .collect();
        value.push_str(&format!("max-age={}", max_age));
        Some(value)
    }
}

/// `base64(SHA-256(spki))`
pub fn spki_hash(spki_der: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(spki_der))
}
