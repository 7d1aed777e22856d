use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::rustls::server::{Acceptor, ClientHello, ResolvesServerCert};
use tokio_rustls::rustls::sign::CertifiedKey;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, warn};
use super::error::TlsError;
use super::store::CertificateStore;

/// 평문 TLS 레코드: alert(21), TLS 1.2, 길이 2, fatal, unrecognized_name(112)
const UNRECOGNIZED_NAME_ALERT: [u8; 7] = [0x15, 0x03, 0x03, 0x00, 0x02, 0x02, 0x70];

/// 이미 고른 인증서 하나만 돌려주는 resolver. `None`이면 핸드셰이크가 실패합니다.
struct Resolved(Option<Arc<CertifiedKey>>);

impl ResolvesServerCert for Resolved {
    fn resolve(&self, _client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        self.0.clone()
    }
}

/// SNI를 읽은 뒤 저장소에서 인증서를 골라 핸드셰이크를 마칩니다.
///
/// 인증서 조회(자동 발급 포함)가 비동기이므로 ClientHello를 먼저 받고
/// 연결마다 설정을 만듭니다.
#[derive(Clone)]
pub struct SniAcceptor {
    store: Arc<CertificateStore>,
}

impl SniAcceptor {
    pub fn new(store: Arc<CertificateStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<CertificateStore> {
        &self.store
    }

    /// 핸드셰이크를 완료하고 스트림과 SNI 호스트 이름을 돌려줍니다.
    pub async fn accept(&self, stream: TcpStream) -> Result<(TlsStream<TcpStream>, Option<String>), TlsError> {
        let start = LazyConfigAcceptor::new(Acceptor::default(), stream)
            .await
            .map_err(|e| TlsError::Handshake(e.to_string()))?;

        let server_name = start.client_hello().server_name().map(str::to_ascii_lowercase);
        let (certified, failure) = match self
            .store
            .get_certificate_for_client_hello(server_name.as_deref())
            .await
        {
            Ok(certified) => (Some(certified), None),
            Err(e) => {
                warn!(server_name = ?server_name, error = %e, "인증서 선택 실패");
                (None, Some(e))
            }
        };

        let mut config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(Resolved(certified)));
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        let tls = match start.into_stream(Arc::new(config)).into_fallible().await {
            Ok(tls) => tls,
            Err((e, mut io)) => {
                // 인증서를 고르지 못한 연결은 경고를 보내고 닫음
                if let Some(failure) = failure {
                    let _ = io.write_all(&UNRECOGNIZED_NAME_ALERT).await;
                    let _ = io.shutdown().await;
                    return Err(failure);
                }
                return Err(TlsError::Handshake(e.to_string()));
            }
        };

        debug!(server_name = ?server_name, "TLS 핸드셰이크 완료");
        Ok((tls, server_name))
    }
}
