use std::path::PathBuf;

/// 인증서 발급 클라이언트 에러
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvisionError {
    #[error("인증서 발급을 사용할 수 없음: {0}")]
    Unavailable(String),

    #[error("네트워크 오류: {0}")]
    Network(String),

    #[error("프로토콜 오류: {0}")]
    Protocol(String),

    #[error("발급된 인증서가 올바르지 않음: {0}")]
    Invalid(String),

    #[error("인증서 발급 시간 초과 ({0:?})")]
    Timeout(std::time::Duration),
}

/// 인증서 선택/로드 에러
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("{host}에 사용할 인증서 없음")]
    NoCertificate { host: String },

    #[error("{host} 인증서 발급 실패: {source}")]
    Provision {
        host: String,
        #[source]
        source: ProvisionError,
    },

    #[error("{host} 키 고정 실패: {reason}")]
    Pinning { host: String, reason: String },

    #[error("{path} 로드 실패: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("인증서 파싱 실패: {0}")]
    Certificate(String),

    #[error("TLS 핸드셰이크 실패: {0}")]
    Handshake(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TlsError {
    pub fn load(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
