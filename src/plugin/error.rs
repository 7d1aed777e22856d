use hyper::StatusCode;

/// 템플릿 및 표현식 처리 중 발생하는 에러
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("닫히지 않은 태그: 위치 {position}")]
    UnclosedTag { position: usize },

    #[error("표현식 구문 오류 (위치 {position}): {message}")]
    Syntax { position: usize, message: String },

    #[error("표현식 타입 오류: {0}")]
    Type(String),

    #[error("0으로 나눌 수 없음")]
    DivisionByZero,

    #[error("정규식 오류: {0}")]
    Regex(String),
}

/// 플러그인 설정 레코드 디코딩 에러
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("플러그인 이름(name)이 없거나 문자열이 아님")]
    MissingName,

    #[error("플러그인 순서(order)가 없거나 숫자가 아님")]
    MissingOrder,

    #[error("알 수 없는 플러그인: {name}")]
    UnknownPlugin { name: String },

    #[error("필드 {field} 타입 불일치: {expected} 필요")]
    FieldTypeMismatch { field: String, expected: &'static str },

    #[error("필드 {field} 값 오류: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("skip 표현식 오류: {0}")]
    Expression(#[from] ExpressionError),
}

impl DecodeError {
    pub fn invalid(field: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// 요청 처리 중 발생하는 플러그인 에러
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("{status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("업스트림 오류: {0}")]
    Upstream(String),

    #[error("플러그인 {plugin} 초기화 실패: {reason}")]
    Initialize { plugin: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] hyper::http::Error),
}

impl PluginError {
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn initialize(plugin: &str, reason: impl std::fmt::Display) -> Self {
        Self::Initialize {
            plugin: plugin.to_string(),
            reason: reason.to_string(),
        }
    }

    /// 에러에 대응하는 HTTP 상태 코드
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Status { status, .. } => *status,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            Self::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// 파이프라인 구성/갱신 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{index}번째 플러그인 디코딩 실패: {source}")]
    Decode {
        index: usize,
        #[source]
        source: DecodeError,
    },

    #[error("스코프 {scope}에 플러그인 {name} 중복")]
    Duplicate { name: String, scope: String },

    #[error("플러그인 {name} 초기화 실패: {source}")]
    Initialize {
        name: String,
        #[source]
        source: PluginError,
    },

    #[error("플러그인 {name}의 skip 표현식 검증 실패: {source}")]
    Skip {
        name: String,
        #[source]
        source: ExpressionError,
    },

    #[error("스코프 {scope}에서 플러그인 {name}을 찾을 수 없음")]
    NotFound { name: String, scope: String },
}
