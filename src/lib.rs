//! edgeward는 호스트별 TLS 인증서 선택과 플러그인 파이프라인을 갖춘 HTTP/HTTPS 에지 서버입니다.
//!
//! # 주요 기능
//!
//! - SNI 기반 인증서 선택 (수동 인증서, 자동 발급, 공개키 고정)
//! - `order` 순서로 실행되는 요청 플러그인과 `skip` 조건식
//! - 가상 호스트와 경로 스코프별 플러그인 구성
//! - 설정 파일 변경 시 무중단 재적재
//!
//! # 예제
//!
//! ```
//! use edgeward::plugin::{Pipeline, RawPlugin, Registry, Shared};
//!
//! let records = vec![
//!     RawPlugin::new().with("name", "secure").with("order", 10),
//!     RawPlugin::new().with("name", "logger").with("order", 1),
//! ];
//! let pipeline = Pipeline::build("global", &records, &Registry::default(), &Shared::default()).unwrap();
//! assert_eq!(pipeline.names(), vec!["logger", "secure"]);
//! ```

pub mod logging;
pub mod plugin;
pub mod server;
pub mod settings;
pub mod tls;
