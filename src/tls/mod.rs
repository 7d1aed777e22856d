//! 호스트별 TLS 인증서 선택
//!
//! 핸드셰이크마다 SNI로 [`CertificateStore`]에서 인증서를 고릅니다. 수동 인증서가
//! 우선이며, 자동 발급이 켜진 호스트는 [`CertificateProvisioner`]로 받아 캐시하고
//! 필요하면 공개키 해시를 [`PinCache`]에 기록합니다.

mod acceptor;
mod error;
mod loader;
mod pinning;
mod provision;
mod store;

pub use acceptor::SniAcceptor;
pub use error::{ProvisionError, TlsError};
pub use loader::{public_key_der, CertificateBundle, KeyFormat};
pub use pinning::{spki_hash, PinCache};
pub use provision::{CachedProvisioner, CertificateProvisioner, DirCache};
pub use store::{CertificateEntry, CertificateSource, CertificateStore, HostTlsConfig, StoreOptions};
