use std::{env, path::PathBuf, time::Duration};
use serde::Deserialize;
use tokio::fs;
use crate::tls::StoreOptions;
use super::{server::parse_env_var, SettingsError};

pub const DEFAULT_DIRECTORY_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const DEFAULT_PIN_MAX_AGE: u64 = 5_184_000;

#[derive(Debug, Clone, Deserialize)]
pub struct TlsSettings {
    /// HTTPS 활성화 여부
    #[serde(default)]
    pub enabled: bool,

    /// HTTPS 포트
    #[serde(default = "default_https_port")]
    pub port: u16,

    /// 전역 인증서 파일 경로
    #[serde(default, alias = "cert-file")]
    pub cert_file: Option<PathBuf>,

    /// 전역 개인키 파일 경로
    #[serde(default, alias = "key-file")]
    pub key_file: Option<PathBuf>,

    /// 인증서 파일이 없는 호스트의 자동 발급 여부
    #[serde(default)]
    pub auto: bool,

    /// 발급 계정 이메일
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default = "default_directory_url", alias = "directory-url")]
    pub directory_url: String,

    /// 발급 인증서 캐시 디렉터리
    #[serde(default, alias = "cache-dir")]
    pub cache_dir: Option<PathBuf>,

    /// 공개키 고정 헤더 사용 여부
    #[serde(default, alias = "key-pinning")]
    pub key_pinning: bool,

    #[serde(default = "default_pin_max_age", alias = "pin-max-age")]
    pub pin_max_age: u64,

    #[serde(default = "default_renew_before_days", alias = "renew-before-days")]
    pub renew_before_days: u64,

    #[serde(default = "default_provision_timeout", alias = "provision-timeout-secs")]
    pub provision_timeout_secs: u64,
}

impl TlsSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Ok(Self {
            enabled: parse_env_var("EDGEWARD_TLS_ENABLED", || false)?,
            port: parse_env_var("EDGEWARD_TLS_PORT", default_https_port)?,
            cert_file: env::var("EDGEWARD_TLS_CERT").map(PathBuf::from).ok(),
            key_file: env::var("EDGEWARD_TLS_KEY").map(PathBuf::from).ok(),
            auto: parse_env_var("EDGEWARD_TLS_AUTO", || false)?,
            email: env::var("EDGEWARD_TLS_EMAIL").ok(),
            directory_url: env::var("EDGEWARD_TLS_DIRECTORY_URL").unwrap_or_else(|_| default_directory_url()),
            cache_dir: env::var("EDGEWARD_TLS_CACHE_DIR").map(PathBuf::from).ok(),
            key_pinning: parse_env_var("EDGEWARD_TLS_KEY_PINNING", || false)?,
            pin_max_age: parse_env_var("EDGEWARD_TLS_PIN_MAX_AGE", default_pin_max_age)?,
            renew_before_days: parse_env_var("EDGEWARD_TLS_RENEW_BEFORE_DAYS", default_renew_before_days)?,
            provision_timeout_secs: parse_env_var("EDGEWARD_TLS_PROVISION_TIMEOUT_SECS", default_provision_timeout)?,
        })
    }

    /// TLS 설정이 유효한지 검증
    pub async fn validate(&self) -> Result<(), SettingsError> {
        if !self.enabled {
            return Ok(());
        }

        let (cert_file, key_file) = match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => (cert, key),
            (None, None) => return Ok(()),
            (Some(_), None) => {
                return Err(SettingsError::EnvVarMissing {
                    var_name: "EDGEWARD_TLS_KEY".to_string(),
                })
            }
            (None, Some(_)) => {
                return Err(SettingsError::EnvVarMissing {
                    var_name: "EDGEWARD_TLS_CERT".to_string(),
                })
            }
        };

        // 파일 읽기 권한까지 확인
        for path in [cert_file, key_file] {
            fs::read(path).await.map_err(|e| SettingsError::FileError {
                path: path.to_string_lossy().to_string(),
                error: e,
            })?;
        }

        Ok(())
    }

    pub fn has_global_certificate(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }

    /// 캐시 디렉터리. 지정하지 않으면 `$HOME/.edgeward/cache`
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".edgeward")
                .join("cache")
        })
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            auto: self.auto,
            key_pinning: self.key_pinning,
            renew_before: Duration::from_secs(self.renew_before_days * 24 * 3600),
            provision_timeout: Duration::from_secs(self.provision_timeout_secs),
            ..StoreOptions::default()
        }
    }
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_https_port(),
            cert_file: None,
            key_file: None,
            auto: false,
            email: None,
            directory_url: default_directory_url(),
            cache_dir: None,
            key_pinning: false,
            pin_max_age: default_pin_max_age(),
            renew_before_days: default_renew_before_days(),
            provision_timeout_secs: default_provision_timeout(),
        }
    }
}

fn default_https_port() -> u16 {
    443
}

fn default_directory_url() -> String {
    DEFAULT_DIRECTORY_URL.to_string()
}

fn default_pin_max_age() -> u64 {
    DEFAULT_PIN_MAX_AGE
}

fn default_renew_before_days() -> u64 {
    30
}

fn default_provision_timeout() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tls_settings_validation() {
        let dir = tempfile::tempdir().unwrap();
        let cert_file = dir.path().join("cert.pem");
        let key_file = dir.path().join("key.pem");
        fs::write(&cert_file, b"test cert").await.unwrap();
        fs::write(&key_file, b"test key").await.unwrap();

        let settings = TlsSettings {
            enabled: true,
            cert_file: Some(cert_file.clone()),
            key_file: Some(key_file),
            ..TlsSettings::default()
        };
        assert!(settings.validate().await.is_ok());

        let missing_key = TlsSettings {
            enabled: true,
            cert_file: Some(cert_file),
            ..TlsSettings::default()
        };
        assert!(matches!(
            missing_key.validate().await,
            Err(SettingsError::EnvVarMissing { .. })
        ));
    }

    #[test]
    fn test_kebab_case_aliases() {
        let settings: TlsSettings = toml::from_str(
            r#"
            enabled = true
            cert-file = "/etc/edgeward/cert.pem"
            key-file = "/etc/edgeward/key.pem"
            cache-dir = "/var/cache/edgeward"
            key-pinning = true
            "#,
        )
        .unwrap();
        assert!(settings.has_global_certificate());
        assert!(settings.key_pinning);
        assert_eq!(settings.cache_dir(), PathBuf::from("/var/cache/edgeward"));
        assert_eq!(settings.pin_max_age, DEFAULT_PIN_MAX_AGE);
        assert_eq!(settings.store_options().renew_before, Duration::from_secs(30 * 24 * 3600));
    }
}
