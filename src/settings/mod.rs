use std::{collections::HashMap, env, fs, path::{Path, PathBuf}};
use serde::Deserialize;
use tracing::{debug, info};
use crate::plugin::RawPlugin;
use crate::tls::HostTlsConfig;

mod server;
pub mod logging;
mod tls;
mod host;
mod error;
pub mod watcher;

pub use server::ServerSettings;
pub use logging::{LogFormat, LogOutput, LogSettings};
pub use tls::{TlsSettings, DEFAULT_DIRECTORY_URL, DEFAULT_PIN_MAX_AGE};
pub use host::{HostSettings, PathSettings, Paths};
pub use error::SettingsError;
pub use watcher::{ConfigEvent, ConfigWatcher};

pub type Result<T> = std::result::Result<T, SettingsError>;
pub use server::parse_env_var;

/// 설정 파일 경로를 지정하는 환경 변수
pub const CONFIG_FILE_ENV: &str = "EDGEWARD_CONFIG_FILE";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    // 서버 설정
    #[serde(default)]
    pub server: ServerSettings,

    // 로깅 설정
    #[serde(default)]
    pub logging: LogSettings,

    // TLS 설정
    #[serde(default)]
    pub tls: TlsSettings,

    /// 전역 스코프 플러그인
    #[serde(default)]
    pub plugins: Vec<RawPlugin>,

    /// 가상 호스트
    #[serde(default)]
    pub hosts: HashMap<String, HostSettings>,
}

impl Settings {
    pub async fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => {
                let settings = Self::from_toml_file(&path).await?;
                settings.validate().await?;
                Ok(settings)
            }
            None => Self::from_env().await,
        }
    }

    /// `EDGEWARD_CONFIG_FILE`에 지정된 설정 파일 경로
    pub fn config_path() -> Option<PathBuf> {
        env::var_os(CONFIG_FILE_ENV).map(PathBuf::from)
    }

    pub async fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| SettingsError::FileError {
            path: path.as_ref().to_string_lossy().to_string(),
            error: e,
        })?;

        let settings = Self::from_toml_str(&content)?;
        debug!(
            path = %path.as_ref().display(),
            hosts = settings.hosts.len(),
            plugins = settings.plugins.len(),
            "설정 파일 로드"
        );
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SettingsError::ParseError { source: e })
    }

    pub async fn from_env() -> Result<Self> {
        let settings = Self {
            server: ServerSettings::from_env()?,
            logging: LogSettings::from_env()?,
            tls: TlsSettings::from_env()?,
            plugins: Vec::new(),
            hosts: HashMap::new(),
        };

        // 설정 생성 시점에 바로 검증
        settings.validate().await?;
        Ok(settings)
    }

    /// 설정 유효성 검증
    pub async fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.tls.validate().await?;

        if self.tls.enabled && self.server.http_port == self.tls.port {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "EDGEWARD_HTTP_PORT/EDGEWARD_TLS_PORT".to_string(),
                value: format!("{}/{}", self.server.http_port, self.tls.port),
                reason: "HTTP와 HTTPS 포트는 달라야 합니다".to_string(),
            });
        }

        validate_plugins("plugins", &self.plugins)?;
        for (name, host) in &self.hosts {
            host.validate(name)?;
        }

        if self.tls.enabled
            && !self.tls.auto
            && !self.tls.has_global_certificate()
            && !self.hosts.values().any(|h| h.cert_file.is_some())
        {
            return Err(SettingsError::InvalidConfig(
                "TLS가 활성화되었지만 사용할 인증서가 없습니다 (cert_file 또는 auto 필요)".to_string(),
            ));
        }

        info!(hosts = self.hosts.len(), tls = self.tls.enabled, "설정 검증 완료");
        Ok(())
    }

    /// 인증서 저장소에 넘길 호스트별 TLS 구성. 호스트 이름 순으로 정렬됩니다.
    pub fn host_tls_configs(&self) -> Vec<HostTlsConfig> {
        let mut configs: Vec<HostTlsConfig> = self
            .hosts
            .iter()
            .map(|(name, host)| host.tls_config(name))
            .collect();
        configs.sort_by(|a, b| a.host.cmp(&b.host));
        configs
    }
}

/// 플러그인 레코드가 문자열 `name`을 가지는지 확인합니다.
/// 나머지 필드는 파이프라인 구성 시 디코딩 단계에서 검사합니다.
pub(crate) fn validate_plugins(scope: &str, plugins: &[RawPlugin]) -> Result<()> {
    for (index, record) in plugins.iter().enumerate() {
        record.name().map_err(|e| {
            SettingsError::InvalidConfig(format!("{}[{}]: {}", scope, index, e))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_toml() {
        let toml_content = r#"
            [server]
            http_port = 8080

            [logging]
            format = "json"
            level = "info"

            [tls]
            enabled = true
            port = 8443
            auto = true

            [[plugins]]
            name = "logger"
            order = 1

            [hosts."example.com"]
            [[hosts."example.com".plugins]]
            name = "secure"
            order = 10

            [hosts."example.com".paths."/api/*"]
            plugins = [{ name = "proxy", order = 1, targets = [{ url = "http://127.0.0.1:9000" }] }]
        "#;

        let settings = Settings::from_toml_str(toml_content).unwrap();
        assert_eq!(settings.server.http_port, 8080);
        assert!(settings.tls.enabled);
        assert_eq!(settings.plugins.len(), 1);
        assert_eq!(settings.plugins[0].name().unwrap(), "logger");

        let host = &settings.hosts["example.com"];
        assert_eq!(host.plugins.len(), 1);
        assert_eq!(host.paths.get("/api/*").unwrap().plugins.len(), 1);
    }

    #[tokio::test]
    async fn test_validate_plugin_without_name() {
        let settings = Settings::from_toml_str(
            r#"
            [[plugins]]
            order = 1
            "#,
        )
        .unwrap();
        assert!(matches!(
            settings.validate().await,
            Err(SettingsError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_tls_without_certificate_source() {
        let settings = Settings::from_toml_str(
            r#"
            [tls]
            enabled = true
            "#,
        )
        .unwrap();
        assert!(settings.validate().await.is_err());
    }

    #[test]
    fn test_host_tls_configs_sorted() {
        let settings = Settings::from_toml_str(
            r#"
            [hosts."b.com"]
            [hosts."a.com"]
            cert_file = "/a/cert.pem"
            key_file = "/a/key.pem"
            "#,
        )
        .unwrap();
        let configs = settings.host_tls_configs();
        assert_eq!(configs[0].host, "a.com");
        assert!(configs[0].cert_file.is_some());
        assert_eq!(configs[1].host, "b.com");
        assert!(configs[1].cert_file.is_none());
    }
}
