use serde::Deserialize;
use std::env;
use std::time::Duration;
use super::SettingsError;

#[derive(Clone, Debug, Deserialize)]
pub struct ServerSettings {
    /// HTTP 포트 (기본값: 80)
    #[serde(default = "default_http_port", alias = "http-port")]
    pub http_port: u16,

    /// 바인딩 주소
    #[serde(default = "default_bind_address", alias = "bind-address")]
    pub bind_address: String,

    /// 요청 헤더를 모두 받을 때까지 기다리는 시간(초). 0이면 제한 없음
    #[serde(default = "default_read_timeout", alias = "read-timeout-secs")]
    pub read_timeout_secs: u64,

    /// 응답을 만들 때까지 기다리는 시간(초). 0이면 제한 없음
    #[serde(default, alias = "write-timeout-secs")]
    pub write_timeout_secs: u64,

    /// 요청 본문 최대 크기(바이트). 0이면 제한 없음
    #[serde(default = "default_max_body_bytes", alias = "max-body-bytes")]
    pub max_body_bytes: u64,
}

fn default_http_port() -> u16 { 80 }
fn default_bind_address() -> String { "0.0.0.0".to_string() }
fn default_read_timeout() -> u64 { 30 }
fn default_max_body_bytes() -> u64 { 10 * 1024 * 1024 }

pub fn parse_env_var<T: std::str::FromStr, F: FnOnce() -> T>(name: &str, default: F) -> Result<T, SettingsError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: val,
            reason: e.to_string(),
        }),
        Err(env::VarError::NotPresent) => Ok(default()),
        Err(e) => Err(SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: "".to_string(),
            reason: e.to_string(),
        }),
    }
}

impl ServerSettings {
    const MIN_PORT: u16 = 1;
    const MAX_PORT: u16 = 65535;

    // 포트 파싱 전용 함수
    pub(crate) fn parse_port(name: &str, value: &str) -> Result<u16, SettingsError> {
        let port = value.parse::<u16>().map_err(|_| SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: value.to_string(),
            reason: format!("포트는 {}-{} 범위여야 합니다", Self::MIN_PORT, Self::MAX_PORT),
        })?;

        if port < Self::MIN_PORT {
            return Err(SettingsError::EnvVarInvalid {
                var_name: name.to_string(),
                value: value.to_string(),
                reason: "포트는 0이 될 수 없습니다".to_string(),
            });
        }

        Ok(port)
    }

    pub fn from_env() -> Result<Self, SettingsError> {
        let http_port = Self::parse_port(
            "EDGEWARD_HTTP_PORT",
            &env::var("EDGEWARD_HTTP_PORT").unwrap_or_else(|_| default_http_port().to_string())
        )?;

        let settings = Self {
            http_port,
            bind_address: env::var("EDGEWARD_BIND_ADDRESS").unwrap_or_else(|_| default_bind_address()),
            read_timeout_secs: parse_env_var("EDGEWARD_READ_TIMEOUT_SECS", default_read_timeout)?,
            write_timeout_secs: parse_env_var("EDGEWARD_WRITE_TIMEOUT_SECS", || 0)?,
            max_body_bytes: parse_env_var("EDGEWARD_MAX_BODY_BYTES", default_max_body_bytes)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.http_port < Self::MIN_PORT {
            return Err(SettingsError::InvalidConfig("server.http_port는 0이 될 수 없습니다".to_string()));
        }
        if self.bind_address.trim().is_empty() {
            return Err(SettingsError::InvalidConfig("server.bind_address가 비어 있습니다".to_string()));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_secs > 0).then(|| Duration::from_secs(self.read_timeout_secs))
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_secs > 0).then(|| Duration::from_secs(self.write_timeout_secs))
    }

    pub fn max_body(&self) -> Option<usize> {
        (self.max_body_bytes > 0).then(|| usize::try_from(self.max_body_bytes).unwrap_or(usize::MAX))
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            bind_address: default_bind_address(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: 0,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}
