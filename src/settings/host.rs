use std::fmt;
use std::path::PathBuf;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use crate::plugin::RawPlugin;
use crate::tls::HostTlsConfig;
use super::SettingsError;

/// 경로 스코프 설정. `[hosts."<name>".paths."<pattern>"]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PathSettings {
    #[serde(default)]
    pub plugins: Vec<RawPlugin>,
}

/// 가상 호스트 설정. `[hosts."<name>"]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HostSettings {
    #[serde(default, alias = "cert-file")]
    pub cert_file: Option<PathBuf>,

    #[serde(default, alias = "key-file")]
    pub key_file: Option<PathBuf>,

    #[serde(default)]
    pub plugins: Vec<RawPlugin>,

    /// 경로 패턴별 플러그인. 설정에 적힌 순서를 유지합니다.
    #[serde(default)]
    pub paths: Paths,
}

impl HostSettings {
    pub fn validate(&self, host: &str) -> Result<(), SettingsError> {
        if host.trim().is_empty() {
            return Err(SettingsError::InvalidConfig("호스트 이름이 비어 있습니다".to_string()));
        }
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(SettingsError::InvalidConfig(format!(
                "hosts.{}: cert_file과 key_file은 함께 지정해야 합니다",
                host
            )));
        }
        for (pattern, path) in self.paths.iter() {
            if !pattern.starts_with('/') {
                return Err(SettingsError::InvalidConfig(format!(
                    "hosts.{}.paths: 경로 패턴은 /로 시작해야 합니다: {}",
                    host, pattern
                )));
            }
            super::validate_plugins(&format!("hosts.{}.paths.{}", host, pattern), &path.plugins)?;
        }
        super::validate_plugins(&format!("hosts.{}", host), &self.plugins)
    }

    pub fn tls_config(&self, host: &str) -> HostTlsConfig {
        HostTlsConfig {
            host: host.to_string(),
            cert_file: self.cert_file.clone(),
            key_file: self.key_file.clone(),
        }
    }
}

/// 순서를 유지하는 경로 패턴 목록
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Paths(Vec<(String, PathSettings)>);

impl Paths {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PathSettings)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, pattern: &str) -> Option<&PathSettings> {
        self.0.iter().find(|(k, _)| k == pattern).map(|(_, v)| v)
    }
}

impl FromIterator<(String, PathSettings)> for Paths {
    fn from_iter<I: IntoIterator<Item = (String, PathSettings)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'de> Deserialize<'de> for Paths {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PathsVisitor;

        impl<'de> Visitor<'de> for PathsVisitor {
            type Value = Paths;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("경로 패턴 테이블")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Paths, A::Error> {
                let mut entries = Vec::new();
                while let Some((pattern, settings)) = map.next_entry::<String, PathSettings>()? {
                    entries.push((pattern, settings));
                }
                Ok(Paths(entries))
            }
        }

        deserializer.deserialize_map(PathsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_keep_order() {
        let host: HostSettings = toml::from_str(
            r#"
            [paths."/b"]
            plugins = [{ name = "logger", order = 1 }]

            [paths."/a/:id"]
            plugins = []
            "#,
        )
        .unwrap();
        let patterns: Vec<&str> = host.paths.iter().map(|(k, _)| k).collect();
        assert_eq!(patterns, vec!["/b", "/a/:id"]);
        assert_eq!(host.paths.get("/b").unwrap().plugins.len(), 1);
    }

    #[test]
    fn test_cert_pair_required() {
        let host = HostSettings {
            cert_file: Some(PathBuf::from("/tmp/cert.pem")),
            ..HostSettings::default()
        };
        assert!(matches!(host.validate("a.com"), Err(SettingsError::InvalidConfig(_))));
    }
}
