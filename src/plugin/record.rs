use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use super::error::DecodeError;

/// 디코딩 전의 플러그인 설정 레코드
///
/// `name`, `order`, `skip` 외의 키는 플러그인 종류별로 해석됩니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawPlugin(Map<String, Value>);

impl RawPlugin {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        // kebab-case와 snake_case 키를 모두 허용
        self.0
            .get(key)
            .or_else(|| self.0.get(&key.replace('_', "-")))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn name(&self) -> Result<&str, DecodeError> {
        self.0
            .get("name")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingName)
    }

    pub fn order(&self) -> Result<i64, DecodeError> {
        match self.0.get("order") {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .ok_or(DecodeError::MissingOrder),
            // 환경 변수나 라벨에서 온 값은 문자열일 수 있음
            Some(Value::String(s)) => s.trim().parse().map_err(|_| DecodeError::MissingOrder),
            _ => Err(DecodeError::MissingOrder),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<Option<String>, DecodeError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(_) => Err(mismatch(key, "string")),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>, DecodeError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| mismatch(key, "integer")),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| mismatch(key, "integer")),
            Some(_) => Err(mismatch(key, "integer")),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, DecodeError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.to_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(mismatch(key, "bool")),
            },
            Some(_) => Err(mismatch(key, "bool")),
        }
    }

    /// 문자열 배열. 쉼표로 구분된 단일 문자열도 허용합니다.
    pub fn get_str_list(&self, key: &str) -> Result<Option<Vec<String>>, DecodeError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
            )),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(String::from).ok_or_else(|| mismatch(key, "string list")))
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(_) => Err(mismatch(key, "string list")),
        }
    }

    /// 문자열 값 테이블
    pub fn get_str_map(&self, key: &str) -> Result<Option<Vec<(String, String)>>, DecodeError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => Ok((k.clone(), s.clone())),
                    Value::Number(n) => Ok((k.clone(), n.to_string())),
                    Value::Bool(b) => Ok((k.clone(), b.to_string())),
                    _ => Err(mismatch(key, "string table")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(_) => Err(mismatch(key, "string table")),
        }
    }

    /// 하위 테이블을 레코드로 꺼냅니다.
    pub fn get_record(&self, key: &str) -> Result<Option<RawPlugin>, DecodeError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(RawPlugin(map.clone()))),
            Some(_) => Err(mismatch(key, "table")),
        }
    }

    /// 테이블 배열을 레코드 목록으로 꺼냅니다.
    pub fn get_records(&self, key: &str) -> Result<Option<Vec<RawPlugin>>, DecodeError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::Object(map) => Ok(RawPlugin(map.clone())),
                    _ => Err(mismatch(key, "table list")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(_) => Err(mismatch(key, "table list")),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// `other`의 최상위 필드로 덮어쓴 새 레코드
    ///
    /// 표기만 다른 키(`max_age`와 `max-age`)는 같은 필드로 보고 대체합니다.
    pub fn merged(&self, other: &RawPlugin) -> RawPlugin {
        let mut map = self.0.clone();
        for (key, value) in &other.0 {
            map.remove(&key.replace('-', "_"));
            map.remove(&key.replace('_', "-"));
            map.insert(key.clone(), value.clone());
        }
        RawPlugin(map)
    }
}

impl From<Map<String, Value>> for RawPlugin {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<HashMap<String, Value>> for RawPlugin {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

fn mismatch(field: &str, expected: &'static str) -> DecodeError {
    DecodeError::FieldTypeMismatch {
        field: field.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawPlugin {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_merged_overrides_top_level_fields() {
        let current = record(json!({
            "name": "cors", "order": 1, "max_age": 60, "allow_origins": ["https://a.com"]
        }));
        let merged = current.merged(&record(json!({"name": "cors", "max-age": 600})));
        assert_eq!(merged.get_int("max_age").unwrap(), Some(600));
        assert!(!merged.keys().any(|k| k == "max_age"));
        assert_eq!(
            merged.get_str_list("allow_origins").unwrap(),
            Some(vec!["https://a.com".to_string()])
        );
        assert_eq!(merged.order().unwrap(), 1);
    }

    #[test]
    fn test_name_and_order() {
        let r = record(json!({"name": "gzip", "order": 3}));
        assert_eq!(r.name().unwrap(), "gzip");
        assert_eq!(r.order().unwrap(), 3);

        let r = record(json!({"name": 5, "order": "x"}));
        assert!(matches!(r.name(), Err(DecodeError::MissingName)));
        assert!(matches!(r.order(), Err(DecodeError::MissingOrder)));
    }

    #[test]
    fn test_typed_getters() {
        let r = record(json!({
            "limit": "2M",
            "level": 5,
            "browse": "true",
            "allow-origins": ["a", "b"],
            "methods": "GET, POST",
            "bad": {"x": 1}
        }));
        assert_eq!(r.get_str("limit").unwrap().as_deref(), Some("2M"));
        assert_eq!(r.get_int("level").unwrap(), Some(5));
        assert_eq!(r.get_bool("browse").unwrap(), Some(true));
        assert_eq!(r.get_str_list("allow_origins").unwrap(), Some(vec!["a".into(), "b".into()]));
        assert_eq!(r.get_str_list("methods").unwrap(), Some(vec!["GET".into(), "POST".into()]));
        assert_eq!(r.get_str("missing").unwrap(), None);
        assert!(matches!(
            r.get_str("bad"),
            Err(DecodeError::FieldTypeMismatch { expected: "string", .. })
        ));
        assert!(r.get_int("limit").is_err());
    }
}
