use edgeward::plugin::{self, DecodeError, RawPlugin, Registry, Shared};
use serde_json::json;

fn record(value: serde_json::Value) -> RawPlugin {
    serde_json::from_value(value).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_builtin_kinds() {
        let registry = Registry::default();
        for name in [
            plugin::PLUGIN_BODY_LIMIT,
            plugin::PLUGIN_LOGGER,
            plugin::PLUGIN_REDIRECT,
            plugin::PLUGIN_HTTPS_REDIRECT,
            plugin::PLUGIN_HTTPS_WWW_REDIRECT,
            plugin::PLUGIN_HTTPS_NON_WWW_REDIRECT,
            plugin::PLUGIN_WWW_REDIRECT,
            plugin::PLUGIN_NON_WWW_REDIRECT,
            plugin::PLUGIN_ADD_TRAILING_SLASH,
            plugin::PLUGIN_REMOVE_TRAILING_SLASH,
            plugin::PLUGIN_REWRITE,
            plugin::PLUGIN_SECURE,
            plugin::PLUGIN_CORS,
            plugin::PLUGIN_GZIP,
            plugin::PLUGIN_HEADER,
            plugin::PLUGIN_PROXY,
            plugin::PLUGIN_STATIC,
            plugin::PLUGIN_FILE,
        ] {
            assert!(registry.contains(name), "{} 미등록", name);
        }
        assert_eq!(registry.names().len(), 18);
    }

    #[test]
    fn test_decode_sets_base() {
        let registry = Registry::default();
        let plugin = registry
            .decode(
                &record(json!({
                    "name": "secure",
                    "order": 7,
                    "skip": "${path} =~ '^/health'",
                    "x_frame_options": "DENY",
                })),
                &Shared::default(),
            )
            .unwrap();
        assert_eq!(plugin.name(), "secure");
        assert_eq!(plugin.order(), 7);
        assert_eq!(plugin.base().skip().source(), "${path} =~ '^/health'");
    }

    #[test]
    fn test_order_accepts_string() {
        let plugin = Registry::default()
            .decode(&record(json!({"name": "logger", "order": "3"})), &Shared::default())
            .unwrap();
        assert_eq!(plugin.order(), 3);
    }

    #[test]
    fn test_decode_errors() {
        let registry = Registry::default();
        let shared = Shared::default();

        assert!(matches!(
            registry.decode(&record(json!({"order": 1})), &shared),
            Err(DecodeError::MissingName)
        ));
        assert!(matches!(
            registry.decode(&record(json!({"name": "logger"})), &shared),
            Err(DecodeError::MissingOrder)
        ));
        assert!(matches!(
            registry.decode(&record(json!({"name": "teleport", "order": 1})), &shared),
            Err(DecodeError::UnknownPlugin { name }) if name == "teleport"
        ));
        assert!(matches!(
            registry.decode(&record(json!({"name": "body-limit", "order": 1, "limit": ["2M"]})), &shared),
            Err(DecodeError::FieldTypeMismatch { .. })
        ));
        assert!(matches!(
            registry.decode(&record(json!({"name": "redirect", "order": 1, "to": "/x", "code": 200})), &shared),
            Err(DecodeError::InvalidValue { .. })
        ));
        assert!(matches!(
            registry.decode(&record(json!({"name": "logger", "order": 1, "skip": "1 +"})), &shared),
            Err(DecodeError::Expression(_))
        ));
    }

    #[test]
    fn test_unregister() {
        let mut registry = Registry::default();
        assert!(registry.unregister(plugin::PLUGIN_PROXY));
        assert!(!registry.unregister(plugin::PLUGIN_PROXY));
        assert!(matches!(
            registry.decode(
                &record(json!({"name": "proxy", "order": 1, "targets": [{"url": "http://127.0.0.1:1"}]})),
                &Shared::default()
            ),
            Err(DecodeError::UnknownPlugin { .. })
        ));
    }
}
