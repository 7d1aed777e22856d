use async_trait::async_trait;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;
use crate::plugin::error::{DecodeError, PluginError};
use crate::plugin::record::RawPlugin;
use crate::plugin::template::Template;
use crate::plugin::{Base, Context, Handler, Plugin, Response};

/// 헤더 수정 작업
#[derive(Debug, Clone, Default)]
pub struct HeaderModification {
    /// 추가할 헤더 (기존 값 유지)
    add: Vec<(HeaderName, Template)>,
    /// 덮어쓸 헤더
    set: Vec<(HeaderName, Template)>,
    /// 삭제할 헤더
    remove: Vec<HeaderName>,
}

impl HeaderModification {
    fn configure(&mut self, section: &str, record: &RawPlugin) -> Result<(), DecodeError> {
        let field = |key: &str| format!("{}.{}", section, key);

        if let Some(add) = record.get_str_map("add")? {
            self.add = templates(&field("add"), add)?;
        }
        if let Some(set) = record.get_str_map("set")? {
            self.set = templates(&field("set"), set)?;
        }
        if let Some(remove) = record.get_str_list("remove")? {
            self.remove = remove
                .iter()
                .map(|name| {
                    HeaderName::from_bytes(name.as_bytes())
                        .map_err(|e| DecodeError::invalid(&field("remove"), e))
                })
                .collect::<Result<_, _>>()?;
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.add.is_empty() && self.set.is_empty() && self.remove.is_empty()
    }

    /// 요청 컨텍스트로 템플릿 값을 렌더링합니다.
    fn render(&self, ctx: &Context) -> Rendered {
        let render_all = |pairs: &[(HeaderName, Template)]| -> Vec<(HeaderName, HeaderValue)> {
            pairs
                .iter()
                .filter_map(|(name, template)| render(ctx, name, template).map(|v| (name.clone(), v)))
                .collect()
        };
        Rendered {
            set: render_all(&self.set),
            add: render_all(&self.add),
        }
    }

    /// `remove` → `set` → `add` 순서로 적용합니다.
    fn apply(&self, rendered: Rendered, headers: &mut HeaderMap) {
        for name in &self.remove {
            headers.remove(name);
        }
        for (name, value) in rendered.set {
            headers.insert(name, value);
        }
        for (name, value) in rendered.add {
            headers.append(name, value);
        }
    }
}

struct Rendered {
    set: Vec<(HeaderName, HeaderValue)>,
    add: Vec<(HeaderName, HeaderValue)>,
}

fn templates(field: &str, pairs: Vec<(String, String)>) -> Result<Vec<(HeaderName, Template)>, DecodeError> {
    pairs
        .into_iter()
        .map(|(name, value)| {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| DecodeError::invalid(field, e))?;
            Ok((name, Template::new(&value)?))
        })
        .collect()
}

fn render(ctx: &Context, name: &HeaderName, template: &Template) -> Option<HeaderValue> {
    match HeaderValue::from_str(&template.render(ctx)) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(header = %name, error = %e, "렌더링된 헤더 값이 올바르지 않음");
            None
        }
    }
}

/// 요청/응답 헤더 수정 플러그인
pub struct Header {
    base: Base,
    request: HeaderModification,
    response: HeaderModification,
}

impl Header {
    pub fn new(base: Base) -> Self {
        Self {
            base,
            request: HeaderModification::default(),
            response: HeaderModification::default(),
        }
    }
}

#[async_trait]
impl Plugin for Header {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn repeatable(&self) -> bool {
        true
    }

    fn configure(&mut self, record: &RawPlugin) -> Result<(), DecodeError> {
        if let Some(section) = record.get_record("request")? {
            self.request.configure("request", &section)?;
        }
        if let Some(section) = record.get_record("response")? {
            self.response.configure("response", &section)?;
        }
        Ok(())
    }

    async fn process(&self, mut ctx: Context, next: &dyn Handler) -> Result<Response, PluginError> {
        if !self.request.is_empty() {
            let rendered = self.request.render(&ctx);
            self.request.apply(rendered, ctx.headers_mut());
        }

        // 응답 헤더 값도 원래 요청 기준으로 렌더링
        let response = (!self.response.is_empty()).then(|| self.response.render(&ctx));

        let mut res = next.call(ctx).await?;
        if let Some(rendered) = response {
            self.response.apply(rendered, res.headers_mut());
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::plugin::kinds::testing::request;
    use crate::plugin::handler_fn;

    fn header(record: serde_json::Value) -> Header {
        let mut plugin = Header::new(Base::new("header", 0));
        plugin.configure(&serde_json::from_value(record).unwrap()).unwrap();
        plugin
    }

    #[tokio::test]
    async fn test_request_and_response_modification() {
        let plugin = header(json!({
            "request": {
                "set": {"X-Forwarded-Method": "${method}"},
                "remove": ["X-Secret"]
            },
            "response": {
                "add": {"X-Served-Path": "${path}"}
            }
        }));

        let next = handler_fn(|ctx: Context| async move {
            assert_eq!(ctx.header("x-forwarded-method"), Some("PUT"));
            assert!(ctx.header("x-secret").is_none());
            Ok(hyper::Response::new(http_body_util::Full::new(bytes::Bytes::new())))
        });

        let ctx = request("PUT", "/items/1", &[("x-secret", "s")]);
        let res = plugin.process(ctx, next.as_ref()).await.unwrap();
        assert_eq!(res.headers()["x-served-path"], "/items/1");
    }

    #[test]
    fn test_invalid_header_name() {
        let mut plugin = Header::new(Base::new("header", 0));
        let record = serde_json::from_value(json!({"request": {"set": {"bad name": "x"}}})).unwrap();
        assert!(matches!(plugin.configure(&record), Err(DecodeError::InvalidValue { .. })));
    }
}
