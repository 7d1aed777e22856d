use async_trait::async_trait;
use regex_lite::{Captures, Regex};
use tracing::debug;
use crate::plugin::error::{DecodeError, PluginError};
use crate::plugin::record::RawPlugin;
use crate::plugin::{Base, Context, Handler, Plugin, Response};

/// 컴파일된 재작성 규칙
#[derive(Debug, Clone)]
struct Rule {
    pattern: Regex,
    replacement: String,
}

impl Rule {
    /// `*`는 임의의 문자열을 캡처하고 나머지는 문자 그대로 비교합니다.
    fn compile(glob: &str, replacement: &str) -> Result<Self, regex_lite::Error> {
        let escaped = regex_lite::escape(glob).replace(r"\*", "(.*?)");
        Ok(Self {
            pattern: Regex::new(&format!("^{}$", escaped))?,
            replacement: replacement.to_string(),
        })
    }

    fn apply(&self, path: &str) -> Option<String> {
        self.pattern.captures(path).map(|caps| expand(&self.replacement, &caps))
    }
}

/// `$1`, `$2` … 를 캡처 값으로 치환합니다.
fn expand(replacement: &str, caps: &Captures<'_>) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut end = i + 1;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = j + d.len_utf8();
            chars.next();
        }
        match replacement[i + 1..end].parse::<usize>() {
            Ok(n) => out.push_str(caps.get(n).map_or("", |m| m.as_str())),
            Err(_) => out.push('$'),
        }
    }
    out
}

/// 경로 재작성
///
/// 규칙은 설정에 적힌 순서로 검사하고 처음 일치한 규칙만 적용합니다.
pub struct Rewrite {
    base: Base,
    rules: Vec<(String, String)>,
    compiled: Vec<Rule>,
}

impl Rewrite {
    pub fn new(base: Base) -> Self {
        Self {
            base,
            rules: Vec::new(),
            compiled: Vec::new(),
        }
    }

    pub fn rewrite(&self, path: &str) -> Option<String> {
        self.compiled.iter().find_map(|rule| rule.apply(path))
    }
}

#[async_trait]
impl Plugin for Rewrite {
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
        if let Some(rules) = record.get_str_map("rules")? {
            self.rules = rules;
        }
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), PluginError> {
        self.compiled = self
            .rules
            .iter()
            .map(|(from, to)| Rule::compile(from, to))
            .collect::<Result<_, _>>()
            .map_err(|e| PluginError::initialize(self.base.name(), e))?;
        Ok(())
    }

    async fn process(&self, mut ctx: Context, next: &dyn Handler) -> Result<Response, PluginError> {
        if let Some(path) = self.rewrite(ctx.path()) {
            debug!(from = %ctx.path(), to = %path, "경로 재작성");
            ctx.set_request_uri(&path)?;
        }
        next.call(ctx).await
    }
}
