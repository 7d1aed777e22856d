//! `${tag}` 템플릿 렌더링과 표현식 평가
//!
//! 태그는 요청 컨텍스트에서 값을 찾습니다.
//!
//! | 태그 | 값 |
//! |------|----|
//! | `scheme`, `method`, `uri`, `path` | 요청 필드 |
//! | `header:X` | 요청 헤더 X |
//! | `path:X` | 경로 파라미터 X |
//! | `query:X` | 쿼리 파라미터 X |
//! | `form:X` | 폼 필드 X |
//!
//! 값이 없거나 알 수 없는 태그는 빈 문자열로 치환됩니다.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use super::context::Context;
use super::error::ExpressionError;
use super::expr::{Compiled, RegexCache, Value};

const OPEN: &str = "${";
const CLOSE: &str = "}";

const BUFFER_CAPACITY: usize = 1024;
const MAX_POOLED: usize = 64;
const MAX_RETAINED_CAPACITY: usize = 64 * 1024;

static BUFFER_POOL: BufferPool = BufferPool::new();

/// 렌더링용 문자열 버퍼 풀
struct BufferPool {
    buffers: Mutex<Vec<String>>,
}

impl BufferPool {
    const fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
        }
    }

    fn acquire(&'static self) -> PooledBuffer {
        let buf = self
            .buffers
            .lock()
            .ok()
            .and_then(|mut buffers| buffers.pop())
            .unwrap_or_else(|| String::with_capacity(BUFFER_CAPACITY));
        PooledBuffer { buf, pool: self }
    }

    fn release(&self, mut buf: String) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        if let Ok(mut buffers) = self.buffers.lock() {
            if buffers.len() < MAX_POOLED {
                buffers.push(buf);
            }
        }
    }
}

/// drop 시점에 풀로 반환되는 버퍼
struct PooledBuffer {
    buf: String,
    pool: &'static BufferPool,
}

impl Deref for PooledBuffer {
    type Target = String;

    fn deref(&self) -> &String {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut String {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tag {
    Scheme,
    Method,
    Uri,
    Path,
    Header(String),
    PathParam(String),
    Query(String),
    Form(String),
    Unknown,
}

impl Tag {
    fn parse(tag: &str) -> Self {
        match tag {
            "scheme" => Tag::Scheme,
            "method" => Tag::Method,
            "uri" => Tag::Uri,
            "path" => Tag::Path,
            _ => {
                if let Some(name) = tag.strip_prefix("header:") {
                    Tag::Header(name.to_string())
                } else if let Some(name) = tag.strip_prefix("path:") {
                    Tag::PathParam(name.to_string())
                } else if let Some(name) = tag.strip_prefix("query:") {
                    Tag::Query(name.to_string())
                } else if let Some(name) = tag.strip_prefix("form:") {
                    Tag::Form(name.to_string())
                } else {
                    Tag::Unknown
                }
            }
        }
    }

    fn write_value(&self, ctx: &Context, out: &mut String) {
        match self {
            Tag::Scheme => out.push_str(ctx.scheme().as_str()),
            Tag::Method => out.push_str(ctx.method().as_str()),
            Tag::Uri => out.push_str(ctx.request_uri()),
            Tag::Path => out.push_str(ctx.path()),
            Tag::Header(name) => out.push_str(ctx.header(name).unwrap_or_default()),
            Tag::PathParam(name) => out.push_str(ctx.param(name).unwrap_or_default()),
            Tag::Query(name) => {
                if let Some(v) = ctx.query_param(name) {
                    out.push_str(&v);
                }
            }
            Tag::Form(name) => {
                if let Some(v) = ctx.form_value(name) {
                    out.push_str(&v);
                }
            }
            Tag::Unknown => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Tag(Tag),
}

/// `${tag}` 치환 템플릿
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn new(source: &str) -> Result<Self, ExpressionError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open.find(CLOSE).ok_or(ExpressionError::UnclosedTag {
                position: offset + start,
            })?;
            segments.push(Segment::Tag(Tag::parse(after_open[..end].trim())));

            let consumed = start + OPEN.len() + end + CLOSE.len();
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// 태그가 없는 정적 템플릿인지 여부
    pub fn is_static(&self) -> bool {
        !self.segments.iter().any(|s| matches!(s, Segment::Tag(_)))
    }

    pub fn render(&self, ctx: &Context) -> String {
        if self.is_static() {
            return self.source.clone();
        }
        let mut buf = BUFFER_POOL.acquire();
        self.write(ctx, &mut buf, false);
        buf.as_str().to_owned()
    }

    fn write(&self, ctx: &Context, out: &mut String, quote: bool) {
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Tag(tag) if quote => {
                    let mut raw = BUFFER_POOL.acquire();
                    tag.write_value(ctx, &mut raw);
                    push_quoted(out, &raw);
                }
                Segment::Tag(tag) => tag.write_value(ctx, out),
            }
        }
    }
}

/// 작은따옴표 문자열 리터럴로 이스케이프하여 추가합니다.
fn push_quoted(out: &mut String, value: &str) {
    out.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
}

/// 치환 후 평가되는 표현식
///
/// 치환되는 값은 항상 문자열 리터럴로 인용되므로 값 안의 연산자가
/// 표현식 구문으로 해석되지 않습니다.
#[derive(Debug, Clone)]
pub struct Expression {
    template: Template,
    compiled: Option<Compiled>,
    regexes: Arc<RegexCache>,
}

impl Expression {
    pub fn new(source: &str) -> Result<Self, ExpressionError> {
        let template = Template::new(source)?;
        let compiled = if template.is_static() {
            Some(Compiled::parse(source)?)
        } else {
            None
        };
        Ok(Self {
            template,
            compiled,
            regexes: Arc::new(RegexCache::new()),
        })
    }

    pub fn source(&self) -> &str {
        self.template.source()
    }

    pub fn evaluate(&self, ctx: &Context) -> Result<Value, ExpressionError> {
        if let Some(compiled) = &self.compiled {
            return compiled.evaluate();
        }
        let mut buf = BUFFER_POOL.acquire();
        self.template.write(ctx, &mut buf, true);
        Compiled::parse_with(&buf, &self.regexes)?.evaluate()
    }

    /// 모든 태그를 빈 문자열로 치환했을 때 구문이 올바른지 검사합니다.
    ///
    /// 값에 따라 달라지는 타입 오류는 요청 시점에만 드러나므로 여기서는
    /// 파싱까지만 확인합니다.
    pub fn validate(&self) -> Result<(), ExpressionError> {
        if self.compiled.is_some() {
            return Ok(());
        }
        let empty = Context::new(hyper::Request::new(bytes::Bytes::new()));
        let mut buf = BUFFER_POOL.acquire();
        self.template.write(&empty, &mut buf, true);
        Compiled::parse_with(&buf, &self.regexes).map(|_| ())
    }
}

impl Default for Expression {
    fn default() -> Self {
        Self {
            template: Template {
                source: "false".to_string(),
                segments: vec![Segment::Text("false".to_string())],
            },
            compiled: Some(Compiled::literal(Value::Bool(false))),
            regexes: Arc::new(RegexCache::new()),
        }
    }
}
