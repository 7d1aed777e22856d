use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use async_trait::async_trait;
use hyper::StatusCode;
use tracing::{debug, info};
use crate::plugin::context::text_response;
use crate::plugin::{Context, Handler, Pipeline, PluginError, RawPlugin, Registry, Response, Shared};
use crate::settings::Settings;
use super::error::Error;
use super::Result;

pub const GLOBAL_SCOPE: &str = "global";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// 경로 스코프 패턴
///
/// 리터럴 세그먼트, `:name` 파라미터, 마지막 자리의 `*`로 이뤄집니다.
/// 요청 경로의 앞부분과 일치하면 매칭되며, 세그먼트가 많은 패턴이 우선합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    wildcard: bool,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        if !pattern.starts_with('/') {
            return Err(Error::Config(format!("경로 패턴은 /로 시작해야 합니다: {}", pattern)));
        }

        let parts: Vec<&str> = split_path(pattern).collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut wildcard = false;

        for (i, part) in parts.iter().enumerate() {
            if *part == "*" {
                if i + 1 != parts.len() {
                    return Err(Error::Config(format!("*는 패턴 마지막에만 올 수 있습니다: {}", pattern)));
                }
                wildcard = true;
            } else if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(Error::Config(format!("파라미터 이름이 비어 있습니다: {}", pattern)));
                }
                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
            wildcard,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// 우선순위 점수. 고정된 세그먼트 수
    pub fn specificity(&self) -> usize {
        self.segments.len()
    }

    /// 일치하면 추출한 파라미터를 돌려줍니다. `*`의 나머지 경로는 `*` 이름으로 담깁니다.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let parts: Vec<&str> = split_path(path).collect();
        if parts.len() < self.segments.len() {
            return None;
        }

        let mut params = Vec::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => params.push((name.clone(), part.to_string())),
            }
        }
        if self.wildcard {
            params.push(("*".to_string(), parts[self.segments.len()..].join("/")));
        }
        Some(params)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

struct NotFound;

#[async_trait]
impl Handler for NotFound {
    async fn call(&self, ctx: Context) -> std::result::Result<Response, PluginError> {
        debug!(host = %ctx.host(), path = %ctx.path(), "일치하는 라우트 없음");
        Ok(text_response(StatusCode::NOT_FOUND, "Not Found"))
    }
}

/// 경로 스코프 선택
struct PathDispatch {
    paths: Vec<(PathPattern, Arc<dyn Handler>)>,
    fallback: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for PathDispatch {
    async fn call(&self, mut ctx: Context) -> std::result::Result<Response, PluginError> {
        let mut best: Option<(&PathPattern, &Arc<dyn Handler>, Vec<(String, String)>)> = None;
        for (pattern, handler) in &self.paths {
            if let Some(params) = pattern.matches(ctx.path()) {
                // 같은 점수면 먼저 선언된 패턴
                if best.as_ref().map_or(true, |(b, _, _)| pattern.specificity() > b.specificity()) {
                    best = Some((pattern, handler, params));
                }
            }
        }

        match best {
            Some((pattern, handler, params)) => {
                debug!(pattern = %pattern, path = %ctx.path(), "경로 스코프 선택");
                for (name, value) in params {
                    ctx.set_param(name, value);
                }
                handler.call(ctx).await
            }
            None => self.fallback.call(ctx).await,
        }
    }
}

/// 가상 호스트 선택
struct HostDispatch {
    hosts: HashMap<String, Arc<dyn Handler>>,
    fallback: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for HostDispatch {
    async fn call(&self, ctx: Context) -> std::result::Result<Response, PluginError> {
        let host = ctx.host().to_ascii_lowercase();
        match self.hosts.get(&host) {
            Some(handler) => handler.call(ctx).await,
            None => self.fallback.call(ctx).await,
        }
    }
}

/// 설정에 나타난 스코프와 레코드. 전역, 호스트 이름 순, 호스트 안의 경로는 설정 순
fn scopes(settings: &Settings) -> Vec<(String, &[RawPlugin])> {
    let mut hosts: Vec<&String> = settings.hosts.keys().collect();
    hosts.sort();

    let mut scopes = vec![(GLOBAL_SCOPE.to_string(), settings.plugins.as_slice())];
    for name in hosts {
        let host = &settings.hosts[name];
        scopes.push((host_scope(name), host.plugins.as_slice()));
        for (pattern, path) in host.paths.iter() {
            scopes.push((path_scope(name, pattern), path.plugins.as_slice()));
        }
    }
    scopes
}

fn host_scope(host: &str) -> String {
    format!("host:{}", host.to_ascii_lowercase())
}

fn path_scope(host: &str, pattern: &str) -> String {
    format!("host:{}:path:{}", host.to_ascii_lowercase(), pattern)
}

/// 레코드를 파이프라인과 같은 방식(안정 정렬)으로 줄 세운 이름/순서 목록
fn record_shape(records: &[RawPlugin]) -> Option<Vec<(String, i64)>> {
    let mut shape = records
        .iter()
        .map(|r| Some((r.name().ok()?.to_string(), r.order().ok()?)))
        .collect::<Option<Vec<_>>>()?;
    shape.sort_by_key(|(_, order)| *order);
    Some(shape)
}

/// 요청 라우팅 트리
///
/// 전역 파이프라인 → 가상 호스트 → 호스트 파이프라인 → 경로 스코프 파이프라인
/// → 404 순서로 요청이 흐릅니다. 트리는 불변이며 재구성 시 통째로 교체됩니다.
pub struct Routes {
    root: Arc<dyn Handler>,
    pipelines: Vec<Pipeline>,
}

impl Routes {
    pub fn build(settings: &Settings, registry: &Registry, shared: &Shared) -> Result<Self> {
        let not_found: Arc<dyn Handler> = Arc::new(NotFound);
        let mut pipelines = Vec::new();
        let mut hosts: HashMap<String, Arc<dyn Handler>> = HashMap::new();

        let mut names: Vec<&String> = settings.hosts.keys().collect();
        names.sort();
        for name in names {
            let host = &settings.hosts[name];

            let mut paths = Vec::with_capacity(host.paths.len());
            let mut path_pipelines = Vec::with_capacity(host.paths.len());
            for (pattern, path) in host.paths.iter() {
                let parsed = PathPattern::parse(pattern)?;
                let pipeline = Pipeline::build(path_scope(name, pattern), &path.plugins, registry, shared)?;
                paths.push((parsed, pipeline.process(not_found.clone())));
                path_pipelines.push(pipeline);
            }

            let dispatch: Arc<dyn Handler> = Arc::new(PathDispatch {
                paths,
                fallback: not_found.clone(),
            });
            let pipeline = Pipeline::build(host_scope(name), &host.plugins, registry, shared)?;
            hosts.insert(name.to_ascii_lowercase(), pipeline.process(dispatch));
            pipelines.push(pipeline);
            pipelines.extend(path_pipelines);
        }

        let global = Pipeline::build(GLOBAL_SCOPE, &settings.plugins, registry, shared)?;
        let root = global.process(Arc::new(HostDispatch {
            hosts,
            fallback: not_found,
        }));
        pipelines.insert(0, global);

        info!(
            scopes = pipelines.len(),
            plugins = pipelines.iter().map(Pipeline::len).sum::<usize>(),
            "라우팅 트리 구성"
        );
        Ok(Self { root, pipelines })
    }

    pub fn handler(&self) -> Arc<dyn Handler> {
        self.root.clone()
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn pipeline(&self, scope: &str) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.scope() == scope)
    }

    /// 모든 스코프가 같은 이름의 플러그인을 같은 순서로 갖는지 확인합니다.
    pub fn same_shape(&self, settings: &Settings) -> bool {
        let scopes = scopes(settings);
        if scopes.len() != self.pipelines.len() {
            return false;
        }

        scopes.iter().zip(&self.pipelines).all(|((scope, records), pipeline)| {
            if scope != pipeline.scope() {
                return false;
            }
            let current: Vec<(String, i64)> = pipeline
                .shape()
                .into_iter()
                .map(|(name, order)| (name.to_string(), order))
                .collect();
            record_shape(records).map_or(false, |shape| shape == current)
        })
    }

    /// 구조가 같으면 플러그인을 제자리에서 갱신하고 `true`를 돌려줍니다.
    /// 구조가 다르면 `false`, 어느 스코프든 병합에 실패하면 에러이며 두 경우 모두
    /// 아무것도 바꾸지 않습니다.
    pub async fn reconfigure(&self, settings: &Settings) -> Result<bool> {
        if !self.same_shape(settings) {
            return Ok(false);
        }

        // 모든 스코프를 검증한 뒤에 한꺼번에 반영
        let scopes = scopes(settings);
        let mut staged = Vec::with_capacity(self.pipelines.len());
        for ((_, records), pipeline) in scopes.iter().zip(&self.pipelines) {
            match pipeline.stage(records).await? {
                Some(update) => staged.push(update),
                None => return Ok(false),
            }
        }
        for update in staged {
            update.commit();
        }
        Ok(true)
    }
}
