use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use super::error::{PipelineError, PluginError};
use super::record::RawPlugin;
use super::registry::{Registry, Shared};
use super::{Context, Handler, Plugin, Response};

/// 초기화가 끝난 플러그인과 그 플러그인을 만든 (병합된) 레코드
struct Installed {
    plugin: Box<dyn Plugin>,
    record: RawPlugin,
}

type Slot = Arc<RwLock<Arc<Installed>>>;

struct Entry {
    name: String,
    order: i64,
    slot: Slot,
}

/// 스코프(전역, 가상 호스트, 경로) 하나에 속한 초기화된 플러그인 목록
///
/// 항목은 `order` 오름차순이며, 같은 `order`는 설정에 적힌 순서를 유지합니다.
/// 갱신은 새 인스턴스를 만들어 검증한 뒤 슬롯을 바꿔 끼웁니다. 진행 중인 요청은
/// 이전 인스턴스로 끝나고, 이후 요청부터 새 인스턴스를 씁니다.
pub struct Pipeline {
    scope: String,
    entries: Vec<Entry>,
    registry: Registry,
    shared: Shared,
    updating: Mutex<()>,
}

impl Pipeline {
    pub fn empty(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            entries: Vec::new(),
            registry: Registry::empty(),
            shared: Shared::default(),
            updating: Mutex::new(()),
        }
    }

    /// 레코드를 디코딩하고 정렬한 뒤 각 플러그인을 초기화합니다.
    ///
    /// 하나라도 실패하면 파이프라인 전체가 만들어지지 않습니다.
    pub fn build(
        scope: impl Into<String>,
        records: &[RawPlugin],
        registry: &Registry,
        shared: &Shared,
    ) -> Result<Self, PipelineError> {
        let scope = scope.into();

        let mut plugins = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                registry
                    .decode(record, shared)
                    .map(|plugin| (plugin, record.clone()))
                    .map_err(|source| PipelineError::Decode { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // sort_by_key는 안정 정렬
        plugins.sort_by_key(|(p, _)| p.order());

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(plugins.len());
        for (mut plugin, record) in plugins {
            let name = plugin.name().to_string();
            if !seen.insert(name.clone()) && !plugin.repeatable() {
                return Err(PipelineError::Duplicate { name, scope });
            }
            ready(plugin.as_mut())?;

            debug!(scope = %scope, plugin = %name, order = plugin.order(), "플러그인 등록");
            entries.push(Entry {
                order: plugin.order(),
                name,
                slot: Arc::new(RwLock::new(Arc::new(Installed { plugin, record }))),
            });
        }

        Ok(Self {
            scope,
            entries,
            registry: registry.clone(),
            shared: shared.clone(),
            updating: Mutex::new(()),
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 실행 순서대로의 플러그인 이름
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// 실행 순서대로의 (이름, 순서) 목록
    pub fn shape(&self) -> Vec<(&str, i64)> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.order))
            .collect()
    }

    /// 최종 핸들러를 감싼 핸들러를 돌려줍니다. 가장 작은 `order`가 가장 바깥입니다.
    pub fn process(&self, final_handler: Arc<dyn Handler>) -> Arc<dyn Handler> {
        self.entries.iter().rev().fold(final_handler, |next, entry| {
            Arc::new(PluginHandler {
                name: entry.name.clone(),
                slot: entry.slot.clone(),
                next,
            })
        })
    }

    /// 이름이 같은 첫 번째 플러그인에 레코드의 필드를 병합합니다.
    ///
    /// 이름과 순서는 유지되며, 레코드에 없는 필드는 이전 값을 그대로 둡니다.
    /// 병합 결과가 초기화나 검증에 실패하면 기존 인스턴스가 그대로 남습니다.
    pub async fn update(&self, record: &RawPlugin) -> Result<(), PipelineError> {
        let name = record
            .name()
            .map_err(|source| PipelineError::Decode { index: 0, source })?;
        let index = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| PipelineError::NotFound {
                name: name.to_string(),
                scope: self.scope.clone(),
            })?;

        let _updating = self.updating.lock().await;
        let installed = self.prepare(index, record)?;
        self.swap(index, Arc::new(installed));
        Ok(())
    }

    /// 레코드 목록이 현재와 같은 모양(이름과 순서)이면 위치별로 병합하고 `true`를
    /// 돌려줍니다. 모양이 다르면 `false`, 어느 하나라도 실패하면 에러이며 두 경우
    /// 모두 아무것도 바뀌지 않습니다.
    pub async fn reconfigure(&self, records: &[RawPlugin]) -> Result<bool, PipelineError> {
        match self.stage(records).await? {
            Some(staged) => {
                staged.commit();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 병합한 새 인스턴스를 모두 만들고 검증만 해 둡니다. 반영은
    /// [`Staged::commit`]에서 한 번에 이뤄집니다.
    ///
    /// 모양이 다르면 `None`입니다. 돌려받은 값이 살아 있는 동안 이 파이프라인의
    /// 다른 갱신은 기다립니다.
    pub async fn stage(&self, records: &[RawPlugin]) -> Result<Option<Staged<'_>>, PipelineError> {
        let mut keyed = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let key = record
                    .name()
                    .and_then(|name| Ok((name, record.order()?)))
                    .map_err(|source| PipelineError::Decode { index, source })?;
                Ok((key, record))
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;
        keyed.sort_by_key(|((_, order), _)| *order);

        let incoming: Vec<(&str, i64)> = keyed.iter().map(|(key, _)| *key).collect();
        if incoming != self.shape() {
            return Ok(None);
        }

        let updating = self.updating.lock().await;
        let installed = keyed
            .into_iter()
            .enumerate()
            .map(|(index, (_, record))| self.prepare(index, record).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Staged {
            pipeline: self,
            installed,
            _updating: updating,
        }))
    }

    fn installed(&self, index: usize) -> Arc<Installed> {
        self.entries[index]
            .slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 현재 레코드에 `record`를 병합해 새 인스턴스를 만들고 초기화합니다.
    fn prepare(&self, index: usize, record: &RawPlugin) -> Result<Installed, PipelineError> {
        let entry = &self.entries[index];
        let record = self
            .installed(index)
            .record
            .merged(record)
            .with("name", entry.name.as_str())
            .with("order", entry.order);

        let mut plugin = self
            .registry
            .decode(&record, &self.shared)
            .map_err(|source| PipelineError::Decode { index, source })?;
        ready(plugin.as_mut())?;
        Ok(Installed { plugin, record })
    }

    fn swap(&self, index: usize, installed: Arc<Installed>) {
        let entry = &self.entries[index];
        *entry.slot.write().unwrap_or_else(PoisonError::into_inner) = installed;
        debug!(scope = %self.scope, plugin = %entry.name, "플러그인 병합 완료");
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("scope", &self.scope)
            .field("plugins", &self.shape())
            .finish()
    }
}

/// 검증을 마치고 반영을 기다리는 파이프라인 갱신
pub struct Staged<'a> {
    pipeline: &'a Pipeline,
    installed: Vec<Arc<Installed>>,
    _updating: MutexGuard<'a, ()>,
}

impl Staged<'_> {
    pub fn commit(self) {
        let pipeline = self.pipeline;
        let count = self.installed.len();
        for (index, installed) in self.installed.into_iter().enumerate() {
            pipeline.swap(index, installed);
        }
        info!(scope = %pipeline.scope, plugins = count, "플러그인 설정 갱신");
    }
}

/// 새로 디코딩한 플러그인을 초기화하고 skip 표현식을 검사합니다.
fn ready(plugin: &mut dyn Plugin) -> Result<(), PipelineError> {
    let name = plugin.name().to_string();
    plugin
        .initialize()
        .map_err(|source| PipelineError::Initialize {
            name: name.clone(),
            source,
        })?;
    plugin
        .base()
        .skip()
        .validate()
        .map_err(|source| PipelineError::Skip { name, source })
}

/// 플러그인 하나와 그 다음 핸들러
struct PluginHandler {
    name: String,
    slot: Slot,
    next: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for PluginHandler {
    async fn call(&self, ctx: Context) -> Result<Response, PluginError> {
        // 잠금은 인스턴스를 꺼내는 동안만
        let installed = self.slot.read().unwrap_or_else(PoisonError::into_inner).clone();
        let plugin = &installed.plugin;

        match plugin.base().skip().evaluate(&ctx) {
            Ok(value) if value.is_truthy() => return self.next.call(ctx).await,
            Ok(_) => {}
            Err(e) => {
                // 요청 시점 평가 실패는 건너뛰지 않음으로 처리
                warn!(plugin = %self.name, error = %e, "skip 표현식 평가 실패");
            }
        }

        plugin.process(ctx, self.next.as_ref()).await
    }
}
