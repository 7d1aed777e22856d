use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Result as NotifyResult, Watcher};
use crate::settings::{Result, error::SettingsError};
use tracing::{debug, error};

/// 설정 파일 변경 이벤트 타입
#[derive(Debug, PartialEq, Clone)]
pub enum ConfigEvent {
    /// 파일이 수정됨
    Modified(PathBuf),
    /// 파일이 생성됨
    Created(PathBuf),
    /// 파일이 삭제됨
    Deleted(PathBuf),
}

impl ConfigEvent {
    pub fn path(&self) -> &Path {
        match self {
            ConfigEvent::Modified(path) | ConfigEvent::Created(path) | ConfigEvent::Deleted(path) => path,
        }
    }

    fn from_kind(kind: &EventKind, path: PathBuf) -> Option<Self> {
        match kind {
            EventKind::Modify(_) => Some(ConfigEvent::Modified(path)),
            EventKind::Create(_) => Some(ConfigEvent::Created(path)),
            EventKind::Remove(_) => Some(ConfigEvent::Deleted(path)),
            _ => None,
        }
    }
}

/// 설정 파일 감시자
///
/// 편집기가 파일을 교체하는 경우에도 이벤트를 받도록 파일이 아닌 상위
/// 디렉터리를 감시하고, 등록된 파일 이름의 이벤트만 전달합니다.
pub struct ConfigWatcher {
    /// 감시할 파일 경로 목록
    paths: Vec<PathBuf>,
    /// 이벤트 송신자
    event_tx: mpsc::Sender<ConfigEvent>,
    /// 이벤트 수신자
    event_rx: mpsc::Receiver<ConfigEvent>,
    /// 파일 시스템 감시자
    watcher: Option<RecommendedWatcher>,
}

impl ConfigWatcher {
    /// 새로운 ConfigWatcher 인스턴스 생성
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel(32);
        Self {
            paths: Vec::new(),
            event_tx,
            event_rx,
            watcher: None,
        }
    }

    /// 감시할 파일 추가
    pub fn add_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.paths.push(path.into());
    }

    /// 테스트용 이벤트 송신자 반환
    #[cfg(test)]
    pub fn get_sender(&self) -> mpsc::Sender<ConfigEvent> {
        self.event_tx.clone()
    }

    /// 감시 시작
    pub fn start(&mut self) -> Result<()> {
        let event_tx = self.event_tx.clone();
        let targets: Vec<PathBuf> = self.paths.clone();

        // notify의 이벤트를 ConfigEvent로 변환하여 채널로 전송하는 핸들러
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res: NotifyResult<Event>| {
            match res {
                Ok(event) => {
                    for path in event.paths {
                        if !targets.iter().any(|t| t.file_name() == path.file_name()) {
                            continue;
                        }
                        if let Some(config_event) = ConfigEvent::from_kind(&event.kind, path) {
                            debug!(event = ?config_event, "설정 파일 이벤트");
                            // 가득 찬 경우 이미 대기 중인 이벤트가 있으므로 버려도 됨
                            let _ = event_tx.try_send(config_event);
                        }
                    }
                }
                Err(e) => error!("감시 오류: {}", e),
            }
        }).map_err(|e| SettingsError::WatchError(e.to_string()))?;

        for path in &self.paths {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            debug!("경로 감시 시작: {}", dir.display());
            watcher.watch(dir, RecursiveMode::NonRecursive)
                .map_err(|e| SettingsError::WatchError(e.to_string()))?;
        }

        self.watcher = Some(watcher);
        Ok(())
    }

    /// 이벤트 수신 대기
    pub async fn watch(&mut self) -> Option<ConfigEvent> {
        self.event_rx.recv().await
    }

    /// 이미 쌓인 이벤트를 모두 비웁니다. 저장 한 번에 여러 이벤트가 오는 경우에 사용합니다.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while self.event_rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}

impl Default for ConfigWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_config_watcher() {
        let mut watcher = ConfigWatcher::new();
        let tx = watcher.get_sender();
        let test_path = Path::new("/etc/edgeward/config.toml").to_path_buf();

        tx.send(ConfigEvent::Created(test_path.clone())).await.unwrap();

        match watcher.watch().await {
            Some(event) => {
                assert_eq!(event.path(), test_path.as_path());
                assert_eq!(event, ConfigEvent::Created(test_path));
            }
            None => panic!("이벤트를 받지 못했습니다"),
        }
    }

    #[tokio::test]
    async fn test_drain() {
        let mut watcher = ConfigWatcher::new();
        let tx = watcher.get_sender();
        let test_path = Path::new("/etc/edgeward/config.toml").to_path_buf();

        for event in [
            ConfigEvent::Created(test_path.clone()),
            ConfigEvent::Modified(test_path.clone()),
            ConfigEvent::Modified(test_path),
        ] {
            tx.send(event).await.unwrap();
        }

        assert!(watcher.watch().await.is_some());
        assert_eq!(watcher.drain(), 2);
    }
}
