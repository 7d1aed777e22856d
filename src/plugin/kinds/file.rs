use std::io;
use std::path::{Component, Path, PathBuf};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Method, StatusCode};
use percent_encoding::percent_decode_str;
use tracing::debug;
use crate::plugin::error::{DecodeError, PluginError};
use crate::plugin::record::RawPlugin;
use crate::plugin::{Base, Context, Handler, Plugin, Response};

const DEFAULT_INDEX: &str = "index.html";

/// 요청 경로를 루트 아래의 상대 경로로 정규화합니다. `..`가 있으면 거부합니다.
pub fn normalize_path(request_path: &str) -> Result<PathBuf, PluginError> {
    let decoded = percent_decode_str(request_path)
        .decode_utf8()
        .map_err(|_| PluginError::status(StatusCode::BAD_REQUEST, "잘못된 경로 인코딩"))?;

    let mut normalized = PathBuf::new();
    for component in Path::new(decoded.trim_matches('/')).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(segment) => normalized.push(segment),
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PluginError::status(StatusCode::FORBIDDEN, "Forbidden"))
            }
        }
    }
    Ok(normalized)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// 파일 내용을 응답으로 만듭니다. HEAD 요청이면 본문을 비웁니다.
async fn file_response(path: &Path, method: &Method) -> Result<Response, PluginError> {
    let body = tokio::fs::read(path).await?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    let length = body.len();
    let body = if method == Method::HEAD { Bytes::new() } else { Bytes::from(body) };
    let mut res = hyper::Response::new(Full::new(body));
    let headers = res.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref()).map_err(hyper::http::Error::from)?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    Ok(res)
}

/// 디렉터리 정적 파일 제공
///
/// 파일이 없으면 다음 핸들러로 넘깁니다. `html5`가 켜져 있으면 대신 루트의
/// 인덱스 파일을 제공합니다.
pub struct Static {
    base: Base,
    root: PathBuf,
    index: String,
    html5: bool,
}

impl Static {
    pub fn new(base: Base) -> Self {
        Self {
            base,
            root: PathBuf::new(),
            index: DEFAULT_INDEX.to_string(),
            html5: false,
        }
    }

    /// 요청 경로에 대응하는 파일. 디렉터리면 인덱스 파일을 찾습니다.
    async fn resolve(&self, request_path: &str) -> Result<Option<PathBuf>, PluginError> {
        let full_path = self.root.join(normalize_path(request_path)?);
        match tokio::fs::metadata(&full_path).await {
            Ok(meta) if meta.is_dir() => {
                let index = full_path.join(&self.index);
                Ok(is_file(&index).await.then_some(index))
            }
            Ok(_) => Ok(Some(full_path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Plugin for Static {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn configure(&mut self, record: &RawPlugin) -> Result<(), DecodeError> {
        if let Some(root) = record.get_str("root")? {
            self.root = PathBuf::from(root);
        }
        if let Some(index) = record.get_str("index")? {
            self.index = index;
        }
        if let Some(html5) = record.get_bool("html5")? {
            self.html5 = html5;
        }
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), PluginError> {
        if self.root.as_os_str().is_empty() {
            return Err(PluginError::initialize(self.base.name(), "root가 필요함"));
        }
        Ok(())
    }

    async fn process(&self, ctx: Context, next: &dyn Handler) -> Result<Response, PluginError> {
        if ctx.method() != Method::GET && ctx.method() != Method::HEAD {
            return next.call(ctx).await;
        }

        if let Some(path) = self.resolve(ctx.path()).await? {
            debug!(path = %path.display(), "정적 파일 제공");
            return file_response(&path, ctx.method()).await;
        }

        if self.html5 {
            let index = self.root.join(&self.index);
            if is_file(&index).await {
                return file_response(&index, ctx.method()).await;
            }
        }
        next.call(ctx).await
    }
}

/// 모든 요청에 같은 파일 하나를 제공
pub struct File {
    base: Base,
    path: PathBuf,
}

impl File {
    pub fn new(base: Base) -> Self {
        Self {
            base,
            path: PathBuf::new(),
        }
    }
}

#[async_trait]
impl Plugin for File {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn configure(&mut self, record: &RawPlugin) -> Result<(), DecodeError> {
        if let Some(path) = record.get_str("path")? {
            self.path = PathBuf::from(path);
        }
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), PluginError> {
        if self.path.as_os_str().is_empty() {
            return Err(PluginError::initialize(self.base.name(), "path가 필요함"));
        }
        Ok(())
    }

    async fn process(&self, ctx: Context, _next: &dyn Handler) -> Result<Response, PluginError> {
        file_response(&self.path, ctx.method()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::kinds::testing::{body_of, echo, request};

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/index.html"), "docs").unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();
        dir
    }

    fn static_plugin(root: &Path, html5: bool) -> Static {
        let mut plugin = Static::new(Base::new("static", 0));
        plugin
            .configure(
                &RawPlugin::new()
                    .with("root", root.to_string_lossy().as_ref())
                    .with("html5", html5),
            )
            .unwrap();
        plugin.initialize().unwrap();
        plugin
    }

    #[test]
    fn test_normalize_rejects_traversal() {
        assert_eq!(normalize_path("/a/./b/").unwrap(), PathBuf::from("a/b"));
        assert_eq!(normalize_path("/a%20b").unwrap(), PathBuf::from("a b"));
        let err = normalize_path("/../etc/passwd").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(normalize_path("/a/%2e%2e/b").is_err());
    }

    #[tokio::test]
    async fn test_serves_files_and_indexes() {
        let dir = site();
        let plugin = static_plugin(dir.path(), false);

        let res = plugin.process(request("GET", "/app.js", &[]), echo().as_ref()).await.unwrap();
        let content_type = res.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(content_type.ends_with("javascript"), "{}", content_type);
        assert_eq!(body_of(res).await, "console.log(1)");

        let res = plugin.process(request("GET", "/docs/", &[]), echo().as_ref()).await.unwrap();
        assert_eq!(body_of(res).await, "docs");
    }

    #[tokio::test]
    async fn test_missing_file_falls_through() {
        let dir = site();
        let plugin = static_plugin(dir.path(), false);
        let res = plugin.process(request("GET", "/nope", &[]), echo().as_ref()).await.unwrap();
        assert_eq!(body_of(res).await, "/nope");

        let plugin = static_plugin(dir.path(), true);
        let res = plugin.process(request("GET", "/app/route", &[]), echo().as_ref()).await.unwrap();
        assert_eq!(body_of(res).await, "<h1>home</h1>");
    }

    #[tokio::test]
    async fn test_file_plugin() {
        let dir = site();
        let mut plugin = File::new(Base::new("file", 0));
        plugin
            .configure(&RawPlugin::new().with("path", dir.path().join("index.html").to_string_lossy().as_ref()))
            .unwrap();
        plugin.initialize().unwrap();

        let res = plugin.process(request("GET", "/anything", &[]), echo().as_ref()).await.unwrap();
        assert_eq!(res.headers()[header::CONTENT_TYPE], "text/html");
    }
}
