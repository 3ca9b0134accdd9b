//! Per-run scratch directories.
//!
//! Every run gets a fresh `{base}/{uuid}` directory that is bind-mounted into
//! its container. The directory is removed by [`Workspace::destroy`]; a
//! workspace that is dropped without being destroyed is removed on drop.

use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dsc_types::{DiscoveryError, MountMode, Result, RunFile, Volume};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::object_store::ObjectStore;
use crate::security::validate_relative_path;

pub const DEFAULT_UNIX_PERMISSIONS: u32 = 0o750;
pub const DEFAULT_UID: u32 = 1000;
pub const DEFAULT_GID: u32 = 1000;

/// A file read back from a workspace for inline retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFile {
    /// Path relative to the workspace root.
    pub name: String,
    /// Base64-encoded content.
    pub content: String,
    pub content_type: Option<String>,
}

/// Creates workspaces with a fixed base path and policy.
#[derive(Debug, Clone)]
pub struct WorkspaceFactory {
    base_path: PathBuf,
    mode: MountMode,
    change_owner: bool,
}

impl WorkspaceFactory {
    pub fn new(base_path: impl Into<PathBuf>, mode: MountMode, change_owner: bool) -> Self {
        Self {
            base_path: base_path.into(),
            mode,
            change_owner,
        }
    }

    pub fn create(&self) -> Result<Workspace> {
        Workspace::create(&self.base_path, self.mode, self.change_owner)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

/// An isolated, permission-scoped directory owned by one run.
#[derive(Debug)]
pub struct Workspace {
    id: String,
    root: PathBuf,
    mode: MountMode,
    destroyed: bool,
}

impl Workspace {
    /// Allocate `{base_path}/{uuid}` with mode `0o750`, optionally owned by
    /// `DEFAULT_UID:DEFAULT_GID`.
    pub fn create(base_path: &Path, mode: MountMode, change_owner: bool) -> Result<Self> {
        std::fs::create_dir_all(base_path)
            .map_err(|e| DiscoveryError::workspace(base_path, e))?;
        let base = base_path
            .canonicalize()
            .map_err(|e| DiscoveryError::workspace(base_path, e))?;

        let id = uuid::Uuid::new_v4().to_string();
        let root = base.join(&id);

        std::fs::DirBuilder::new()
            .mode(DEFAULT_UNIX_PERMISSIONS)
            .create(&root)
            .map_err(|e| DiscoveryError::workspace(&root, e))?;

        let workspace = Self {
            id,
            root,
            mode,
            destroyed: false,
        };

        // umask may have narrowed the mode
        std::fs::set_permissions(
            &workspace.root,
            std::fs::Permissions::from_mode(DEFAULT_UNIX_PERMISSIONS),
        )
        .map_err(|e| DiscoveryError::workspace(&workspace.root, e))?;

        if change_owner {
            std::os::unix::fs::chown(&workspace.root, Some(DEFAULT_UID), Some(DEFAULT_GID))
                .map_err(|e| DiscoveryError::workspace(&workspace.root, e))?;
        }

        debug!(id = %workspace.id, root = %workspace.root.display(), "Workspace created");
        Ok(workspace)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_relative_path(path)?;
        Ok(self.root.join(path))
    }

    pub fn write(&self, path: &str, content: impl AsRef<[u8]>) -> Result<()> {
        let full = self.resolve(path)?;
        std::fs::write(&full, content).map_err(|e| DiscoveryError::workspace(&full, e))
    }

    pub fn read(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        std::fs::read_to_string(&full).map_err(|e| DiscoveryError::workspace(&full, e))
    }

    pub fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        std::fs::read(&full).map_err(|e| DiscoveryError::workspace(&full, e))
    }

    pub fn file_exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    pub fn make_dir(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(DEFAULT_UNIX_PERMISSIONS)
            .create(&full)
            .map_err(|e| DiscoveryError::workspace(&full, e))
    }

    /// Every regular file under the root with base64 content, sorted by name.
    pub fn list_files(&self) -> Result<Vec<WorkspaceFile>> {
        self.regular_files()?
            .into_iter()
            .map(|(path, name)| {
                let bytes = std::fs::read(&path).map_err(|e| DiscoveryError::workspace(&path, e))?;
                Ok(WorkspaceFile {
                    content: BASE64.encode(bytes),
                    content_type: guess_content_type(&path),
                    name,
                })
            })
            .collect()
    }

    /// Upload every regular file under `{workspace_id}/{relative_path}`.
    ///
    /// Stops at the first failed upload.
    pub async fn export_to_object_store(&self, store: &dyn ObjectStore) -> Result<Vec<RunFile>> {
        let mut exported = Vec::new();
        for (path, name) in self.regular_files()? {
            let key = format!("{}/{}", self.id, name);
            store.upload(&path, &key).await.map_err(|e| {
                DiscoveryError::Storage(format!(
                    "Failed to upload file {}: {e}",
                    path.display()
                ))
            })?;
            exported.push(RunFile {
                path: key,
                content_type: guess_content_type(&path),
            });
        }
        info!(id = %self.id, count = exported.len(), "Workspace exported");
        Ok(exported)
    }

    pub fn mount(&self) -> Volume {
        Volume {
            host_path: self.root.clone(),
            guest_path: self.root.clone(),
            mode: self.mode,
        }
    }

    /// Recursively remove the workspace root.
    pub fn destroy(mut self) -> Result<()> {
        self.destroyed = true;
        std::fs::remove_dir_all(&self.root).map_err(|e| DiscoveryError::workspace(&self.root, e))?;
        debug!(id = %self.id, "Workspace destroyed");
        Ok(())
    }

    /// `(absolute path, relative name)` of every regular file, sorted.
    /// Symlinks are skipped so a container cannot point an export at host files.
    fn regular_files(&self) -> Result<Vec<(PathBuf, String)>> {
        let mut files = Vec::new();
        collect_files(&self.root, &mut files)?;
        files.sort();
        Ok(files
            .into_iter()
            .map(|path| {
                let name = path
                    .strip_prefix(&self.root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .to_string();
                (path, name)
            })
            .collect())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        warn!(id = %self.id, "Workspace dropped without destroy, removing");
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(id = %self.id, error = %e, "Failed to remove workspace on drop");
            }
        }
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| DiscoveryError::workspace(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| DiscoveryError::workspace(dir, e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| DiscoveryError::workspace(&path, e))?;
        if file_type.is_dir() {
            collect_files(&path, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Guess a MIME type from the file extension.
pub fn guess_content_type(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "txt" | "log" => "text/plain",
        "json" => "application/json",
        "jsonl" => "application/jsonl",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => return None,
    };
    Some(mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    fn setup() -> (tempfile::TempDir, Workspace) {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::create(base.path(), MountMode::ReadWrite, false).unwrap();
        (base, ws)
    }

    #[derive(Default)]
    struct RecordingStore {
        keys: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn upload(&self, _local_path: &Path, object_key: &str) -> Result<()> {
            if self.fail_on.as_deref() == Some(object_key) {
                return Err(DiscoveryError::Storage("bucket unavailable".to_string()));
            }
            self.keys.lock().unwrap().push(object_key.to_string());
            Ok(())
        }
    }

    #[test]
    fn create_workspace() {
        let (_base, ws) = setup();
        assert!(ws.root().exists());
        assert!(ws.root().is_dir());
        let mode = std::fs::metadata(ws.root()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, DEFAULT_UNIX_PERMISSIONS);
    }

    #[test]
    fn workspaces_get_distinct_roots() {
        let base = tempfile::tempdir().unwrap();
        let a = Workspace::create(base.path(), MountMode::ReadWrite, false).unwrap();
        let b = Workspace::create(base.path(), MountMode::ReadWrite, false).unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn write_and_read_file() {
        let (_base, ws) = setup();
        ws.write("testfile.txt", "Hello, World!").unwrap();
        assert_eq!(
            std::fs::read_to_string(ws.root().join("testfile.txt")).unwrap(),
            "Hello, World!"
        );
        assert_eq!(ws.read("testfile.txt").unwrap(), "Hello, World!");
    }

    #[test]
    fn read_bytes() {
        let (_base, ws) = setup();
        std::fs::write(ws.root().join("bin.dat"), b"Hello, Bytes!").unwrap();
        assert_eq!(ws.read_bytes("bin.dat").unwrap(), b"Hello, Bytes!");
    }

    #[test]
    fn read_missing_reports_path() {
        let (_base, ws) = setup();
        let err = ws.read("results.json").unwrap_err();
        assert!(matches!(err, DiscoveryError::Workspace { .. }));
        assert!(err.to_string().contains("results.json"));
    }

    #[test]
    fn escaping_paths_rejected() {
        let (_base, ws) = setup();
        assert!(ws.write("../outside.txt", "x").is_err());
        assert!(ws.read("/etc/passwd").is_err());
        assert!(!ws.file_exists("../"));
    }

    #[test]
    fn make_dir_and_file_exists() {
        let (_base, ws) = setup();
        ws.make_dir("screenshot/nested").unwrap();
        assert!(ws.root().join("screenshot/nested").is_dir());

        ws.write("screenshot/nested/a.png", [0u8, 1, 2]).unwrap();
        assert!(ws.file_exists("screenshot/nested/a.png"));
        assert!(!ws.file_exists("non_existent_file.txt"));
    }

    #[test]
    fn list_files_recursive_base64() {
        let (_base, ws) = setup();
        ws.write("file.txt", "file content").unwrap();
        ws.make_dir("screenshot").unwrap();
        ws.write("screenshot/shot.png", [137u8, 80, 78, 71]).unwrap();

        let files = ws.list_files().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "file.txt");
        assert_eq!(files[0].content, BASE64.encode("file content"));
        assert_eq!(files[0].content_type.as_deref(), Some("text/plain"));
        assert_eq!(files[1].name, "screenshot/shot.png");
        assert_eq!(files[1].content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn list_files_skips_symlinks() {
        let (_base, ws) = setup();
        let outside = tempfile::NamedTempFile::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), ws.root().join("leak.txt")).unwrap();
        assert!(ws.list_files().unwrap().is_empty());
    }

    #[tokio::test]
    async fn export_prefixes_keys_with_workspace_id() {
        let (_base, ws) = setup();
        ws.write("domains.txt", "a.example.com").unwrap();
        ws.make_dir("screenshot").unwrap();
        ws.write("screenshot/a.png", [0u8]).unwrap();

        let store = RecordingStore::default();
        let files = ws.export_to_object_store(&store).await.unwrap();

        assert_eq!(files.len(), 2);
        for file in &files {
            assert!(file.path.starts_with(&format!("{}/", ws.id())));
        }
        assert_eq!(files[0].path, format!("{}/domains.txt", ws.id()));
        assert_eq!(files[0].content_type.as_deref(), Some("text/plain"));
        assert_eq!(store.keys.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn export_empty_workspace_is_empty() {
        let (_base, ws) = setup();
        let store = RecordingStore::default();
        let files = ws.export_to_object_store(&store).await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn export_keeps_dotted_file_names() {
        let (_base, ws) = setup();
        let bucket = tempfile::tempdir().unwrap();
        ws.write("domains.txt", "a.example.com\n").unwrap();
        ws.write("notes..txt", "n").unwrap();

        let store = crate::object_store::LocalObjectStore::new(bucket.path());
        let files = ws.export_to_object_store(&store).await.unwrap();

        assert_eq!(files.len(), 2);
        let key = format!("{}/notes..txt", ws.id());
        assert!(files.iter().any(|f| f.path == key));
        assert_eq!(std::fs::read_to_string(store.object_path(&key)).unwrap(), "n");
        assert_eq!(ws.read("notes..txt").unwrap(), "n");
    }

    #[tokio::test]
    async fn export_aborts_on_failed_upload() {
        let (_base, ws) = setup();
        ws.write("a.txt", "a").unwrap();
        ws.write("b.txt", "b").unwrap();

        let store = RecordingStore {
            fail_on: Some(format!("{}/a.txt", ws.id())),
            ..RecordingStore::default()
        };
        let err = ws.export_to_object_store(&store).await.unwrap_err();
        assert!(err.to_string().contains("a.txt"));
        assert!(store.keys.lock().unwrap().is_empty());
    }

    #[test]
    fn mount_uses_identical_paths() {
        let (_base, ws) = setup();
        let volume = ws.mount();
        assert_eq!(volume.host_path, ws.root());
        assert_eq!(volume.guest_path, ws.root());
        assert_eq!(volume.mode, MountMode::ReadWrite);
    }

    #[test]
    fn destroy_removes_root() {
        let (_base, ws) = setup();
        ws.write("file.txt", "x").unwrap();
        let root = ws.root().to_path_buf();
        ws.destroy().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn drop_without_destroy_removes_root() {
        let (_base, ws) = setup();
        let root = ws.root().to_path_buf();
        drop(ws);
        assert!(!root.exists());
    }

    #[test]
    fn factory_uses_configured_mode() {
        let base = tempfile::tempdir().unwrap();
        let factory = WorkspaceFactory::new(base.path(), MountMode::ReadOnly, false);
        let ws = factory.create().unwrap();
        assert_eq!(ws.mount().mode, MountMode::ReadOnly);
        assert!(ws.root().starts_with(base.path().canonicalize().unwrap()));
    }

    #[test]
    fn content_type_guessing() {
        assert_eq!(
            guess_content_type(Path::new("results.json")).as_deref(),
            Some("application/json")
        );
        assert_eq!(
            guess_content_type(Path::new("SHOT.PNG")).as_deref(),
            Some("image/png")
        );
        assert!(guess_content_type(Path::new("noext")).is_none());
        assert!(guess_content_type(Path::new("file.unknownext")).is_none());
    }
}
