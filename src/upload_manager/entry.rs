use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// 遍历期间分配给尚未创建目录的临时 id，仅在一次上传内唯一。
pub type VirtualId = i64;

/// 服务端分配的真实节点 id。
pub type RealId = String;

/// 代表“上传目标目录本身”的虚拟 id，不会为它创建任何目录。
pub const ROOT_VIRTUAL_ID: VirtualId = -1;

/// 以虚拟 id 或真实 id 为 key 的文件列表，列表顺序即遍历顺序。
pub type FileMap<K> = BTreeMap<K, Vec<VirtualFile>>;

#[derive(Clone)]
pub enum FileContent {
    Memory(Bytes),
    Disk(PathBuf),
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileContent::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
            FileContent::Disk(path) => write!(f, "Disk({})", path.display()),
        }
    }
}

/// 已解析完成、等待上传的文件。
#[derive(Clone, Debug)]
pub struct VirtualFile {
    pub name: String,
    pub size: u64,
    /// 毫秒时间戳。
    pub last_modified: i64,
    pub content: FileContent,
}

impl VirtualFile {
    pub fn from_bytes(
        name: impl Into<String>,
        bytes: impl Into<Bytes>,
        last_modified: i64,
    ) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            last_modified,
            content: FileContent::Memory(bytes),
        }
    }

    /// 读取磁盘元数据构造文件描述，不读取内容。
    pub async fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Self {
            name: display_name(path),
            size: metadata.len(),
            last_modified: metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|duration| duration.as_millis() as i64)
                .unwrap_or_default(),
            content: FileContent::Disk(path.to_path_buf()),
        })
    }

    /// 去重使用的身份：同一父目录下 (name, size, lastModified) 相同即视为同一文件。
    pub fn same_identity(&self, other: &VirtualFile) -> bool {
        self.name == other.name
            && self.size == other.size
            && self.last_modified == other.last_modified
    }

    /// 过滤伪装成文件的目录以及已经失效的磁盘句柄。
    pub async fn is_genuine_file(&self) -> bool {
        match &self.content {
            FileContent::Memory(_) => true,
            FileContent::Disk(path) => tokio::fs::metadata(path)
                .await
                .map(|metadata| metadata.is_file())
                .unwrap_or(false),
        }
    }
}

/// 遍历得到的虚拟目录记录。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDirectory {
    pub virtual_id: VirtualId,
    pub parent_virtual_id: VirtualId,
    pub name: String,
}

#[async_trait]
pub trait FileEntry: Send + Sync {
    fn name(&self) -> &str;

    /// 返回 None 表示该条目无法解析，调用方会直接跳过。
    async fn resolve(&self) -> Option<VirtualFile>;
}

#[async_trait]
pub trait DirectoryEntry: Send + Sync {
    fn name(&self) -> &str;

    async fn read_entries(&self) -> io::Result<Vec<DropEntry>>;
}

/// 拖放条目：文件还是目录在构造时确定一次，遍历时只做穷举匹配。
#[derive(Clone)]
pub enum DropEntry {
    File(Arc<dyn FileEntry>),
    Directory(Arc<dyn DirectoryEntry>),
}

impl fmt::Debug for DropEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropEntry::File(file) => write!(f, "File({})", file.name()),
            DropEntry::Directory(dir) => write!(f, "Directory({})", dir.name()),
        }
    }
}

impl DropEntry {
    pub fn name(&self) -> &str {
        match self {
            DropEntry::File(file) => file.name(),
            DropEntry::Directory(dir) => dir.name(),
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        let name = display_name(path);
        let entry = if metadata.is_dir() {
            DropEntry::Directory(Arc::new(LocalDirectoryEntry {
                path: path.to_path_buf(),
                name,
            }))
        } else {
            DropEntry::File(Arc::new(LocalFileEntry {
                path: path.to_path_buf(),
                name,
            }))
        };
        Ok(entry)
    }

    pub fn memory_file(file: VirtualFile) -> Self {
        DropEntry::File(Arc::new(MemoryFileEntry { file }))
    }

    pub fn memory_directory(name: impl Into<String>, children: Vec<DropEntry>) -> Self {
        DropEntry::Directory(Arc::new(MemoryDirectoryEntry {
            name: name.into(),
            children,
        }))
    }
}

/// UI 层交给上传流程的原始拖放数据。
/// `entries == None` 表示运行环境不支持目录拖放，所有对象都作为平铺文件处理。
#[derive(Clone, Debug, Default)]
pub struct DropPayload {
    pub files: Vec<VirtualFile>,
    pub entries: Option<Vec<DropEntry>>,
}

impl DropPayload {
    pub fn flat(files: Vec<VirtualFile>) -> Self {
        Self {
            files,
            entries: None,
        }
    }

    pub fn with_entries(files: Vec<VirtualFile>, entries: Vec<DropEntry>) -> Self {
        Self {
            files,
            entries: Some(entries),
        }
    }

    /// 桌面端拖放：每个路径都变成一个条目；无法访问的路径记录日志后忽略。
    pub async fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Self {
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            match DropEntry::from_path(path).await {
                Ok(entry) => entries.push(entry),
                Err(err) => tracing::warn!(
                    path = %path.as_ref().display(),
                    "ignoring dropped path: {err}"
                ),
            }
        }
        Self::with_entries(Vec::new(), entries)
    }

    /// 是否需要走目录遍历流程。
    pub(crate) fn has_tree_entries(&self) -> bool {
        self.entries.as_ref().is_some_and(|entries| !entries.is_empty())
    }
}

struct LocalFileEntry {
    path: PathBuf,
    name: String,
}

#[async_trait]
impl FileEntry for LocalFileEntry {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self) -> Option<VirtualFile> {
        match VirtualFile::from_path(&self.path).await {
            Ok(file) => Some(file),
            Err(err) => {
                tracing::debug!(path = %self.path.display(), "file entry did not resolve: {err}");
                None
            }
        }
    }
}

struct LocalDirectoryEntry {
    path: PathBuf,
    name: String,
}

#[async_trait]
impl DirectoryEntry for LocalDirectoryEntry {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_entries(&self) -> io::Result<Vec<DropEntry>> {
        let mut reader = tokio::fs::read_dir(&self.path).await?;
        let mut paths = Vec::new();
        while let Some(child) = reader.next_entry().await? {
            paths.push(child.path());
        }
        // read_dir 的顺序与平台相关，按名称排序保证遍历顺序稳定。
        paths.sort();

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            match DropEntry::from_path(&path).await {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    tracing::debug!(path = %path.display(), "skipping unreadable entry: {err}")
                }
            }
        }
        Ok(entries)
    }
}

struct MemoryFileEntry {
    file: VirtualFile,
}

#[async_trait]
impl FileEntry for MemoryFileEntry {
    fn name(&self) -> &str {
        &self.file.name
    }

    async fn resolve(&self) -> Option<VirtualFile> {
        Some(self.file.clone())
    }
}

struct MemoryDirectoryEntry {
    name: String,
    children: Vec<DropEntry>,
}

#[async_trait]
impl DirectoryEntry for MemoryDirectoryEntry {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_entries(&self) -> io::Result<Vec<DropEntry>> {
        Ok(self.children.clone())
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_content() {
        let a = VirtualFile::from_bytes("a.txt", b"hello".to_vec(), 10);
        let b = VirtualFile::from_bytes("a.txt", b"world".to_vec(), 10);
        let c = VirtualFile::from_bytes("a.txt", b"world".to_vec(), 11);
        assert!(a.same_identity(&b));
        assert!(!a.same_identity(&c));
    }

    #[tokio::test]
    async fn local_paths_are_classified_once() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("note.txt");
        std::fs::write(&file_path, "abc").unwrap();

        let file_entry = DropEntry::from_path(&file_path).await.unwrap();
        let dir_entry = DropEntry::from_path(dir.path()).await.unwrap();
        assert!(matches!(file_entry, DropEntry::File(_)));
        assert!(matches!(dir_entry, DropEntry::Directory(_)));
        assert_eq!(file_entry.name(), "note.txt");

        let DropEntry::File(file) = file_entry else {
            unreachable!()
        };
        let resolved = file.resolve().await.unwrap();
        assert_eq!(resolved.size, 3);
        assert!(resolved.is_genuine_file().await);
    }

    #[tokio::test]
    async fn directory_handle_is_not_a_genuine_file() {
        let dir = tempfile::tempdir().unwrap();
        let fake = VirtualFile {
            name: "folder".to_string(),
            size: 4096,
            last_modified: 0,
            content: FileContent::Disk(dir.path().to_path_buf()),
        };
        assert!(!fake.is_genuine_file().await);

        let stale = VirtualFile {
            content: FileContent::Disk(dir.path().join("gone.bin")),
            ..fake
        };
        assert!(!stale.is_genuine_file().await);
    }

    #[tokio::test]
    async fn unreadable_paths_are_dropped_from_payload() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("a.txt");
        std::fs::write(&existing, "a").unwrap();
        let missing = dir.path().join("missing.txt");

        let payload = DropPayload::from_paths(&[existing, missing]).await;
        let entries = payload.entries.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), "a.txt");
    }
}
