use super::entry::{
    DropEntry, FileMap, VirtualDirectory, VirtualFile, VirtualId, ROOT_VIRTUAL_ID,
};
use super::progress::recover_lock;
use futures::future::{join_all, BoxFuture, FutureExt};
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Mutex,
};

/// 目录树遍历结果：按虚拟父目录分组的文件，以及后序排列的目录列表。
#[derive(Debug, Default)]
pub struct ResolvedTree {
    pub file_map: FileMap<VirtualId>,
    pub directories: Vec<VirtualDirectory>,
}

/// 遍历拖放条目，构建虚拟目录树。
///
/// - `flat_files` 是与条目一起拖入、没有条目包装的顶层文件，放在根目录下；
/// - 顶层条目并发遍历，同一目录内的子条目按顺序逐个遍历；
/// - 目录记录在其全部子孙遍历完成后才追加（后序）；
/// - 同一父目录下 (name, size, lastModified) 重复的文件只保留第一个。
pub async fn resolve_entries(
    flat_files: Vec<VirtualFile>,
    entries: Vec<DropEntry>,
) -> ResolvedTree {
    let traversal = Traversal::default();
    for file in flat_files {
        traversal.push_file(ROOT_VIRTUAL_ID, file);
    }

    join_all(
        entries
            .into_iter()
            .map(|entry| traversal.visit(ROOT_VIRTUAL_ID, entry)),
    )
    .await;

    traversal.finish()
}

#[derive(Default)]
struct Traversal {
    next_id: AtomicI64,
    file_map: Mutex<FileMap<VirtualId>>,
    directories: Mutex<Vec<VirtualDirectory>>,
}

impl Traversal {
    fn visit(&self, parent: VirtualId, entry: DropEntry) -> BoxFuture<'_, ()> {
        async move {
            match entry {
                DropEntry::File(file_entry) => match file_entry.resolve().await {
                    Some(file) => self.push_file(parent, file),
                    None => tracing::debug!(
                        name = file_entry.name(),
                        "file entry could not be resolved; skipping"
                    ),
                },
                DropEntry::Directory(dir_entry) => {
                    let virtual_id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    let children = match dir_entry.read_entries().await {
                        Ok(children) => children,
                        Err(err) => {
                            tracing::warn!(
                                name = dir_entry.name(),
                                "failed to read directory entries: {err}"
                            );
                            Vec::new()
                        }
                    };
                    for child in children {
                        self.visit(virtual_id, child).await;
                    }
                    recover_lock(&self.directories).push(VirtualDirectory {
                        virtual_id,
                        parent_virtual_id: parent,
                        name: dir_entry.name().to_string(),
                    });
                }
            }
        }
        .boxed()
    }

    fn push_file(&self, parent: VirtualId, file: VirtualFile) {
        let mut file_map = recover_lock(&self.file_map);
        let siblings = file_map.entry(parent).or_default();
        if siblings.iter().any(|existing| existing.same_identity(&file)) {
            tracing::debug!(name = %file.name, parent, "dropping duplicate file");
            return;
        }
        siblings.push(file);
    }

    fn finish(self) -> ResolvedTree {
        ResolvedTree {
            file_map: self
                .file_map
                .into_inner()
                .unwrap_or_else(|p| p.into_inner()),
            directories: self
                .directories
                .into_inner()
                .unwrap_or_else(|p| p.into_inner()),
        }
    }
}
