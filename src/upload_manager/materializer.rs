use super::entry::{FileMap, RealId, VirtualDirectory, VirtualId, ROOT_VIRTUAL_ID};
use crate::api::drive::models::DriveNode;
use crate::error::{UploadError, UploadResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

/// 虚拟 id → 服务端真实 id。
pub type IdMap = BTreeMap<VirtualId, RealId>;

/// 批量建目录的结果；`nodes` 留作取消或失败时回滚使用。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterializedFolders {
    pub id_map: IdMap,
    pub nodes: Vec<DriveNode>,
}

impl MaterializedFolders {
    pub fn root_only(target_parent: &str) -> Self {
        Self {
            id_map: BTreeMap::from([(ROOT_VIRTUAL_ID, target_parent.to_string())]),
            nodes: Vec::new(),
        }
    }
}

/// 目录管理服务：批量创建目录、删除节点（回滚）。
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn create_folders(
        &self,
        directories: &[VirtualDirectory],
        target_parent: &str,
    ) -> UploadResult<MaterializedFolders>;

    async fn delete_nodes(&self, nodes: &[DriveNode]) -> UploadResult<()>;
}

/// 把虚拟目录落地为真实目录。目录列表为空时不发请求，只映射根目录。
pub async fn materialize(
    service: &dyn DirectoryService,
    directories: &[VirtualDirectory],
    target_parent: &str,
) -> UploadResult<MaterializedFolders> {
    if directories.is_empty() {
        return Ok(MaterializedFolders::root_only(target_parent));
    }

    let mut created = service.create_folders(directories, target_parent).await?;
    created
        .id_map
        .entry(ROOT_VIRTUAL_ID)
        .or_insert_with(|| target_parent.to_string());
    tracing::debug!(
        requested = directories.len(),
        created = created.nodes.len(),
        "directories materialized"
    );
    Ok(created)
}

/// 将以虚拟 id 为 key 的文件表换成真实 id。
///
/// 文件表的 key 以及目录列表中出现的每个 id / 父 id 都必须能在 `id_map` 中找到，
/// 按 id 升序检查，第一个缺失的 id 作为错误返回。
pub fn translate(
    file_map: FileMap<VirtualId>,
    directories: &[VirtualDirectory],
    id_map: &IdMap,
) -> UploadResult<FileMap<RealId>> {
    let referenced: BTreeSet<VirtualId> = file_map
        .keys()
        .copied()
        .chain(
            directories
                .iter()
                .flat_map(|dir| [dir.virtual_id, dir.parent_virtual_id]),
        )
        .collect();
    if let Some(missing) = referenced.into_iter().find(|id| !id_map.contains_key(id)) {
        return Err(UploadError::Mapping {
            virtual_id: missing,
        });
    }

    let mut real_map: FileMap<RealId> = BTreeMap::new();
    for (virtual_id, files) in file_map {
        // 上面已经校验过，这里不会缺失
        if let Some(real_id) = id_map.get(&virtual_id) {
            real_map.entry(real_id.clone()).or_default().extend(files);
        }
    }
    Ok(real_map)
}

/// 尽力删除本次上传创建的目录，失败只记录日志。
pub(crate) async fn rollback_directories(
    service: &dyn DirectoryService,
    nodes: &[DriveNode],
    session_id: &str,
) {
    if nodes.is_empty() {
        return;
    }
    match service.delete_nodes(nodes).await {
        Ok(()) => tracing::info!(
            session = %session_id,
            count = nodes.len(),
            "rolled back created directories"
        ),
        Err(err) => tracing::warn!(
            session = %session_id,
            "failed to roll back created directories: {err}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload_manager::entry::VirtualFile;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingService {
        creates: AtomicUsize,
    }

    #[async_trait]
    impl DirectoryService for CountingService {
        async fn create_folders(
            &self,
            directories: &[VirtualDirectory],
            _target_parent: &str,
        ) -> UploadResult<MaterializedFolders> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(MaterializedFolders {
                id_map: directories
                    .iter()
                    .map(|d| (d.virtual_id, format!("real-{}", d.virtual_id)))
                    .collect(),
                nodes: Vec::new(),
            })
        }

        async fn delete_nodes(&self, _nodes: &[DriveNode]) -> UploadResult<()> {
            Ok(())
        }
    }

    fn dir(virtual_id: VirtualId, parent_virtual_id: VirtualId) -> VirtualDirectory {
        VirtualDirectory {
            virtual_id,
            parent_virtual_id,
            name: format!("d{virtual_id}"),
        }
    }

    #[tokio::test]
    async fn empty_directory_list_skips_creation() {
        let service = CountingService::default();
        let result = materialize(&service, &[], "target").await.unwrap();
        assert_eq!(result, MaterializedFolders::root_only("target"));
        assert_eq!(service.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn root_is_always_mapped_to_target() {
        let service = CountingService::default();
        let result = materialize(&service, &[dir(0, ROOT_VIRTUAL_ID)], "target")
            .await
            .unwrap();
        assert_eq!(result.id_map[&ROOT_VIRTUAL_ID], "target");
        assert_eq!(result.id_map[&0], "real-0");
        assert_eq!(service.creates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_parent_id_is_reported() {
        let directories = vec![dir(0, ROOT_VIRTUAL_ID), dir(8, 7)];
        let id_map = IdMap::from([
            (ROOT_VIRTUAL_ID, "target".to_string()),
            (0, "r0".to_string()),
            (8, "r8".to_string()),
        ]);
        let file_map = FileMap::from([(8, vec![VirtualFile::from_bytes("x", b"x".to_vec(), 0)])]);

        match translate(file_map, &directories, &id_map) {
            Err(UploadError::Mapping { virtual_id }) => assert_eq!(virtual_id, 7),
            other => panic!("expected mapping error, got {other:?}"),
        }
    }

    #[test]
    fn files_are_rekeyed_to_real_ids() {
        let id_map = IdMap::from([(ROOT_VIRTUAL_ID, "target".to_string()), (0, "r0".to_string())]);
        let file_map = FileMap::from([
            (ROOT_VIRTUAL_ID, vec![VirtualFile::from_bytes("a", b"a".to_vec(), 0)]),
            (0, vec![VirtualFile::from_bytes("b", b"b".to_vec(), 0)]),
        ]);
        let real = translate(file_map, &[dir(0, ROOT_VIRTUAL_ID)], &id_map).unwrap();
        assert_eq!(real["target"][0].name, "a");
        assert_eq!(real["r0"][0].name, "b");
    }
}
