use super::entry::{FileMap, RealId, VirtualFile};
use super::session::SessionHandle;
use crate::api::drive::models::{ApiEnvelope, DriveNode};
use crate::error::{UploadError, UploadResult};
use async_trait::async_trait;
use std::sync::Arc;

/// 认证字段名。
pub const CREDENTIAL_FIELD: &str = "apikey";

/// 传输层回调：参数是“累计已发送字节数”，可能重复或回退。
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Clone, Debug)]
pub enum FieldValue {
    Text(String),
    File(VirtualFile),
}

#[derive(Clone, Debug)]
pub struct FormField {
    pub key: String,
    pub value: FieldValue,
}

impl FormField {
    /// key 的字节数加上内容字节数。
    pub fn byte_len(&self) -> u64 {
        let payload = match &self.value {
            FieldValue::Text(text) => text.len() as u64,
            FieldValue::File(file) => file.size,
        };
        self.key.len() as u64 + payload
    }

    pub fn is_file(&self) -> bool {
        matches!(self.value, FieldValue::File(_))
    }
}

/// 待发送的 multipart 表单，字段顺序即追加顺序。
#[derive(Clone, Debug, Default)]
pub struct UploadForm {
    fields: Vec<FormField>,
}

impl UploadForm {
    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<FormField> {
        self.fields
    }

    /// 计入进度统计的字节数：只统计文件字段。
    ///
    /// apikey 文本字段不计入，所以只有认证字段的空表单总量为 0。
    pub fn file_bytes(&self) -> u64 {
        self.fields
            .iter()
            .filter(|field| field.is_file())
            .map(FormField::byte_len)
            .sum()
    }

    fn push(&mut self, key: String, value: FieldValue) -> &FormField {
        self.fields.push(FormField { key, value });
        &self.fields[self.fields.len() - 1]
    }
}

/// 上传请求的原始结果：HTTP 状态码与响应体。
#[derive(Clone, Debug)]
pub struct TransportReply {
    pub status: u16,
    pub body: String,
}

/// 支持进度回调的上传通道。取消由调用方丢弃返回的 future 完成。
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn send(
        &self,
        form: UploadForm,
        progress: ProgressCallback,
    ) -> UploadResult<TransportReply>;
}

pub fn field_key(parent: &str, index: usize) -> String {
    format!("{parent}-{index}")
}

/// 构建上传表单。
///
/// 先放认证字段，再按父目录逐个追加文件；不是真正文件的条目被跳过，
/// 其名字也不会进入 `file_names`。`total_bytes` 随每次追加递增。
/// 字段序号沿用文件在父目录列表中的位置，被跳过的条目会留下空号。
pub(crate) async fn build_upload_form(
    file_map: &FileMap<RealId>,
    api_key: String,
    session: &SessionHandle,
) -> UploadForm {
    let mut form = UploadForm::default();
    // 认证字段不计入 total_bytes
    form.push(CREDENTIAL_FIELD.to_string(), FieldValue::Text(api_key));

    for (parent, files) in file_map {
        for (index, file) in files.iter().enumerate() {
            if !file.is_genuine_file().await {
                tracing::debug!(
                    session = %session.id(),
                    name = %file.name,
                    "skipping entry that is not a regular file"
                );
                continue;
            }
            let field = form.push(field_key(parent, index), FieldValue::File(file.clone()));
            let bytes = field.byte_len();
            session.update(|s| {
                s.file_names.push(file.name.clone());
                s.add_total(bytes);
            });
        }
    }
    form
}

/// 解析上传响应：只有 HTTP 200 且 error 为假才算成功，返回新建的文件节点。
pub fn parse_upload_reply(reply: &TransportReply) -> UploadResult<Vec<DriveNode>> {
    if reply.status != 200 {
        return Err(UploadError::Transport(format!(
            "upload endpoint returned HTTP {}",
            reply.status
        )));
    }
    let envelope: ApiEnvelope<Vec<DriveNode>> = serde_json::from_str(&reply.body)
        .map_err(|e| UploadError::Transport(format!("malformed upload response: {e}")))?;
    if let Some(message) = envelope.reported_error() {
        return Err(UploadError::ServerReported(message));
    }
    envelope
        .data
        .ok_or_else(|| UploadError::Transport("upload response carries no data".to_string()))
}
