use super::client::{build_client, endpoint};
use crate::config::UploaderConfig;
use crate::error::{UploadError, UploadResult};
use crate::upload_manager::entry::{FileContent, VirtualFile};
use crate::upload_manager::transport::{
    FieldValue, ProgressCallback, TransportReply, UploadForm, UploadTransport,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::Either;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{
    multipart::{Form, Part},
    Body, Client,
};
use std::io;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio_util::io::ReaderStream;
use url::Url;

/// 内存文件按块切分发送，保证进度回调有合理的粒度。
const MEMORY_CHUNK_BYTES: usize = 64 * 1024;

/// `POST {base}/upload` 的 multipart 上传实现。
pub struct HttpUploadTransport {
    client: Client,
    url: Url,
}

impl HttpUploadTransport {
    pub fn new(config: &UploaderConfig) -> UploadResult<Self> {
        Ok(Self {
            // 上传不设整体超时
            client: build_client(None)?,
            url: endpoint(&config.api_endpoint, "upload")?,
        })
    }
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn send(
        &self,
        form: UploadForm,
        progress: ProgressCallback,
    ) -> UploadResult<TransportReply> {
        let total = form.file_bytes();
        let sent = Arc::new(AtomicU64::new(0));

        let mut multipart = Form::new();
        for field in form.into_fields() {
            multipart = match field.value {
                FieldValue::Text(text) => multipart.text(field.key, text),
                FieldValue::File(file) => {
                    let part = file_part(&field.key, file, sent.clone(), progress.clone()).await?;
                    multipart.part(field.key, part)
                }
            };
        }

        let response = self
            .client
            .post(self.url.clone())
            .header("Accept", "application/json")
            .multipart(multipart)
            .send()
            .await
            .map_err(|e| UploadError::Transport(format!("failed to send upload request: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Transport(format!("failed to read upload response: {e}")))?;
        if status == 200 {
            // 服务端已完整接收请求体
            progress(total);
        }
        Ok(TransportReply { status, body })
    }
}

/// 把文件包装成流式 part；每发出一块就上报一次累计字节数，
/// 字段 key 的长度随第一块一起计入。
async fn file_part(
    key: &str,
    file: VirtualFile,
    sent: Arc<AtomicU64>,
    progress: ProgressCallback,
) -> UploadResult<Part> {
    let chunks = match file.content {
        FileContent::Memory(bytes) => {
            Either::Left(stream::iter(split_chunks(bytes)).map(Ok::<Bytes, io::Error>))
        }
        FileContent::Disk(path) => {
            let handle = tokio::fs::File::open(&path).await.map_err(|e| {
                UploadError::Transport(format!("failed to open {}: {e}", path.display()))
            })?;
            Either::Right(ReaderStream::new(handle))
        }
    };

    let mut pending_key = key.len() as u64;
    let counted = chunks.inspect_ok(move |chunk| {
        let bytes = chunk.len() as u64 + std::mem::take(&mut pending_key);
        let loaded = sent.fetch_add(bytes, Ordering::SeqCst) + bytes;
        progress(loaded);
    });

    Ok(Part::stream_with_length(Body::wrap_stream(counted), file.size).file_name(file.name))
}

fn split_chunks(mut bytes: Bytes) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(bytes.len() / MEMORY_CHUNK_BYTES + 1);
    while !bytes.is_empty() {
        let take = bytes.len().min(MEMORY_CHUNK_BYTES);
        chunks.push(bytes.split_to(take));
    }
    chunks
}
