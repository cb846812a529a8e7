//! Multipart upload session / 分片上传会话
//!
//! State machine: `Init -> PartsUploading -> Completing -> {Completed | Aborted}`.
//!
//! - 文件按固定大小切片，每片独立上传，可单独重传（同一分片号覆盖旧记录）
//! - 分片失败不会自动中止会话，由调用方决定重试或中止
//! - 中止后仍在途的分片结果会被丢弃
//! - 未结束的会话被丢弃（例如上传被取消）时，在后台中止服务端上传
//! - 并发上传时分片列表由会话内的互斥锁保护

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use super::error::StorageError;
use super::hash::{detect_content_type, ContentHasher};
use super::{Acl, ObjectLocator, ProgressCallback, PutLargeOptions};

/// Provider limit on part numbers / 分片号上限
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Provider-side multipart protocol / 存储商分片上传协议
#[async_trait]
pub trait MultipartApi: Send + Sync {
    /// Minimum size of every part except the last / 最小分片大小
    fn min_part_size(&self) -> u64;

    /// Request an upload id / 初始化分片上传，返回upload id
    async fn initiate(
        &self,
        locator: &ObjectLocator,
        content_type: &str,
        acl: Acl,
    ) -> Result<String, StorageError>;

    /// Upload one part, returns its ETag / 上传分片
    async fn upload_part(
        &self,
        locator: &ObjectLocator,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, StorageError>;

    /// Assemble the object from parts sorted by part number / 完成分片上传
    async fn complete(
        &self,
        locator: &ObjectLocator,
        upload_id: &str,
        parts: &[PartRecord],
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Release provider storage held by uploaded parts / 中止分片上传
    async fn abort(&self, locator: &ObjectLocator, upload_id: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Init,
    PartsUploading,
    Completing,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }
}

/// One uploaded part / 已上传分片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    pub part_number: u32,
    pub etag: String,
    pub byte_length: u64,
}

/// Summary of a file pushed through a session / 文件上传摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub size: u64,
    /// SHA-256 hex, computed while reading / 读取时计算的SHA-256
    pub content_hash: String,
    pub part_count: u32,
}

struct SessionInner {
    state: SessionState,
    upload_id: Option<String>,
    parts: BTreeMap<u32, PartRecord>,
}

/// Stateful coordinator of one chunked upload / 分片上传会话
pub struct MultipartSession {
    api: Arc<dyn MultipartApi>,
    locator: ObjectLocator,
    part_size: u64,
    content_type: String,
    acl: Acl,
    inner: Mutex<SessionInner>,
}

impl MultipartSession {
    /// Create the session and request an upload id / 创建会话并初始化上传
    ///
    /// No session is returned when the provider refuses the upload.
    pub async fn begin(
        api: Arc<dyn MultipartApi>,
        locator: ObjectLocator,
        part_size: u64,
        content_type: &str,
        acl: Acl,
    ) -> Result<Self, StorageError> {
        if part_size == 0 {
            return Err(StorageError::validation("part size must be positive"));
        }
        let min_part_size = api.min_part_size();
        if part_size < min_part_size {
            return Err(StorageError::validation(format!(
                "part size {} is below the provider minimum of {}",
                part_size, min_part_size
            )));
        }

        let session = Self {
            api,
            locator,
            part_size,
            content_type: content_type.to_string(),
            acl,
            inner: Mutex::new(SessionInner {
                state: SessionState::Init,
                upload_id: None,
                parts: BTreeMap::new(),
            }),
        };
        session.start().await?;
        Ok(session)
    }

    async fn start(&self) -> Result<(), StorageError> {
        let upload_id = self
            .api
            .initiate(&self.locator, &self.content_type, self.acl)
            .await?;

        let mut inner = self.inner.lock();
        if inner.state != SessionState::Init {
            return Err(StorageError::invalid_state(format!(
                "session for {} left Init before the upload id arrived",
                self.locator
            )));
        }
        tracing::debug!("分片上传开始: {} upload_id={}", self.locator, upload_id);
        inner.upload_id = Some(upload_id);
        inner.state = SessionState::PartsUploading;
        Ok(())
    }

    pub fn locator(&self) -> &ObjectLocator {
        &self.locator
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn upload_id(&self) -> Option<String> {
        self.inner.lock().upload_id.clone()
    }

    /// Recorded parts in ascending part-number order / 已记录的分片
    pub fn parts(&self) -> Vec<PartRecord> {
        self.inner.lock().parts.values().cloned().collect()
    }

    /// Upload (or re-upload) one part / 上传或重传单个分片
    pub async fn upload_part(&self, part_number: u32, data: Bytes) -> Result<PartRecord, StorageError> {
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(StorageError::validation(format!(
                "part number {} outside 1..={}",
                part_number, MAX_PART_NUMBER
            )));
        }

        let upload_id = {
            let inner = self.inner.lock();
            match (inner.state, inner.upload_id.as_ref()) {
                (SessionState::PartsUploading, Some(id)) => id.clone(),
                (state, _) => {
                    return Err(StorageError::invalid_state(format!(
                        "cannot upload part {} while session is {:?}",
                        part_number, state
                    )))
                }
            }
        };

        let byte_length = data.len() as u64;
        tracing::debug!("上传分片: {} part={} size={}", self.locator, part_number, byte_length);
        let etag = self
            .api
            .upload_part(&self.locator, &upload_id, part_number, data)
            .await?;

        let record = PartRecord {
            part_number,
            etag,
            byte_length,
        };

        let mut inner = self.inner.lock();
        if inner.state != SessionState::PartsUploading {
            // 会话已中止或进入完成阶段，丢弃在途分片结果
            return Err(StorageError::invalid_state(format!(
                "part {} finished after session became {:?}, result discarded",
                part_number, inner.state
            )));
        }
        inner.parts.insert(part_number, record.clone());
        Ok(record)
    }

    /// Submit the ordered part list / 提交分片列表完成上传
    ///
    /// A rejected part list leaves the session in `PartsUploading` so missing
    /// parts can still be uploaded or the session aborted.
    pub async fn complete(&self) -> Result<Vec<PartRecord>, StorageError> {
        let (upload_id, parts) = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::PartsUploading {
                return Err(StorageError::invalid_state(format!(
                    "cannot complete while session is {:?}",
                    inner.state
                )));
            }
            let parts: Vec<PartRecord> = inner.parts.values().cloned().collect();
            validate_parts(&parts)?;
            let upload_id = inner
                .upload_id
                .clone()
                .ok_or_else(|| StorageError::invalid_state("session has no upload id"))?;
            inner.state = SessionState::Completing;
            (upload_id, parts)
        };

        match self
            .api
            .complete(&self.locator, &upload_id, &parts, &self.content_type)
            .await
        {
            Ok(()) => {
                self.inner.lock().state = SessionState::Completed;
                tracing::info!("分片上传完成: {} parts={}", self.locator, parts.len());
                Ok(parts)
            }
            Err(e) => {
                let mut inner = self.inner.lock();
                if inner.state == SessionState::Completing {
                    inner.state = SessionState::PartsUploading;
                }
                Err(e)
            }
        }
    }

    /// Cancel the session and release provider-side parts / 中止会话
    pub async fn abort(&self) -> Result<(), StorageError> {
        let upload_id = {
            let mut inner = self.inner.lock();
            match inner.state {
                SessionState::Init | SessionState::PartsUploading => {
                    inner.state = SessionState::Aborted;
                    inner.parts.clear();
                    inner.upload_id.clone()
                }
                state => {
                    return Err(StorageError::invalid_state(format!(
                        "cannot abort while session is {:?}",
                        state
                    )))
                }
            }
        };

        let Some(upload_id) = upload_id else {
            return Ok(());
        };
        tracing::debug!("中止分片上传: {} upload_id={}", self.locator, upload_id);
        self.api.abort(&self.locator, &upload_id).await
    }

    /// Split a local file into parts and upload them, at most `parallelism`
    /// in flight / 切片并上传本地文件
    pub async fn upload_file(
        &self,
        path: &Path,
        parallelism: usize,
        progress: Option<ProgressCallback>,
    ) -> Result<FileDigest, StorageError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| StorageError::local_io(path, e))?;
        let total = file
            .metadata()
            .await
            .map_err(|e| StorageError::local_io(path, e))?
            .len();

        let parallelism = parallelism.max(1);
        let mut hasher = ContentHasher::new();
        let mut pending = FuturesUnordered::new();
        let mut part_number: u32 = 0;
        let mut uploaded: u64 = 0;

        loop {
            let chunk = read_chunk(&mut file, self.part_size)
                .await
                .map_err(|e| StorageError::local_io(path, e))?;
            // 空文件也上传一个空分片，保证至少一个分片
            if chunk.is_empty() && part_number > 0 {
                break;
            }
            part_number += 1;
            if part_number > MAX_PART_NUMBER {
                return Err(StorageError::validation(format!(
                    "file needs more than {} parts, increase the chunk size",
                    MAX_PART_NUMBER
                )));
            }
            hasher.update(&chunk);
            let last = (chunk.len() as u64) < self.part_size;
            pending.push(self.upload_part(part_number, chunk));

            // 并发数已满，等待一个分片完成
            while pending.len() >= parallelism {
                if let Some(result) = pending.next().await {
                    let record: PartRecord = result?;
                    uploaded += record.byte_length;
                    report(&progress, uploaded, total);
                }
            }

            if last {
                break;
            }
        }

        while let Some(result) = pending.next().await {
            let record = result?;
            uploaded += record.byte_length;
            report(&progress, uploaded, total);
        }

        Ok(FileDigest {
            size: hasher.total(),
            content_hash: hasher.finalize_hex(),
            part_count: part_number,
        })
    }
}

impl Drop for MultipartSession {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state.is_terminal() {
            return;
        }
        let Some(upload_id) = inner.upload_id.take() else {
            return;
        };
        inner.state = SessionState::Aborted;
        inner.parts.clear();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("会话丢弃时没有运行时，分片残留: {} upload_id={}", self.locator, upload_id);
            return;
        };
        tracing::warn!("分片上传被取消，后台中止: {} upload_id={}", self.locator, upload_id);
        let api = self.api.clone();
        let locator = self.locator.clone();
        handle.spawn(async move {
            if let Err(e) = api.abort(&locator, &upload_id).await {
                tracing::warn!("中止分片上传失败: {} - {}", locator, e);
            }
        });
    }
}

fn report(progress: &Option<ProgressCallback>, done: u64, total: u64) {
    if let Some(cb) = progress {
        cb(done, total);
    }
}

/// Read up to `size` bytes; shorter only at end of file / 读取一个分片
async fn read_chunk(file: &mut tokio::fs::File, size: u64) -> std::io::Result<Bytes> {
    let mut buf = Vec::with_capacity(size.min(64 * 1024 * 1024) as usize);
    file.take(size).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Part numbers must run 1..=n without gaps and every part needs an ETag
/// 分片号必须从1开始连续且每片都有ETag
pub fn validate_parts(parts: &[PartRecord]) -> Result<(), StorageError> {
    if parts.is_empty() {
        return Err(StorageError::validation("no parts uploaded"));
    }
    for (index, part) in parts.iter().enumerate() {
        let expected = index as u32 + 1;
        if part.part_number != expected {
            return Err(StorageError::validation(format!(
                "part numbers are not contiguous: expected {}, found {}",
                expected, part.part_number
            )));
        }
        if part.etag.trim().is_empty() {
            return Err(StorageError::validation(format!(
                "part {} has no ETag",
                part.part_number
            )));
        }
    }
    Ok(())
}

/// Run a whole chunked upload: begin, upload parts, complete, abort on any
/// failure / 完整的分片上传流程
pub async fn upload_file_in_parts(
    api: Arc<dyn MultipartApi>,
    locator: &ObjectLocator,
    local_path: &Path,
    options: &PutLargeOptions,
    default_chunk_size: u64,
    default_parallelism: usize,
) -> Result<(FileDigest, String), StorageError> {
    let chunk_size = options.chunk_size.unwrap_or(default_chunk_size);
    let parallelism = options.parallelism.unwrap_or(default_parallelism);
    let content_type = detect_content_type(
        local_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(locator.file_name()),
    );

    // 先确认本地文件可读，避免白白初始化一个上传
    tokio::fs::metadata(local_path)
        .await
        .map_err(|e| StorageError::local_io(local_path, e))?;

    let session =
        MultipartSession::begin(api, locator.clone(), chunk_size, &content_type, options.acl).await?;

    let digest = match session
        .upload_file(local_path, parallelism, options.progress.clone())
        .await
    {
        Ok(digest) => digest,
        Err(e) => {
            abort_quietly(&session).await;
            return Err(e);
        }
    };

    if let Err(e) = session.complete().await {
        abort_quietly(&session).await;
        return Err(e);
    }

    Ok((digest, content_type))
}

async fn abort_quietly(session: &MultipartSession) {
    if session.state().is_terminal() {
        return;
    }
    if let Err(e) = session.abort().await {
        tracing::warn!("中止分片上传失败: {} - {}", session.locator(), e);
    }
}
