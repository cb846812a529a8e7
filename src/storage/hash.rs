//! Local content hashing and type detection / 本地内容哈希与类型识别

use sha2::{Digest, Sha256};

use super::result::FileMetadata;

/// SHA-256 of a buffer as lowercase hex / 计算SHA-256
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Incremental hasher for chunked uploads / 分片上传时的增量哈希
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha256,
    total: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.total += data.len() as u64;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// Content type from file name extension / 根据扩展名识别MIME类型
pub fn detect_content_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Last path segment of an object key / 对象键的文件名部分
pub fn file_name_of(key: &str) -> &str {
    key.trim_end_matches('/').rsplit('/').next().unwrap_or(key)
}

/// Metadata for an in-memory upload / 内存数据的元数据
pub fn metadata_for_bytes(key: &str, data: &[u8]) -> FileMetadata {
    let file_name = file_name_of(key).to_string();
    FileMetadata {
        file_type: detect_content_type(&file_name),
        file_name,
        file_size: data.len() as u64,
        content_hash: sha256_hex(data),
    }
}
