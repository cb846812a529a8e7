//! 七牛鉴权签名
//!
//! 签名 = urlsafe_base64(hmac_sha1(SecretKey, data))，凭证格式为 `AK:签名[:数据]`

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// 签名器，持有 AK/SK
#[derive(Clone)]
pub struct Signer {
    access_key: String,
    secret_key: String,
}

/// URL 安全的 base64 编码
pub fn urlsafe_base64(data: &[u8]) -> String {
    URL_SAFE.encode(data)
}

/// `bucket:key` 的编码形式，用于资源管理接口
pub fn encoded_entry(bucket: &str, key: &str) -> String {
    urlsafe_base64(format!("{}:{}", bucket, key).as_bytes())
}

impl Signer {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    fn digest(&self, data: &[u8]) -> String {
        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(data);
        urlsafe_base64(&mac.finalize().into_bytes())
    }

    /// `AK:签名`
    pub fn sign(&self, data: &[u8]) -> String {
        format!("{}:{}", self.access_key, self.digest(data))
    }

    /// 上传凭证：`AK:签名:编码后的策略`
    pub fn upload_token(&self, policy_json: &str) -> String {
        let encoded = urlsafe_base64(policy_json.as_bytes());
        format!("{}:{}", self.sign(encoded.as_bytes()), encoded)
    }

    /// 管理凭证（QBox），表单请求需要把请求体一起签入
    pub fn qbox_token(&self, path_and_query: &str, form_body: Option<&[u8]>) -> String {
        let mut data = format!("{}\n", path_and_query).into_bytes();
        if let Some(body) = form_body {
            data.extend_from_slice(body);
        }
        format!("QBox {}", self.sign(&data))
    }

    /// 私有空间下载链接：追加 `e=过期时间` 后整体签名
    pub fn private_download_url(&self, base_url: &str, deadline: i64) -> String {
        let separator = if base_url.contains('?') { '&' } else { '?' };
        let url = format!("{}{}e={}", base_url, separator, deadline);
        let token = self.sign(url.as_bytes());
        format!("{}&token={}", url, token)
    }
}
