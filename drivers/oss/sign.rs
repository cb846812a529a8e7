//! OSS 签名（Header 签名 V1 / URL 签名 / PostObject 策略）

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// 参与签名的子资源
const SIGNED_SUBRESOURCES: &[&str] = &[
    "acl", "append", "callback", "delete", "lifecycle", "partNumber", "position", "tagging",
    "uploadId", "uploads", "versionId",
];

/// HTTP Date 格式
pub fn gmt_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// base64(hmac_sha1(secret, data))
pub fn hmac_base64(secret: &str, data: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// CanonicalizedResource：`/bucket/key?子资源`
pub fn canonical_resource(bucket: &str, key: &str, query: &[(&str, Option<String>)]) -> String {
    let mut resource = format!("/{}/{}", bucket, key);
    let mut subresources: Vec<String> = query
        .iter()
        .filter(|(name, _)| SIGNED_SUBRESOURCES.contains(name))
        .map(|(name, value)| match value {
            Some(v) => format!("{}={}", name, v),
            None => name.to_string(),
        })
        .collect();
    subresources.sort();
    if !subresources.is_empty() {
        resource.push('?');
        resource.push_str(&subresources.join("&"));
    }
    resource
}

/// 请求签名所需字段
pub struct StringToSign<'a> {
    pub verb: &'a str,
    pub content_md5: &'a str,
    pub content_type: &'a str,
    /// Date 头，URL 签名时为过期时间戳
    pub date: &'a str,
    /// 已转小写的 x-oss-* 头
    pub oss_headers: &'a BTreeMap<String, String>,
    pub resource: &'a str,
}

impl StringToSign<'_> {
    pub fn build(&self) -> String {
        let headers: String = self
            .oss_headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        format!(
            "{}\n{}\n{}\n{}\n{}{}",
            self.verb, self.content_md5, self.content_type, self.date, headers, self.resource
        )
    }

    pub fn sign(&self, secret: &str) -> String {
        hmac_base64(secret, &self.build())
    }
}
