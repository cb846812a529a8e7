//! OSS mock: path-style object API, multipart, tagging, copy and PostObject

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::Router;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};

use yaolist_storage::drivers::oss::sign::hmac_base64;
use yaolist_storage::drivers::oss::OssConfig;

pub const BUCKET: &str = "media";
pub const ACCESS_KEY_ID: &str = "test-id";
pub const ACCESS_KEY_SECRET: &str = "test-secret";

#[derive(Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

#[derive(Default)]
pub struct OssState {
    /// "bucket/key" -> object
    pub objects: Mutex<HashMap<String, StoredObject>>,
    pub uploads: Mutex<HashMap<String, BTreeMap<u32, (String, Bytes)>>>,
    pub completed_parts: Mutex<Vec<usize>>,
    pub aborted: Mutex<Vec<String>>,
    /// "bucket/key" -> raw Tagging XML
    pub tagging: Mutex<HashMap<String, String>>,
    /// Object entry whose DELETE fails with InternalError
    pub fail_delete: Mutex<Option<String>>,
    pub fail_part: Mutex<Option<u32>>,
    next_id: AtomicU64,
}

impl OssState {
    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects.lock().insert(
            format!("{}/{}", BUCKET, key),
            StoredObject {
                data: Bytes::copy_from_slice(data),
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().contains_key(&format!("{}/{}", BUCKET, key))
    }
}

pub struct MockOss {
    pub base_url: String,
    pub state: Arc<OssState>,
}

impl MockOss {
    pub async fn start() -> Self {
        let state = Arc::new(OssState::default());
        let router = Router::new()
            .route("/:bucket", post(post_object))
            .route("/:bucket/*key", any(object))
            // 默认 2MB 上限会截断 10MB 分片
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());
        let base_url = super::spawn(router).await;
        Self { base_url, state }
    }

    pub fn config(&self, callback_url: &str) -> OssConfig {
        OssConfig {
            access_key_id: ACCESS_KEY_ID.to_string(),
            access_key_secret: ACCESS_KEY_SECRET.to_string(),
            endpoint: self.base_url.clone(),
            bucket: BUCKET.to_string(),
            path_style: true,
            use_https: false,
            callback_url: callback_url.to_string(),
            chunk_size: 10 * 1024 * 1024,
            max_put_size: 64 * 1024 * 1024,
            upload_parallelism: 2,
            timeout_secs: 10,
        }
    }
}

fn error(status: StatusCode, code: &str, message: &str) -> Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{}</Code><Message>{}</Message><RequestId>mock-request-id</RequestId></Error>",
        code, message
    );
    (status, [("x-oss-request-id", "mock-request-id"), ("content-type", "application/xml")], body).into_response()
}

fn ok(status: StatusCode, body: impl IntoResponse) -> Response {
    (status, [("x-oss-request-id", "mock-request-id")], body).into_response()
}

fn etag_of(data: &[u8]) -> String {
    format!("\"{:X}\"", md5::compute(data))
}

#[derive(Deserialize)]
struct CompleteMultipartUpload {
    #[serde(rename = "Part", default)]
    parts: Vec<CompletePart>,
}

#[derive(Deserialize)]
struct CompletePart {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

async fn object(
    State(state): State<Arc<OssState>>,
    method: Method,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);

    let authorized = header("authorization")
        .map_or(false, |auth| auth.starts_with(&format!("OSS {}:", ACCESS_KEY_ID)));
    if !authorized {
        return error(StatusCode::FORBIDDEN, "AccessDenied", "missing signature");
    }
    if let Some(md5) = header("content-md5") {
        if md5 != BASE64.encode(md5::compute(&body).0) {
            return error(StatusCode::BAD_REQUEST, "InvalidDigest", "Content-MD5 mismatch");
        }
    }

    let key = key.trim_start_matches('/').to_string();
    let entry = format!("{}/{}", bucket, key);
    let forbid_overwrite = header("x-oss-forbid-overwrite").as_deref() == Some("true");

    match method {
        Method::HEAD => match state.objects.lock().get(&entry) {
            Some(_) => ok(StatusCode::OK, ()),
            None => ok(StatusCode::NOT_FOUND, ()),
        },
        Method::GET => match state.objects.lock().get(&entry) {
            Some(object) => ok(StatusCode::OK, object.data.clone()),
            None => error(StatusCode::NOT_FOUND, "NoSuchKey", "The specified key does not exist."),
        },
        Method::PUT => {
            if let (Some(part), Some(upload_id)) = (query.get("partNumber"), query.get("uploadId")) {
                let part: u32 = part.parse().unwrap_or(0);
                if *state.fail_part.lock() == Some(part) {
                    return error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", "part failed");
                }
                let mut uploads = state.uploads.lock();
                let Some(parts) = uploads.get_mut(upload_id) else {
                    return error(StatusCode::NOT_FOUND, "NoSuchUpload", "upload does not exist");
                };
                let etag = etag_of(&body);
                parts.insert(part, (etag.clone(), body));
                return (StatusCode::OK, [("x-oss-request-id", "mock-request-id"), ("ETag", etag.as_str())])
                    .into_response();
            }
            if query.contains_key("tagging") {
                if !state.objects.lock().contains_key(&entry) {
                    return error(StatusCode::NOT_FOUND, "NoSuchKey", "The specified key does not exist.");
                }
                state
                    .tagging
                    .lock()
                    .insert(entry, String::from_utf8_lossy(&body).into_owned());
                return ok(StatusCode::OK, ());
            }

            let mut objects = state.objects.lock();
            if forbid_overwrite && objects.contains_key(&entry) {
                return error(StatusCode::CONFLICT, "FileAlreadyExists", "The object you specified already exists.");
            }
            if let Some(source) = header("x-oss-copy-source") {
                let source = urlencoding::decode(source.trim_start_matches('/'))
                    .map(|s| s.into_owned())
                    .unwrap_or_default();
                let Some(object) = objects.get(&source).cloned() else {
                    return error(StatusCode::NOT_FOUND, "NoSuchKey", "The specified key does not exist.");
                };
                let etag = etag_of(&object.data);
                objects.insert(entry, object);
                return ok(
                    StatusCode::OK,
                    format!("<CopyObjectResult><ETag>{}</ETag></CopyObjectResult>", etag),
                );
            }
            let content_type = header("content-type").unwrap_or_default();
            objects.insert(entry, StoredObject { data: body, content_type });
            ok(StatusCode::OK, ())
        }
        Method::POST => {
            if query.contains_key("uploads") {
                let id = format!("oss-upload-{}", state.next_id.fetch_add(1, Ordering::SeqCst));
                state.uploads.lock().insert(id.clone(), BTreeMap::new());
                return ok(
                    StatusCode::OK,
                    format!(
                        "<InitiateMultipartUploadResult><Bucket>{}</Bucket><Key>{}</Key><UploadId>{}</UploadId></InitiateMultipartUploadResult>",
                        bucket, key, id
                    ),
                );
            }
            let Some(upload_id) = query.get("uploadId") else {
                return error(StatusCode::BAD_REQUEST, "InvalidArgument", "unsupported POST");
            };
            let request: CompleteMultipartUpload =
                match quick_xml::de::from_str(&String::from_utf8_lossy(&body)) {
                    Ok(request) => request,
                    Err(_) => return error(StatusCode::BAD_REQUEST, "MalformedXML", "bad body"),
                };

            let mut uploads = state.uploads.lock();
            let Some(stored) = uploads.get(upload_id) else {
                return error(StatusCode::NOT_FOUND, "NoSuchUpload", "upload does not exist");
            };
            let mut data = Vec::new();
            let mut sizes = Vec::new();
            for (index, part) in request.parts.iter().enumerate() {
                if part.part_number != index as u32 + 1 {
                    return error(StatusCode::BAD_REQUEST, "InvalidPartOrder", "parts out of order");
                }
                match stored.get(&part.part_number) {
                    Some((etag, bytes)) if *etag == part.etag => {
                        data.extend_from_slice(bytes);
                        sizes.push(bytes.len());
                    }
                    _ => return error(StatusCode::BAD_REQUEST, "InvalidPart", "part mismatch"),
                }
            }
            uploads.remove(upload_id);
            let etag = etag_of(&data);
            state.objects.lock().insert(
                entry,
                StoredObject {
                    data: Bytes::from(data),
                    content_type: "application/octet-stream".to_string(),
                },
            );
            *state.completed_parts.lock() = sizes;
            ok(
                StatusCode::OK,
                format!("<CompleteMultipartUploadResult><ETag>{}</ETag></CompleteMultipartUploadResult>", etag),
            )
        }
        Method::DELETE => {
            if let Some(upload_id) = query.get("uploadId") {
                return match state.uploads.lock().remove(upload_id) {
                    Some(_) => {
                        state.aborted.lock().push(upload_id.clone());
                        ok(StatusCode::NO_CONTENT, ())
                    }
                    None => error(StatusCode::NOT_FOUND, "NoSuchUpload", "upload does not exist"),
                };
            }
            if state.fail_delete.lock().as_deref() == Some(entry.as_str()) {
                return error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", "delete failed");
            }
            state.objects.lock().remove(&entry);
            ok(StatusCode::NO_CONTENT, ())
        }
        _ => error(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", "unsupported method"),
    }
}

async fn post_object(
    State(state): State<Arc<OssState>>,
    Path(bucket): Path<String>,
    mut multipart: Multipart,
) -> Response {
    let mut fields = HashMap::new();
    let mut file = Bytes::new();
    let mut file_name = String::new();
    let mut content_type = "application/octet-stream".to_string();

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            file_name = field.file_name().unwrap_or_default().to_string();
            if let Some(ct) = field.content_type() {
                content_type = ct.to_string();
            }
            file = field.bytes().await.unwrap_or_default();
        } else {
            fields.insert(name, field.text().await.unwrap_or_default());
        }
    }

    let field = |name: &str| fields.get(name).cloned().unwrap_or_default();
    let policy_base64 = field("policy");
    if field("OSSAccessKeyId") != ACCESS_KEY_ID
        || field("Signature") != hmac_base64(ACCESS_KEY_SECRET, &policy_base64)
    {
        return error(StatusCode::FORBIDDEN, "SignatureDoesNotMatch", "signature mismatch");
    }
    let policy: Value = BASE64
        .decode(&policy_base64)
        .ok()
        .and_then(|raw| serde_json::from_slice(&raw).ok())
        .unwrap_or(Value::Null);
    let expired = policy["expiration"]
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map_or(true, |expiration| expiration < chrono::Utc::now());
    if expired {
        return error(StatusCode::FORBIDDEN, "AccessDenied", "Invalid according to Policy: Policy expired.");
    }

    let key = field("key");
    let conditions = policy["conditions"].as_array().cloned().unwrap_or_default();
    if !conditions.contains(&json!(["eq", "$key", key])) {
        return error(StatusCode::FORBIDDEN, "AccessDenied", "Invalid according to Policy: key");
    }
    let entry = format!("{}/{}", bucket, key);
    {
        let mut objects = state.objects.lock();
        if field("x-oss-forbid-overwrite") == "true" && objects.contains_key(&entry) {
            return error(StatusCode::CONFLICT, "FileAlreadyExists", "The object you specified already exists.");
        }
        objects.insert(
            entry,
            StoredObject {
                data: file.clone(),
                content_type: content_type.clone(),
            },
        );
    }

    // 有回调时 OSS 把回调服务的响应原样返回，这里直接回显渲染后的回调体
    let callback = field("callback");
    if callback.is_empty() {
        return ok(StatusCode::OK, ());
    }
    let callback: Value = BASE64
        .decode(&callback)
        .ok()
        .and_then(|raw| serde_json::from_slice(&raw).ok())
        .unwrap_or(Value::Null);
    let rendered = callback["callbackBody"]
        .as_str()
        .unwrap_or_default()
        .replace("${size}", &file.len().to_string())
        .replace("${etag}", &etag_of(&file).replace('"', ""))
        .replace("${x:filename}", &file_name)
        .replace("${mimeType}", &content_type)
        .replace("${object}", &key)
        .replace("${bucket}", &bucket);
    ok(
        StatusCode::OK,
        axum::Json(serde_json::from_str::<Value>(&rendered).unwrap_or(Value::Null)),
    )
}
