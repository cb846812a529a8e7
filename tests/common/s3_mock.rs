//! S3 mock: path-style object API, multipart, tagging and conditional copy

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use parking_lot::Mutex;
use serde::Deserialize;

use yaolist_storage::drivers::s3::S3Config;

pub const BUCKET: &str = "media";
pub const ACCESS_KEY_ID: &str = "test-ak";

#[derive(Default)]
pub struct S3State {
    /// "bucket/key" -> body
    pub objects: Mutex<HashMap<String, Bytes>>,
    pub uploads: Mutex<HashMap<String, BTreeMap<u32, (String, Bytes)>>>,
    pub completed_parts: Mutex<Vec<usize>>,
    pub aborted: Mutex<Vec<String>>,
    /// "bucket/key" -> raw Tagging XML
    pub tagging: Mutex<HashMap<String, String>>,
    /// Part number rejected with InternalError on every attempt
    pub fail_part: Mutex<Option<u32>>,
    /// Part number rejected with 503 SlowDown once, then accepted
    pub throttle_part_once: Mutex<Option<u32>>,
    /// Object entry whose DELETE fails with InternalError
    pub fail_delete: Mutex<Option<String>>,
    /// Object entry whose GET is denied while HEAD still succeeds
    pub deny_get: Mutex<Option<String>>,
    /// Object entry invisible to HEAD, as if written right after the check
    pub hide_from_head: Mutex<Option<String>>,
    pub part_attempts: Mutex<Vec<u32>>,
    next_id: AtomicU64,
}

impl S3State {
    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .insert(format!("{}/{}", BUCKET, key), Bytes::copy_from_slice(data));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().contains_key(&format!("{}/{}", BUCKET, key))
    }

    pub fn entry(key: &str) -> String {
        format!("{}/{}", BUCKET, key)
    }
}

pub struct MockS3 {
    pub base_url: String,
    pub state: Arc<S3State>,
}

impl MockS3 {
    pub async fn start() -> Self {
        let state = Arc::new(S3State::default());
        let router = Router::new()
            .route("/:bucket/*key", any(object))
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());
        let base_url = super::spawn(router).await;
        Self { base_url, state }
    }

    pub fn config(&self) -> S3Config {
        S3Config {
            bucket: BUCKET.to_string(),
            endpoint: self.base_url.clone(),
            access_key_id: ACCESS_KEY_ID.to_string(),
            secret_access_key: "test-secret".to_string(),
            force_path_style: true,
            chunk_size: 10 * 1024 * 1024,
            max_put_size: 64 * 1024 * 1024,
            timeout_secs: 10,
            ..Default::default()
        }
    }
}

fn error(status: StatusCode, code: &str, message: &str) -> Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{}</Code><Message>{}</Message><RequestId>mock-request-id</RequestId></Error>",
        code, message
    );
    (status, [("x-amz-request-id", "mock-request-id"), ("content-type", "application/xml")], body).into_response()
}

fn ok(status: StatusCode, body: impl IntoResponse) -> Response {
    (status, [("x-amz-request-id", "mock-request-id")], body).into_response()
}

fn etag_of(data: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(data))
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
    State(state): State<Arc<S3State>>,
    method: Method,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);

    // 请求头签名或预签名查询串，二者其一
    let credential_prefix = format!("{}/", ACCESS_KEY_ID);
    let signed_header = header("authorization").map_or(false, |auth| {
        auth.starts_with(&format!("AWS4-HMAC-SHA256 Credential={}", credential_prefix))
    });
    let signed_query = query
        .get("X-Amz-Credential")
        .map_or(false, |c| c.starts_with(&credential_prefix))
        && query.contains_key("X-Amz-Signature");
    if !signed_header && !signed_query {
        return error(StatusCode::FORBIDDEN, "AccessDenied", "missing signature");
    }

    let key = key.trim_start_matches('/').to_string();
    let entry = format!("{}/{}", bucket, key);
    let if_none_match = header("if-none-match").as_deref() == Some("*");

    match method {
        Method::HEAD => {
            if state.hide_from_head.lock().as_deref() == Some(entry.as_str()) {
                return ok(StatusCode::NOT_FOUND, ());
            }
            match state.objects.lock().get(&entry) {
                Some(_) => ok(StatusCode::OK, ()),
                None => ok(StatusCode::NOT_FOUND, ()),
            }
        }
        Method::GET => {
            if state.deny_get.lock().as_deref() == Some(entry.as_str()) {
                return error(StatusCode::FORBIDDEN, "AccessDenied", "Access Denied");
            }
            match state.objects.lock().get(&entry) {
                Some(data) => ok(StatusCode::OK, data.clone()),
                None => error(StatusCode::NOT_FOUND, "NoSuchKey", "The specified key does not exist."),
            }
        }
        Method::PUT => {
            if let (Some(part), Some(upload_id)) = (query.get("partNumber"), query.get("uploadId")) {
                let part: u32 = part.parse().unwrap_or(0);
                state.part_attempts.lock().push(part);
                if *state.fail_part.lock() == Some(part) {
                    return error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", "part failed");
                }
                {
                    let mut throttle = state.throttle_part_once.lock();
                    if *throttle == Some(part) {
                        *throttle = None;
                        return error(StatusCode::SERVICE_UNAVAILABLE, "SlowDown", "Please reduce your request rate.");
                    }
                }
                let mut uploads = state.uploads.lock();
                let Some(parts) = uploads.get_mut(upload_id) else {
                    return error(StatusCode::NOT_FOUND, "NoSuchUpload", "The specified upload does not exist.");
                };
                let etag = etag_of(&body);
                parts.insert(part, (etag.clone(), body));
                return (StatusCode::OK, [("x-amz-request-id", "mock-request-id"), ("ETag", etag.as_str())])
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
            if if_none_match && objects.contains_key(&entry) {
                return error(
                    StatusCode::PRECONDITION_FAILED,
                    "PreconditionFailed",
                    "At least one of the pre-conditions you specified did not hold",
                );
            }
            if let Some(source) = header("x-amz-copy-source") {
                let source = urlencoding::decode(source.trim_start_matches('/'))
                    .map(|s| s.into_owned())
                    .unwrap_or_default();
                let Some(data) = objects.get(&source).cloned() else {
                    return error(StatusCode::NOT_FOUND, "NoSuchKey", "The specified key does not exist.");
                };
                let etag = etag_of(&data);
                objects.insert(entry, data);
                return ok(
                    StatusCode::OK,
                    format!("<CopyObjectResult><ETag>{}</ETag></CopyObjectResult>", etag),
                );
            }
            let etag = etag_of(&body);
            objects.insert(entry, body);
            (StatusCode::OK, [("x-amz-request-id", "mock-request-id"), ("ETag", etag.as_str())]).into_response()
        }
        Method::POST => {
            if query.contains_key("uploads") {
                let id = format!("s3-upload-{}", state.next_id.fetch_add(1, Ordering::SeqCst));
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
                return error(StatusCode::BAD_REQUEST, "InvalidRequest", "unsupported POST");
            };
            let request: CompleteMultipartUpload =
                match quick_xml::de::from_str(&String::from_utf8_lossy(&body)) {
                    Ok(request) => request,
                    Err(_) => return error(StatusCode::BAD_REQUEST, "MalformedXML", "bad body"),
                };

            let mut uploads = state.uploads.lock();
            let Some(stored) = uploads.get(upload_id) else {
                return error(StatusCode::NOT_FOUND, "NoSuchUpload", "The specified upload does not exist.");
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
            state.objects.lock().insert(entry, Bytes::from(data));
            *state.completed_parts.lock() = sizes;
            ok(
                StatusCode::OK,
                format!(
                    "<CompleteMultipartUploadResult><Bucket>{}</Bucket><Key>{}</Key><ETag>{}</ETag></CompleteMultipartUploadResult>",
                    bucket, key, etag
                ),
            )
        }
        Method::DELETE => {
            if let Some(upload_id) = query.get("uploadId") {
                return match state.uploads.lock().remove(upload_id) {
                    Some(_) => {
                        state.aborted.lock().push(upload_id.clone());
                        ok(StatusCode::NO_CONTENT, ())
                    }
                    None => error(StatusCode::NOT_FOUND, "NoSuchUpload", "The specified upload does not exist."),
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
