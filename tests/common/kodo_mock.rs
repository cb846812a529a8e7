//! Kodo mock: form upload, v2 multipart, rs management, pfop and a download domain

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Form, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use parking_lot::Mutex;
use serde_json::{json, Value};

use yaolist_storage::drivers::kodo::KodoConfig;

pub const BUCKET: &str = "media";

#[derive(Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub mime_type: String,
}

#[derive(Default)]
pub struct Upload {
    pub entry: String,
    pub parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Default)]
pub struct KodoState {
    /// "bucket:key" -> object
    pub objects: Mutex<HashMap<String, StoredObject>>,
    pub uploads: Mutex<HashMap<String, Upload>>,
    /// Part sizes of the last completed multipart upload
    pub completed_parts: Mutex<Vec<usize>>,
    pub aborted: Mutex<Vec<String>>,
    /// (entry, fops) submitted to pfop
    pub fops: Mutex<Vec<(String, String)>>,
    pub fail_move: AtomicBool,
    pub fail_part: Mutex<Option<u32>>,
    next_id: AtomicU64,
}

impl KodoState {
    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects.lock().insert(
            format!("{}:{}", BUCKET, key),
            StoredObject {
                data: Bytes::copy_from_slice(data),
                mime_type: "application/octet-stream".to_string(),
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().contains_key(&format!("{}:{}", BUCKET, key))
    }
}

pub struct MockKodo {
    pub base_url: String,
    pub state: Arc<KodoState>,
}

impl MockKodo {
    pub async fn start() -> Self {
        let state = Arc::new(KodoState::default());
        let router = Router::new()
            .route("/", post(form_upload))
            .route("/stat/:entry", get(stat))
            .route("/delete/:entry", post(delete))
            .route("/move/:src/:dst/force/:force", post(move_object))
            .route("/pfop/", post(pfop))
            .route("/buckets/:bucket/objects/:object/uploads", post(init_parts))
            .route(
                "/buckets/:bucket/objects/:object/uploads/:id",
                post(complete_parts).delete(abort_parts),
            )
            .route("/buckets/:bucket/objects/:object/uploads/:id/:part", put(upload_part))
            .route("/dl/*key", get(download))
            // 默认 2MB 上限会截断 10MB 分片
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());
        let base_url = super::spawn(router).await;
        Self { base_url, state }
    }

    pub fn config(&self) -> KodoConfig {
        serde_json::from_value(json!({
            "access_key": "test-ak",
            "secret_key": "test-sk",
            "bucket": BUCKET,
            "domain": format!("{}/dl", self.base_url),
            "up_host": self.base_url,
            "rs_host": self.base_url,
            "api_host": self.base_url,
            "timeout_secs": 10,
        }))
        .unwrap()
    }
}

fn error(status: u16, message: &str) -> Response {
    (
        StatusCode::from_u16(status).unwrap(),
        [("X-Reqid", "mock-reqid")],
        Json(json!({ "error": message })),
    )
        .into_response()
}

fn ok(body: Value) -> Response {
    (StatusCode::OK, [("X-Reqid", "mock-reqid")], Json(body)).into_response()
}

fn decode_entry(entry: &str) -> Option<String> {
    URL_SAFE
        .decode(entry)
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
}

fn decode_policy(token: &str) -> Option<Value> {
    let encoded = token.splitn(3, ':').nth(2)?;
    serde_json::from_slice(&URL_SAFE.decode(encoded).ok()?).ok()
}

fn etag_of(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

async fn form_upload(State(state): State<Arc<KodoState>>, mut multipart: Multipart) -> Response {
    let mut token = String::new();
    let mut key = None;
    let mut file = Bytes::new();
    let mut fname = String::new();
    let mut mime_type = "application/octet-stream".to_string();

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "token" => token = field.text().await.unwrap_or_default(),
            "key" => key = Some(field.text().await.unwrap_or_default()),
            "file" => {
                fname = field.file_name().unwrap_or_default().to_string();
                if let Some(ct) = field.content_type() {
                    mime_type = ct.to_string();
                }
                file = field.bytes().await.unwrap_or_default();
            }
            _ => {}
        }
    }

    let Some(policy) = decode_policy(&token) else {
        return error(401, "bad token");
    };
    if policy["deadline"].as_i64().unwrap_or(0) < chrono::Utc::now().timestamp() {
        return error(401, "token out of date");
    }
    let scope = policy["scope"].as_str().unwrap_or_default();
    let (bucket, scope_key) = match scope.split_once(':') {
        Some((bucket, key)) => (bucket.to_string(), Some(key.to_string())),
        None => (scope.to_string(), None),
    };
    let key = match (key, scope_key) {
        (Some(key), Some(scope_key)) if key != scope_key => {
            return error(403, "key doesn't match with scope");
        }
        (Some(key), _) => key,
        (None, Some(scope_key)) => scope_key,
        (None, None) => return error(400, "missing key"),
    };

    let entry = format!("{}:{}", bucket, key);
    {
        let mut objects = state.objects.lock();
        if policy["insertOnly"].as_i64() == Some(1) && objects.contains_key(&entry) {
            return error(614, "file exists");
        }
        objects.insert(
            entry,
            StoredObject {
                data: file.clone(),
                mime_type: mime_type.clone(),
            },
        );
    }

    let etag = etag_of(&file);
    match policy["returnBody"].as_str() {
        Some(template) => {
            let rendered = template
                .replace("$(fsize)", &file.len().to_string())
                .replace("$(etag)", &etag)
                .replace("$(fname)", &fname)
                .replace("$(mimeType)", &mime_type)
                .replace("$(key)", &key)
                .replace("$(bucket)", &bucket);
            ok(serde_json::from_str(&rendered).unwrap_or(Value::Null))
        }
        None => ok(json!({ "hash": etag, "key": key })),
    }
}

async fn stat(State(state): State<Arc<KodoState>>, Path(entry): Path<String>) -> Response {
    let Some(entry) = decode_entry(&entry) else {
        return error(400, "bad entry");
    };
    match state.objects.lock().get(&entry) {
        Some(object) => ok(json!({
            "fsize": object.data.len(),
            "hash": etag_of(&object.data),
            "mimeType": object.mime_type,
        })),
        None => error(612, "no such file or directory"),
    }
}

async fn delete(State(state): State<Arc<KodoState>>, Path(entry): Path<String>) -> Response {
    let Some(entry) = decode_entry(&entry) else {
        return error(400, "bad entry");
    };
    match state.objects.lock().remove(&entry) {
        Some(_) => ok(json!({})),
        None => error(612, "no such file or directory"),
    }
}

async fn move_object(
    State(state): State<Arc<KodoState>>,
    Path((src, dst, force)): Path<(String, String, String)>,
) -> Response {
    let (Some(src), Some(dst)) = (decode_entry(&src), decode_entry(&dst)) else {
        return error(400, "bad entry");
    };
    if state.fail_move.load(Ordering::SeqCst) {
        return error(599, "service unavailable");
    }
    let mut objects = state.objects.lock();
    if !objects.contains_key(&src) {
        return error(612, "no such file or directory");
    }
    if force != "true" && objects.contains_key(&dst) {
        return error(614, "file exists");
    }
    if let Some(object) = objects.remove(&src) {
        objects.insert(dst, object);
    }
    ok(json!({}))
}

async fn pfop(State(state): State<Arc<KodoState>>, Form(form): Form<HashMap<String, String>>) -> Response {
    let entry = format!(
        "{}:{}",
        form.get("bucket").cloned().unwrap_or_default(),
        form.get("key").cloned().unwrap_or_default()
    );
    let fops = form.get("fops").cloned().unwrap_or_default();
    state.fops.lock().push((entry, fops));
    let id = state.next_id.fetch_add(1, Ordering::SeqCst);
    ok(json!({ "persistentId": format!("z0.mock{}", id) }))
}

fn object_key(object: &str) -> String {
    if object == "~" {
        String::new()
    } else {
        decode_entry(object).unwrap_or_default()
    }
}

async fn init_parts(
    State(state): State<Arc<KodoState>>,
    Path((bucket, object)): Path<(String, String)>,
) -> Response {
    let id = format!("upload-{}", state.next_id.fetch_add(1, Ordering::SeqCst));
    state.uploads.lock().insert(
        id.clone(),
        Upload {
            entry: format!("{}:{}", bucket, object_key(&object)),
            parts: BTreeMap::new(),
        },
    );
    ok(json!({ "uploadId": id, "expireAt": chrono::Utc::now().timestamp() + 7 * 86400 }))
}

async fn upload_part(
    State(state): State<Arc<KodoState>>,
    Path((_bucket, _object, id, part)): Path<(String, String, String, u32)>,
    body: Bytes,
) -> Response {
    if *state.fail_part.lock() == Some(part) {
        return error(599, "part upload failed");
    }
    let mut uploads = state.uploads.lock();
    let Some(upload) = uploads.get_mut(&id) else {
        return error(612, "no such upload");
    };
    let etag = format!("part{}-{}", part, etag_of(&body));
    upload.parts.insert(part, (etag.clone(), body));
    ok(json!({ "etag": etag, "md5": "" }))
}

async fn complete_parts(
    State(state): State<Arc<KodoState>>,
    Path((_bucket, _object, id)): Path<(String, String, String)>,
    Json(request): Json<Value>,
) -> Response {
    let mut uploads = state.uploads.lock();
    let Some(upload) = uploads.get(&id) else {
        return error(612, "no such upload");
    };

    let requested = request["parts"].as_array().cloned().unwrap_or_default();
    let mut data = Vec::new();
    let mut sizes = Vec::new();
    for (index, part) in requested.iter().enumerate() {
        let number = part["partNumber"].as_u64().unwrap_or(0) as u32;
        let etag = part["etag"].as_str().unwrap_or_default();
        if number != index as u32 + 1 {
            return error(400, "invalid part order");
        }
        match upload.parts.get(&number) {
            Some((stored, bytes)) if stored == etag => {
                data.extend_from_slice(bytes);
                sizes.push(bytes.len());
            }
            _ => return error(400, "invalid part"),
        }
    }

    let entry = upload.entry.clone();
    uploads.remove(&id);
    let key = entry.split_once(':').map(|(_, k)| k.to_string()).unwrap_or_default();
    let etag = etag_of(&data);
    state.objects.lock().insert(
        entry,
        StoredObject {
            data: Bytes::from(data),
            mime_type: request["mimeType"].as_str().unwrap_or_default().to_string(),
        },
    );
    *state.completed_parts.lock() = sizes;
    ok(json!({ "hash": etag, "key": key }))
}

async fn abort_parts(
    State(state): State<Arc<KodoState>>,
    Path((_bucket, _object, id)): Path<(String, String, String)>,
) -> Response {
    match state.uploads.lock().remove(&id) {
        Some(_) => {
            state.aborted.lock().push(id);
            ok(json!({}))
        }
        None => error(612, "no such upload"),
    }
}

async fn download(
    State(state): State<Arc<KodoState>>,
    Path(key): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let deadline = query.get("e").and_then(|e| e.parse::<i64>().ok());
    if deadline.map_or(true, |e| e < chrono::Utc::now().timestamp()) || !query.contains_key("token") {
        return error(401, "download token not specified or expired");
    }
    let key = key.trim_start_matches('/');
    match state.objects.lock().get(&format!("{}:{}", BUCKET, key)) {
        Some(object) => (StatusCode::OK, object.data.clone()).into_response(),
        None => error(404, "Document not found"),
    }
}
