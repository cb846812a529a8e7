//! In-process mock providers for integration tests / 测试用模拟存储服务
#![allow(dead_code)]

pub mod kodo_mock;
pub mod oss_mock;
pub mod s3_mock;

use axum::Router;
use tokio::io::AsyncReadExt;

use yaolist_storage::storage::{ObjectLocator, ObjectReader, ObjectStorage};

/// Serve a router on a random local port, returns `http://127.0.0.1:port`
pub async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub async fn read_all(mut reader: ObjectReader) -> Vec<u8> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    buf
}

/// Read an object, panicking with the normalized error on failure
pub async fn read_object(backend: &dyn ObjectStorage, locator: &ObjectLocator) -> Vec<u8> {
    match backend.get(locator).await {
        Ok(reader) => read_all(reader).await,
        Err(result) => panic!("get {} failed: {}", locator, result.message),
    }
}

/// Deterministic test payload / 测试数据
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// POST a form upload the way a browser would, file part last
pub async fn post_form(
    url: &str,
    fields: &std::collections::BTreeMap<String, String>,
    file_name: &str,
    data: Vec<u8>,
) -> reqwest::Response {
    let mut form = reqwest::multipart::Form::new();
    for (name, value) in fields {
        form = form.text(name.clone(), value.clone());
    }
    let mime = mime_guess::from_path(file_name).first_or_octet_stream();
    let part = reqwest::multipart::Part::bytes(data)
        .file_name(file_name.to_string())
        .mime_str(mime.as_ref())
        .unwrap();
    form = form.part("file", part);
    reqwest::Client::new().post(url).multipart(form).send().await.unwrap()
}
