//! [`BlobStore`] backends: local directory, S3-compatible bucket and an
//! in-memory map for dry runs and tests.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ClientOptions, ObjectStore, PutOptions, PutPayload};
use parking_lot::RwLock;
use tracing::debug;

use lumen_core::error::LumenError;
use lumen_core::traits::BlobStore;

fn store_err(e: impl ToString) -> LumenError {
    LumenError::BlobStore(e.to_string())
}

// ----------------------------------------------------------------------------
// Filesystem
// ----------------------------------------------------------------------------

/// Objects stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, LumenError> {
        let relative = Path::new(key);
        let plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(LumenError::BlobStore(format!("invalid object key: {key}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, LumenError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<(), LumenError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(store_err)?;
        }
        // Write-then-rename so readers never see a partial object.
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, &body).await.map_err(store_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(store_err)?;
        debug!(key, bytes = body.len(), "stored object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), LumenError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_err(e)),
        }
    }
}

// ----------------------------------------------------------------------------
// S3-compatible bucket
// ----------------------------------------------------------------------------

/// Objects in an S3-compatible bucket, with SigV4-signed requests.
///
/// Buckets are addressed path-style (`{endpoint}/{bucket}/{key}`), which is
/// what R2, MinIO and most other S3-compatible stores expect.
#[derive(Debug)]
pub struct S3BlobStore {
    inner: AmazonS3,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(
        endpoint: &str,
        bucket: &str,
        region: &str,
        access_key_id: &str,
        secret_access_key: &str,
        timeout: Duration,
    ) -> Result<Self, LumenError> {
        if bucket.is_empty() {
            return Err(LumenError::BlobStore("s3 bucket name is empty".into()));
        }
        let endpoint = endpoint.trim_end_matches('/');
        let client_options = ClientOptions::new()
            .with_timeout(timeout)
            .with_allow_http(endpoint.starts_with("http://"));
        let inner = AmazonS3Builder::new()
            .with_endpoint(endpoint)
            .with_bucket_name(bucket)
            .with_region(region)
            .with_access_key_id(access_key_id)
            .with_secret_access_key(secret_access_key)
            .with_virtual_hosted_style_request(false)
            .with_client_options(client_options)
            .build()
            .map_err(store_err)?;
        Ok(Self {
            inner,
            bucket: bucket.to_owned(),
        })
    }

    fn object_path(key: &str) -> Result<ObjectPath, LumenError> {
        if key.is_empty() {
            return Err(LumenError::BlobStore("invalid object key: empty".into()));
        }
        ObjectPath::parse(key).map_err(|e| LumenError::BlobStore(format!("invalid object key {key}: {e}")))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, LumenError> {
        let path = Self::object_path(key)?;
        match self.inner.get(&path).await {
            Ok(result) => Ok(Some(result.bytes().await.map_err(store_err)?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), LumenError> {
        let path = Self::object_path(key)?;
        let len = body.len();
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let mut options = PutOptions::default();
        options.attributes = attributes;

        self.inner
            .put_opts(&path, PutPayload::from(body), options)
            .await
            .map_err(store_err)?;
        debug!(key, bytes = len, bucket = %self.bucket, "uploaded object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), LumenError> {
        let path = Self::object_path(key)?;
        match self.inner.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(store_err(e)),
        }
    }
}

// ----------------------------------------------------------------------------
// Memory
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, (Bytes, String)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys in lexicographic order.
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().get(key).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, LumenError> {
        Ok(self.objects.read().get(key).map(|(body, _)| body.clone()))
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), LumenError> {
        self.objects
            .write()
            .insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), LumenError> {
        self.objects.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        assert!(store.get("manifest.json").await.unwrap().is_none());
        store
            .put("manifest.json", Bytes::from_static(b"{}"), "application/json")
            .await
            .unwrap();
        assert_eq!(store.get("manifest.json").await.unwrap().unwrap(), Bytes::from_static(b"{}"));

        store
            .put("manifest.json", Bytes::from_static(b"{\"v\":1}"), "application/json")
            .await
            .unwrap();
        assert_eq!(
            store.get("manifest.json").await.unwrap().unwrap(),
            Bytes::from_static(b"{\"v\":1}")
        );

        store.delete("manifest.json").await.unwrap();
        assert!(store.get("manifest.json").await.unwrap().is_none());
        // Deleting again is fine.
        store.delete("manifest.json").await.unwrap();
    }

    #[tokio::test]
    async fn fs_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        for key in ["../outside", "/etc/passwd", "", "a/../../b"] {
            assert!(store.get(key).await.is_err(), "accepted {key:?}");
        }
    }

    #[tokio::test]
    async fn memory_store_tracks_content_type() {
        let store = MemoryBlobStore::new();
        store.put("b.gz", Bytes::from_static(b"x"), "application/gzip").await.unwrap();
        store.put("a.gz", Bytes::from_static(b"y"), "application/gzip").await.unwrap();
        assert_eq!(store.keys(), vec!["a.gz".to_string(), "b.gz".to_string()]);
        assert_eq!(store.content_type("a.gz").as_deref(), Some("application/gzip"));
        store.delete("a.gz").await.unwrap();
        store.delete("missing").await.unwrap();
        assert_eq!(store.keys(), vec!["b.gz".to_string()]);
    }

    // ------------------------------------------------------------------------
    // S3
    // ------------------------------------------------------------------------

    use std::sync::Arc;

    use axum::extract::{Path as UrlPath, State};
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;

    /// What the fake bucket saw for one request.
    #[derive(Debug, Clone)]
    struct SeenRequest {
        method: &'static str,
        path: String,
        authorization: String,
        content_type: Option<String>,
    }

    /// Minimal S3 endpoint: objects under `/{bucket}/{key}`, every request recorded.
    #[derive(Default)]
    struct FakeBucket {
        objects: RwLock<BTreeMap<String, Bytes>>,
        seen: RwLock<Vec<SeenRequest>>,
    }

    impl FakeBucket {
        fn record(&self, method: &'static str, path: String, headers: &HeaderMap) {
            let value = |name: header::HeaderName| {
                headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
            };
            self.seen.write().push(SeenRequest {
                method,
                path,
                authorization: value(header::AUTHORIZATION).unwrap_or_default(),
                content_type: value(header::CONTENT_TYPE),
            });
        }
    }

    fn object_headers() -> [(header::HeaderName, &'static str); 2] {
        [
            (header::ETAG, "\"0123456789abcdef\""),
            (header::LAST_MODIFIED, "Tue, 15 Nov 1994 12:45:26 GMT"),
        ]
    }

    async fn get_object(
        State(bucket): State<Arc<FakeBucket>>,
        UrlPath((name, key)): UrlPath<(String, String)>,
        headers: HeaderMap,
    ) -> axum::response::Response {
        let path = format!("{name}/{key}");
        bucket.record("GET", path.clone(), &headers);
        match bucket.objects.read().get(&path).cloned() {
            Some(body) => (object_headers(), body).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn put_object(
        State(bucket): State<Arc<FakeBucket>>,
        UrlPath((name, key)): UrlPath<(String, String)>,
        headers: HeaderMap,
        body: Bytes,
    ) -> axum::response::Response {
        let path = format!("{name}/{key}");
        bucket.record("PUT", path.clone(), &headers);
        bucket.objects.write().insert(path, body);
        (object_headers(), ()).into_response()
    }

    async fn delete_object(
        State(bucket): State<Arc<FakeBucket>>,
        UrlPath((name, key)): UrlPath<(String, String)>,
        headers: HeaderMap,
    ) -> StatusCode {
        let path = format!("{name}/{key}");
        bucket.record("DELETE", path.clone(), &headers);
        bucket.objects.write().remove(&path);
        StatusCode::NO_CONTENT
    }

    async fn fake_bucket() -> (String, Arc<FakeBucket>) {
        let bucket = Arc::new(FakeBucket::default());
        let app = Router::new()
            .route("/:bucket/*key", get(get_object).put(put_object).delete(delete_object))
            .with_state(bucket.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), bucket)
    }

    fn s3_store(endpoint: &str) -> S3BlobStore {
        S3BlobStore::new(endpoint, "mainnet", "auto", "test-key", "test-secret", Duration::from_secs(5))
            .unwrap()
    }

    #[tokio::test]
    async fn s3_store_signs_requests_and_addresses_path_style() {
        let (endpoint, bucket) = fake_bucket().await;
        let store = s3_store(&endpoint);

        assert!(store.get("manifest.json").await.unwrap().is_none());
        store
            .put("manifest.json", Bytes::from_static(b"{}"), "application/json")
            .await
            .unwrap();
        assert_eq!(store.get("manifest.json").await.unwrap().unwrap(), Bytes::from_static(b"{}"));
        store.delete("manifest.json").await.unwrap();
        assert!(store.get("manifest.json").await.unwrap().is_none());

        let seen = bucket.seen.read().clone();
        let methods: Vec<&str> = seen.iter().map(|r| r.method).collect();
        assert_eq!(methods, vec!["GET", "PUT", "GET", "DELETE", "GET"]);
        for request in &seen {
            assert_eq!(request.path, "mainnet/manifest.json");
            assert!(
                request.authorization.starts_with("AWS4-HMAC-SHA256 Credential=test-key/"),
                "unsigned request: {request:?}"
            );
            assert!(!request.authorization.starts_with("Basic"));
        }
        assert_eq!(seen[1].content_type.as_deref(), Some("application/json"));
    }

    #[test]
    fn s3_store_rejects_bad_keys_and_config() {
        let store = s3_store("https://blobs.example.com/");
        assert!(S3BlobStore::object_path("").is_err());
        assert!(S3BlobStore::object_path("a/../b").is_err());
        assert_eq!(
            S3BlobStore::object_path("0001_blocks_0000000001_0000000002.gz").unwrap().as_ref(),
            "0001_blocks_0000000001_0000000002.gz"
        );
        assert_eq!(store.bucket, "mainnet");

        let missing_bucket =
            S3BlobStore::new("https://blobs.example.com", "", "auto", "id", "secret", Duration::from_secs(5));
        assert!(missing_bucket.is_err());
    }
}
