use anyhow::Result;
use object_store::{
    Attribute, AttributeValue, ObjectStore, PutOptions, PutPayload, aws::AmazonS3Builder,
    gcp::GoogleCloudStorageBuilder, local::LocalFileSystem, memory::InMemory, path::Path,
};
use std::sync::Arc;
use url::Url;

use crate::config::StorageConfig;

/// Create an object store from storage configuration
pub fn create_object_store(storage_config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    create_object_store_from_dsn(&storage_config.dsn)
}

/// Create an object store from a DSN string
pub fn create_object_store_from_dsn(dsn: &str) -> Result<Arc<dyn ObjectStore>> {
    let url =
        Url::parse(dsn).map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", dsn, e))?;

    match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(anyhow::anyhow!(
                    "File DSN must specify a path: file:///path/to/storage"
                ));
            }
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "s3" => {
            let builder = create_s3_builder_from_dsn(&url)?;
            Ok(Arc::new(builder.build()?))
        }
        "gs" => {
            let bucket = url
                .host_str()
                .ok_or_else(|| anyhow::anyhow!("GCS DSN must specify a bucket: gs://bucket"))?;
            let store = GoogleCloudStorageBuilder::from_env()
                .with_bucket_name(bucket)
                .build()?;
            Ok(Arc::new(store))
        }
        scheme => Err(anyhow::anyhow!(
            "Unsupported storage scheme: {}. Supported: file, memory, s3, gs",
            scheme
        )),
    }
}

/// Create an S3 builder from a DSN
/// DSN format: s3://[access_key:secret_key@]host[:port]/bucket
pub fn create_s3_builder_from_dsn(dsn: &Url) -> Result<AmazonS3Builder> {
    let host = dsn
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("Missing S3 host in DSN"))?;
    let port = dsn.port();
    let bucket = dsn.path().trim_start_matches('/');

    if bucket.is_empty() {
        return Err(anyhow::anyhow!(
            "S3 DSN must specify a bucket: s3://host/bucket"
        ));
    }

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region("us-east-1");

    let access_key = dsn.username();
    let secret_key = dsn.password().unwrap_or("");

    if !access_key.is_empty() {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    // Anything that isn't AWS proper is treated as S3-compatible (MinIO etc.)
    let endpoint = if host.contains("amazonaws.com") {
        None
    } else {
        let scheme = if port == Some(443) { "https" } else { "http" };
        Some(match port {
            Some(p) => format!("{scheme}://{host}:{p}"),
            None => format!("{scheme}://{host}"),
        })
    };

    if let Some(endpoint) = endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false);
    }

    if access_key.is_empty() {
        if let Ok(env_key) = std::env::var("AWS_ACCESS_KEY_ID") {
            builder = builder.with_access_key_id(env_key);
        }
        if let Ok(env_secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            builder = builder.with_secret_access_key(env_secret);
        }
        if let Ok(env_region) = std::env::var("AWS_DEFAULT_REGION") {
            builder = builder.with_region(env_region);
        }
    }

    Ok(builder)
}

fn metadata_attribute(key: &str) -> Attribute {
    Attribute::Metadata(key.to_string().into())
}

/// Read one user-metadata value of an object
pub async fn read_metadata(
    store: &dyn ObjectStore,
    path: &Path,
    key: &str,
) -> object_store::Result<Option<String>> {
    let result = store.get(path).await?;
    Ok(result
        .attributes
        .get(&metadata_attribute(key))
        .map(|value| AsRef::<str>::as_ref(value).to_owned()))
}

/// Set one user-metadata value, keeping the object's other attributes.
///
/// Object stores have no in-place metadata update, so the object is
/// rewritten with the merged attribute set.
pub async fn write_metadata(
    store: &dyn ObjectStore,
    path: &Path,
    key: &str,
    value: &str,
) -> object_store::Result<()> {
    let result = store.get(path).await?;
    let mut attributes = result.attributes.clone();
    let bytes = result.bytes().await?;

    attributes.insert(metadata_attribute(key), AttributeValue::from(value.to_string()));
    store
        .put_opts(
            path,
            PutPayload::from(bytes),
            PutOptions {
                attributes,
                ..Default::default()
            },
        )
        .await?;
    Ok(())
}

/// Client-facing URL of an object, optionally carrying its access token
pub fn object_url(public_base_url: &str, path: &Path, token: Option<&str>) -> String {
    let base = public_base_url.trim_end_matches('/');
    let encoded = urlencoding::encode(path.as_ref());
    match token {
        Some(token) => format!("{base}/{encoded}?alt=media&token={token}"),
        None => format!("{base}/{encoded}?alt=media"),
    }
}

/// Resolve a stored locator (accessible URL, `gs://` URL or raw path) to an object path.
///
/// Returns `None` for locators that point outside this blob store.
pub fn locator_to_path(public_base_url: &str, locator: &str) -> Option<Path> {
    let base = public_base_url.trim_end_matches('/');

    let raw = if let Some(rest) = locator.strip_prefix(base).and_then(|r| r.strip_prefix('/')) {
        let encoded = rest.split(['?', '#']).next().unwrap_or_default();
        urlencoding::decode(encoded).ok()?.into_owned()
    } else if let Some(rest) = locator.strip_prefix("gs://") {
        let (_bucket, object) = rest.split_once('/')?;
        object.to_string()
    } else if locator.contains("://") {
        return None;
    } else {
        locator.to_string()
    };

    let raw = raw.trim_matches('/');
    if raw.is_empty() {
        return None;
    }
    Path::parse(raw).ok()
}
