use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore,
    PutMultipartOpts, PutOptions, PutPayload, PutResult, Result, memory::InMemory, path::Path,
};

/// In-memory blob store that fails operations under one prefix
#[derive(Debug)]
pub struct FailingBlobs {
    inner: Arc<InMemory>,
    prefix: Path,
    reads_fail: bool,
}

impl FailingBlobs {
    /// Every operation under `prefix` fails
    pub fn new(inner: Arc<InMemory>, prefix: &str) -> Self {
        Self {
            inner,
            prefix: Path::from(prefix),
            reads_fail: true,
        }
    }

    /// Listing and reads under `prefix` succeed; writes, copies and deletes fail
    pub fn writes_only(inner: Arc<InMemory>, prefix: &str) -> Self {
        Self {
            reads_fail: false,
            ..Self::new(inner, prefix)
        }
    }

    fn check_read(&self, location: &Path) -> Result<()> {
        if self.reads_fail {
            self.check(location)?;
        }
        Ok(())
    }

    fn check(&self, location: &Path) -> Result<()> {
        if location.prefix_matches(&self.prefix) {
            return Err(object_store::Error::Generic {
                store: "FailingBlobs",
                source: format!("unavailable: {location}").into(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for FailingBlobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FailingBlobs({})", self.prefix)
    }
}

#[async_trait]
impl ObjectStore for FailingBlobs {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<PutResult> {
        self.check(location)?;
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> Result<Box<dyn MultipartUpload>> {
        self.check(location)?;
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(&self, location: &Path, options: GetOptions) -> Result<GetResult> {
        self.check_read(location)?;
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &Path) -> Result<()> {
        self.check(location)?;
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'static, Result<ObjectMeta>> {
        if let Some(prefix) = prefix {
            if let Err(e) = self.check_read(prefix) {
                return stream::iter([Err::<ObjectMeta, _>(e)]).boxed();
            }
        }
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> Result<ListResult> {
        if let Some(prefix) = prefix {
            self.check_read(prefix)?;
        }
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        self.check(from)?;
        self.check(to)?;
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> Result<()> {
        self.check(from)?;
        self.check(to)?;
        self.inner.copy_if_not_exists(from, to).await
    }
}
