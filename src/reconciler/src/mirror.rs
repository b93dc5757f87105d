//! Blob mirroring between identity-scoped prefixes.
//!
//! Objects live at `<category>/<userId>/<filename>`. Mirroring copies every
//! object of the old user to the same filename under the new user, makes sure
//! each copy carries an access token, and records how old locators map to the
//! new accessible URLs. Sources are left in place.

use std::collections::HashMap;
use std::sync::Arc;

use common::storage::{object_url, read_metadata, write_metadata};
use futures::TryStreamExt;
use object_store::{ObjectMeta, ObjectStore, path::Path};
use uuid::Uuid;

use crate::settings::ReconcilerSettings;

/// Old storage locator (URL or raw path) to new accessible URL
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceMap {
    entries: HashMap<String, String>,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, old: impl Into<String>, new: impl Into<String>) {
        self.entries.insert(old.into(), new.into());
    }

    pub fn get(&self, old: &str) -> Option<&str> {
        self.entries.get(old).map(String::as_str)
    }

    pub fn extend(&mut self, other: ReferenceMap) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Result of one mirroring run
#[derive(Debug, Clone, Default)]
pub struct MirrorReport {
    pub references: ReferenceMap,
    pub copied: usize,
    /// One entry per category that could not be mirrored completely
    pub failures: Vec<String>,
}

pub struct ObjectMirror {
    blobs: Arc<dyn ObjectStore>,
    categories: Vec<String>,
    public_base_url: String,
    token_key: String,
}

impl ObjectMirror {
    pub fn new(blobs: Arc<dyn ObjectStore>, settings: &ReconcilerSettings) -> Self {
        Self {
            blobs,
            categories: settings.categories.clone(),
            public_base_url: settings.public_base_url.clone(),
            token_key: settings.token_metadata_key.clone(),
        }
    }

    /// Copy every category of `old_user_id` to `new_user_id`.
    ///
    /// Never fails as a whole: a category that errors is logged and reported
    /// in `failures`, and whatever it mirrored before the error stays mapped.
    pub async fn mirror(&self, old_user_id: &str, new_user_id: &str) -> MirrorReport {
        let mut report = MirrorReport::default();

        for category in &self.categories {
            match self
                .mirror_category(category, old_user_id, new_user_id, &mut report)
                .await
            {
                Ok(copied) => {
                    tracing::debug!(
                        category = %category,
                        old_user_id = %old_user_id,
                        new_user_id = %new_user_id,
                        copied,
                        "Mirrored blob category"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        category = %category,
                        old_user_id = %old_user_id,
                        new_user_id = %new_user_id,
                        error = %e,
                        "Failed to mirror blob category; its references keep old paths"
                    );
                    report
                        .failures
                        .push(format!("Failed to mirror category {category}: {e}"));
                }
            }
        }

        report
    }

    async fn mirror_category(
        &self,
        category: &str,
        old_user_id: &str,
        new_user_id: &str,
        report: &mut MirrorReport,
    ) -> Result<usize, object_store::Error> {
        let prefix = Path::from(format!("{category}/{old_user_id}"));
        let objects: Vec<ObjectMeta> = self.blobs.list(Some(&prefix)).try_collect().await?;

        let mut copied = 0;
        for meta in objects {
            let Some(relative) = relative_name(&prefix, &meta.location) else {
                continue;
            };
            let destination = Path::from(format!("{category}/{new_user_id}/{relative}"));

            let old_token = read_metadata(self.blobs.as_ref(), &meta.location, &self.token_key)
                .await?;
            let previous_token = self.existing_token(&destination).await?;

            self.blobs.copy(&meta.location, &destination).await?;
            let token = self.ensure_token(&destination, previous_token).await?;

            let new_url = object_url(&self.public_base_url, &destination, Some(&token));
            if old_token.is_some() {
                report.references.insert(
                    object_url(&self.public_base_url, &meta.location, old_token.as_deref()),
                    new_url.clone(),
                );
            }
            report.references.insert(
                object_url(&self.public_base_url, &meta.location, None),
                new_url.clone(),
            );
            report
                .references
                .insert(meta.location.to_string(), new_url);
            copied += 1;
        }

        report.copied += copied;
        Ok(copied)
    }

    /// Token of an object already at `path`, so re-runs hand out stable URLs
    async fn existing_token(&self, path: &Path) -> Result<Option<String>, object_store::Error> {
        match read_metadata(self.blobs.as_ref(), path, &self.token_key).await {
            Ok(token) => Ok(token),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Keep the token copied with the object, else reuse or generate one
    async fn ensure_token(
        &self,
        destination: &Path,
        previous: Option<String>,
    ) -> Result<String, object_store::Error> {
        if let Some(token) =
            read_metadata(self.blobs.as_ref(), destination, &self.token_key).await?
        {
            return Ok(token);
        }
        let token = previous.unwrap_or_else(|| Uuid::new_v4().to_string());
        write_metadata(self.blobs.as_ref(), destination, &self.token_key, &token).await?;
        Ok(token)
    }
}

/// Part of `location` below `prefix`, e.g. `a.jpg` for `meals/u1` + `meals/u1/a.jpg`
fn relative_name(prefix: &Path, location: &Path) -> Option<String> {
    let relative: Vec<String> = location
        .prefix_match(prefix)?
        .map(|part| part.as_ref().to_string())
        .collect();
    if relative.is_empty() {
        return None;
    }
    Some(relative.join("/"))
}
