use common::docstore::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("newUserId is required")]
    MissingNewUserId,
    #[error("oldUserId is required to resume a migration")]
    MissingOldUserId,
    #[error("userId is required")]
    MissingUserId,
    #[error("oldUserId and newUserId must differ")]
    SameIdentity,
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Blob store error: {0}")]
    Blob(#[from] object_store::Error),
}

impl ReconcileError {
    /// Errors raised before any store access because the request itself is unusable
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ReconcileError::MissingNewUserId
                | ReconcileError::MissingOldUserId
                | ReconcileError::MissingUserId
                | ReconcileError::SameIdentity
        )
    }
}
