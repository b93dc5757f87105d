use common::config::Configuration;
use common::docstore::FieldPath;

use crate::error::ReconcileError;

/// Collection, field and storage layout shared by the engine components
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub users_collection: String,
    pub identity_field: FieldPath,
    pub owner_field: FieldPath,
    pub dependent_collections: Vec<String>,
    pub profile_reference_fields: Vec<FieldPath>,
    pub reference_field_suffixes: Vec<String>,
    pub categories: Vec<String>,
    pub public_base_url: String,
    pub token_metadata_key: String,
}

fn field(name: &str) -> Result<FieldPath, ReconcileError> {
    FieldPath::parse(name).map_err(|e| ReconcileError::InvalidSettings(e.to_string()))
}

impl ReconcilerSettings {
    pub fn from_config(config: &Configuration) -> Result<Self, ReconcileError> {
        let schema = &config.schema;
        Ok(Self {
            users_collection: schema.users_collection.clone(),
            identity_field: field(&schema.identity_field)?,
            owner_field: field(&schema.owner_field)?,
            dependent_collections: schema.dependent_collections.clone(),
            profile_reference_fields: schema
                .profile_reference_fields
                .iter()
                .map(|name| field(name))
                .collect::<Result<_, _>>()?,
            reference_field_suffixes: schema.reference_field_suffixes.clone(),
            categories: config.storage.categories.clone(),
            public_base_url: config.storage.public_base_url.clone(),
            token_metadata_key: config.storage.token_metadata_key.clone(),
        })
    }
}
