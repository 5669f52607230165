//! The golden schema service (C4).
//!
//! Performs the privileged reflection once per TTL and hands out the full
//! model every role-scoped view is derived from.

use std::sync::Arc;

use crate::error::ApiResult;
use crate::meta::model::DatabaseModel;
use crate::meta::reflector::SchemaReflector;

pub struct FullSchemaService {
    reflector: Arc<SchemaReflector>,
    schema: String,
}

impl FullSchemaService {
    pub fn new(reflector: Arc<SchemaReflector>, schema: impl Into<String>) -> Self {
        Self { reflector, schema: schema.into() }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema
    }

    /// The full privileged reflection, cached until the TTL lapses.
    pub async fn get_full(&self) -> ApiResult<Arc<DatabaseModel>> {
        self.reflector.reflect(&self.schema).await
    }

    /// Drop the cached model and reflect again immediately.
    pub async fn refresh(&self) -> ApiResult<Arc<DatabaseModel>> {
        self.reflector.invalidate(&self.schema).await;
        self.reflector.reflect(&self.schema).await
    }

    /// Drop the cached model without re-reflecting.
    pub async fn clear(&self) {
        self.reflector.invalidate(&self.schema).await;
    }
}
