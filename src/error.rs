//! Error kinds shared across the reflection, planning and execution layers.
//!
//! Every failure that can surface in a GraphQL response is an [`ApiError`].
//! Field resolvers convert it into `async_graphql::Error` with a stable
//! `code` extension so clients can branch without parsing messages.

use async_graphql::ErrorExtensions;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Bad argument types, unknown fields or operators, depth/complexity
    /// budget exceeded.
    #[error("validation error: {0}")]
    Validation(String),

    /// Table or record not found for update/delete.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed cursor, or a cursor that does not match the current
    /// ordering.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// Cursor pagination was requested but no orderable column exists.
    #[error("cursor pagination requires an orderable column on {0}")]
    OrderRequired(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("invalid enum value: {0}")]
    InvalidEnum(String),

    #[error("invalid network address: {0}")]
    InvalidNetworkAddress(String),

    #[error("invalid uuid: {0}")]
    InvalidUuid(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Wraps constraint violations and other database errors raised while
    /// executing a mutation. The originating message is preserved.
    #[error("mutation failed: {0}")]
    MutationFailed(String),

    /// Upstream publisher error on a subscription.
    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable code carried in GraphQL error extensions.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidCursor(_) => "INVALID_CURSOR",
            ApiError::OrderRequired(_) => "ORDER_REQUIRED",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::InvalidEnum(_) => "INVALID_ENUM",
            ApiError::InvalidNetworkAddress(_) => "INVALID_NETWORK_ADDRESS",
            ApiError::InvalidUuid(_) => "INVALID_UUID",
            ApiError::InvalidTimestamp(_) => "INVALID_TIMESTAMP",
            ApiError::MutationFailed(_) => "MUTATION_FAILED",
            ApiError::SubscriptionFailed(_) => "SUBSCRIPTION_FAILED",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    /// Wrap a database error from a mutation, keeping the driver message.
    pub fn mutation(err: sqlx::Error) -> Self {
        ApiError::MutationFailed(err.to_string())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("record not found".into()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    /// Convert to a GraphQL error carrying the stable `code` extension.
    ///
    /// Not a `From` impl: `async_graphql` already provides a blanket
    /// `From<T: Display + Send + Sync + 'static>`, which `ApiError`
    /// satisfies, so an explicit `From<ApiError>` would conflict (E0119).
    pub fn into_graphql_error(self) -> async_graphql::Error {
        let code = self.code();
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| e.set("code", code))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let err: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ApiError::Validation("x".into()).code(), "VALIDATION");
        assert_eq!(ApiError::OrderRequired("t".into()).code(), "ORDER_REQUIRED");
        assert_eq!(ApiError::MutationFailed("dup".into()).code(), "MUTATION_FAILED");
    }
}
