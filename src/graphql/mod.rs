//! The generated GraphQL surface: schema synthesis, HTTP/WS transport and
//! the change-event feed.

pub mod complexity;
pub mod naming;
pub mod scalars;
pub mod schema;
pub mod service;
pub mod subscriptions;
pub mod types;
pub mod ws;

pub use schema::{GqlContext, RequestRole, SchemaService, generate_schema};
pub use service::{AppState, router};
pub use subscriptions::{ChangeBroker, ChangeEvent, ChangeOp};
