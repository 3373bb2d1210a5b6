pub mod extract;
pub mod handlers;
pub mod headers;
pub mod middleware;
pub mod requests;
pub mod responses;
pub mod routes;

pub use extract::IdempotencyContext;
pub use headers::idempotent_response;
pub use routes::{create_router, AppState};
