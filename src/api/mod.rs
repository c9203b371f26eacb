//! Public HTTP surface.
//!
//! | Method | Path | Action |
//! |---|---|---|
//! | `POST` | `/api/v1/sessions/{id}/expose` | expose a port |
//! | `GET` | `/api/v1/sessions/{id}/expose` | list exposures |
//! | `DELETE` | `/api/v1/sessions/{id}/expose` | clean up the session |
//! | `DELETE` | `/api/v1/sessions/{id}/expose/{port}` | unexpose a port |
//! | any | `/api/v1/sessions/{id}/proxy/{port}/*` | path-based forwarding |
//!
//! Authentication and authorization happen in front of this service.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use handlers::{ApiState, MAX_BODY_BYTES};
pub use routes::{Route, match_route};
pub use server::ApiServer;
