//! HTTP surface: the rate limited project route and the admin reset routes.

mod server;
mod service;

pub use server::HttpServer;
pub use service::{
    build_router, canonical_endpoint, normalize_project_path, AppState, API_KEY_HEADER,
};
