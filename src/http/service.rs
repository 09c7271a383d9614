//! Router, rate limit middleware and handlers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Local, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::config::{SelfSyncConfig, LAST_MODIFIED_ROUTE, PROJECTS_ROUTE};
use crate::error::Result;
use crate::ratelimit::{
    client_identity, AdminResetFacade, LimitConfig, LimiterRegistry, RateLimiter, Verdict,
};

/// Header carrying the admin shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

const PROJECTS_PREFIX: &str = "/projects";
const LAST_MODIFIED_PREFIX: &str = "/projects/lastmodified";

/// A rate limited route: its limiter and the path prefix its windows are keyed under.
#[derive(Clone)]
struct GuardedRoute {
    limiter: Arc<RateLimiter>,
    prefix: &'static str,
}

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    projects: GuardedRoute,
    last_modified: GuardedRoute,
    admin: AdminResetFacade,
    admin_api_key: Option<Arc<str>>,
    projects_root: Arc<PathBuf>,
}

impl AppState {
    /// Register the protected routes with `registry` and build handler state.
    pub fn new(registry: &LimiterRegistry, config: &SelfSyncConfig) -> Result<Self> {
        let projects = GuardedRoute {
            limiter: registry.register(
                PROJECTS_ROUTE,
                config.rate_limiting.limit_for(PROJECTS_ROUTE),
            )?,
            prefix: PROJECTS_PREFIX,
        };
        let last_modified = GuardedRoute {
            limiter: registry.register(
                LAST_MODIFIED_ROUTE,
                config.rate_limiting.limit_for(LAST_MODIFIED_ROUTE),
            )?,
            prefix: LAST_MODIFIED_PREFIX,
        };

        if config.admin.api_key.is_none() {
            warn!("No admin API key configured; admin endpoints are disabled");
        }

        Ok(Self {
            projects,
            last_modified,
            admin: registry.admin(),
            admin_api_key: config.admin.api_key.as_deref().map(Arc::from),
            projects_root: Arc::new(config.server.projects_root.clone()),
        })
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let projects: Router<AppState> = Router::new()
        .route("/projects/{path}", get(describe_project))
        .route_layer(middleware::from_fn_with_state(
            state.projects.clone(),
            enforce_rate_limit,
        ));
    let last_modified: Router<AppState> = Router::new()
        .route("/projects/lastmodified/{path}", get(project_last_modified))
        .route_layer(middleware::from_fn_with_state(
            state.last_modified.clone(),
            enforce_rate_limit,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/admin/reset-rate-limit", get(reset_rate_limit))
        .route("/admin/reset-all-rate-limits", get(reset_all_rate_limits))
        .merge(projects)
        .merge(last_modified)
        .with_state(state)
}

/// The key a guarded route counts a request under.
///
/// The path parameter arrives percent-decoded and is normalized the same way
/// the folder lookup normalizes it, so spellings that reach the same folder
/// share one window.
fn resource_key(prefix: &str, path: &str) -> String {
    format!(
        "{}/{}",
        prefix,
        normalize_project_path(path).unwrap_or_default()
    )
}

/// Bring an admin supplied endpoint path into the form windows are keyed by.
///
/// Paths outside the guarded prefixes are used verbatim.
pub fn canonical_endpoint(endpoint_path: &str) -> String {
    for prefix in [LAST_MODIFIED_PREFIX, PROJECTS_PREFIX] {
        let rest = endpoint_path
            .get(..prefix.len())
            .filter(|head| head.eq_ignore_ascii_case(prefix))
            .and_then(|_| endpoint_path[prefix.len()..].strip_prefix('/'));
        if let Some(rest) = rest {
            return resource_key(prefix, rest);
        }
    }
    endpoint_path.to_string()
}

async fn enforce_rate_limit(
    State(route): State<GuardedRoute>,
    Path(path): Path<String>,
    request: Request,
    next: Next,
) -> Response {
    let limiter = &route.limiter;
    let client = {
        let forwarded = request
            .headers()
            .get(FORWARDED_FOR_HEADER)
            .and_then(|value| value.to_str().ok());
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        client_identity(forwarded, peer)
    };
    let resource = resource_key(route.prefix, &path);

    match limiter.check_and_record(&client, &resource) {
        Verdict::Allow => next.run(request).await,
        Verdict::Deny { retry_after } => {
            debug!(client = %client, resource = %resource, "Rejecting rate limited request");
            too_many_requests(limiter.config(), retry_after)
        }
    }
}

fn too_many_requests(config: &LimitConfig, retry_after: Duration) -> Response {
    let retry_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    let window = config.describe_window();

    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_secs.max(1).to_string())],
        format!(
            "You have exceeded the limit of {} requests per {}. Please try again in {}.",
            config.max_requests, window, window
        ),
    )
        .into_response()
}

/// Map a project path parameter onto a relative folder path.
///
/// Dots and backslashes become separators and the result is lower-cased.
/// Empty segments are dropped, so the result never starts at the filesystem
/// root and never contains `..`. Returns `None` when nothing is left.
pub fn normalize_project_path(path: &str) -> Option<String> {
    let normalized = path.replace(['.', '\\'], "/").to_lowercase();
    let segments: Vec<&str> = normalized
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    (!segments.is_empty()).then(|| segments.join("/"))
}

/// Resolve a path parameter to an existing project folder, or the error response.
async fn resolve_project(
    state: &AppState,
    path: &str,
) -> std::result::Result<(String, PathBuf), Response> {
    let Some(project) = normalize_project_path(path) else {
        return Err(
            (StatusCode::BAD_REQUEST, "Please provide a valid folder path").into_response(),
        );
    };

    let folder = state.projects_root.join(&project);
    let is_dir = tokio::fs::metadata(&folder)
        .await
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err((
            StatusCode::NOT_FOUND,
            format!("'{}' folder not found", project),
        )
            .into_response());
    }

    Ok((project, folder))
}

async fn describe_project(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let (project, folder) = match resolve_project(&state, &path).await {
        Ok(resolved) => resolved,
        Err(rejection) => return rejection,
    };

    match count_entries(&folder).await {
        Ok(entries) => Json(json!({ "project": project, "entries": entries })).into_response(),
        Err(e) => {
            error!(project = %project, error = %e, "Failed to read project folder");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred while reading the folder",
            )
                .into_response()
        }
    }
}

async fn count_entries(folder: &std::path::Path) -> std::io::Result<usize> {
    let mut entries = tokio::fs::read_dir(folder).await?;
    let mut count = 0;
    while entries.next_entry().await?.is_some() {
        count += 1;
    }
    Ok(count)
}

async fn project_last_modified(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Response {
    let (project, folder) = match resolve_project(&state, &path).await {
        Ok(resolved) => resolved,
        Err(rejection) => return rejection,
    };

    match newest_write_time(&folder).await {
        Ok(modified) => {
            let utc = DateTime::<Utc>::from(modified);
            let local = utc.with_timezone(&Local);
            Json(json!({
                "path": project,
                "lastModified": local.to_rfc3339(),
                "lastModifiedUtc": utc.to_rfc3339(),
                "formattedDate": local.format("%Y-%m-%d %H:%M:%S").to_string(),
            }))
            .into_response()
        }
        Err(e) => {
            error!(project = %project, error = %e, "Failed to read project modification time");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred while reading the folder",
            )
                .into_response()
        }
    }
}

/// Latest modification time of a folder and everything below it.
///
/// Symlinks are not followed.
async fn newest_write_time(root: &std::path::Path) -> std::io::Result<SystemTime> {
    let mut newest = tokio::fs::metadata(root).await?.modified()?;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            newest = newest.max(metadata.modified()?);
            if metadata.is_dir() {
                pending.push(entry.path());
            }
        }
    }

    Ok(newest)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "tracked_windows": state.projects.limiter.store().len(),
    }))
}

/// Check the admin key header, producing the rejection response on failure.
fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    action: &str,
) -> std::result::Result<(), Response> {
    let Some(expected) = state.admin_api_key.as_deref() else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Admin API key is not configured. Admin operations are unavailable.",
        )
            .into_response());
    };

    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if provided.is_empty() || provided != expected {
        warn!(action = action, "Rejected admin request with invalid API key");
        return Err((StatusCode::UNAUTHORIZED, "Invalid API key").into_response());
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetQuery {
    ip_address: Option<String>,
    endpoint_path: Option<String>,
}

async fn reset_rate_limit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ResetQuery>,
) -> Response {
    if let Err(rejection) = authorize(&state, &headers, "reset-rate-limit") {
        return rejection;
    }

    let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());
    let (Some(ip_address), Some(endpoint_path)) =
        (non_empty(query.ip_address), non_empty(query.endpoint_path))
    else {
        return (
            StatusCode::BAD_REQUEST,
            "ipAddress and endpointPath are required",
        )
            .into_response();
    };

    let endpoint_path = canonical_endpoint(&endpoint_path);
    if state.admin.reset_one(&ip_address, &endpoint_path) {
        (
            StatusCode::OK,
            Json(json!({
                "message": format!(
                    "Rate limit for {} on {} was reset",
                    ip_address, endpoint_path
                )
            })),
        )
            .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "message": format!(
                    "No active rate limit record for {} on {}",
                    ip_address, endpoint_path
                )
            })),
        )
            .into_response()
    }
}

async fn reset_all_rate_limits(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&state, &headers, "reset-all-rate-limits") {
        return rejection;
    }

    state.admin.reset_all();
    Json(json!({ "message": "All rate limits were reset" })).into_response()
}
