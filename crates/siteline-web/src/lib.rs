//! Axum JSON API for Siteline.
//!
//! The fronting gateway authenticates callers and forwards identity as
//! `x-user-id` / `x-user-role` headers; handlers translate store outcomes
//! into the REST error taxonomy (422 validation, 409 conflict, 404 missing,
//! 403 denied, 401 unidentified).

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

use siteline_core::{
    AssistedSiteRequest, NewCustomRegion, NewOpportunity, NewSite, OpportunityStatus,
    OpportunityType, Requester, Tenure, ValidationError,
};
use siteline_store::{
    seed_from_dir, DocumentStore, MemoryStore, OfflineGateway, OpportunityFilter, PaymentGateway,
    StoreConfig, StoreError,
};

pub const CRATE_NAME: &str = "siteline-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub documents: DocumentStore,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl AppState {
    pub fn new(documents_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            documents: DocumentStore::new(documents_dir),
            gateway: Arc::new(OfflineGateway::new()),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/sites", get(sites_list_handler).post(sites_create_handler))
        .route(
            "/api/sites/{id}",
            get(site_get_handler)
                .put(site_update_handler)
                .delete(site_delete_handler),
        )
        .route("/api/sites/{id}/tags", post(site_tag_add_handler))
        .route("/api/sites/{id}/tags/{tag}", axum::routing::delete(site_tag_remove_handler))
        .route(
            "/api/sites/{id}/files",
            get(site_files_handler).post(site_file_upload_handler),
        )
        .route(
            "/api/sites/{id}/files/{file_id}",
            axum::routing::delete(site_file_remove_handler),
        )
        .route(
            "/api/opportunities",
            get(opportunities_list_handler).post(opportunities_create_handler),
        )
        .route(
            "/api/opportunities/{id}",
            get(opportunity_get_handler)
                .put(opportunity_update_handler)
                .delete(opportunity_delete_handler),
        )
        .route("/api/opportunities/{id}/publish", post(opportunity_publish_handler))
        .route("/api/opportunities/{id}/withdraw", post(opportunity_withdraw_handler))
        .route(
            "/api/opportunities/{id}/interest",
            put(interest_add_handler).delete(interest_remove_handler),
        )
        .route("/api/shortlist", get(shortlist_list_handler))
        .route(
            "/api/shortlist/{opportunity_id}",
            put(shortlist_add_handler).delete(shortlist_remove_handler),
        )
        .route("/api/regions", get(regions_list_handler).post(regions_create_handler))
        .route(
            "/api/regions/{id}",
            put(region_update_handler).delete(region_delete_handler),
        )
        .route("/api/lpas", get(lpas_handler))
        .route(
            "/api/assisted-sites",
            get(assisted_queue_handler).post(assisted_submit_handler),
        )
        .route("/api/assisted-sites/{id}", get(assisted_get_handler))
        .route("/api/assisted-sites/{id}/checkout", post(assisted_checkout_handler))
        .route("/api/assisted-sites/{id}/process", post(assisted_process_handler))
        .route("/api/assisted-sites/{id}/publish", post(assisted_publish_handler))
        .route("/api/assisted-sites/{id}/reject", post(assisted_reject_handler))
        .route("/api/checkout/confirm", post(checkout_confirm_handler))
        .with_state(state)
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("SITELINE_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let config = StoreConfig::from_env();
    let state = AppState::new(config.documents_dir.clone());

    if config.seeds_dir.exists() {
        let (lpas, regions) = seed_from_dir(&state.store, &config.seeds_dir).await?;
        info!(lpas, regions, "loaded seed data");
    }

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "siteline web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

// ---- plumbing ------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn store_error(err: StoreError) -> Response {
    match &err {
        StoreError::Validation(_) => error_json(StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        StoreError::NotFound(_) => error_json(StatusCode::NOT_FOUND, err.to_string()),
        StoreError::Forbidden(_) => error_json(StatusCode::FORBIDDEN, err.to_string()),
        StoreError::Conflict(_) => error_json(StatusCode::CONFLICT, err.to_string()),
        StoreError::Io(_) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn validation_error(err: ValidationError) -> Response {
    error_json(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
}

/// Reads the identity the gateway attached. No header means 401.
fn requester(headers: &HeaderMap) -> Result<Requester, Response> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| error_json(StatusCode::UNAUTHORIZED, "missing or invalid x-user-id"))?;
    let admin = headers
        .get("x-user-role")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("admin"));
    Ok(if admin {
        Requester::admin(user_id)
    } else {
        Requester::user(user_id)
    })
}

#[derive(Debug, Serialize)]
struct ToggleBody {
    created: bool,
}

#[derive(Debug, Serialize)]
struct RemovedBody {
    removed: bool,
}

// ---- sites ---------------------------------------------------------------

async fn sites_list_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.list_sites(requester).await {
        Ok(sites) => Json(sites).into_response(),
        Err(err) => store_error(err),
    }
}

async fn sites_create_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<NewSite>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.create_site(requester, draft).await {
        Ok(site) => (StatusCode::CREATED, Json(site)).into_response(),
        Err(err) => store_error(err),
    }
}

async fn site_get_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.get_site(requester, id).await {
        Ok(site) => Json(site).into_response(),
        Err(err) => store_error(err),
    }
}

async fn site_update_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Json(draft): Json<NewSite>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.update_site(requester, id, draft).await {
        Ok(site) => Json(site).into_response(),
        Err(err) => store_error(err),
    }
}

async fn site_delete_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.delete_site(requester, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => store_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct TagPayload {
    tag: String,
}

async fn site_tag_add_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Json(payload): Json<TagPayload>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.add_site_tag(requester, id, &payload.tag).await {
        Ok(tag) => (StatusCode::CREATED, Json(tag)).into_response(),
        Err(err) => store_error(err),
    }
}

async fn site_tag_remove_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath((id, tag)): AxumPath<(Uuid, String)>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.remove_site_tag(requester, id, &tag).await {
        Ok(removed) => Json(RemovedBody { removed }).into_response(),
        Err(err) => store_error(err),
    }
}

async fn site_files_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.site_files(requester, id).await {
        Ok(files) => Json(files).into_response(),
        Err(err) => store_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    filename: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
}

/// Accepts raw bytes, lands them in the hash-addressed document store and
/// records the resulting reference against the site.
async fn site_file_upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if body.is_empty() {
        return error_json(StatusCode::UNPROCESSABLE_ENTITY, "empty upload body");
    }
    let stored = match state.documents.store_bytes(id, &query.filename, &body).await {
        Ok(stored) => stored,
        Err(err) => return error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    };
    match state
        .store
        .attach_site_file(
            requester,
            id,
            &query.title,
            query.description,
            &stored.url,
            Some(stored.content_hash),
        )
        .await
    {
        Ok(file) => (StatusCode::CREATED, Json(file)).into_response(),
        Err(err) => store_error(err),
    }
}

async fn site_file_remove_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath((id, file_id)): AxumPath<(Uuid, Uuid)>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.remove_site_file(requester, id, file_id).await {
        Ok(removed) => Json(RemovedBody { removed }).into_response(),
        Err(err) => store_error(err),
    }
}

// ---- opportunities -------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct OpportunitiesQuery {
    status: Option<String>,
    opportunity_type: Option<String>,
    tenure: Option<String>,
    lpa: Option<String>,
    region: Option<String>,
}

fn parse_filter(query: &OpportunitiesQuery) -> Result<OpportunityFilter, ValidationError> {
    Ok(OpportunityFilter {
        status: query
            .status
            .as_deref()
            .map(OpportunityStatus::parse)
            .transpose()?,
        opportunity_type: query
            .opportunity_type
            .as_deref()
            .map(OpportunityType::parse)
            .transpose()?,
        tenure: query.tenure.as_deref().map(Tenure::parse).transpose()?,
        lpa_code: query.lpa.clone(),
        region_code: query.region.clone(),
    })
}

async fn opportunities_list_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OpportunitiesQuery>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let filter = match parse_filter(&query) {
        Ok(filter) => filter,
        Err(err) => return validation_error(err),
    };
    match state.store.list_opportunities(requester, &filter).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => store_error(err),
    }
}

async fn opportunities_create_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<NewOpportunity>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.create_opportunity(requester, draft).await {
        Ok(opportunity) => (StatusCode::CREATED, Json(opportunity)).into_response(),
        Err(err) => store_error(err),
    }
}

async fn opportunity_get_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.get_opportunity(requester, id).await {
        Ok(opportunity) => Json(opportunity).into_response(),
        Err(err) => store_error(err),
    }
}

async fn opportunity_update_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Json(draft): Json<NewOpportunity>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.update_opportunity(requester, id, draft).await {
        Ok(opportunity) => Json(opportunity).into_response(),
        Err(err) => store_error(err),
    }
}

async fn opportunity_delete_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.delete_opportunity(requester, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => store_error(err),
    }
}

async fn opportunity_publish_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.publish_opportunity(requester, id).await {
        Ok(opportunity) => Json(opportunity).into_response(),
        Err(err) => store_error(err),
    }
}

async fn opportunity_withdraw_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.withdraw_opportunity(requester, id).await {
        Ok(opportunity) => Json(opportunity).into_response(),
        Err(err) => store_error(err),
    }
}

async fn interest_add_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.register_interest(requester, id).await {
        Ok(created) => Json(ToggleBody { created }).into_response(),
        Err(err) => store_error(err),
    }
}

async fn interest_remove_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.withdraw_interest(requester, id).await {
        Ok(removed) => Json(RemovedBody { removed }).into_response(),
        Err(err) => store_error(err),
    }
}

// ---- shortlist -----------------------------------------------------------

async fn shortlist_list_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.shortlisted_opportunities(requester).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => store_error(err),
    }
}

async fn shortlist_add_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(opportunity_id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.shortlist_add(requester, opportunity_id).await {
        Ok(created) => Json(ToggleBody { created }).into_response(),
        Err(err) => store_error(err),
    }
}

async fn shortlist_remove_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(opportunity_id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.shortlist_remove(requester, opportunity_id).await {
        Ok(removed) => Json(RemovedBody { removed }).into_response(),
        Err(err) => store_error(err),
    }
}

// ---- regions and LPAs ----------------------------------------------------

async fn regions_list_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.list_regions(requester).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => store_error(err),
    }
}

async fn regions_create_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<NewCustomRegion>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.create_region(requester, draft).await {
        Ok(region) => (StatusCode::CREATED, Json(region)).into_response(),
        Err(err) => store_error(err),
    }
}

async fn region_update_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Json(draft): Json<NewCustomRegion>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.update_region(requester, id, draft).await {
        Ok(region) => Json(region).into_response(),
        Err(err) => store_error(err),
    }
}

async fn region_delete_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.delete_region(requester, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => store_error(err),
    }
}

async fn lpas_handler(State(state): State<AppState>) -> Response {
    Json(state.store.list_lpas().await).into_response()
}

// ---- assisted sites and checkout ----------------------------------------

async fn assisted_submit_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AssistedSiteRequest>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.submit_assisted_site(requester, request).await {
        Ok(assisted) => (StatusCode::CREATED, Json(assisted)).into_response(),
        Err(err) => store_error(err),
    }
}

#[derive(Debug, Deserialize, Default)]
struct AssistedQueueQuery {
    status: Option<String>,
}

async fn assisted_queue_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AssistedQueueQuery>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let status = match query.status.as_deref() {
        None => None,
        Some("pending") => Some(siteline_core::AssistedSiteStatus::Pending),
        Some("processing") => Some(siteline_core::AssistedSiteStatus::Processing),
        Some("published") => Some(siteline_core::AssistedSiteStatus::Published),
        Some("rejected") => Some(siteline_core::AssistedSiteStatus::Rejected),
        Some(other) => {
            return error_json(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("`{other}` is not a valid assisted-site status"),
            )
        }
    };
    match state.store.list_assisted_sites(requester, status).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => store_error(err),
    }
}

async fn assisted_get_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.get_assisted_site(requester, id).await {
        Ok(assisted) => Json(assisted).into_response(),
        Err(err) => store_error(err),
    }
}

async fn assisted_checkout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state
        .store
        .create_checkout(requester, id, state.gateway.as_ref())
        .await
    {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(err) => store_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct ConfirmPayload {
    session_id: String,
}

/// Payment-processor callback: marks the matching intake as paid.
async fn checkout_confirm_handler(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmPayload>,
) -> Response {
    match state
        .store
        .confirm_payment(&payload.session_id, state.gateway.as_ref())
        .await
    {
        Ok(assisted) => Json(assisted).into_response(),
        Err(err) => store_error(err),
    }
}

async fn assisted_process_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.begin_processing(requester, id).await {
        Ok(assisted) => Json(assisted).into_response(),
        Err(err) => store_error(err),
    }
}

async fn assisted_publish_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Json(draft): Json<NewOpportunity>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.publish_assisted_site(requester, id, draft).await {
        Ok((assisted, opportunity)) => Json(serde_json::json!({
            "assisted_site": assisted,
            "opportunity": opportunity,
        }))
        .into_response(),
        Err(err) => store_error(err),
    }
}

async fn assisted_reject_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let requester = match requester(&headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.store.reject_assisted_site(requester, id).await {
        Ok(assisted) => Json(assisted).into_response(),
        Err(err) => store_error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        (AppState::new(dir.path()), dir)
    }

    fn request(
        method: &str,
        uri: &str,
        user: Option<Uuid>,
        admin: bool,
        body: Option<Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user.to_string());
        }
        if admin {
            builder = builder.header("x-user-role", "admin");
        }
        match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&value).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn opportunity_payload(name: &str) -> Value {
        json!({
            "name": name,
            "address": "1 Foundry Way, Manchester",
            "plots": {"total": 48},
            "tenures": ["social-rent", "shared-ownership"],
            "lpa_codes": ["E08000003"],
        })
    }

    #[tokio::test]
    async fn listing_requires_identity() {
        let (state, _dir) = test_state();
        let app = app(state);
        let resp = app
            .oneshot(request("GET", "/api/opportunities", None, false, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn draft_hidden_from_buyers_until_published() {
        let (state, _dir) = test_state();
        let app = app(state);
        let seller = Uuid::new_v4();
        let shopper = Uuid::new_v4();

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/opportunities",
                Some(seller),
                false,
                Some(opportunity_payload("Foundry Yard")),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body_json(resp).await;
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["status"], "draft");

        let resp = app
            .clone()
            .oneshot(request("GET", "/api/opportunities", Some(shopper), false, None))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 0);

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/opportunities/{id}/publish"),
                Some(seller),
                false,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(request("GET", "/api/opportunities", Some(shopper), false, None))
            .await
            .unwrap();
        let listing = body_json(resp).await;
        assert_eq!(listing.as_array().unwrap().len(), 1);
        assert_eq!(listing[0]["tenures"], json!(["social-rent", "shared-ownership"]));
    }

    #[tokio::test]
    async fn shortlist_toggle_is_benign_on_repeats() {
        let (state, _dir) = test_state();
        let app = app(state);
        let seller = Uuid::new_v4();
        let shopper = Uuid::new_v4();

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/opportunities",
                Some(seller),
                false,
                Some(opportunity_payload("Foundry Yard")),
            ))
            .await
            .unwrap();
        let id = body_json(resp).await["id"].as_str().unwrap().to_string();
        app.clone()
            .oneshot(request(
                "POST",
                &format!("/api/opportunities/{id}/publish"),
                Some(seller),
                false,
                None,
            ))
            .await
            .unwrap();

        let resp = app
            .clone()
            .oneshot(request("PUT", &format!("/api/shortlist/{id}"), Some(shopper), false, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["created"], json!(true));

        let resp = app
            .clone()
            .oneshot(request("PUT", &format!("/api/shortlist/{id}"), Some(shopper), false, None))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["created"], json!(false));

        let resp = app
            .clone()
            .oneshot(request("GET", "/api/shortlist", Some(shopper), false, None))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);

        // Removing twice stays 200; the second pass changes nothing.
        let resp = app
            .clone()
            .oneshot(request("DELETE", &format!("/api/shortlist/{id}"), Some(shopper), false, None))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["removed"], json!(true));
        let resp = app
            .oneshot(request("DELETE", &format!("/api/shortlist/{id}"), Some(shopper), false, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["removed"], json!(false));
    }

    #[tokio::test]
    async fn invalid_tenure_filter_is_a_validation_error() {
        let (state, _dir) = test_state();
        let app = app(state);
        let resp = app
            .oneshot(request(
                "GET",
                "/api/opportunities?tenure=freehold",
                Some(Uuid::new_v4()),
                false,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn default_region_is_read_only_for_users() {
        let (state, _dir) = test_state();
        state
            .store
            .seed_default_region("North West", vec!["E08000003".to_string()])
            .await
            .unwrap();
        let app = app(state);
        let user = Uuid::new_v4();

        let resp = app
            .clone()
            .oneshot(request("GET", "/api/regions", Some(user), false, None))
            .await
            .unwrap();
        let regions = body_json(resp).await;
        let region_id = regions[0]["id"].as_str().unwrap().to_string();

        let resp = app
            .oneshot(request(
                "PUT",
                &format!("/api/regions/{region_id}"),
                Some(user),
                false,
                Some(json!({"name": "Renamed"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn assisted_flow_round_trips_through_the_api() {
        let dir = tempdir().expect("tempdir");
        let gateway = Arc::new(OfflineGateway::new());
        let state = AppState {
            store: Arc::new(MemoryStore::new()),
            documents: DocumentStore::new(dir.path()),
            gateway: gateway.clone(),
        };
        let app = app(state);
        let seller = Uuid::new_v4();
        let admin = Uuid::new_v4();

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/assisted-sites",
                Some(seller),
                false,
                Some(json!({
                    "site_name": "Mill Lane",
                    "address": "Mill Lane, Leeds",
                    "contact_name": "J. Carter",
                    "contact_email": "j.carter@example.org",
                    "contact_phone": "0113 496 0000",
                    "plots": 24,
                })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let assisted = body_json(resp).await;
        let id = assisted["id"].as_str().unwrap().to_string();
        assert_eq!(assisted["status"], "pending");

        // Processing before payment is a conflict.
        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/assisted-sites/{id}/process"),
                Some(admin),
                true,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/assisted-sites/{id}/checkout"),
                Some(seller),
                false,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let session_id = body_json(resp).await["session_id"]
            .as_str()
            .unwrap()
            .to_string();

        // Unsettled sessions fail confirmation.
        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/checkout/confirm",
                None,
                false,
                Some(json!({"session_id": session_id})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // Settle directly on the gateway, standing in for the processor.
        assert!(gateway.settle(&session_id).await);
        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/checkout/confirm",
                None,
                false,
                Some(json!({"session_id": session_id})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["is_paid"], json!(true));

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/assisted-sites/{id}/process"),
                Some(admin),
                true,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/assisted-sites/{id}/publish"),
                Some(admin),
                true,
                Some(opportunity_payload("Mill Lane")),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let published = body_json(resp).await;
        assert_eq!(published["assisted_site"]["status"], "published");
        assert_eq!(
            published["assisted_site"]["published_site_id"],
            published["opportunity"]["id"]
        );

        // The staff-published listing is immediately visible to buyers.
        let shopper = Uuid::new_v4();
        let resp = app
            .oneshot(request("GET", "/api/opportunities", Some(shopper), false, None))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_opportunity_is_not_found() {
        let (state, _dir) = test_state();
        let app = app(state);
        let resp = app
            .oneshot(request(
                "GET",
                &format!("/api/opportunities/{}", Uuid::new_v4()),
                Some(Uuid::new_v4()),
                false,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
