//! Subscription endpoints under `/subscription`.
//!
//! Every response uses one envelope:
//! Success: `{"success": true, "data": ...}`
//! Failure: `{"success": false, "msg": "..."}`
//!
//! Caller mistakes (bad JSON, malformed ids, empty fields, unknown
//! frequencies, missing records) are 400, a claimed subscription is 409,
//! and storage failures are 500.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::Utc;
use covenant_subscriptions::{NewSubscription, SubscriptionChanges, SubscriptionError, SubscriptionId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

use crate::app::AppState;

const NOT_FOUND: &str = "Error: Subscription does not exist";
const BAD_JSON: &str = "Error: unable to parse json";
const BAD_PAGING: &str = "Error: offset and limit must be non-negative integers";

pub type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

#[derive(Debug, Default, Deserialize)]
pub struct Paging {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

fn success<T: Serialize>(data: T) -> ApiResult {
    Ok(Json(json!({ "success": true, "data": data })))
}

fn failure(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "success": false, "msg": msg.into() })))
}

fn user_error(msg: impl Into<String>) -> (StatusCode, Json<Value>) {
    failure(StatusCode::BAD_REQUEST, msg)
}

/// Maps a registry error onto its HTTP status.
fn reject(e: SubscriptionError) -> (StatusCode, Json<Value>) {
    match &e {
        SubscriptionError::Claimed { .. } => failure(StatusCode::CONFLICT, e.to_string()),
        _ if e.is_validation() => user_error(e.to_string()),
        _ => {
            error!("subscription request failed: {e}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn parse_id(raw: &str) -> Result<SubscriptionId, (StatusCode, Json<Value>)> {
    SubscriptionId::parse(raw).map_err(reject)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, (StatusCode, Json<Value>)> {
    payload.map(|Json(v)| v).map_err(|e| {
        warn!("rejected request body: {e}");
        user_error(BAD_JSON)
    })
}

fn page_query(query: Result<Query<Paging>, QueryRejection>) -> Result<Paging, (StatusCode, Json<Value>)> {
    query.map(|Query(p)| p).map_err(|e| {
        warn!("rejected query string: {e}");
        user_error(BAD_PAGING)
    })
}

/// POST /subscription: create a subscription.
pub async fn new(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewSubscription>, JsonRejection>,
) -> ApiResult {
    let new = body(payload)?;
    let sub = state.registry.insert(new, Utc::now()).map_err(reject)?;
    success(sub)
}

/// GET /subscription?offset=&limit=: page through all live subscriptions.
pub async fn view_all(
    State(state): State<Arc<AppState>>,
    query: Result<Query<Paging>, QueryRejection>,
) -> ApiResult {
    let paging = page_query(query)?;
    let page = state.page(paging.offset, paging.limit);
    let subs = state.registry.get_all(page).map_err(reject)?;
    success(subs)
}

/// GET /subscription/{id}
pub async fn view(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id)?;
    match state.registry.get_by_id(&id).map_err(reject)? {
        Some(sub) => success(sub),
        None => Err(user_error(NOT_FOUND)),
    }
}

/// GET /subscription/roaster/{id}
pub async fn view_by_roaster(
    State(state): State<Arc<AppState>>,
    Path(vendor_id): Path<String>,
    query: Result<Query<Paging>, QueryRejection>,
) -> ApiResult {
    let paging = page_query(query)?;
    let page = state.page(paging.offset, paging.limit);
    let subs = state.registry.get_by_vendor(&vendor_id, page).map_err(reject)?;
    success(subs)
}

/// GET /subscription/user/{id}
pub async fn view_by_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    query: Result<Query<Paging>, QueryRejection>,
) -> ApiResult {
    let paging = page_query(query)?;
    let page = state.page(paging.offset, paging.limit);
    let subs = state.registry.get_by_user(&user_id, page).map_err(reject)?;
    success(subs)
}

/// PUT /subscription/{id}: apply the fields present in the body.
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<SubscriptionChanges>, JsonRejection>,
) -> ApiResult {
    let id = parse_id(&id)?;
    let changes = body(payload)?;
    match state.registry.update(&id, changes).map_err(reject)? {
        Some(sub) => success(sub),
        None => Err(user_error(NOT_FOUND)),
    }
}

/// DELETE /subscription/{id}
pub async fn delete(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id)?;
    if state.registry.delete(&id).map_err(reject)? {
        success(Value::Null)
    } else {
        Err(user_error(NOT_FOUND))
    }
}

/// POST /subscription/{id}/pause
pub async fn pause(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id)?;
    match state.registry.pause(&id).map_err(reject)? {
        Some(sub) => success(sub),
        None => Err(user_error(NOT_FOUND)),
    }
}

/// POST /subscription/{id}/resume
pub async fn resume(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id)?;
    match state.registry.resume(&id).map_err(reject)? {
        Some(sub) => success(sub),
        None => Err(user_error(NOT_FOUND)),
    }
}

/// POST /subscription/time: run one fulfillment tick now.
pub async fn time(State(state): State<Arc<AppState>>) -> ApiResult {
    match state.scheduler.tick(Utc::now()).await {
        Ok(report) => success(report),
        Err(e) => {
            error!("manual tick failed: {e}");
            Err(failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
