//! Poll lifecycle routes.

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use quickpoll_core::{PollDraft, PollPatch};

use crate::error::Result;
use crate::middleware::{ApiJson, ApiQuery, ClientContext};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentQuery {
    #[serde(default)]
    pub include_closed: bool,
}

/// Update body: the patch plus who is asking.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePollRequest {
    #[serde(flatten)]
    pub patch: PollPatch,
    #[serde(default)]
    pub requested_by: Option<String>,
}

/// `POST /polls`
pub async fn create(
    State(state): State<AppState>,
    client: ClientContext,
    ApiJson(draft): ApiJson<PollDraft>,
) -> Result<(StatusCode, Json<Value>)> {
    let poll = state.polls().create(draft, &client.info, Utc::now())?;
    Ok((StatusCode::CREATED, Json(json!({ "poll": poll }))))
}

/// `GET /polls/current?includeClosed=`
pub async fn current(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<CurrentQuery>,
) -> Result<Json<Value>> {
    let view = state.polls().current(query.include_closed, Utc::now())?;
    Ok(Json(json!({ "poll": view })))
}

/// `PUT /polls`
pub async fn update(
    State(state): State<AppState>,
    client: ClientContext,
    ApiJson(request): ApiJson<UpdatePollRequest>,
) -> Result<Json<Value>> {
    let view = state.polls().update(
        request.patch,
        request.requested_by.as_deref(),
        &client.info,
        Utc::now(),
    )?;
    Ok(Json(json!({ "poll": view })))
}

/// `DELETE /polls`
pub async fn delete(
    State(state): State<AppState>,
    client: ClientContext,
) -> Result<Json<Value>> {
    let poll_id = state.polls().delete(&client.info)?;
    Ok(Json(json!({ "deleted": true, "pollId": poll_id })))
}

/// `GET /polls/results`
pub async fn results(State(state): State<AppState>) -> Result<Json<Value>> {
    let (view, results) = state.polls().results()?;
    Ok(Json(json!({ "poll": view, "results": results })))
}
