//! Ballot submission and eligibility routes.

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::Result;
use crate::middleware::{ApiJson, ApiQuery, ClientContext};
use crate::services::{Ballot, VoteStatus};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct VoterDetails {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitVoteRequest {
    pub vote_data: Value,
    #[serde(default)]
    pub voter_identifier: Option<String>,
    #[serde(default)]
    pub voter_info: Option<VoterDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    #[serde(default)]
    pub voter_identifier: Option<String>,
}

/// `POST /votes`
pub async fn submit(
    State(state): State<AppState>,
    client: ClientContext,
    ApiJson(request): ApiJson<SubmitVoteRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let ballot = Ballot {
        vote_data: request.vote_data,
        voter_identifier: request.voter_identifier,
        voter_name: request.voter_info.and_then(|info| info.name),
    };

    let vote = state.admission().submit(ballot, &client.info, Utc::now())?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "vote": {
                "id": vote.id,
                "submittedAt": vote.voter_info.submitted_at,
            }
        })),
    ))
}

/// `GET /votes/status?voterIdentifier=`
pub async fn status(
    State(state): State<AppState>,
    client: ClientContext,
    ApiQuery(query): ApiQuery<StatusQuery>,
) -> Result<Json<VoteStatus>> {
    let status = state.admission().status(
        query.voter_identifier.as_deref(),
        &client.info,
        Utc::now(),
    )?;
    Ok(Json(status))
}
