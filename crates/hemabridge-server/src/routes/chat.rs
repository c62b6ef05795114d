//! Chat assistant endpoints.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use hemabridge_core::chat::{ChatReply, Language};
use hemabridge_core::policy::Action;
use hemabridge_core::store::{ChatLog, NewChatLog};
use serde::Deserialize;

use crate::error::ApiError;
use crate::extract::CurrentUser;
use crate::state::AppState;

const DEFAULT_HISTORY: u32 = 50;
const MAX_HISTORY: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    text: String,
    #[serde(default)]
    language: String,
}

pub async fn chat(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    user.require(Action::Chat)?;
    let Json(request) = payload?;
    let text = request.text.trim();
    if text.is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    let reply = state.chat.respond(text, Language::from_label(&request.language));
    let entry = NewChatLog {
        user_id: user.id(),
        query: text.to_string(),
        response: reply.response.clone(),
        is_emergency: reply.is_emergency,
        language: reply.language.name().to_string(),
    };
    state.db(move |store| store.append_chat_log(&entry)).await?;

    Ok(Json(reply))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    limit: Option<u32>,
}

pub async fn history(
    State(state): State<AppState>,
    user: CurrentUser,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<ChatLog>>, ApiError> {
    let Query(query) = query?;
    user.require(Action::Chat)?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY).clamp(1, MAX_HISTORY);
    let user_id = user.id();
    Ok(Json(
        state
            .db(move |store| store.chat_history(user_id, limit))
            .await?,
    ))
}
