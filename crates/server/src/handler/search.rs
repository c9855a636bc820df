//! OCS-compatible question search.

use crate::AppState;
use axum::extract::{FromRequest, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use quizgate_core::error::GatewayError;
use quizgate_core::question::Question;
use serde::Deserialize;
use serde_json::json;

pub const MISSING_QUESTION_MSG: &str = "未提供问题内容";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub options: String,
    pub model: Option<String>,
}

/// POST body, read as JSON when the content type says so and as a urlencoded
/// form otherwise.
pub struct SearchBody(pub SearchParams);

impl<S: Send + Sync> FromRequest<S> for SearchBody {
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));

        if is_json {
            Json::<SearchParams>::from_request(req, state)
                .await
                .map(|Json(params)| Self(params))
                .map_err(|e| failure(e.body_text()))
        } else {
            Form::<SearchParams>::from_request(req, state)
                .await
                .map(|Form(params)| Self(params))
                .map_err(|e| failure(e.body_text()))
        }
    }
}

fn failure(msg: impl Into<String>) -> Response {
    Json(json!({ "code": 0, "msg": msg.into() })).into_response()
}

pub async fn search_get(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    search(&state, params).await
}

pub async fn search_post(State(state): State<AppState>, SearchBody(params): SearchBody) -> Response {
    search(&state, params).await
}

async fn search(state: &AppState, params: SearchParams) -> Response {
    let preview: String = params.title.chars().take(50).collect();
    tracing::info!(kind = %params.kind, "Question received: {preview:?}");

    if params.title.is_empty() {
        tracing::warn!("Search without question text");
        return failure(MISSING_QUESTION_MSG);
    }

    let question = Question::new(params.title, params.kind, params.options);
    match state.answers.answer(&question, params.model).await {
        Ok(answer) => Json(json!({
            "code": 1,
            "question": question.text,
            "answer": answer.answer,
        }))
        .into_response(),
        Err(GatewayError::BadRequest(_)) => failure(MISSING_QUESTION_MSG),
        Err(e) => {
            tracing::error!("Search failed: {e}");
            failure(e.to_string())
        }
    }
}
