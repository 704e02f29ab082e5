// HTTP API routes (course registry, match control) and the WebSocket
// gateway mount point.

pub mod ws;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::content::{CourseDoc, InMemoryContentStore};
use crate::engine::manager::{CreateMatchError, JoinError};
use crate::engine::rounds::SubmitError;
use crate::engine::MatchEngine;
use crate::question::{Difficulty, QuestionKind};

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateCourseRequest {
    pub documents: Vec<CourseDoc>,
}

#[derive(Deserialize)]
pub struct CreateMatchRequest {
    pub course_id: String,
    pub player_name: String,
    #[serde(default = "default_time_limit")]
    pub time_limit_seconds: u64,
    #[serde(default = "default_question_types")]
    pub question_types: Vec<QuestionKind>,
    #[serde(default = "default_difficulty")]
    pub difficulty: Difficulty,
}

fn default_time_limit() -> u64 {
    30
}

fn default_question_types() -> Vec<QuestionKind> {
    vec![QuestionKind::Short, QuestionKind::Calc]
}

fn default_difficulty() -> Difficulty {
    Difficulty::Medium
}

#[derive(Deserialize)]
pub struct JoinMatchRequest {
    pub match_id: String,
    pub player_name: String,
}

#[derive(Deserialize)]
pub struct AnswerRequest {
    pub match_id: String,
    pub question_id: String,
    pub player_name: String,
    pub answer_payload: String,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MatchEngine>,
    pub store: Arc<InMemoryContentStore>,
}

// ── Error helper ──────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(engine: Arc<MatchEngine>, store: Arc<InMemoryContentStore>) -> Router {
    let state = AppState { engine, store };

    Router::new()
        // Courses
        .route("/api/courses", get(list_courses).post(create_course))
        // Matches
        .route("/api/create-match", post(create_match))
        .route("/api/join-match", post(join_match))
        .route("/api/answer", post(submit_answer))
        .route("/api/match/{id}", get(get_match))
        // WebSocket
        .route("/ws/{match_id}", get(ws::ws_match))
        .with_state(state)
}

// ── Course handlers ───────────────────────────────────────────────────

async fn create_course(
    State(state): State<AppState>,
    Json(req): Json<CreateCourseRequest>,
) -> impl IntoResponse {
    if req.documents.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "No documents provided")
            .into_response();
    }
    let summary = state.store.create_course(req.documents);
    (StatusCode::CREATED, Json(json!(summary))).into_response()
}

async fn list_courses(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "courses": state.store.list_courses() }))
}

// ── Match handlers ────────────────────────────────────────────────────

async fn create_match(
    State(state): State<AppState>,
    Json(req): Json<CreateMatchRequest>,
) -> impl IntoResponse {
    if req.player_name.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "player_name is required")
            .into_response();
    }
    match state
        .engine
        .create_match(
            &req.course_id,
            &req.player_name,
            req.time_limit_seconds,
            req.question_types,
            req.difficulty,
        )
        .await
    {
        Ok(match_id) => (
            StatusCode::OK,
            Json(json!({
                "match_id": match_id,
                "websocket_url": format!("/ws/{match_id}"),
                "waiting_for_opponent": true,
            })),
        )
            .into_response(),
        Err(CreateMatchError::CourseNotFound) => {
            json_error(StatusCode::NOT_FOUND, "Course not found").into_response()
        }
    }
}

async fn join_match(
    State(state): State<AppState>,
    Json(req): Json<JoinMatchRequest>,
) -> impl IntoResponse {
    match state.engine.join_match(&req.match_id, &req.player_name).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Joined match successfully",
                "match_id": req.match_id,
            })),
        )
            .into_response(),
        Err(e) => {
            let status = match e {
                JoinError::MatchNotFound => StatusCode::NOT_FOUND,
                JoinError::MatchFull | JoinError::NameTaken => StatusCode::BAD_REQUEST,
            };
            json_error(status, &e.to_string()).into_response()
        }
    }
}

async fn submit_answer(
    State(state): State<AppState>,
    Json(req): Json<AnswerRequest>,
) -> impl IntoResponse {
    match state
        .engine
        .submit_answer(
            &req.match_id,
            &req.player_name,
            &req.question_id,
            &req.answer_payload,
        )
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(json!(outcome))).into_response(),
        Err(e) => {
            let status = match e {
                SubmitError::NoMatch => StatusCode::NOT_FOUND,
                SubmitError::Grading(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::BAD_REQUEST,
            };
            json_error(status, &e.to_string()).into_response()
        }
    }
}

async fn get_match(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.engine.match_status(&id).await {
        Some(view) => (StatusCode::OK, Json(json!(view))).into_response(),
        None => json_error(StatusCode::NOT_FOUND, "Match not found").into_response(),
    }
}
