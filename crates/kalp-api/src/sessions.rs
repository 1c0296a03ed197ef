use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    response::IntoResponse,
};
use tracing::{error, info};

use kalp_gateway::relay::Turn;
use kalp_provider::GenerateOptions;
use kalp_types::api::{
    AckResponse, Claims, HistoryQuery, HistoryResponse, SendRequest, SendResponse, SessionsResponse,
};
use kalp_types::events::ServerEvent;
use kalp_types::models::new_session_id;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/v2/chat/sessions: the caller's sessions, newest first.
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();

    // Run all blocking DB queries off the async runtime
    let sessions = tokio::task::spawn_blocking(move || {
        db.list_sessions(&uid)?
            .into_iter()
            .map(|row| {
                let messages = db.get_messages(&row.id)?;
                Ok(row.to_session(&messages))
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        anyhow::anyhow!("blocking task failed")
    })??;

    Ok(Json(SessionsResponse {
        success: true,
        sessions,
    }))
}

/// GET /api/v2/chat/history?sessionId=...
pub async fn get_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let session = state
        .db
        .get_session(&query.session_id)?
        .filter(|s| s.user_id == claims.sub.to_string())
        .ok_or_else(|| ApiError::NotFound("Session not found".into()))?;

    let messages = state
        .db
        .get_messages(&session.id)?
        .iter()
        .map(|row| row.to_message())
        .collect();

    Ok(Json(HistoryResponse {
        success: true,
        session_id: session.id,
        messages,
    }))
}

/// DELETE /api/v2/chat/session/{session_id}
pub async fn delete_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.db.delete_session(&session_id, &claims.sub.to_string())? {
        return Err(ApiError::NotFound("Session not found".into()));
    }

    state.dispatcher.close_room(&session_id).await;
    info!("{} ({}) deleted session {}", claims.username, claims.sub, session_id);

    Ok(Json(AckResponse {
        success: true,
        message: "Session deleted successfully".into(),
    }))
}

/// POST /api/v2/chat/send. HTTP fallback for `send-message`.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let session_id = req
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| new_session_id(claims.sub, chrono::Utc::now()));

    let reply: SendResponse = state
        .relay
        .run_turn(Turn {
            user_id: claims.sub,
            session_id,
            prompt: req.message,
            options: GenerateOptions {
                temperature: req.temperature,
                max_tokens: req.max_tokens,
            },
        })
        .await?;

    // Other tabs of the same user watching this session see the reply too
    state.dispatcher.claim_room(&reply.session_id, claims.sub).await;
    state
        .dispatcher
        .broadcast_to_room(
            &reply.session_id,
            claims.sub,
            ServerEvent::MessageResponse(reply.clone()),
            None,
        )
        .await;

    Ok(Json(reply))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::TestApp;

    #[tokio::test]
    async fn test_send_then_list_and_history() {
        let app = TestApp::with_model_reply(r#"{"response":"Hello back"}"#).await;
        let token = app.register_token("ada@example.com").await;

        let (status, sent) = app
            .post("/api/v2/chat/send", Some(&token), json!({ "message": "Hello there" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sent["success"], true);
        assert_eq!(sent["message"], "Hello back");
        let session_id = sent["sessionId"].as_str().unwrap().to_string();
        assert!(session_id.starts_with("session_"));

        let (_, listed) = app.get("/api/v2/chat/sessions", Some(&token)).await;
        let sessions = listed["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["sessionId"], session_id.as_str());
        assert_eq!(sessions[0]["title"], "Hello there");

        let (status, history) = app
            .get(&format!("/api/v2/chat/history?sessionId={}", session_id), Some(&token))
            .await;
        assert_eq!(status, StatusCode::OK);
        let roles: Vec<&str> = history["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, ["user", "ai"]);
        assert_eq!(history["messages"][1]["message"], "Hello back");
    }

    #[tokio::test]
    async fn test_sessions_are_private() {
        let app = TestApp::new().await;
        let ada = app.register_token("ada@example.com").await;
        let eve = app.register_token("eve@example.com").await;

        let (_, sent) = app
            .post("/api/v2/chat/send", Some(&ada), json!({ "message": "secret", "sessionId": "session_ada_1" }))
            .await;
        assert_eq!(sent["sessionId"], "session_ada_1");

        let (status, _) = app.get("/api/v2/chat/history?sessionId=session_ada_1", Some(&eve)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app.delete("/api/v2/chat/session/session_ada_1", Some(&eve)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app
            .post("/api/v2/chat/send", Some(&eve), json!({ "message": "hi", "sessionId": "session_ada_1" }))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "Access denied to session");

        let (_, listed) = app.get("/api/v2/chat/sessions", Some(&eve)).await;
        assert!(listed["sessions"].as_array().unwrap().is_empty());

        let (status, _) = app.delete("/api/v2/chat/session/session_ada_1", Some(&ada)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.get("/api/v2/chat/history?sessionId=session_ada_1", Some(&ada)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_send_provider_failure_is_bad_gateway() {
        let app = TestApp::with_model_reply("not json at all").await;
        let token = app.register_token("ada@example.com").await;

        let (status, body) = app
            .post("/api/v2/chat/send", Some(&token), json!({ "message": "hi", "sessionId": "s1" }))
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], false);

        // The failed reply is kept in the transcript, flagged
        let (_, history) = app.get("/api/v2/chat/history?sessionId=s1", Some(&token)).await;
        assert_eq!(history["messages"][1]["isError"], true);
    }

    #[tokio::test]
    async fn test_malformed_bodies_use_error_envelope() {
        let app = TestApp::new().await;
        let token = app.register_token("ada@example.com").await;

        let (status, body) = app
            .post("/api/v2/chat/send", Some(&token), json!({ "sessionId": "s1" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("message"));

        let (status, body) = app.get("/api/v2/chat/history", Some(&token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(app.model_requests().is_empty());
    }

    #[tokio::test]
    async fn test_send_empty_message_rejected() {
        let app = TestApp::new().await;
        let token = app.register_token("ada@example.com").await;
        let (status, _) = app
            .post("/api/v2/chat/send", Some(&token), json!({ "message": "   " }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(app.model_requests().is_empty());
    }
}
