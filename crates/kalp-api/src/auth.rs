use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use kalp_db::models::{NewUser, UserRow};
use kalp_types::api::{
    AckResponse, AuthResponse, Claims, GoogleLoginRequest, LoginRequest, ProfileResponse,
    RegisterRequest, UpdateProfileRequest,
};

use crate::error::ApiError;
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const DISPLAY_NAME_MAX: usize = 64;

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let username = req.username.trim();
    let email = normalize_email(&req.email);

    // Validate input
    if username.chars().count() < 3 || username.chars().count() > 32 {
        return Err(ApiError::bad_request("Username must be 3-32 characters"));
    }
    if !email.contains('@') {
        return Err(ApiError::bad_request("A valid email is required"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::bad_request("Password must be at least 8 characters"));
    }
    if req.password != req.confirm_password {
        return Err(ApiError::bad_request("Passwords do not match"));
    }

    // Check if email is taken
    if state.db.get_user_by_email(&email)?.is_some() {
        return Err(ApiError::Conflict("User already exists".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4().to_string();
    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(username);

    state.db.create_user(&NewUser {
        id: &user_id,
        username,
        display_name,
        email: &email,
        password_hash: Some(&password_hash),
        google_id: None,
        avatar: None,
    })
    .map_err(duplicate_is_conflict)?;

    info!("Registered {} ({})", username, user_id);
    let response = issue_for(&state, &user_id)?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let user = state
        .db
        .get_user_by_email(&normalize_email(&req.email))?
        .ok_or_else(|| ApiError::Unauthorized(INVALID_CREDENTIALS.into()))?;

    // Google-only accounts have no password
    let stored = user
        .password
        .as_deref()
        .ok_or_else(|| ApiError::Unauthorized(INVALID_CREDENTIALS.into()))?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(stored).map_err(|e| anyhow::anyhow!("corrupt password hash: {}", e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized(INVALID_CREDENTIALS.into()))?;

    Ok(Json(auth_response(&state, &user)?))
}

/// Sign in with a Google profile. Links to an existing account with the same
/// email, or creates a new one.
pub async fn google_login(
    State(state): State<AppState>,
    payload: Result<Json<GoogleLoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let email = normalize_email(&req.email);
    if req.google_id.trim().is_empty() || !email.contains('@') {
        return Err(ApiError::bad_request("Google profile is incomplete"));
    }

    if let Some(user) = state.db.get_user_by_google_id(&req.google_id)? {
        return Ok(Json(auth_response(&state, &user)?));
    }

    if let Some(user) = state.db.get_user_by_email(&email)? {
        state
            .db
            .link_google_account(&user.id, &req.google_id, req.avatar.as_deref())?;
        info!("Linked Google account to {}", user.id);
        return Ok(Json(issue_for(&state, &user.id)?));
    }

    let user_id = Uuid::new_v4().to_string();
    let username = email.split('@').next().unwrap_or_default().to_string();
    let display_name = match req.display_name.trim() {
        "" => username.as_str(),
        name => name,
    };

    state.db.create_user(&NewUser {
        id: &user_id,
        username: &username,
        display_name,
        email: &email,
        password_hash: None,
        google_id: Some(&req.google_id),
        avatar: req.avatar.as_deref(),
    })
    .map_err(duplicate_is_conflict)?;

    info!("Registered {} ({}) via Google", username, user_id);
    Ok(Json(issue_for(&state, &user_id)?))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(ProfileResponse {
        success: true,
        user: user.to_user(),
    }))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let display_name = req.display_name.as_deref().map(str::trim);
    if let Some(name) = display_name {
        if name.is_empty() || name.chars().count() > DISPLAY_NAME_MAX {
            return Err(ApiError::bad_request("Display name must be 1-64 characters"));
        }
    }

    let user = state
        .db
        .update_profile(&claims.sub.to_string(), display_name, req.avatar.as_deref())?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(ProfileResponse {
        success: true,
        user: user.to_user(),
    }))
}

/// Revoke the presented token. Other tokens for the same user stay valid.
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.tokens.revoke(&claims)?;
    info!("{} ({}) logged out", claims.username, claims.sub);

    Ok(Json(AckResponse {
        success: true,
        message: "Logged out successfully".into(),
    }))
}

/// A concurrent registration can pass the lookup and lose the insert.
fn duplicate_is_conflict(e: anyhow::Error) -> ApiError {
    if kalp_db::is_constraint_violation(&e) {
        ApiError::Conflict("User already exists".into())
    } else {
        ApiError::Internal(e)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn issue_for(state: &AppState, user_id: &str) -> Result<AuthResponse, ApiError> {
    let user = state
        .db
        .get_user_by_id(user_id)?
        .ok_or_else(|| anyhow::anyhow!("user {} vanished after write", user_id))?;
    auth_response(state, &user)
}

fn auth_response(state: &AppState, row: &UserRow) -> Result<AuthResponse, ApiError> {
    let user = row.to_user();
    let token = state.tokens.issue(user.id, &user.username)?;
    Ok(AuthResponse {
        success: true,
        token,
        user,
    })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::error::ApiError;
    use crate::test_support::{TestApp, register_body};

    #[tokio::test]
    async fn test_register_then_login() {
        let app = TestApp::new().await;

        let (status, body) = app.post("/api/v2/auth/register", None, register_body("ada@example.com")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["user"]["email"], "ada@example.com");
        assert!(body["user"].get("password").is_none());

        let (status, body) = app
            .post(
                "/api/v2/auth/login",
                None,
                json!({ "email": "ADA@example.com", "password": "correct-horse" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
        assert_eq!(body["user"]["displayName"], "Ada");
    }

    #[tokio::test]
    async fn test_login_with_bad_password_surfaces_message() {
        let app = TestApp::new().await;
        app.post("/api/v2/auth/register", None, register_body("ada@example.com")).await;

        let (status, body) = app
            .post(
                "/api/v2/auth/login",
                None,
                json!({ "email": "ada@example.com", "password": "wrong-password" }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Invalid email or password");
    }

    #[tokio::test]
    async fn test_register_validation() {
        let app = TestApp::new().await;

        let mut mismatch = register_body("ada@example.com");
        mismatch["confirmPassword"] = json!("something-else");
        let (status, body) = app.post("/api/v2/auth/register", None, mismatch).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Passwords do not match");

        app.post("/api/v2/auth/register", None, register_body("ada@example.com")).await;
        let (status, _) = app.post("/api/v2/auth/register", None, register_body("ada@example.com")).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_malformed_login_uses_error_envelope() {
        let app = TestApp::new().await;
        let (status, body) = app
            .post("/api/v2/auth/login", None, json!({ "email": "x@y.z" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("password"));

        let (status, body) = app.raw("POST", "/api/v2/auth/register", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["success"], false);
    }

    #[test]
    fn test_unique_violation_maps_to_conflict() {
        let db = kalp_db::Database::open_in_memory().unwrap();
        let user = kalp_db::models::NewUser {
            id: "u1",
            username: "ada",
            display_name: "Ada",
            email: "ada@example.com",
            password_hash: None,
            google_id: None,
            avatar: None,
        };
        db.create_user(&user).unwrap();
        let err = db
            .create_user(&kalp_db::models::NewUser { id: "u2", ..user })
            .unwrap_err();
        assert!(matches!(super::duplicate_is_conflict(err), ApiError::Conflict(_)));

        let other = anyhow::anyhow!("disk on fire");
        assert!(matches!(super::duplicate_is_conflict(other), ApiError::Internal(_)));
    }

    #[tokio::test]
    async fn test_profile_update_and_logout_revokes() {
        let app = TestApp::new().await;
        let token = app.register_token("ada@example.com").await;

        let (status, body) = app
            .put("/api/v2/auth/profile", Some(&token), json!({ "displayName": "Countess" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["displayName"], "Countess");

        let (status, body) = app.get("/api/v2/auth/profile", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["displayName"], "Countess");

        let (status, _) = app.post("/api/v2/auth/logout", Some(&token), json!({})).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app.get("/api/v2/auth/profile", Some(&token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_profile_requires_token() {
        let app = TestApp::new().await;
        let (status, body) = app.get("/api/v2/auth/profile", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_google_login_links_existing_account() {
        let app = TestApp::new().await;
        let (_, registered) = app.post("/api/v2/auth/register", None, register_body("ada@example.com")).await;

        let google = json!({
            "googleId": "g-42",
            "email": "ada@example.com",
            "displayName": "Ada L",
            "avatar": "https://img/ada.png"
        });
        let (status, body) = app.post("/api/v2/auth/google", None, google.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["_id"], registered["user"]["_id"]);
        assert_eq!(body["user"]["avatar"], "https://img/ada.png");

        // Second sign-in resolves by Google id
        let (_, again) = app.post("/api/v2/auth/google", None, google).await;
        assert_eq!(again["user"]["_id"], registered["user"]["_id"]);

        let (status, created) = app
            .post(
                "/api/v2/auth/google",
                None,
                json!({ "googleId": "g-7", "email": "grace@example.com", "displayName": "" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["user"]["username"], "grace");
        assert_eq!(created["user"]["displayName"], "grace");
    }
}
