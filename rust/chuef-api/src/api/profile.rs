//! Profile endpoints for signed-in users.
//!
//! A username can be set once. Uniqueness (case-insensitive) and the
//! one-time rule are enforced by the store.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::Value;

use crate::AppState;
use crate::database::{UNKNOWN_DISPLAY_NAME, UsernameOutcome};
use crate::gateway::{AuthenticatedUser, CurrentUser};

const USERNAME_MIN_CHARS: usize = 3;
const USERNAME_MAX_CHARS: usize = 30;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/profile/username",
            get(get_profile).post(set_username),
        )
        .route("/api/auth/me", get(me))
}

/// `{success: false, error}` with a status.
#[derive(Debug)]
pub struct ProfileError {
    status: StatusCode,
    message: String,
}

impl ProfileError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ProfileError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({"success": false, "error": self.message})),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
struct UsernameResponse {
    success: bool,
    username: String,
}

/// Check a requested username, returning it trimmed.
pub fn validate_username(body: &Value) -> Result<String, ProfileError> {
    let username = body
        .get("username")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ProfileError::bad_request("Username is required"))?;

    let len = username.chars().count();
    if !(USERNAME_MIN_CHARS..=USERNAME_MAX_CHARS).contains(&len) {
        return Err(ProfileError::bad_request(format!(
            "Username must be between {USERNAME_MIN_CHARS} and {USERNAME_MAX_CHARS} characters"
        )));
    }
    Ok(username.to_string())
}

/// `POST /api/profile/username`
async fn set_username(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Bytes,
) -> Result<Json<UsernameResponse>, ProfileError> {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let username = validate_username(&body)?;

    match state.profiles.set_username(user.user_id, &username).await {
        Ok(UsernameOutcome::Accepted { username }) => {
            tracing::info!(user_id = %user.user_id, username = %username, "Username set");
            Ok(Json(UsernameResponse {
                success: true,
                username,
            }))
        }
        Ok(UsernameOutcome::Rejected { reason }) => Err(ProfileError::bad_request(reason)),
        Err(e) => {
            tracing::error!(user_id = %user.user_id, error = %e, "Set username failed");
            Err(ProfileError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "Failed to update username".to_string(),
            })
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileView {
    username: Option<String>,
    username_changed: bool,
    display_name: String,
    can_change_username: bool,
}

#[derive(Debug, Serialize)]
struct ProfileResponse {
    success: bool,
    profile: ProfileView,
}

/// `GET /api/profile/username`
async fn get_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Json<ProfileResponse> {
    let profile = state.profiles.profile(user.user_id).await.unwrap_or_else(|e| {
        tracing::error!(user_id = %user.user_id, error = %e, "Profile fetch failed");
        None
    });
    let display_name = match state.profiles.display_name(user.user_id).await {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(user_id = %user.user_id, error = %e, "Display name lookup failed");
            None
        }
    };

    let username_changed = profile.as_ref().is_some_and(|p| p.username_changed);
    Json(ProfileResponse {
        success: true,
        profile: ProfileView {
            username: profile.and_then(|p| p.username),
            username_changed,
            display_name: display_name.unwrap_or_else(|| UNKNOWN_DISPLAY_NAME.to_string()),
            can_change_username: !username_changed,
        },
    })
}

#[derive(Debug, Serialize)]
struct MeResponse {
    success: bool,
    user: AuthenticatedUser,
}

/// `GET /api/auth/me`
async fn me(CurrentUser(user): CurrentUser) -> Json<MeResponse> {
    Json(MeResponse {
        success: true,
        user,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username(&json!({"username": "  chu  "})).unwrap(), "chu");

        for body in [json!({}), json!({"username": 7}), json!({"username": "   "}), Value::Null] {
            let err = validate_username(&body).unwrap_err();
            assert_eq!(err.message, "Username is required");
        }

        let err = validate_username(&json!({"username": "ab"})).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(validate_username(&json!({"username": "x".repeat(31)})).is_err());
        assert!(validate_username(&json!({"username": "x".repeat(30)})).is_ok());
    }
}
