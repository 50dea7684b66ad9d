//! Session verification for OAuth-backed users.
//!
//! Sign-in happens at the OAuth provider, which issues an HS256 JWT. The
//! token arrives as `Authorization: Bearer <jwt>` or in the session cookie.
//! [`session_middleware`] resolves it once per request and stores the
//! [`AuthenticatedUser`] in the request extensions. It never rejects:
//! handlers decide through [`MaybeSession`] or [`CurrentUser`].

use std::convert::Infallible;

use axum::{
    Json,
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::AppState;
use crate::config::AuthConfig;

/// 401 response for endpoints that need a session.
#[derive(Debug, Serialize)]
pub struct AuthError {
    pub success: bool,
    pub error: String,
}

impl AuthError {
    fn required() -> Self {
        Self {
            success: false,
            error: "Authentication required".to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, Json(self)).into_response()
    }
}

/// Why a token did not yield a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session verification is not configured")]
    NotConfigured,
    #[error("invalid session token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("session subject '{0}' is not a user id")]
    InvalidSubject(String),
}

/// Profile fields the OAuth provider copies into the token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// JWT claims of a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
    #[serde(default)]
    pub app_metadata: AppMetadata,
}

impl SessionClaims {
    /// Claims for `user_id` valid for `ttl_secs` from now.
    #[must_use]
    pub fn new(user_id: Uuid, ttl_secs: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            exp: now + ttl_secs,
            iat: now,
            aud: Some("authenticated".to_string()),
            email: None,
            user_metadata: UserMetadata::default(),
            app_metadata: AppMetadata::default(),
        }
    }
}

/// The user behind a verified session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    #[serde(rename = "id")]
    pub user_id: Uuid,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub provider: Option<String>,
}

impl TryFrom<SessionClaims> for AuthenticatedUser {
    type Error = SessionError;

    fn try_from(claims: SessionClaims) -> Result<Self, Self::Error> {
        let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
            return Err(SessionError::InvalidSubject(claims.sub));
        };
        let metadata = claims.user_metadata;
        Ok(Self {
            user_id,
            email: claims.email,
            full_name: metadata.full_name.or(metadata.name),
            avatar_url: metadata.avatar_url.or(metadata.picture),
            provider: claims.app_metadata.provider,
        })
    }
}

/// Sign a session token. Used by tests and local tooling; production tokens
/// come from the OAuth provider.
pub fn issue_session_token(
    claims: &SessionClaims,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verifies session tokens against the platform's JWT secret.
pub struct SessionVerifier {
    key: Option<DecodingKey>,
    validation: Validation,
    cookie_name: String,
}

impl std::fmt::Debug for SessionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionVerifier")
            .field("configured", &self.key.is_some())
            .field("cookie_name", &self.cookie_name)
            .finish_non_exhaustive()
    }
}

impl SessionVerifier {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match &config.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        Self {
            key: config
                .jwt_secret
                .as_deref()
                .map(|secret| DecodingKey::from_secret(secret.as_bytes())),
            validation,
            cookie_name: config.cookie_name.clone(),
        }
    }

    /// Whether a secret is configured. Without one no session resolves.
    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    /// Verify a raw token.
    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, SessionError> {
        let key = self.key.as_ref().ok_or(SessionError::NotConfigured)?;
        let data = decode::<SessionClaims>(token, key, &self.validation)?;
        AuthenticatedUser::try_from(data.claims)
    }

    /// Bearer token, else the session cookie.
    pub fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        let bearer = headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if let Some(token) = bearer {
            return Some(token.to_string());
        }

        CookieJar::from_headers(headers)
            .get(&self.cookie_name)
            .map(|c| c.value().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Resolve the session of a request, `None` when absent or invalid.
    pub fn resolve(&self, headers: &HeaderMap) -> Option<AuthenticatedUser> {
        let token = self.token_from_headers(headers)?;
        match self.verify(&token) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring session token");
                None
            }
        }
    }
}

/// Attach the request's session user, if any, to the extensions.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(user) = state.sessions.resolve(req.headers()) {
        req.extensions_mut().insert(user);
    }
    next.run(req).await
}

/// The session user, if the request carries a valid session.
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<AuthenticatedUser>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeSession {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<AuthenticatedUser>().cloned()))
    }
}

/// The session user. Rejects with 401 when there is none.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthenticatedUser);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(Self)
            .ok_or_else(AuthError::required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-jwt-secret";

    fn verifier() -> SessionVerifier {
        SessionVerifier::new(&AuthConfig {
            jwt_secret: Some(SECRET.to_string()),
            ..AuthConfig::default()
        })
    }

    fn token_for(user_id: Uuid) -> String {
        let mut claims = SessionClaims::new(user_id, 3600);
        claims.email = Some("chu@example.com".to_string());
        claims.user_metadata.name = Some("Chu".to_string());
        claims.user_metadata.picture = Some("https://img.example/chu.png".to_string());
        claims.app_metadata.provider = Some("google".to_string());
        issue_session_token(&claims, SECRET).unwrap()
    }

    #[test]
    fn test_verify_valid_token() {
        let id = Uuid::new_v4();
        let user = verifier().verify(&token_for(id)).unwrap();
        assert_eq!(user.user_id, id);
        assert_eq!(user.email.as_deref(), Some("chu@example.com"));
        assert_eq!(user.full_name.as_deref(), Some("Chu"));
        assert_eq!(user.avatar_url.as_deref(), Some("https://img.example/chu.png"));
        assert_eq!(user.provider.as_deref(), Some("google"));
    }

    #[test]
    fn test_rejects_wrong_secret_and_expired() {
        let claims = SessionClaims::new(Uuid::new_v4(), 3600);
        let forged = issue_session_token(&claims, "other-secret").unwrap();
        assert!(matches!(verifier().verify(&forged), Err(SessionError::Invalid(_))));

        let expired = SessionClaims::new(Uuid::new_v4(), -3600);
        let token = issue_session_token(&expired, SECRET).unwrap();
        assert!(verifier().verify(&token).is_err());
    }

    #[test]
    fn test_rejects_non_uuid_subject() {
        let mut claims = SessionClaims::new(Uuid::new_v4(), 3600);
        claims.sub = "service-role".to_string();
        let token = issue_session_token(&claims, SECRET).unwrap();
        assert!(matches!(
            verifier().verify(&token),
            Err(SessionError::InvalidSubject(_))
        ));
    }

    #[test]
    fn test_audience_checked_when_configured() {
        let mut claims = SessionClaims::new(Uuid::new_v4(), 3600);
        claims.aud = Some("anon".to_string());
        let token = issue_session_token(&claims, SECRET).unwrap();
        assert!(verifier().verify(&token).is_err());

        let lenient = SessionVerifier::new(&AuthConfig {
            jwt_secret: Some(SECRET.to_string()),
            audience: None,
            ..AuthConfig::default()
        });
        assert!(lenient.verify(&token).is_ok());
    }

    #[test]
    fn test_unconfigured_verifier_resolves_nothing() {
        let verifier = SessionVerifier::new(&AuthConfig::default());
        assert!(!verifier.is_configured());

        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", token_for(Uuid::new_v4()));
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&bearer).unwrap());
        assert!(verifier.resolve(&headers).is_none());
    }

    #[test]
    fn test_token_from_bearer_or_cookie() {
        let verifier = verifier();
        let id = Uuid::new_v4();
        let token = token_for(id);

        let mut headers = HeaderMap::new();
        assert!(verifier.token_from_headers(&headers).is_none());

        let cookie = format!("theme=dark; sb-access-token={token}");
        headers.insert("cookie", HeaderValue::from_str(&cookie).unwrap());
        assert_eq!(verifier.resolve(&headers).map(|u| u.user_id), Some(id));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(verifier.token_from_headers(&headers), Some(token));
    }
}
