//! Email/password sign-in against the backend's auth service, and the
//! session file that keeps the CLI signed in between runs.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use alva_core::security::{AnonKey, Credentials, SessionTokens};
use alva_core::BackendError;

use crate::rest::{auth_headers, check, decode, network};

const SESSION_FILE_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("not signed in (run `alva login`)")]
    NotSignedIn,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("session file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session file JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    #[serde(default)]
    user: Option<TokenUser>,
}

#[derive(Deserialize)]
struct TokenUser {
    #[serde(default)]
    email: Option<String>,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> SessionTokens {
        SessionTokens {
            access_token: SecretString::from(self.access_token),
            refresh_token: SecretString::from(self.refresh_token),
            expires_at: now + chrono::Duration::seconds(self.expires_in),
            user_email: self.user.and_then(|u| u.email),
        }
    }
}

pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: AnonKey,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>, anon_key: AnonKey, timeout: Duration) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(network)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key,
        })
    }

    fn token_url(&self, grant_type: &str) -> String {
        format!("{}/auth/v1/token?grant_type={grant_type}", self.base_url)
    }

    async fn grant(&self, grant_type: &str, body: serde_json::Value) -> Result<SessionTokens, AuthError> {
        let headers = auth_headers(&Credentials::anonymous(self.anon_key.clone()))?;
        let response = self
            .http
            .post(self.token_url(grant_type))
            .headers(headers)
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(network)?;

        // The auth service answers bad credentials with 400 invalid_grant.
        if matches!(response.status().as_u16(), 400 | 401) {
            return Err(AuthError::InvalidCredentials);
        }
        let data: TokenResponse = check(response).await?.json().await.map_err(decode)?;
        Ok(data.into_session(Utc::now()))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionTokens, AuthError> {
        let session = self
            .grant("password", serde_json::json!({ "email": email, "password": password }))
            .await?;
        info!(email = %email, "signed in");
        Ok(session)
    }

    /// Exchange the refresh token for a fresh session.
    pub async fn refresh(&self, session: &SessionTokens) -> Result<SessionTokens, AuthError> {
        let body = serde_json::json!({ "refresh_token": session.refresh_token.expose_secret() });
        match self.grant("refresh_token", body).await {
            Err(AuthError::InvalidCredentials) => Err(AuthError::NotSignedIn),
            other => other,
        }
    }

    /// Revoke the session server-side. An already-dead token counts as success.
    pub async fn sign_out(&self, session: &SessionTokens) -> Result<(), AuthError> {
        let credentials = Credentials::with_session(self.anon_key.clone(), session.clone());
        let response = self
            .http
            .post(format!("{}/auth/v1/logout", self.base_url))
            .headers(auth_headers(&credentials)?)
            .send()
            .await
            .map_err(network)?;
        if response.status().as_u16() == 401 {
            warn!("session already invalid at sign-out");
            return Ok(());
        }
        check(response).await?;
        info!("signed out");
        Ok(())
    }
}

/// On-disk form of [`SessionTokens`].
#[derive(Serialize, Deserialize)]
struct StoredSession {
    version: u32,
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    user_email: Option<String>,
}

/// Load the saved session. Missing, unreadable or foreign files read as
/// signed out.
pub fn load_session(path: &Path) -> Option<SessionTokens> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("failed to read session file: {e}");
            return None;
        }
    };
    match serde_json::from_str::<StoredSession>(&data) {
        Ok(s) if s.version == SESSION_FILE_VERSION => Some(SessionTokens {
            access_token: SecretString::from(s.access_token),
            refresh_token: SecretString::from(s.refresh_token),
            expires_at: s.expires_at,
            user_email: s.user_email,
        }),
        Ok(s) => {
            warn!("unsupported session file version: {}", s.version);
            None
        }
        Err(e) => {
            warn!("failed to parse session file: {e}");
            None
        }
    }
}

/// Write the session with owner-only permissions, creating parent dirs.
pub fn save_session(path: &Path, session: &SessionTokens) -> Result<(), AuthError> {
    let stored = StoredSession {
        version: SESSION_FILE_VERSION,
        access_token: session.access_token.expose_secret().to_string(),
        refresh_token: session.refresh_token.expose_secret().to_string(),
        expires_at: session.expires_at,
        user_email: session.user_email.clone(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&stored)?)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    Ok(())
}

/// Remove the session file. Returns whether one existed.
pub fn clear_session(path: &Path) -> Result<bool, AuthError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> AuthClient {
        AuthClient::new(server.uri(), AnonKey::new("anon"), Duration::from_secs(5)).unwrap()
    }

    fn session(expires_at: DateTime<Utc>) -> SessionTokens {
        SessionTokens {
            access_token: SecretString::from("access".to_string()),
            refresh_token: SecretString::from("refresh".to_string()),
            expires_at,
            user_email: Some("erik@example.com".into()),
        }
    }

    #[tokio::test]
    async fn sign_in_returns_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", "anon"))
            .and(body_partial_json(serde_json::json!({"email": "erik@example.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "jwt",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "r1",
                "user": {"id": "u1", "email": "erik@example.com"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let before = Utc::now();
        let session = client(&server)
            .sign_in("erik@example.com", "hunter2")
            .await
            .unwrap();
        assert_eq!(session.access_token.expose_secret(), "jwt");
        assert_eq!(session.user_email.as_deref(), Some("erik@example.com"));
        assert!(session.expires_at > before + chrono::Duration::minutes(59));
    }

    #[tokio::test]
    async fn bad_password_is_invalid_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let err = client(&server).sign_in("erik@example.com", "nope").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(err.to_string(), "invalid email or password");
    }

    #[tokio::test]
    async fn refresh_with_dead_token_means_signed_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("grant_type", "refresh_token"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let err = client(&server).refresh(&session(Utc::now())).await.unwrap_err();
        assert!(matches!(err, AuthError::NotSignedIn));
    }

    #[tokio::test]
    async fn sign_out_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("authorization", "Bearer access"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).sign_out(&session(Utc::now())).await.unwrap();
    }

    #[tokio::test]
    async fn sign_out_tolerates_expired_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(client(&server).sign_out(&session(Utc::now())).await.is_ok());
    }

    #[test]
    fn session_file_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let expires = DateTime::from_timestamp(1_792_141_200, 0).unwrap();

        assert!(load_session(&path).is_none());
        save_session(&path, &session(expires)).unwrap();
        let loaded = load_session(&path).unwrap();
        assert_eq!(loaded.access_token.expose_secret(), "access");
        assert_eq!(loaded.expires_at, expires);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        assert!(clear_session(&path).unwrap());
        assert!(!clear_session(&path).unwrap());
        assert!(load_session(&path).is_none());
    }

    #[test]
    fn foreign_session_file_reads_as_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{"version": 9, "access_token": "a", "refresh_token": "r", "expires_at": "2026-10-16T08:00:00Z"}"#).unwrap();
        assert!(load_session(&path).is_none());
        std::fs::write(&path, "garbage").unwrap();
        assert!(load_session(&path).is_none());
    }
}
