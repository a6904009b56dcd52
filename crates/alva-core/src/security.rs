use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

/// Project-level publishable key sent as `apikey` on every request.
#[derive(Clone)]
pub struct AnonKey(pub SecretString);

impl AnonKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(SecretString::from(key.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for AnonKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AnonKey([REDACTED])")
    }
}

/// A signed-in user's session tokens.
#[derive(Clone)]
pub struct SessionTokens {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
    pub user_email: Option<String>,
}

impl SessionTokens {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("expires_at", &self.expires_at)
            .field("user_email", &self.user_email)
            .finish()
    }
}

/// Everything needed to talk to the backend on someone's behalf.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub anon_key: AnonKey,
    pub session: Option<SessionTokens>,
}

impl Credentials {
    pub fn anonymous(anon_key: AnonKey) -> Self {
        Self {
            anon_key,
            session: None,
        }
    }

    pub fn with_session(anon_key: AnonKey, session: SessionTokens) -> Self {
        Self {
            anon_key,
            session: Some(session),
        }
    }

    /// Bearer token for row-level security: the user's access token when
    /// signed in, the anon key otherwise.
    pub fn bearer(&self) -> &str {
        match &self.session {
            Some(s) => s.access_token.expose_secret(),
            None => self.anon_key.expose(),
        }
    }
}
