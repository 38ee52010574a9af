//! Short-lived access tokens obtained through the OAuth2 refresh flow.

use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::retry::RetryPolicy;
use bon::Builder;
use chrono::{DateTime, Duration, Utc};
use getset::Getters;
use serde::Deserialize;
use std::sync::{Mutex, PoisonError};

/// Dropbox OAuth2 token endpoint
pub static DEFAULT_TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";

/// A token is refreshed this long before it actually expires
static EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct AccessCredential {
    token: RedactedString,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AccessCredential {
    pub fn new<T: Into<RedactedString>>(
        token: T,
        issued_at: DateTime<Utc>,
        expires_in: Duration,
    ) -> Self {
        Self {
            token: token.into(),
            issued_at,
            expires_at: issued_at + expires_in,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_SKEW_SECONDS) >= self.expires_at
    }
}

pub trait CredentialBroker: Send + Sync {
    /// Returns a valid credential, refreshing it only when absent or expired.
    fn access_token(&self) -> Result<AccessCredential>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: RedactedString,
    expires_in: i64,
}

#[derive(Debug, Default)]
enum TokenState {
    #[default]
    Empty,
    Valid(AccessCredential),
    /// Refresh failed, no further attempts this run
    Failed(String),
}

/// Exchanges a long-lived refresh token for access tokens.
///
/// The cached token lives behind a mutex that is held for the whole refresh, so
/// concurrent workers wait for one refresh instead of each running their own.
#[derive(Debug, Builder)]
pub struct OAuthRefreshBroker {
    #[builder(default)]
    client: reqwest::blocking::Client,
    #[builder(default = DEFAULT_TOKEN_URL.to_string(), into)]
    token_url: String,
    #[builder(into)]
    client_id: String,
    #[builder(into)]
    client_secret: RedactedString,
    #[builder(into)]
    refresh_token: RedactedString,
    #[builder(into)]
    redirect_uri: Option<String>,
    #[builder(default)]
    retry: RetryPolicy,
    #[builder(skip)]
    state: Mutex<TokenState>,
}

impl CredentialBroker for OAuthRefreshBroker {
    fn access_token(&self) -> Result<AccessCredential> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        match &*state {
            TokenState::Failed(reason) => {
                return Err(Error::auth(Error::RefreshUnavailable(reason.clone())))
            }
            TokenState::Valid(credential) if !credential.is_expired_at(now) => {
                return Ok(credential.clone())
            }
            TokenState::Valid(_) => tracing::info!("Access token expired, refreshing"),
            TokenState::Empty => tracing::debug!("No access token yet, refreshing"),
        }

        match self.retry.run("Access token refresh", |_| self.refresh()) {
            Ok(credential) => {
                tracing::info!("Obtained access token valid until {}", credential.expires_at);
                *state = TokenState::Valid(credential.clone());
                Ok(credential)
            }
            Err(e) => {
                tracing::error!("Access token refresh failed, uploads disabled for this run: {e}");
                *state = TokenState::Failed(e.to_string());
                Err(Error::auth(e))
            }
        }
    }
}

impl OAuthRefreshBroker {
    fn refresh(&self) -> Result<AccessCredential> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", self.refresh_token.inner().as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.inner().as_str()),
        ];
        if let Some(redirect_uri) = &self.redirect_uri {
            form.push(("redirect_uri", redirect_uri.as_str()));
        }

        let issued_at = Utc::now();
        let response = self.client.post(&self.token_url).form(&form).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let token: TokenResponse = response.json()?;
        Ok(AccessCredential::new(
            token.access_token,
            issued_at,
            Duration::seconds(token.expires_in),
        ))
    }
}
