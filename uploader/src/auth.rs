//! Obtaining an authorized credential for the upload API.

use crate::client_secret::ClientSecret;
use crate::error::AuthError;
use crate::oauth::OAuthManager;
use eyre::Context;
use oauth2::TokenResponse;
use oauth2::basic::BasicTokenResponse;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

/// OAuth scope that grants permission to upload videos.
pub const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";

/// Tokens this close to expiry are refreshed rather than used.
pub(crate) const EXPIRY_BUFFER: Duration = Duration::from_secs(300);

/// Lifetime assumed for tokens that don't say when they expire.
const ASSUMED_LIFETIME: Duration = Duration::from_secs(3300);

#[derive(Debug)]
struct TimeBoundAccessToken {
    token: BasicTokenResponse,
    /// When the access token stops being usable (with safety buffer).
    expires_at: jiff::Timestamp,
}

impl TimeBoundAccessToken {
    fn new(token: BasicTokenResponse, obtained_at: jiff::Timestamp) -> Self {
        let lifetime = token
            .expires_in()
            .map_or(ASSUMED_LIFETIME, |expires_in| {
                expires_in.saturating_sub(EXPIRY_BUFFER)
            });
        Self {
            expires_at: obtained_at.checked_add(lifetime).unwrap_or(obtained_at),
            token,
        }
    }

    fn is_expired(&self, now: jiff::Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Returns `false` if the grant can't be refreshed.
    async fn refresh(&mut self, oauth_manager: &OAuthManager) -> eyre::Result<bool> {
        tracing::trace!("refreshing token");
        match oauth_manager
            .refresh_token(&self.token)
            .await
            .context("refresh OAuth token")?
        {
            Some(new_token) => {
                *self = Self::new(new_token, jiff::Timestamp::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// An authorized session token.
///
/// Handed explicitly to the uploader; nothing else holds on to it. A
/// credential that came out of the consent flow knows how to refresh itself,
/// so an upload that outlives the access token keeps going.
#[derive(Debug, Clone)]
pub struct Credential {
    token: Arc<Mutex<TimeBoundAccessToken>>,
    oauth_manager: Option<Arc<OAuthManager>>,
}

impl Credential {
    /// A credential for a token that was just issued.
    pub fn new(token: BasicTokenResponse) -> Self {
        Self::obtained_at(token, jiff::Timestamp::now())
    }

    /// A credential for a token that was issued at `obtained_at`.
    pub fn obtained_at(token: BasicTokenResponse, obtained_at: jiff::Timestamp) -> Self {
        Self {
            token: Arc::new(Mutex::new(TimeBoundAccessToken::new(token, obtained_at))),
            oauth_manager: None,
        }
    }

    pub(crate) fn refreshed_by(mut self, oauth_manager: OAuthManager) -> Self {
        self.oauth_manager = Some(Arc::new(oauth_manager));
        self
    }

    /// The bearer token to put in the `Authorization` header.
    ///
    /// An expired token is refreshed first, if that is possible.
    pub async fn access_token(&self) -> eyre::Result<String> {
        let mut token = self.token.lock().await;
        if token.is_expired(jiff::Timestamp::now()) {
            if let Some(oauth_manager) = &self.oauth_manager {
                if !token.refresh(oauth_manager).await? {
                    tracing::warn!("access token expired and could not be refreshed");
                }
            }
        }
        Ok(token.token.access_token().secret().clone())
    }

    /// Replaces the access token with a new one, even if it hasn't expired.
    ///
    /// Returns `false` if there is no way to refresh this credential.
    pub async fn refresh(&self) -> eyre::Result<bool> {
        let Some(oauth_manager) = &self.oauth_manager else {
            return Ok(false);
        };
        self.token.lock().await.refresh(oauth_manager).await
    }
}

/// An interactive authorization flow.
///
/// Given the client descriptor and a scope, it either produces a credential
/// or fails (for example because the user denied consent). Where tokens are
/// stored between runs is entirely up to the implementation.
pub trait AuthorizationFlow {
    fn authorize(
        &self,
        secret: &ClientSecret,
        scope: &str,
    ) -> impl Future<Output = eyre::Result<Credential>> + Send;
}

/// Loads the client descriptor at `secret_path` and runs `flow` for `scope`.
///
/// The descriptor is read in full and its handle released before the flow
/// starts, so a flow that blocks on the user never keeps the file open.
#[instrument(skip(flow))]
pub async fn authenticate<F>(
    secret_path: &Path,
    scope: &str,
    flow: &F,
) -> Result<Credential, AuthError>
where
    F: AuthorizationFlow,
{
    let json = tokio::fs::read_to_string(secret_path)
        .await
        .map_err(|source| AuthError::ReadSecret {
            path: secret_path.to_path_buf(),
            source,
        })?;
    let secret = ClientSecret::from_json(secret_path, &json)?;
    tracing::debug!(client_id = %secret.client_id, "loaded OAuth client descriptor");

    let credential = flow
        .authorize(&secret, scope)
        .await
        .map_err(|e| AuthError::Flow {
            scope: scope.to_string(),
            source: e.into(),
        })?;
    tracing::info!("authorized with YouTube");
    Ok(credential)
}
