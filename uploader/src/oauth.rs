//! OAuth 2.0 installed-application flow for YouTube API authentication.
//!
//! This module drives the browser-based consent flow (with PKCE and a local
//! redirect listener), refreshes previously granted tokens, and optionally
//! keeps the granted token on disk so later runs don't have to ask again.

use crate::auth::{AuthorizationFlow, Credential, EXPIRY_BUFFER};
use crate::client_secret::ClientSecret;
use eyre::Context;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, body};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, CsrfToken, PkceCodeChallenge, RedirectUrl, Scope,
    TokenUrl,
};
use oauth2::{ClientSecret as OAuthClientSecret, TokenResponse, reqwest};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;

/// Manages OAuth 2.0 operations for one client descriptor and scope.
#[derive(Debug, Clone)]
pub(crate) struct OAuthManager {
    secret: ClientSecret,
    scope: String,
    oauth_done_html: &'static str,
}

impl OAuthManager {
    pub(crate) fn new(secret: ClientSecret, scope: &str, oauth_done_html: &'static str) -> Self {
        Self {
            secret,
            scope: scope.to_string(),
            oauth_done_html,
        }
    }

    fn http_client() -> eyre::Result<reqwest::Client> {
        reqwest::ClientBuilder::new()
            // SSRF no thank you.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build HTTP client for token endpoint")
    }

    /// Performs a complete OAuth 2.0 authorization flow to obtain a new access token.
    ///
    /// This opens the user's browser on the consent screen, waits for the redirect
    /// to arrive at a local listener, and exchanges the authorization code for a token.
    /// Blocks until the user grants or denies access.
    pub(crate) async fn authenticate(&self) -> eyre::Result<BasicTokenResponse> {
        let csrf = CsrfToken::new_random();
        let (redirect_url, eventually_authorization_code) = self
            .setup_redirect(csrf.clone())
            .await
            .context("set up redirect endpoint")?;

        let auth_url =
            AuthUrl::new(self.secret.auth_uri.clone()).context("parse authorization endpoint")?;
        let token_url =
            TokenUrl::new(self.secret.token_uri.clone()).context("parse token endpoint")?;
        let mut client = BasicClient::new(ClientId::new(self.secret.client_id.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);
        if let Some(secret) = &self.secret.client_secret {
            client = client.set_client_secret(OAuthClientSecret::new(secret.clone()));
        }

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, _csrf_token) = client
            // We never re-use the CSRF since we only go through the flow exactly once.
            .authorize_url(move || csrf.clone())
            .add_scope(Scope::new(self.scope.clone()))
            .set_pkce_challenge(pkce_challenge)
            .url();

        tracing::info!(url = %auth_url, "asking user to follow OAuth flow");
        if let Err(e) = webbrowser::open(auth_url.as_ref()) {
            tracing::warn!(error = %e, "could not open browser, open the logged URL manually");
        }
        let authorization_code = eventually_authorization_code
            .await
            .context("await user authorization code")?;

        let token_result = client
            .exchange_code(authorization_code)
            .set_pkce_verifier(pkce_verifier)
            .request_async(&Self::http_client()?)
            .await
            .context("exchange authorization code with access token")?;

        Ok(token_result)
    }

    /// Attempts to refresh an existing OAuth token using its refresh token.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(new_token))` - Refresh succeeded, new token is available
    /// * `Ok(None)` - No refresh token available, or the grant is no longer valid
    /// * `Err(_)` - Network or other error occurred during refresh attempt
    pub(crate) async fn refresh_token(
        &self,
        token: &BasicTokenResponse,
    ) -> eyre::Result<Option<BasicTokenResponse>> {
        let Some(refresh_token) = token.refresh_token() else {
            tracing::warn!("no refresh token available, cannot refresh");
            return Ok(None);
        };

        tracing::debug!("attempting to refresh OAuth token");

        let token_url =
            TokenUrl::new(self.secret.token_uri.clone()).context("parse token endpoint")?;
        let mut client =
            BasicClient::new(ClientId::new(self.secret.client_id.clone())).set_token_uri(token_url);
        if let Some(secret) = &self.secret.client_secret {
            client = client.set_client_secret(OAuthClientSecret::new(secret.clone()));
        }

        match client
            .exchange_refresh_token(refresh_token)
            .request_async(&Self::http_client()?)
            .await
        {
            Ok(mut new_token) => {
                // Google usually omits the refresh token on refresh; keep the one we have.
                if new_token.refresh_token().is_none() {
                    new_token.set_refresh_token(Some(refresh_token.clone()));
                }
                tracing::debug!("successfully refreshed OAuth token");
                Ok(Some(new_token))
            }
            Err(ref e @ oauth2::RequestTokenError::ServerResponse(ref sr))
                if matches!(
                    sr.error(),
                    oauth2::basic::BasicErrorResponseType::InvalidGrant
                ) =>
            {
                tracing::warn!("OAuth refresh token considered invalid grant: {}", e);
                Ok(None)
            }
            Err(e) => Err(e).context("exchange refresh token"),
        }
    }

    /// Sets up a local HTTP server to receive the OAuth authorization callback.
    ///
    /// The server listens on a random loopback port, validates the CSRF state,
    /// and resolves the returned future with the authorization code. A redirect
    /// that carries an `error` (such as `access_denied`) resolves it with an error.
    pub(crate) async fn setup_redirect(
        &self,
        csrf: CsrfToken,
    ) -> eyre::Result<(
        RedirectUrl,
        impl Future<Output = eyre::Result<AuthorizationCode>>,
    )> {
        let socket = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind to localhost")?;
        let addr = socket.local_addr().context("get local address")?;
        let url = RedirectUrl::new(format!("http://{}:{}", addr.ip(), addr.port()))
            .context("construct redirect url")?;
        let (tx, rx) = tokio::sync::oneshot::channel();
        let oauth_done = self.oauth_done_html;
        tokio::spawn(async move {
            let r = async move {
                let (conn, _) = socket.accept().await.context("accept")?;
                let conn = hyper_util::rt::TokioIo::new(conn);
                let (got, mut gotten) = tokio::sync::mpsc::channel(1);
                let service = service_fn(move |req: Request<body::Incoming>| {
                    let csrf = csrf.clone();
                    let got = got.clone();
                    async move {
                        let mut presented_state = None;
                        let mut presented_code = None;
                        let mut presented_error = None;
                        for (k, v) in
                            form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
                        {
                            match &*k {
                                "state" => presented_state = Some(v),
                                "code" => presented_code = Some(v),
                                "error" => presented_error = Some(v),
                                _ => {}
                            }
                        }
                        if presented_state.as_deref() != Some(csrf.secret().as_str()) {
                            return Err("invalid csrf token");
                        }
                        let outcome = match (presented_code, presented_error) {
                            (_, Some(error)) => Err(eyre::eyre!("user denied consent: {error}")),
                            (Some(code), None) => Ok(AuthorizationCode::new(code.into_owned())),
                            (None, None) => return Err("no authorization code found"),
                        };
                        let body = if outcome.is_ok() {
                            oauth_done
                        } else {
                            "Zugriff verweigert."
                        };
                        got.send(outcome)
                            .await
                            .expect("channel won't be closed until server exit");
                        Ok(Response::new(Full::<Bytes>::from(body)))
                    }
                });
                let mut serve = std::pin::pin!(
                    hyper::server::conn::http1::Builder::new().serve_connection(conn, service)
                );

                tokio::select! {
                    exit = &mut serve => {
                        if let Err(e) = exit {
                            Err(e).context("redirect server got bad request")
                        } else {
                            eyre::bail!("redirect server exit prematurely");
                        }
                    }
                    outcome = gotten.recv() => {
                        serve.as_mut().graceful_shutdown();
                        // let the response make it to the browser
                        if let Err(e) = serve.await {
                            tracing::debug!(error = %e, "redirect connection closed uncleanly");
                        }
                        outcome.expect("channel won't be closed until service_fn is dropped")
                    }
                }
            };
            let _ = tx.send(r.await);
        });
        Ok((url, async move {
            rx.await.context("redirect future dropped prematurely")?
        }))
    }
}

/// Token as stored on disk between runs.
#[derive(Debug, Serialize, Deserialize)]
struct CachedToken {
    token: BasicTokenResponse,
    obtained_at: jiff::Timestamp,
}

impl CachedToken {
    fn new(token: BasicTokenResponse) -> Self {
        Self {
            token,
            obtained_at: jiff::Timestamp::now(),
        }
    }

    /// Whether the access token can still be used without refreshing.
    ///
    /// Tokens without an `expires_in` are treated as expired.
    fn is_fresh(&self, now: jiff::Timestamp) -> bool {
        let Some(expires_in) = self.token.expires_in() else {
            return false;
        };
        let Some(lifetime) = expires_in.checked_sub(EXPIRY_BUFFER) else {
            return false;
        };
        self.obtained_at
            .checked_add(lifetime)
            .is_ok_and(|usable_until| now < usable_until)
    }
}

/// The browser-based consent flow for installed applications.
#[derive(Debug, Clone)]
pub struct InstalledFlow {
    oauth_done_html: &'static str,
    token_cache: Option<PathBuf>,
}

impl InstalledFlow {
    /// `oauth_done_html` is shown in the browser once the redirect arrives.
    pub fn new(oauth_done_html: &'static str) -> Self {
        Self {
            oauth_done_html,
            token_cache: None,
        }
    }

    /// Keeps granted tokens in `path` and reuses them on later runs.
    pub fn persist_tokens_to(mut self, path: Option<PathBuf>) -> Self {
        self.token_cache = path;
        self
    }

    async fn load_cached(&self) -> eyre::Result<Option<CachedToken>> {
        let Some(path) = &self.token_cache else {
            return Ok(None);
        };
        if !tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("check for token cache {}", path.display()))?
        {
            return Ok(None);
        }
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read token cache {}", path.display()))?;
        match serde_json::from_str(&json) {
            Ok(cached) => Ok(Some(cached)),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "ignoring unreadable token cache");
                Ok(None)
            }
        }
    }

    async fn store(&self, cached: &CachedToken) -> eyre::Result<()> {
        let Some(path) = &self.token_cache else {
            return Ok(());
        };
        let json = serde_json::to_string(cached).context("serialize token")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("write token cache {}", path.display()))
    }
}

impl AuthorizationFlow for InstalledFlow {
    async fn authorize(&self, secret: &ClientSecret, scope: &str) -> eyre::Result<Credential> {
        let oauth_manager = OAuthManager::new(secret.clone(), scope, self.oauth_done_html);

        if let Some(cached) = self.load_cached().await? {
            if cached.is_fresh(jiff::Timestamp::now()) {
                tracing::debug!("reusing cached token");
                return Ok(Credential::obtained_at(cached.token, cached.obtained_at)
                    .refreshed_by(oauth_manager));
            }
            if let Some(token) = oauth_manager
                .refresh_token(&cached.token)
                .await
                .context("refresh cached token")?
            {
                let cached = CachedToken::new(token);
                self.store(&cached).await?;
                return Ok(Credential::new(cached.token).refreshed_by(oauth_manager));
            }
            tracing::warn!("cached token could not be refreshed, asking user again");
        }

        let token = oauth_manager
            .authenticate()
            .await
            .context("authorize user to YouTube")?;
        let cached = CachedToken::new(token);
        self.store(&cached).await?;
        Ok(Credential::new(cached.token).refreshed_by(oauth_manager))
    }
}
