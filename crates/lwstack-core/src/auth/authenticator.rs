//! Per-call credentials, silent refresh and the known-hosts gate.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::oauth::OAuthServer;
use super::token::{humanize, OAuthToken, TokenType};
use crate::config::ServiceRole;
use crate::error::{ApiError, CoreError, ErrorKind};
use crate::storage::{Credentials, CredentialsStore};

fn not_logged_in() -> ApiError {
    ApiError::unauthenticated(
        "cli",
        "unauthenticated",
        "not authenticated with either API key or OAuth access token; run `lwstack login`",
    )
}

/// Supplies the bearer token for each RPC.
pub struct Authenticator {
    store: CredentialsStore,
    credentials_id: String,
    oauth: Option<Arc<dyn OAuthServer>>,
    cached: Mutex<Option<Credentials>>,
}

impl Authenticator {
    pub fn new(
        store: CredentialsStore,
        credentials_id: impl Into<String>,
        oauth: Option<Arc<dyn OAuthServer>>,
    ) -> Self {
        Self {
            store,
            credentials_id: credentials_id.into(),
            oauth,
            cached: Mutex::new(None),
        }
    }

    pub fn credentials_id(&self) -> &str {
        &self.credentials_id
    }

    pub fn store(&self) -> &CredentialsStore {
        &self.store
    }

    async fn load(&self, cached: &mut Option<Credentials>) -> Result<Credentials, CoreError> {
        if let Some(creds) = cached.as_ref() {
            return Ok(creds.clone());
        }
        let creds = self
            .store
            .get(&self.credentials_id)
            .await?
            .unwrap_or_default();
        *cached = Some(creds.clone());
        Ok(creds)
    }

    async fn credentials(&self) -> Result<Credentials, CoreError> {
        let mut cached = self.cached.lock().await;
        self.load(&mut cached).await
    }

    /// Bearer token for the next call: the API key if one is cached, else a
    /// valid OAuth access token, refreshing it when expired.
    ///
    /// The cache lock is held across a refresh so concurrent calls refresh
    /// only once.
    pub async fn bearer(&self) -> Result<String, CoreError> {
        let mut cached = self.cached.lock().await;
        let creds = self.load(&mut cached).await?;
        if let Some(api_key) = creds.api_key.filter(|k| !k.is_empty()) {
            return Ok(api_key);
        }
        let Some(token) = creds.oauth_token else {
            return Err(not_logged_in().into());
        };
        if !token.is_expired(Utc::now()) {
            return Ok(token.access_token);
        }
        debug!(expiry = %token.expiry, "access token expired");
        let (refreshed, creds) = self.refresh(&token).await?;
        *cached = Some(creds);
        Ok(refreshed.access_token)
    }

    async fn refresh(&self, token: &OAuthToken) -> Result<(OAuthToken, Credentials), CoreError> {
        let Some(oauth) = self.oauth.as_ref().filter(|_| token.can_refresh()) else {
            return Err(ApiError::unauthenticated(
                "cli",
                "unauthenticated",
                "access token expired; run `lwstack login`",
            )
            .into());
        };
        let response = match oauth.refresh(&token.refresh_token).await {
            Ok(response) => response,
            Err(e) if matches!(e.kind, ErrorKind::Unauthenticated | ErrorKind::InvalidArgument) => {
                return Err(ApiError::unauthenticated(
                    "cli",
                    "unauthenticated",
                    "access token expired and could not be refreshed; run `lwstack login`",
                )
                .with_cause(e)
                .into());
            }
            Err(e) => return Err(e.into()),
        };
        let refreshed = response.into_token(Utc::now(), Some(&token.refresh_token));

        let id = self.credentials_id.clone();
        let stored = refreshed.clone();
        let creds = self
            .store
            .update(move |file| {
                let entry = file.credentials.entry(id).or_default();
                entry.oauth_token = Some(stored);
                entry.clone()
            })
            .await?;
        info!("refreshed OAuth access token");
        Ok((refreshed, creds))
    }

    /// Fail with `unknown_host` when the configured hosts are not the ones
    /// the cached credentials were issued for.
    pub async fn check_known_hosts(
        &self,
        configured: &[String],
        allow_unknown: bool,
    ) -> Result<(), CoreError> {
        let creds = self.credentials().await?;
        if creds.hosts.is_empty() {
            return Ok(());
        }
        let unknown: Vec<&String> = configured
            .iter()
            .filter(|h| !creds.hosts.contains(h))
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        if allow_unknown {
            warn!(hosts = ?unknown, "sending credentials to unknown hosts");
            return Ok(());
        }
        let hosts: Vec<&str> = unknown.iter().map(|h| h.as_str()).collect();
        Err(ApiError::unauthenticated(
            "cli",
            "unknown_host",
            format!(
                "host `{}` is not known for credentials `{}`; use --allow-unknown-hosts to override",
                hosts.join(", "),
                self.credentials_id
            ),
        )
        .with_attribute("host", hosts.join(","))
        .into())
    }

    pub async fn login_with_api_key(&self, api_key: &str, hosts: Vec<String>) -> Result<(), CoreError> {
        if TokenType::of(api_key) != Some(TokenType::ApiKey) {
            warn!("API key does not have the expected prefix");
        }
        let creds = Credentials {
            api_key: Some(api_key.to_string()),
            oauth_token: None,
            hosts,
        };
        self.store.put(&self.credentials_id, creds.clone()).await?;
        *self.cached.lock().await = Some(creds);
        Ok(())
    }

    /// Exchange an authorization code and store the token.
    pub async fn login_with_code(
        &self,
        code: &str,
        redirect_uri: &str,
        hosts: Vec<String>,
    ) -> Result<(), CoreError> {
        let oauth = self
            .oauth
            .as_ref()
            .ok_or_else(|| CoreError::from(ServiceRole::OAuth.disabled_error()))?;
        let token = oauth
            .exchange_code(code, redirect_uri)
            .await?
            .into_token(Utc::now(), None);
        let creds = Credentials {
            oauth_token: Some(token),
            api_key: None,
            hosts,
        };
        self.store.put(&self.credentials_id, creds.clone()).await?;
        *self.cached.lock().await = Some(creds);
        info!("logged in");
        Ok(())
    }

    /// Revoke the cached OAuth tokens on the server and clear the entry.
    /// Revocation is best effort; the local entry is removed regardless.
    pub async fn logout(&self) -> Result<(), CoreError> {
        let removed = self.store.remove(&self.credentials_id).await?;
        *self.cached.lock().await = None;
        match removed {
            Some(creds) => {
                self.revoke(&self.credentials_id, &creds).await;
                info!(credentials_id = %self.credentials_id, "logged out");
            }
            None => info!(credentials_id = %self.credentials_id, "no credentials to remove"),
        }
        Ok(())
    }

    /// Log out of every cached credentials ID.
    pub async fn logout_all(&self) -> Result<(), CoreError> {
        let removed = self.store.clear().await?;
        *self.cached.lock().await = None;
        for (id, creds) in &removed {
            self.revoke(id, creds).await;
        }
        info!(count = removed.len(), "logged out");
        Ok(())
    }

    async fn revoke(&self, id: &str, creds: &Credentials) {
        let (Some(token), Some(oauth)) = (creds.oauth_token.as_ref(), self.oauth.as_ref()) else {
            return;
        };
        if let Err(e) = oauth.revoke(&token.access_token).await {
            warn!(
                credentials_id = id,
                error = %e,
                "could not revoke access token; it remains valid for {}",
                humanize(token.remaining(Utc::now()))
            );
        }
        if token.can_refresh() {
            if let Err(e) = oauth.revoke(&token.refresh_token).await {
                warn!(credentials_id = id, error = %e, "could not revoke refresh token");
            }
        }
    }
}

/// Validate a pasted authorization code.
pub fn validate_authorization_code(input: &str) -> Result<String, ApiError> {
    let code = input.trim();
    match TokenType::of(code) {
        Some(TokenType::AuthorizationCode) => Ok(code.to_string()),
        Some(other) => Err(ApiError::invalid_argument(
            "cli",
            "token_type",
            format!("expected an authorization code, got an {}", other),
        )),
        None => Err(ApiError::invalid_argument(
            "cli",
            "token_type",
            "input is not an authorization code",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::TokenResponse;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeOAuth {
        refreshes: StdMutex<u32>,
        revoked: StdMutex<Vec<String>>,
        fail_refresh: bool,
        fail_revoke: bool,
    }

    #[async_trait]
    impl OAuthServer for FakeOAuth {
        fn authorize_url(&self, _: &str, _: &str) -> Result<String, ApiError> {
            Ok("https://example.com/oauth/authorize".to_string())
        }

        async fn exchange_code(&self, code: &str, _: &str) -> Result<TokenResponse, ApiError> {
            assert!(code.starts_with("MFRWI"));
            Ok(TokenResponse {
                access_token: "MFRWG.new".to_string(),
                refresh_token: Some("OJSWM.new".to_string()),
                token_type: None,
                expires_in: Some(3600),
            })
        }

        async fn refresh(&self, _: &str) -> Result<TokenResponse, ApiError> {
            *self.refreshes.lock().unwrap() += 1;
            if self.fail_refresh {
                return Err(ApiError::unauthenticated("oauth", "invalid_grant", "revoked"));
            }
            Ok(TokenResponse {
                access_token: "MFRWG.refreshed".to_string(),
                refresh_token: None,
                token_type: None,
                expires_in: Some(3600),
            })
        }

        async fn revoke(&self, token: &str) -> Result<(), ApiError> {
            self.revoked.lock().unwrap().push(token.to_string());
            if self.fail_revoke {
                return Err(ApiError::new(ErrorKind::Unavailable, "oauth", "down", "down"));
            }
            Ok(())
        }
    }

    fn expired_token() -> OAuthToken {
        OAuthToken {
            access_token: "MFRWG.old".to_string(),
            refresh_token: "OJSWM.old".to_string(),
            token_type: "bearer".to_string(),
            expiry: Utc::now() - Duration::minutes(1),
        }
    }

    async fn setup(
        creds: Credentials,
        oauth: FakeOAuth,
    ) -> (Authenticator, Arc<FakeOAuth>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialsStore::in_dir(tmp.path());
        store.put("eu1", creds).await.unwrap();
        let oauth = Arc::new(oauth);
        let auth = Authenticator::new(store, "eu1", Some(oauth.clone() as Arc<dyn OAuthServer>));
        (auth, oauth, tmp)
    }

    #[tokio::test]
    async fn test_api_key_takes_priority() {
        let creds = Credentials {
            api_key: Some("NNSXS.key".to_string()),
            oauth_token: Some(expired_token()),
            hosts: vec![],
        };
        let (auth, oauth, _tmp) = setup(creds, FakeOAuth::default()).await;
        assert_eq!(auth.bearer().await.unwrap(), "NNSXS.key");
        assert_eq!(*oauth.refreshes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_once_and_persisted() {
        let creds = Credentials {
            oauth_token: Some(expired_token()),
            ..Default::default()
        };
        let (auth, oauth, _tmp) = setup(creds, FakeOAuth::default()).await;
        assert_eq!(auth.bearer().await.unwrap(), "MFRWG.refreshed");
        assert_eq!(auth.bearer().await.unwrap(), "MFRWG.refreshed");
        assert_eq!(*oauth.refreshes.lock().unwrap(), 1);

        let stored = auth.store().get("eu1").await.unwrap().unwrap();
        let token = stored.oauth_token.unwrap();
        assert_eq!(token.access_token, "MFRWG.refreshed");
        assert_eq!(token.refresh_token, "OJSWM.old");
    }

    #[tokio::test]
    async fn test_failed_refresh_is_unauthenticated() {
        let creds = Credentials {
            oauth_token: Some(expired_token()),
            ..Default::default()
        };
        let oauth = FakeOAuth {
            fail_refresh: true,
            ..Default::default()
        };
        let (auth, _oauth, _tmp) = setup(creds, oauth).await;
        let err = auth.bearer().await.unwrap_err().to_api_error();
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
        assert_eq!(err.cause.unwrap().name, "invalid_grant");
    }

    #[tokio::test]
    async fn test_no_credentials() {
        let (auth, _oauth, _tmp) = setup(Credentials::default(), FakeOAuth::default()).await;
        let err = auth.bearer().await.unwrap_err().to_api_error();
        assert_eq!(err.name, "unauthenticated");
    }

    #[tokio::test]
    async fn test_unknown_host_gate() {
        let creds = Credentials {
            api_key: Some("NNSXS.key".to_string()),
            hosts: vec!["eu1.example.com".to_string()],
            ..Default::default()
        };
        let (auth, _oauth, _tmp) = setup(creds, FakeOAuth::default()).await;
        let known = vec!["eu1.example.com".to_string()];
        let other = vec!["evil.example.com".to_string()];
        assert!(auth.check_known_hosts(&known, false).await.is_ok());
        let err = auth.check_known_hosts(&other, false).await.unwrap_err().to_api_error();
        assert_eq!(err.name, "unknown_host");
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
        assert!(auth.check_known_hosts(&other, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_revoke_fails() {
        let creds = Credentials {
            oauth_token: Some(expired_token()),
            ..Default::default()
        };
        let oauth = FakeOAuth {
            fail_revoke: true,
            ..Default::default()
        };
        let (auth, oauth, _tmp) = setup(creds, oauth).await;
        auth.logout().await.unwrap();
        assert!(auth.store().get("eu1").await.unwrap().is_none());
        assert_eq!(
            *oauth.revoked.lock().unwrap(),
            vec!["MFRWG.old".to_string(), "OJSWM.old".to_string()]
        );
    }

    #[tokio::test]
    async fn test_login_with_code() {
        let (auth, _oauth, _tmp) = setup(Credentials::default(), FakeOAuth::default()).await;
        auth.login_with_code("MFRWI.code", "code", vec!["eu1.example.com".to_string()])
            .await
            .unwrap();
        assert_eq!(auth.bearer().await.unwrap(), "MFRWG.new");
        let stored = auth.store().get("eu1").await.unwrap().unwrap();
        assert_eq!(stored.hosts, vec!["eu1.example.com"]);
    }

    #[test]
    fn test_validate_authorization_code() {
        assert_eq!(
            validate_authorization_code(" MFRWI.abc \n").unwrap(),
            "MFRWI.abc"
        );
        assert!(validate_authorization_code("MFRWG.access").is_err());
        assert!(validate_authorization_code("hello").is_err());
    }
}
