//! Tokens and their prefixes.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Kind of token, recognised by its stable prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    ApiKey,
    AccessToken,
    RefreshToken,
    AuthorizationCode,
}

impl TokenType {
    pub fn prefix(&self) -> &'static str {
        match self {
            TokenType::ApiKey => "NNSXS",
            TokenType::AccessToken => "MFRWG",
            TokenType::RefreshToken => "OJSWM",
            TokenType::AuthorizationCode => "MFRWI",
        }
    }

    /// Classify a token by the part before the first dot.
    pub fn of(token: &str) -> Option<TokenType> {
        let prefix = token.split('.').next()?;
        [
            TokenType::ApiKey,
            TokenType::AccessToken,
            TokenType::RefreshToken,
            TokenType::AuthorizationCode,
        ]
        .into_iter()
        .find(|t| t.prefix() == prefix)
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TokenType::ApiKey => "API key",
            TokenType::AccessToken => "access token",
            TokenType::RefreshToken => "refresh token",
            TokenType::AuthorizationCode => "authorization code",
        })
    }
}

/// OAuth token as cached on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expiry: DateTime<Utc>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl OAuthToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expiry - now).max(Duration::zero())
    }

    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// Convert to a cacheable token. A missing refresh token keeps `previous`.
    pub fn into_token(self, now: DateTime<Utc>, previous_refresh: Option<&str>) -> OAuthToken {
        OAuthToken {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string))
                .unwrap_or_default(),
            token_type: self.token_type.unwrap_or_else(default_token_type),
            expiry: now + Duration::seconds(self.expires_in.unwrap_or(3600)),
        }
    }
}

/// Render a duration for log messages, e.g. `1h 5m`.
pub fn humanize(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{}s", s),
        (0, _) => format!("{}m {}s", m, s),
        _ => format!("{}h {}m", h, m),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_prefixes() {
        assert_eq!(TokenType::of("NNSXS.ABC.DEF"), Some(TokenType::ApiKey));
        assert_eq!(TokenType::of("MFRWI.XYZ.123"), Some(TokenType::AuthorizationCode));
        assert_eq!(TokenType::of("MFRWG.XYZ"), Some(TokenType::AccessToken));
        assert_eq!(TokenType::of("garbage"), None);
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let token = TokenResponse {
            access_token: "MFRWG.a".to_string(),
            refresh_token: None,
            token_type: None,
            expires_in: Some(60),
        }
        .into_token(now, Some("OJSWM.r"));
        assert_eq!(token.refresh_token, "OJSWM.r");
        assert!(!token.is_expired(now));
        assert!(token.is_expired(now + Duration::seconds(60)));
        assert_eq!(token.remaining(now + Duration::hours(1)), Duration::zero());
        assert_eq!(humanize(Duration::seconds(3900)), "1h 5m");
    }
}
