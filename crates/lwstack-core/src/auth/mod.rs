//! Authentication: OAuth login, token refresh and API keys.

pub mod authenticator;
pub mod callback;
pub mod oauth;
pub mod token;

pub use authenticator::{validate_authorization_code, Authenticator};
pub use oauth::{OAuthClient, OAuthServer};
pub use token::{OAuthToken, TokenType};
