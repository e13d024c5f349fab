//! Password grant against the external commerce identity API.
//!
//! The upstream is an opaque token-issuing service: email/password go out as
//! an `application/x-www-form-urlencoded` password grant, a bearer token
//! comes back. The token lands in the external-token session, never in the
//! primary one.

use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error};

use crate::auth::error::Error;
use crate::auth::session::ExternalTokenRecord;
use crate::auth::users::UserDirectory;

/// Token endpoint response. Every field is optional on the wire; the
/// strategy rejects payloads missing the token type or the token itself.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantTokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

pub struct PasswordGrantStrategy {
    api_base_url: String,
}

impl PasswordGrantStrategy {
    #[must_use]
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
        }
    }

    /// Exchange form credentials for a bearer token and a local user.
    ///
    /// Missing credentials fail before any network call. The user write and
    /// the external-token write are independent; the caller seals both
    /// cookies and a failure after user creation propagates without rollback.
    pub(crate) async fn verify(
        &self,
        form: &std::collections::HashMap<String, String>,
        http: &Client,
        users: &dyn UserDirectory,
    ) -> Result<(crate::auth::session::SessionRecord, ExternalTokenRecord), Error> {
        let email = form
            .get("email")
            .map(String::as_str)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::authorization("email is required"))?;
        let password = form
            .get("password")
            .map(String::as_str)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::authorization("password is required"))?;

        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(Error::authorization("email is not valid"));
        }

        let tokens = exchange(http, &self.api_base_url, &email, password).await?;

        let Some(token_type) = tokens.token_type else {
            debug!("Password grant response missing token type");
            return Err(Error::authorization(
                "password grant response missing token type",
            ));
        };
        let Some(access_token) = tokens.access_token else {
            return Err(Error::authorization("no access token received"));
        };

        let user = users.create_or_login_with_password_grant(&email)?;

        let record = ExternalTokenRecord {
            access_token,
            token_type,
            expires_in: tokens.expires_in,
            user_id: user.id,
        };
        let session = crate::auth::session::SessionRecord {
            user_id: user.id,
            created_at: chrono::Utc::now().timestamp(),
        };

        Ok((session, record))
    }
}

/// `POST <identity-api>/oauth/access_token` with a password grant body.
pub(crate) async fn exchange(
    http: &Client,
    api_base_url: &str,
    email: &str,
    password: &str,
) -> Result<GrantTokenResponse, Error> {
    let url = format!(
        "{}/oauth/access_token",
        api_base_url.trim_end_matches('/')
    );
    let params = [
        ("grant_type", "password"),
        ("username", email),
        ("password", password),
    ];

    let response = http.post(&url).form(&params).send().await.map_err(|err| {
        error!("Password grant transport failure: {err}");
        Error::transport(err.to_string())
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        debug!("Password grant rejected upstream: {status} {body}");
        return Err(Error::authorization(format!(
            "password grant failed with status {status}"
        )));
    }

    response.json::<GrantTokenResponse>().await.map_err(|err| {
        error!("Password grant returned undecodable payload: {err}");
        Error::authorization("password grant returned an invalid payload")
    })
}

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}
