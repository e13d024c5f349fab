//! GitHub/Google-shaped OAuth2 provider strategies.
//!
//! Providers differ only in their endpoints, scopes, and userinfo payload
//! shape; the dance itself is the shared authorization-code machinery from
//! [`crate::auth::flow`], with PKCE enabled for every provider.

use std::collections::HashMap;

use axum::http::HeaderMap;
use chrono::Utc;
use reqwest::Client;
use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use crate::auth::error::Error;
use crate::auth::flow::{
    AuthorizationRedirect, ClientAuth, ExchangeState, STATE_TTL_SECONDS, build_authorize_url,
    exchange_code, validate_callback,
};
use crate::auth::pkce;
use crate::auth::session::{CookieStore, SessionRecord};
use crate::auth::users::{OAuthProfile, UserDirectory};

/// Static endpoints of a public OAuth provider.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub authorize: String,
    pub token: String,
    pub userinfo: String,
}

impl ProviderEndpoints {
    #[must_use]
    pub fn github() -> Self {
        Self {
            authorize: "https://github.com/login/oauth/authorize".to_string(),
            token: "https://github.com/login/oauth/access_token".to_string(),
            userinfo: "https://api.github.com/user".to_string(),
        }
    }

    #[must_use]
    pub fn google() -> Self {
        Self {
            authorize: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token: "https://oauth2.googleapis.com/token".to_string(),
            userinfo: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
        }
    }
}

pub struct OAuthProviderStrategy {
    provider: String,
    client_id: String,
    client_secret: SecretString,
    endpoints: ProviderEndpoints,
    callback_origin: String,
    scopes: Vec<String>,
    state_store: CookieStore,
}

impl OAuthProviderStrategy {
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        endpoints: ProviderEndpoints,
        callback_origin: impl Into<String>,
        scopes: Vec<String>,
        cookie_secret: &[u8],
        cookie_version: &str,
        secure: bool,
    ) -> Self {
        let provider = provider.into();
        let state_store = CookieStore::new(
            &format!("{provider}_state"),
            cookie_version,
            cookie_secret,
            STATE_TTL_SECONDS,
            secure,
        );
        Self {
            provider,
            client_id: client_id.into(),
            client_secret,
            endpoints,
            callback_origin: callback_origin.into(),
            scopes,
            state_store,
        }
    }

    fn callback_url(&self) -> String {
        format!(
            "{}/auth/{}/callback",
            self.callback_origin.trim_end_matches('/'),
            self.provider
        )
    }

    pub(crate) fn initiate(&self) -> Result<AuthorizationRedirect, Error> {
        let state = pkce::generate_state()?;
        let code_verifier = pkce::generate_code_verifier()?;
        let code_challenge = pkce::code_challenge(&code_verifier);

        let authorize_url = build_authorize_url(
            &self.endpoints.authorize,
            &self.client_id,
            &self.callback_url(),
            &state,
            &code_challenge,
            &self.scopes,
        )?;

        let exchange = ExchangeState {
            state,
            code_verifier,
            project_id: None,
            exp: Utc::now().timestamp() + STATE_TTL_SECONDS,
        };
        let state_cookie = self
            .state_store
            .seal(&exchange)
            .map_err(|err| Error::configuration(format!("failed to seal exchange state: {err}")))?;

        Ok(AuthorizationRedirect {
            location: authorize_url.into(),
            state_cookie,
        })
    }

    pub(crate) async fn verify(
        &self,
        headers: &HeaderMap,
        query: &HashMap<String, String>,
        http: &Client,
        users: &dyn UserDirectory,
    ) -> Result<SessionRecord, Error> {
        let now = Utc::now().timestamp();
        let (stored, code) = validate_callback(&self.state_store, headers, query, now)?;

        let tokens = exchange_code(
            http,
            &self.endpoints.token,
            &self.client_id,
            &self.client_secret,
            &self.callback_url(),
            &code,
            &stored.code_verifier,
            ClientAuth::Post,
        )
        .await?;

        let access_token = tokens
            .access_token
            .ok_or_else(|| Error::authorization("no access token received"))?;

        let userinfo = http
            .get(&self.endpoints.userinfo)
            .bearer_auth(&access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = userinfo.status();
        if !status.is_success() {
            debug!("Userinfo rejected upstream: {status}");
            return Err(Error::authorization(format!(
                "userinfo request failed with status {status}"
            )));
        }
        let payload = userinfo
            .json::<Value>()
            .await
            .map_err(|err| Error::authorization(format!("invalid userinfo payload: {err}")))?;

        let profile = profile_from_userinfo(&self.provider, &payload)?;
        let user = users.create_or_login_with_oauth(&profile)?;

        Ok(SessionRecord {
            user_id: user.id,
            created_at: now,
        })
    }

    #[must_use]
    pub fn state_store(&self) -> &CookieStore {
        &self.state_store
    }
}

/// Normalize a provider userinfo payload into an [`OAuthProfile`].
///
/// Google-shaped payloads carry `sub`/`email`/`name`; GitHub-shaped ones use
/// a numeric `id` and `login`.
pub(crate) fn profile_from_userinfo(provider: &str, payload: &Value) -> Result<OAuthProfile, Error> {
    let subject = payload
        .get("sub")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .or_else(|| payload.get("id").map(Value::to_string))
        .ok_or_else(|| Error::authorization("provider profile is missing a subject"))?;

    let email = payload
        .get("email")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| Error::authorization("provider profile is missing an email"))?;

    let display_name = payload
        .get("name")
        .or_else(|| payload.get("login"))
        .and_then(Value::as_str)
        .map(ToString::to_string);

    Ok(OAuthProfile {
        provider: provider.to_string(),
        subject,
        email,
        display_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;

    fn strategy() -> OAuthProviderStrategy {
        OAuthProviderStrategy::new(
            "github",
            "gh-client",
            SecretString::from("gh-secret".to_string()),
            ProviderEndpoints::github(),
            "https://apps.pordego.dev",
            vec!["read:user".to_string(), "user:email".to_string()],
            b"provider-test-secret",
            "1",
            false,
        )
    }

    #[test]
    fn initiate_targets_the_provider_with_pkce() {
        let redirect = strategy().initiate().expect("redirect");
        let url: Url = redirect.location.parse().expect("location");
        assert_eq!(url.host_str(), Some("github.com"));

        let pairs: std::collections::HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs.get("redirect_uri").map(String::as_str),
            Some("https://apps.pordego.dev/auth/github/callback")
        );
        assert_eq!(
            pairs.get("code_challenge_method").map(String::as_str),
            Some("S256")
        );
        assert_eq!(
            pairs.get("scope").map(String::as_str),
            Some("read:user user:email")
        );
    }

    #[test]
    fn github_payload_normalizes_to_a_profile() {
        let payload = json!({
            "id": 583231,
            "login": "octocat",
            "email": "octo@github.example"
        });
        let profile = profile_from_userinfo("github", &payload).expect("profile");
        assert_eq!(profile.subject, "583231");
        assert_eq!(profile.email, "octo@github.example");
        assert_eq!(profile.display_name.as_deref(), Some("octocat"));
    }

    #[test]
    fn google_payload_normalizes_to_a_profile() {
        let payload = json!({
            "sub": "10769150350006150715113082367",
            "email": "jane@gmail.example",
            "name": "Jane Doe"
        });
        let profile = profile_from_userinfo("google", &payload).expect("profile");
        assert_eq!(profile.subject, "10769150350006150715113082367");
        assert_eq!(profile.display_name.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn payload_without_email_is_rejected() {
        let payload = json!({ "id": 1, "login": "octocat" });
        let err = profile_from_userinfo("github", &payload).expect_err("no email");
        assert_eq!(err.to_string(), "provider profile is missing an email");
    }

    #[test]
    fn payload_without_subject_is_rejected() {
        let payload = json!({ "email": "a@b.co" });
        let err = profile_from_userinfo("github", &payload).expect_err("no subject");
        assert_eq!(err.to_string(), "provider profile is missing a subject");
    }
}
