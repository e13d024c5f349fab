//! Authorization Code + PKCE flow engine.
//!
//! The workstation flow runs against an authorization server whose endpoints
//! are recomputed from the request URL on every initiation: one relying-party
//! deployment serves many projects and environments, so nothing here is
//! static configuration. The in-flight exchange state travels as a signed,
//! time-boxed cookie bound to the browser session; there is no server-side
//! map an unrelated callback could satisfy.

use std::collections::HashMap;

use axum::http::{HeaderMap, HeaderValue};
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::auth::error::Error;
use crate::auth::origins::{origin_pair, parse_builder_url, OriginPair};
use crate::auth::pkce;
use crate::auth::session::{CookieStore, SessionRecord};
use crate::auth::token;
use crate::auth::users::UserDirectory;

/// How long an in-flight exchange may take before its state expires.
pub const STATE_TTL_SECONDS: i64 = 10 * 60;

/// Per-attempt PKCE exchange state, sealed into a short-lived cookie on
/// redirect and opened on callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExchangeState {
    pub state: String,
    pub code_verifier: String,
    pub project_id: Option<Uuid>,
    pub exp: i64,
}

/// Redirect produced at flow initiation.
#[derive(Debug)]
pub struct AuthorizationRedirect {
    pub location: String,
    pub state_cookie: HeaderValue,
}

/// How the client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// HTTP Basic. Used by the workstation flow: the exchange is a
    /// server-to-server call and must not ride on cookies.
    Basic,
    /// Credentials in the form body, the shape most public providers expect.
    Post,
}

/// Token endpoint response for the authorization-code exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenExchangeResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

pub(crate) fn build_authorize_url(
    authorize_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    code_challenge: &str,
    scopes: &[String],
) -> Result<Url, Error> {
    let mut url = Url::parse(authorize_endpoint).map_err(|err| {
        Error::configuration(format!("invalid authorization endpoint: {err}"))
    })?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", state)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("scope", &scopes.join(" "));
    Ok(url)
}

/// Exchange an authorization code plus verifier for tokens.
pub(crate) async fn exchange_code(
    http: &Client,
    token_endpoint: &str,
    client_id: &str,
    client_secret: &SecretString,
    redirect_uri: &str,
    code: &str,
    code_verifier: &str,
    auth: ClientAuth,
) -> Result<TokenExchangeResponse, Error> {
    let mut params = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("code_verifier", code_verifier),
    ];

    let request = http
        .post(token_endpoint)
        .header(reqwest::header::ACCEPT, "application/json");
    let request = match auth {
        ClientAuth::Basic => request
            .basic_auth(client_id, Some(client_secret.expose_secret()))
            .form(&params),
        ClientAuth::Post => {
            params.push(("client_id", client_id));
            params.push(("client_secret", client_secret.expose_secret()));
            request.form(&params)
        }
    };

    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        debug!("Token exchange rejected upstream: {status} {body}");
        return Err(Error::authorization(format!(
            "token exchange failed with status {status}"
        )));
    }

    response
        .json::<TokenExchangeResponse>()
        .await
        .map_err(|err| {
            debug!("Token exchange returned undecodable payload: {err}");
            Error::authorization("token exchange returned an invalid payload")
        })
}

/// Open and validate the exchange-state cookie against the callback query.
///
/// Returns the verified state; every failure is an authorization error with
/// a stable reason.
pub(crate) fn validate_callback(
    state_store: &CookieStore,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    now: i64,
) -> Result<(ExchangeState, String), Error> {
    let stored: ExchangeState = state_store
        .open(headers)
        .ok_or_else(|| Error::authorization("missing or expired login state"))?;
    if stored.exp <= now {
        return Err(Error::authorization("missing or expired login state"));
    }

    let returned_state = query
        .get("state")
        .ok_or_else(|| Error::authorization("missing state parameter"))?;
    if *returned_state != stored.state {
        return Err(Error::authorization("state mismatch"));
    }

    let code = query
        .get("code")
        .ok_or_else(|| Error::authorization("missing authorization code"))?
        .clone();

    Ok((stored, code))
}

/// Workstation-to-project strategy: Authorization Code + PKCE against the
/// authorization server implied by the builder URL, producing a session only
/// after the returned token proves scope to this exact project.
pub struct WorkstationStrategy {
    client_id: String,
    client_secret: SecretString,
    token_secret: Vec<u8>,
    state_store: CookieStore,
}

impl WorkstationStrategy {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: SecretString,
        token_secret: &[u8],
        cookie_version: &str,
        secure: bool,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            token_secret: token_secret.to_vec(),
            state_store: CookieStore::new(
                "ws_state",
                cookie_version,
                token_secret,
                STATE_TTL_SECONDS,
                secure,
            ),
        }
    }

    /// INITIATED → REDIRECTED: resolve origins, refuse colocated ones,
    /// generate the exchange state, and build the authorization redirect.
    pub fn initiate(&self, request_url: &Url) -> Result<AuthorizationRedirect, Error> {
        let OriginPair {
            request_origin: origin,
            authorization_server_origin: auth_origin,
        } = origin_pair(request_url)?;
        if origin == auth_origin {
            return Err(Error::configuration(
                "request origin and authorization server origin cannot be the same",
            ));
        }

        let project_id = parse_builder_url(request_url)
            .project_id
            .ok_or_else(|| Error::configuration("builder URL does not address a project"))?;

        let state = pkce::generate_state()?;
        let code_verifier = pkce::generate_code_verifier()?;
        let code_challenge = pkce::code_challenge(&code_verifier);

        let authorize_url = build_authorize_url(
            &format!("{auth_origin}/oauth/ws/authorize"),
            &self.client_id,
            &format!("{origin}/auth/ws/callback"),
            &state,
            &code_challenge,
            &[format!("project:{project_id}")],
        )?;

        let exchange = ExchangeState {
            state,
            code_verifier,
            project_id: Some(project_id),
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

    /// CALLBACK_RECEIVED → TOKEN_EXCHANGED → VERIFIED.
    pub async fn verify(
        &self,
        request_url: &Url,
        headers: &HeaderMap,
        query: &HashMap<String, String>,
        http: &Client,
        users: &dyn UserDirectory,
    ) -> Result<SessionRecord, Error> {
        let now = Utc::now().timestamp();
        let (stored, code) = validate_callback(&self.state_store, headers, query, now)?;

        let OriginPair {
            request_origin: origin,
            authorization_server_origin: auth_origin,
        } = origin_pair(request_url)?;
        if origin == auth_origin {
            return Err(Error::configuration(
                "request origin and authorization server origin cannot be the same",
            ));
        }

        // The state was sealed for one project; a callback arriving on a
        // different builder URL fails before any network exchange.
        let project_id = parse_builder_url(request_url)
            .project_id
            .ok_or_else(|| Error::configuration("builder URL does not address a project"))?;
        if stored.project_id != Some(project_id) {
            return Err(Error::authorization(
                "login state does not match this project",
            ));
        }

        let tokens = exchange_code(
            http,
            &format!("{auth_origin}/oauth/ws/token"),
            &self.client_id,
            &self.client_secret,
            &format!("{origin}/auth/ws/callback"),
            &code,
            &stored.code_verifier,
            ClientAuth::Basic,
        )
        .await?;

        let access_token = tokens
            .access_token
            .ok_or_else(|| Error::authorization("no access token received"))?;

        token::validate_for_request(&access_token, &self.token_secret, request_url, users)
    }

    #[must_use]
    pub fn state_store(&self) -> &CookieStore {
        &self.state_store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::users::MemoryDirectory;
    use axum::http::header::COOKIE;

    const SECRET: &[u8] = b"flow-test-secret";

    fn strategy() -> WorkstationStrategy {
        WorkstationStrategy::new(
            "ws-client",
            SecretString::from("ws-secret".to_string()),
            SECRET,
            "1",
            false,
        )
    }

    fn project_url(project_id: Uuid) -> Url {
        format!("https://p-{project_id}.apps.pordego.dev/auth/ws")
            .parse()
            .expect("url")
    }

    fn headers_for(cookie: &HeaderValue) -> HeaderMap {
        let raw = cookie.to_str().expect("ascii");
        let pair = raw.split(';').next().expect("pair");
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(pair).expect("header"));
        headers
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn sealed_state(store: &CookieStore, exchange: &ExchangeState) -> HeaderMap {
        headers_for(&store.seal(exchange).expect("seal"))
    }

    #[test]
    fn initiate_builds_a_scoped_redirect() {
        let project_id = Uuid::new_v4();
        let redirect = strategy()
            .initiate(&project_url(project_id))
            .expect("redirect");

        let url: Url = redirect.location.parse().expect("location");
        assert_eq!(
            url.origin().ascii_serialization(),
            "https://apps.pordego.dev"
        );
        assert_eq!(url.path(), "/oauth/ws/authorize");

        let pairs: HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs.get("response_type").map(String::as_str), Some("code"));
        assert_eq!(pairs.get("client_id").map(String::as_str), Some("ws-client"));
        assert_eq!(
            pairs.get("code_challenge_method").map(String::as_str),
            Some("S256")
        );
        assert_eq!(
            pairs.get("scope").cloned(),
            Some(format!("project:{project_id}"))
        );
        assert_eq!(
            pairs.get("redirect_uri").cloned(),
            Some(format!(
                "https://p-{project_id}.apps.pordego.dev/auth/ws/callback"
            ))
        );
        assert!(pairs.get("state").is_some_and(|s| !s.is_empty()));
        assert!(pairs.get("code_challenge").is_some_and(|c| !c.is_empty()));
    }

    #[test]
    fn initiate_refuses_colocated_origins() {
        let url: Url = "https://apps.pordego.dev/auth/ws".parse().expect("url");
        let err = strategy().initiate(&url).expect_err("colocated");
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn challenge_in_redirect_matches_sealed_verifier() {
        let strategy = strategy();
        let redirect = strategy
            .initiate(&project_url(Uuid::new_v4()))
            .expect("redirect");

        let headers = headers_for(&redirect.state_cookie);
        let stored: ExchangeState = strategy.state_store().open(&headers).expect("state");

        let url: Url = redirect.location.parse().expect("location");
        let challenge = url
            .query_pairs()
            .find(|(k, _)| k == "code_challenge")
            .map(|(_, v)| v.into_owned())
            .expect("challenge");
        assert_eq!(challenge, pkce::code_challenge(&stored.code_verifier));
    }

    #[test]
    fn callback_with_wrong_state_fails() {
        let strategy = strategy();
        let exchange = ExchangeState {
            state: "expected".to_string(),
            code_verifier: "verifier".to_string(),
            project_id: Some(Uuid::new_v4()),
            exp: Utc::now().timestamp() + 60,
        };
        let headers = sealed_state(strategy.state_store(), &exchange);

        let err = validate_callback(
            strategy.state_store(),
            &headers,
            &query(&[("state", "forged"), ("code", "abc")]),
            Utc::now().timestamp(),
        )
        .expect_err("mismatch");
        assert_eq!(err.to_string(), "state mismatch");
    }

    #[test]
    fn callback_without_state_cookie_fails() {
        let strategy = strategy();
        let err = validate_callback(
            strategy.state_store(),
            &HeaderMap::new(),
            &query(&[("state", "s"), ("code", "abc")]),
            Utc::now().timestamp(),
        )
        .expect_err("no cookie");
        assert_eq!(err.to_string(), "missing or expired login state");
    }

    #[test]
    fn expired_exchange_state_fails() {
        let strategy = strategy();
        let exchange = ExchangeState {
            state: "s".to_string(),
            code_verifier: "verifier".to_string(),
            project_id: Some(Uuid::new_v4()),
            exp: Utc::now().timestamp() - 1,
        };
        let headers = sealed_state(strategy.state_store(), &exchange);

        let err = validate_callback(
            strategy.state_store(),
            &headers,
            &query(&[("state", "s"), ("code", "abc")]),
            Utc::now().timestamp(),
        )
        .expect_err("expired");
        assert_eq!(err.to_string(), "missing or expired login state");
    }

    #[test]
    fn valid_callback_yields_state_and_code() {
        let strategy = strategy();
        let exchange = ExchangeState {
            state: "s".to_string(),
            code_verifier: "verifier".to_string(),
            project_id: Some(Uuid::new_v4()),
            exp: Utc::now().timestamp() + 60,
        };
        let headers = sealed_state(strategy.state_store(), &exchange);

        let (stored, code) = validate_callback(
            strategy.state_store(),
            &headers,
            &query(&[("state", "s"), ("code", "abc")]),
            Utc::now().timestamp(),
        )
        .expect("valid");
        assert_eq!(stored, exchange);
        assert_eq!(code, "abc");
    }

    #[tokio::test]
    async fn callback_on_another_project_fails_before_exchange() {
        let strategy = strategy();
        let exchange = ExchangeState {
            state: "s".to_string(),
            code_verifier: "verifier".to_string(),
            project_id: Some(Uuid::new_v4()),
            exp: Utc::now().timestamp() + 60,
        };
        let headers = sealed_state(strategy.state_store(), &exchange);
        // Valid state cookie, but the callback lands on a different project.
        let url: Url = format!(
            "https://p-{}.apps.pordego.dev/auth/ws/callback",
            Uuid::new_v4()
        )
        .parse()
        .expect("url");

        let directory = MemoryDirectory::new();
        let http = Client::builder()
            .timeout(std::time::Duration::from_millis(200))
            .build()
            .expect("client");
        let err = strategy
            .verify(
                &url,
                &headers,
                &query(&[("state", "s"), ("code", "abc")]),
                &http,
                &directory,
            )
            .await
            .expect_err("replayed");
        assert_eq!(err.to_string(), "login state does not match this project");
    }

    #[tokio::test]
    async fn verify_refuses_colocated_origins_before_exchange() {
        let strategy = strategy();
        let exchange = ExchangeState {
            state: "s".to_string(),
            code_verifier: "verifier".to_string(),
            project_id: Some(Uuid::new_v4()),
            exp: Utc::now().timestamp() + 60,
        };
        let headers = sealed_state(strategy.state_store(), &exchange);
        let url: Url = "https://apps.pordego.dev/auth/ws/callback".parse().expect("url");

        let directory = MemoryDirectory::new();
        let http = Client::builder()
            .timeout(std::time::Duration::from_millis(200))
            .build()
            .expect("client");
        let err = strategy
            .verify(
                &url,
                &headers,
                &query(&[("state", "s"), ("code", "abc")]),
                &http,
                &directory,
            )
            .await
            .expect_err("colocated");
        assert!(matches!(err, Error::Configuration(_)));
    }
}
