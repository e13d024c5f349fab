//! Authentication core: strategy registries, cookie sessions, and the
//! project-scoped token machinery behind them.
//!
//! Two registries run side by side. The user registry signs people into the
//! platform itself (OAuth providers, the commerce password grant, the
//! opt-in dev bypass). The builder registry signs workstations into a single
//! project addressed by its builder URL. Which registry handles a request is
//! decided per request from the URL, never from static configuration.

pub mod dev;
pub mod error;
pub mod flow;
pub mod guard;
pub mod origins;
pub mod password_grant;
pub mod pkce;
pub mod provider;
pub mod session;
pub mod token;
pub mod users;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, header::InvalidHeaderValue};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};
use url::Url;

pub use error::Error;
pub use flow::{AuthorizationRedirect, WorkstationStrategy};
pub use session::{CookieStore, ExternalTokenRecord, SessionRecord, SessionStores};
pub use users::{MemoryDirectory, OAuthProfile, User, UserDirectory};

use dev::DevSecretStrategy;
use password_grant::PasswordGrantStrategy;
use provider::{OAuthProviderStrategy, ProviderEndpoints};

/// Everything a strategy may need from the incoming request, already
/// normalized: absolute URL, headers, decoded form body, parsed query.
pub struct AuthRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub form: HashMap<String, String>,
    pub query: HashMap<String, String>,
}

impl AuthRequest {
    #[must_use]
    pub fn new(url: Url, headers: HeaderMap, form: HashMap<String, String>) -> Self {
        let query = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self {
            url,
            headers,
            form,
            query,
        }
    }
}

/// What a successful verification hands back to the registry.
pub struct StrategyOutcome {
    pub session: SessionRecord,
    pub external_token: Option<ExternalTokenRecord>,
}

/// One registered authentication strategy.
pub enum Strategy {
    OAuthProvider(OAuthProviderStrategy),
    PasswordGrant(PasswordGrantStrategy),
    Workstation(WorkstationStrategy),
    DevSecret(DevSecretStrategy),
}

impl Strategy {
    /// INITIATED → REDIRECTED for redirect-based strategies. Form-based
    /// strategies have nothing to redirect to.
    pub fn initiate(&self, request: &AuthRequest) -> Result<AuthorizationRedirect, Error> {
        match self {
            Self::OAuthProvider(strategy) => strategy.initiate(),
            Self::Workstation(strategy) => strategy.initiate(&request.url),
            Self::PasswordGrant(_) | Self::DevSecret(_) => Err(Error::configuration(
                "strategy does not support redirect initiation",
            )),
        }
    }

    /// Verify a callback or a submitted credential form.
    pub async fn verify(
        &self,
        request: &AuthRequest,
        http: &Client,
        users: &dyn UserDirectory,
    ) -> Result<StrategyOutcome, Error> {
        match self {
            Self::OAuthProvider(strategy) => {
                let session = strategy
                    .verify(&request.headers, &request.query, http, users)
                    .await?;
                Ok(StrategyOutcome {
                    session,
                    external_token: None,
                })
            }
            Self::PasswordGrant(strategy) => {
                let (session, record) = strategy.verify(&request.form, http, users).await?;
                Ok(StrategyOutcome {
                    session,
                    external_token: Some(record),
                })
            }
            Self::Workstation(strategy) => {
                let session = strategy
                    .verify(&request.url, &request.headers, &request.query, http, users)
                    .await?;
                Ok(StrategyOutcome {
                    session,
                    external_token: None,
                })
            }
            Self::DevSecret(strategy) => {
                let session = strategy.verify(&request.form, users)?;
                Ok(StrategyOutcome {
                    session,
                    external_token: None,
                })
            }
        }
    }

    fn state_store(&self) -> Option<&CookieStore> {
        match self {
            Self::OAuthProvider(strategy) => Some(strategy.state_store()),
            Self::Workstation(strategy) => Some(strategy.state_store()),
            Self::PasswordGrant(_) | Self::DevSecret(_) => None,
        }
    }
}

/// A completed login: the session record plus every `Set-Cookie` value the
/// response must carry.
pub struct CompletedLogin {
    pub session: SessionRecord,
    pub cookies: Vec<HeaderValue>,
}

/// A registry of strategies bound to one session cookie.
pub struct Authenticator {
    label: &'static str,
    session_store: CookieStore,
    external_store: CookieStore,
    strategies: HashMap<String, Strategy>,
}

impl Authenticator {
    #[must_use]
    pub fn new(
        label: &'static str,
        session_store: CookieStore,
        external_store: CookieStore,
    ) -> Self {
        Self {
            label,
            session_store,
            external_store,
            strategies: HashMap::new(),
        }
    }

    /// Register a strategy under a name; names are unique per registry.
    pub fn register(&mut self, name: impl Into<String>, strategy: Strategy) -> Result<(), Error> {
        let name = name.into();
        if self.strategies.contains_key(&name) {
            return Err(Error::configuration(format!(
                "strategy {name} registered twice in the {} registry",
                self.label
            )));
        }
        self.strategies.insert(name, strategy);
        Ok(())
    }

    #[must_use]
    pub fn has_strategy(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    fn strategy(&self, name: &str) -> Result<&Strategy, Error> {
        self.strategies
            .get(name)
            .ok_or_else(|| Error::configuration(format!("unknown strategy: {name}")))
    }

    /// Start a redirect-based login with the named strategy.
    #[instrument(skip(self, request), fields(registry = self.label))]
    pub fn initiate(
        &self,
        name: &str,
        request: &AuthRequest,
    ) -> Result<AuthorizationRedirect, Error> {
        debug!("Initiating login");
        self.strategy(name)?.initiate(request)
    }

    /// Complete a login with the named strategy and seal the session.
    ///
    /// Seals the registry's session cookie, the external-token cookie when
    /// the strategy produced one, and clears any in-flight state cookie.
    #[instrument(skip(self, request, http, users), fields(registry = self.label))]
    pub async fn verify(
        &self,
        name: &str,
        request: &AuthRequest,
        http: &Client,
        users: &dyn UserDirectory,
    ) -> Result<CompletedLogin, Error> {
        let strategy = self.strategy(name)?;
        let outcome = strategy.verify(request, http, users).await?;

        let mut cookies = vec![seal_cookie(&self.session_store, &outcome.session)?];
        if let Some(record) = &outcome.external_token {
            cookies.push(seal_cookie(&self.external_store, record)?);
        }
        if let Some(store) = strategy.state_store() {
            cookies.push(clear_cookie(store)?);
        }

        debug!(user_id = %outcome.session.user_id, "Login verified");
        Ok(CompletedLogin {
            session: outcome.session,
            cookies,
        })
    }

    /// Read this registry's session from request headers, if present and
    /// untampered.
    #[must_use]
    pub fn session_from(&self, headers: &HeaderMap) -> Option<SessionRecord> {
        self.session_store.open(headers)
    }

    /// `Set-Cookie` values expiring the session, the external token, and
    /// every strategy's state cookie.
    pub fn logout_cookies(&self) -> Result<Vec<HeaderValue>, Error> {
        let mut cookies = vec![
            clear_cookie(&self.session_store)?,
            clear_cookie(&self.external_store)?,
        ];
        for strategy in self.strategies.values() {
            if let Some(store) = strategy.state_store() {
                cookies.push(clear_cookie(store)?);
            }
        }
        Ok(cookies)
    }
}

fn seal_cookie<T: serde::Serialize>(store: &CookieStore, value: &T) -> Result<HeaderValue, Error> {
    store
        .seal(value)
        .map_err(|err| Error::configuration(format!("failed to seal cookie: {err}")))
}

fn clear_cookie(store: &CookieStore) -> Result<HeaderValue, Error> {
    store
        .clear()
        .map_err(|err: InvalidHeaderValue| Error::configuration(format!("invalid cookie: {err}")))
}

/// OAuth client credentials for one provider.
#[derive(Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

/// Deployment configuration for the authentication core.
#[derive(Clone)]
pub struct AuthConfig {
    auth_secret: SecretString,
    cookie_version: String,
    secure_cookies: bool,
    callback_origin: String,
    github: Option<ProviderCredentials>,
    google: Option<ProviderCredentials>,
    identity_api_url: Option<String>,
    ws_credentials: Option<ProviderCredentials>,
    dev_secret: Option<SecretString>,
    http_timeout_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(auth_secret: SecretString, callback_origin: impl Into<String>) -> Self {
        Self {
            auth_secret,
            cookie_version: "1".to_string(),
            secure_cookies: true,
            callback_origin: callback_origin.into(),
            github: None,
            google: None,
            identity_api_url: None,
            ws_credentials: None,
            dev_secret: None,
            http_timeout_seconds: 10,
        }
    }

    #[must_use]
    pub fn with_cookie_version(mut self, version: impl Into<String>) -> Self {
        self.cookie_version = version.into();
        self
    }

    #[must_use]
    pub const fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_github(mut self, credentials: ProviderCredentials) -> Self {
        self.github = Some(credentials);
        self
    }

    #[must_use]
    pub fn with_google(mut self, credentials: ProviderCredentials) -> Self {
        self.google = Some(credentials);
        self
    }

    #[must_use]
    pub fn with_identity_api_url(mut self, url: impl Into<String>) -> Self {
        self.identity_api_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_workstation(mut self, credentials: ProviderCredentials) -> Self {
        self.ws_credentials = Some(credentials);
        self
    }

    /// Enable the dev bypass. Never set this in production.
    #[must_use]
    pub fn with_dev_secret(mut self, secret: SecretString) -> Self {
        self.dev_secret = Some(secret);
        self
    }

    #[must_use]
    pub const fn with_http_timeout_seconds(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("auth_secret", &"[redacted]")
            .field("cookie_version", &self.cookie_version)
            .field("secure_cookies", &self.secure_cookies)
            .field("callback_origin", &self.callback_origin)
            .field("github", &self.github.is_some())
            .field("google", &self.google.is_some())
            .field("identity_api_url", &self.identity_api_url)
            .field("workstation", &self.ws_credentials.is_some())
            .field("dev_login", &self.dev_secret.is_some())
            .field("http_timeout_seconds", &self.http_timeout_seconds)
            .finish()
    }
}

/// The wired authentication core shared by every request handler.
#[derive(Clone)]
pub struct AuthKit {
    inner: Arc<AuthKitInner>,
}

struct AuthKitInner {
    user: Authenticator,
    builder: Authenticator,
    stores: SessionStores,
    users: Arc<dyn UserDirectory>,
    http: Client,
    secure_cookies: bool,
}

impl AuthKit {
    #[must_use]
    pub fn user(&self) -> &Authenticator {
        &self.inner.user
    }

    #[must_use]
    pub fn builder(&self) -> &Authenticator {
        &self.inner.builder
    }

    /// The cookie store set, exposed so downstream consumers can seal and
    /// open records outside the login handlers.
    #[must_use]
    pub fn stores(&self) -> &SessionStores {
        &self.inner.stores
    }

    #[must_use]
    pub fn users(&self) -> &dyn UserDirectory {
        self.inner.users.as_ref()
    }

    #[must_use]
    pub fn http(&self) -> &Client {
        &self.inner.http
    }

    /// Whether the deployment serves over TLS; drives both cookie attributes
    /// and absolute URL reconstruction.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.inner.secure_cookies
    }

    /// Pick the registry for a request: builder URLs get the builder
    /// registry, everything else the user registry.
    #[must_use]
    pub fn registry_for(&self, url: &Url) -> &Authenticator {
        if origins::parse_builder_url(url).project_id.is_some() {
            &self.inner.builder
        } else {
            &self.inner.user
        }
    }

    /// Read the commerce token riding the request, but only when it belongs
    /// to the user behind the authenticated session. Outbound calls to the
    /// commerce API authenticate with this.
    #[must_use]
    pub fn external_token_from(&self, headers: &HeaderMap, url: &Url) -> Option<String> {
        let session = self.registry_for(url).session_from(headers)?;
        self.inner
            .stores
            .external_token_for_user(headers, session.user_id)
    }

    /// Resolve the authenticated user behind a request, if any. Session
    /// absence and lookup failures both read as anonymous.
    #[must_use]
    pub fn find_authenticated_user(&self, headers: &HeaderMap, url: &Url) -> Option<User> {
        let session = self.registry_for(url).session_from(headers)?;
        match self.inner.users.get_user_by_id(session.user_id) {
            Ok(user) => user,
            Err(err) => {
                debug!("User lookup failed: {err}");
                None
            }
        }
    }
}

/// Wire both registries from deployment configuration.
///
/// Each strategy appears only when its credentials are configured; the dev
/// bypass in particular is absent, not disabled, without its secret.
pub fn build_kit(config: &AuthConfig, users: Arc<dyn UserDirectory>) -> Result<AuthKit, Error> {
    let secret = config.auth_secret.expose_secret().as_bytes().to_vec();
    let stores = SessionStores::new(&secret, &config.cookie_version, config.secure_cookies);

    let http = Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_seconds))
        .user_agent(crate::APP_USER_AGENT)
        .build()
        .map_err(|err| Error::configuration(format!("failed to build HTTP client: {err}")))?;

    let mut user = Authenticator::new("user", stores.primary.clone(), stores.external.clone());
    if let Some(credentials) = &config.github {
        user.register(
            "github",
            Strategy::OAuthProvider(OAuthProviderStrategy::new(
                "github",
                credentials.client_id.clone(),
                credentials.client_secret.clone(),
                ProviderEndpoints::github(),
                config.callback_origin.clone(),
                vec!["read:user".to_string(), "user:email".to_string()],
                &secret,
                &config.cookie_version,
                config.secure_cookies,
            )),
        )?;
    }
    if let Some(credentials) = &config.google {
        user.register(
            "google",
            Strategy::OAuthProvider(OAuthProviderStrategy::new(
                "google",
                credentials.client_id.clone(),
                credentials.client_secret.clone(),
                ProviderEndpoints::google(),
                config.callback_origin.clone(),
                vec![
                    "openid".to_string(),
                    "email".to_string(),
                    "profile".to_string(),
                ],
                &secret,
                &config.cookie_version,
                config.secure_cookies,
            )),
        )?;
    }
    if let Some(api_url) = &config.identity_api_url {
        user.register(
            "commerce",
            Strategy::PasswordGrant(PasswordGrantStrategy::new(api_url.clone())),
        )?;
    }
    if let Some(dev_secret) = &config.dev_secret {
        user.register(
            "dev",
            Strategy::DevSecret(DevSecretStrategy::new(dev_secret.clone())),
        )?;
    }

    let mut builder =
        Authenticator::new("builder", stores.builder.clone(), stores.external.clone());
    if let Some(credentials) = &config.ws_credentials {
        builder.register(
            "ws",
            Strategy::Workstation(WorkstationStrategy::new(
                credentials.client_id.clone(),
                credentials.client_secret.clone(),
                &secret,
                &config.cookie_version,
                config.secure_cookies,
            )),
        )?;
    }
    if let Some(api_url) = &config.identity_api_url {
        builder.register(
            "commerce",
            Strategy::PasswordGrant(PasswordGrantStrategy::new(api_url.clone())),
        )?;
    }

    Ok(AuthKit {
        inner: Arc::new(AuthKitInner {
            user,
            builder,
            stores,
            users,
            http,
            secure_cookies: config.secure_cookies,
        }),
    })
}
