//! Development bypass strategy.
//!
//! Only ever registered when the deployment explicitly opts in; production
//! registries never contain it, so there is no secret comparison to get past
//! there in the first place.

use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::auth::error::Error;
use crate::auth::password_grant::normalize_email;
use crate::auth::session::SessionRecord;
use crate::auth::users::UserDirectory;

const DEFAULT_DEV_EMAIL: &str = "hello@pordego.dev";

pub struct DevSecretStrategy {
    secret: SecretString,
}

impl DevSecretStrategy {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Log in from a `secret` form field, optionally suffixed with an email
    /// as `<secret>:<email>`.
    pub(crate) fn verify(
        &self,
        form: &std::collections::HashMap<String, String>,
        users: &dyn UserDirectory,
    ) -> Result<SessionRecord, Error> {
        let raw = form
            .get("secret")
            .map(String::as_str)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::authorization("secret is required"))?;

        let (secret, email) = match raw.split_once(':') {
            Some((secret, email)) if !email.is_empty() => (secret, normalize_email(email)),
            _ => (raw, DEFAULT_DEV_EMAIL.to_string()),
        };

        if secret != self.secret.expose_secret() {
            warn!("Dev login attempted with a wrong secret");
            return Err(Error::authorization("secret is incorrect"));
        }

        let user = users.create_or_login_with_dev_secret(&email)?;

        Ok(SessionRecord {
            user_id: user.id,
            created_at: chrono::Utc::now().timestamp(),
        })
    }
}
