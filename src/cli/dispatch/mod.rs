use crate::auth::{AuthConfig, ProviderCredentials};
use crate::cli::actions::Action;
use anyhow::{Context, Result};
use secrecy::SecretString;

fn credentials(
    matches: &clap::ArgMatches,
    id_arg: &str,
    secret_arg: &str,
) -> Option<ProviderCredentials> {
    let client_id = matches.get_one::<String>(id_arg)?;
    let client_secret = matches.get_one::<String>(secret_arg)?;
    Some(ProviderCredentials {
        client_id: client_id.clone(),
        client_secret: SecretString::from(client_secret.clone()),
    })
}

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let auth_secret = matches
        .get_one::<String>("auth-secret")
        .context("missing required argument: --auth-secret")?;
    let callback_origin = matches
        .get_one::<String>("callback-origin")
        .context("missing required argument: --callback-origin")?;

    let mut config = AuthConfig::new(
        SecretString::from(auth_secret.clone()),
        callback_origin.clone(),
    )
    .with_secure_cookies(!matches.get_flag("insecure-cookies"));

    if let Some(version) = matches.get_one::<String>("cookie-version") {
        config = config.with_cookie_version(version.clone());
    }
    if let Some(credentials) = credentials(matches, "github-client-id", "github-client-secret") {
        config = config.with_github(credentials);
    }
    if let Some(credentials) = credentials(matches, "google-client-id", "google-client-secret") {
        config = config.with_google(credentials);
    }
    if let Some(url) = matches.get_one::<String>("identity-api-url") {
        config = config.with_identity_api_url(url.clone());
    }
    if let Some(credentials) = credentials(matches, "ws-client-id", "ws-client-secret") {
        config = config.with_workstation(credentials);
    }
    if let Some(secret) = matches.get_one::<String>("dev-secret") {
        config = config.with_dev_secret(SecretString::from(secret.clone()));
    }

    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn handler_builds_a_server_action() {
        let matches = commands::new().get_matches_from(vec![
            "pordego",
            "--port",
            "9000",
            "--auth-secret",
            "super-secret",
            "--callback-origin",
            "https://apps.pordego.dev",
            "--dev-secret",
            "letmein",
            "--insecure-cookies",
        ]);

        let Action::Server { port, config } = handler(&matches).expect("action");
        assert_eq!(port, 9000);
        let rendered = format!("{config:?}");
        assert!(rendered.contains("dev_login: true"));
        assert!(rendered.contains("secure_cookies: false"));
        assert!(!rendered.contains("super-secret"));
    }
}
