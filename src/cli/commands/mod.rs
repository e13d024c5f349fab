use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("pordego")
        .about("Authentication gateway for the builder platform")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("PORDEGO_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("auth-secret")
                .long("auth-secret")
                .help("Shared secret for cookie signing and token verification")
                .env("PORDEGO_AUTH_SECRET")
                .required(true),
        )
        .arg(
            Arg::new("callback-origin")
                .long("callback-origin")
                .help("Origin OAuth providers redirect back to, example: https://apps.pordego.dev")
                .env("PORDEGO_CALLBACK_ORIGIN")
                .required(true),
        )
        .arg(
            Arg::new("cookie-version")
                .long("cookie-version")
                .help("Cookie name version, bump to invalidate every session after a secret rotation")
                .default_value("1")
                .env("PORDEGO_COOKIE_VERSION"),
        )
        .arg(
            Arg::new("insecure-cookies")
                .long("insecure-cookies")
                .help("Drop the Secure cookie attribute, only for plain-HTTP development")
                .env("PORDEGO_INSECURE_COOKIES")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("github-client-id")
                .long("github-client-id")
                .help("GitHub OAuth client id")
                .env("PORDEGO_GITHUB_CLIENT_ID")
                .requires("github-client-secret"),
        )
        .arg(
            Arg::new("github-client-secret")
                .long("github-client-secret")
                .help("GitHub OAuth client secret")
                .env("PORDEGO_GITHUB_CLIENT_SECRET")
                .requires("github-client-id"),
        )
        .arg(
            Arg::new("google-client-id")
                .long("google-client-id")
                .help("Google OAuth client id")
                .env("PORDEGO_GOOGLE_CLIENT_ID")
                .requires("google-client-secret"),
        )
        .arg(
            Arg::new("google-client-secret")
                .long("google-client-secret")
                .help("Google OAuth client secret")
                .env("PORDEGO_GOOGLE_CLIENT_SECRET")
                .requires("google-client-id"),
        )
        .arg(
            Arg::new("identity-api-url")
                .long("identity-api-url")
                .help("Base URL of the commerce identity API for the password grant")
                .env("PORDEGO_IDENTITY_API_URL"),
        )
        .arg(
            Arg::new("ws-client-id")
                .long("ws-client-id")
                .help("Workstation OAuth client id")
                .env("PORDEGO_WS_CLIENT_ID")
                .requires("ws-client-secret"),
        )
        .arg(
            Arg::new("ws-client-secret")
                .long("ws-client-secret")
                .help("Workstation OAuth client secret")
                .env("PORDEGO_WS_CLIENT_SECRET")
                .requires("ws-client-id"),
        )
        .arg(
            Arg::new("dev-secret")
                .long("dev-secret")
                .help("Enable the dev login bypass with this secret, never in production")
                .env("PORDEGO_DEV_SECRET"),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("PORDEGO_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "pordego");
        assert_eq!(
            command.get_about().unwrap().to_string(),
            "Authentication gateway for the builder platform"
        );
        assert_eq!(
            command.get_version().unwrap().to_string(),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn test_check_port_and_secret() {
        let command = new();
        let matches = command.get_matches_from(vec![
            "pordego",
            "--port",
            "8443",
            "--auth-secret",
            "super-secret",
            "--callback-origin",
            "https://apps.pordego.dev",
        ]);

        assert_eq!(matches.get_one::<u16>("port").map(|s| *s), Some(8443));
        assert_eq!(
            matches
                .get_one::<String>("auth-secret")
                .map(|s| s.to_string()),
            Some("super-secret".to_string())
        );
        assert_eq!(
            matches
                .get_one::<String>("callback-origin")
                .map(|s| s.to_string()),
            Some("https://apps.pordego.dev".to_string())
        );
        assert!(!matches.get_flag("insecure-cookies"));
    }

    #[test]
    fn test_provider_credentials_are_paired() {
        let command = new();
        let result = command.try_get_matches_from(vec![
            "pordego",
            "--auth-secret",
            "super-secret",
            "--callback-origin",
            "https://apps.pordego.dev",
            "--github-client-id",
            "gh",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("PORDEGO_AUTH_SECRET", Some("super-secret")),
                ("PORDEGO_CALLBACK_ORIGIN", Some("https://apps.pordego.dev")),
                ("PORDEGO_PORT", Some("443")),
                ("PORDEGO_GITHUB_CLIENT_ID", Some("gh")),
                ("PORDEGO_GITHUB_CLIENT_SECRET", Some("gh-secret")),
                ("PORDEGO_LOG_LEVEL", Some("info")),
            ],
            || {
                let command = new();
                let matches = command.get_matches_from(vec!["pordego"]);
                assert_eq!(matches.get_one::<u16>("port").map(|s| *s), Some(443));
                assert_eq!(
                    matches
                        .get_one::<String>("github-client-id")
                        .map(|s| s.to_string()),
                    Some("gh".to_string())
                );
                assert_eq!(matches.get_one::<u8>("verbosity").map(|s| *s), Some(2));
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        // loop cover all possible value_parse
        let levels = vec!["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars(
                [
                    ("PORDEGO_LOG_LEVEL", Some(level)),
                    ("PORDEGO_AUTH_SECRET", Some("super-secret")),
                    ("PORDEGO_CALLBACK_ORIGIN", Some("https://apps.pordego.dev")),
                ],
                || {
                    let command = new();
                    let matches = command.get_matches_from(vec!["pordego"]);
                    assert_eq!(
                        matches.get_one::<u8>("verbosity").map(|s| *s),
                        Some(index as u8)
                    );
                },
            );
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        // loop cover all possible value_parse
        let levels = vec!["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            temp_env::with_vars([("PORDEGO_LOG_LEVEL", None::<String>)], || {
                let mut args = vec![
                    "pordego".to_string(),
                    "--auth-secret".to_string(),
                    "super-secret".to_string(),
                    "--callback-origin".to_string(),
                    "https://apps.pordego.dev".to_string(),
                ];

                // Add the appropriate number of "-v" flags based on the index
                if index > 0 {
                    let v = format!("-{}", "v".repeat(index));
                    args.push(v);
                }

                let command = new();

                let matches = command.get_matches_from(args);

                assert_eq!(
                    matches.get_one::<u8>("verbosity").map(|s| *s),
                    Some(index as u8)
                );
            });
        }
    }
}
