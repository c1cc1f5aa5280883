//! Configuration types, built from environment variables.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default number of unread messages shown in a snapshot.
pub const DEFAULT_FETCH_LIMIT: usize = 10;

/// Mail store + relay configuration.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// The single mailbox this assistant looks at.
    pub mailbox: String,
    pub fetch_limit: usize,
    /// Bound on session open + fetch batch, and the socket read/write timeout.
    pub timeout: Duration,
}

impl MailConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let imap_host = required("EMAIL_IMAP_HOST")?;
        let imap_port = parse_or(&lookup, "EMAIL_IMAP_PORT", 993)?;
        let smtp_host = lookup("EMAIL_SMTP_HOST").unwrap_or_else(|| imap_host.replace("imap", "smtp"));
        let smtp_port = parse_or(&lookup, "EMAIL_SMTP_PORT", 465)?;

        let username = required("EMAIL_USERNAME")?;
        let password = SecretString::from(required("EMAIL_PASSWORD")?);
        let from_address = lookup("EMAIL_FROM_ADDRESS").unwrap_or_else(|| username.clone());
        let mailbox = lookup("EMAIL_MAILBOX").unwrap_or_else(|| "INBOX".to_string());

        let fetch_limit = parse_or(&lookup, "EMAIL_FETCH_LIMIT", DEFAULT_FETCH_LIMIT)?;
        if fetch_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMAIL_FETCH_LIMIT".into(),
                message: "must be at least 1".into(),
            });
        }
        let timeout_secs: u64 = parse_or(&lookup, "EMAIL_TIMEOUT_SECS", 30)?;

        Ok(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            mailbox,
            fetch_limit,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let lookup = |key: &str| std::env::var(key).ok();
        Ok(Self {
            port: parse_or(&lookup, "INBOX_ASSIST_PORT", 8080)?,
        })
    }
}

/// Reply suggestion provider configuration.
#[derive(Debug, Clone)]
pub struct SuggestConfig {
    pub api_key: SecretString,
    pub model: String,
    pub max_tokens: u32,
}

impl SuggestConfig {
    /// Returns `None` if `ANTHROPIC_API_KEY` is not set (suggestions disabled).
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok()?;
        let model = std::env::var("INBOX_ASSIST_MODEL")
            .unwrap_or_else(|_| "claude-3-haiku-20240307".to_string());

        Some(Self {
            api_key: SecretString::from(api_key),
            model,
            max_tokens: 512,
        })
    }
}

/// Everything the service reads from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mail: MailConfig,
    pub server: ServerConfig,
    /// `None` disables reply suggestions.
    pub suggest: Option<SuggestConfig>,
}

impl Settings {
    pub fn from_env() -> crate::error::Result<Self> {
        Ok(Self {
            mail: MailConfig::from_env()?,
            server: ServerConfig::from_env()?,
            suggest: SuggestConfig::from_env(),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const MINIMAL: &[(&str, &str)] = &[
        ("EMAIL_IMAP_HOST", "imap.test.com"),
        ("EMAIL_USERNAME", "me@test.com"),
        ("EMAIL_PASSWORD", "app-password"),
    ];

    #[test]
    fn defaults_applied() {
        let config = MailConfig::from_lookup(env(MINIMAL)).unwrap();
        assert_eq!(config.imap_port, 993);
        assert_eq!(config.smtp_host, "smtp.test.com");
        assert_eq!(config.smtp_port, 465);
        assert_eq!(config.from_address, "me@test.com");
        assert_eq!(config.mailbox, "INBOX");
        assert_eq!(config.fetch_limit, DEFAULT_FETCH_LIMIT);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.password.expose_secret(), "app-password");
    }

    #[test]
    fn missing_host_is_reported() {
        let err = MailConfig::from_lookup(env(&[("EMAIL_USERNAME", "me")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "EMAIL_IMAP_HOST"));
    }

    #[test]
    fn blank_password_counts_as_missing() {
        let err = MailConfig::from_lookup(env(&[
            ("EMAIL_IMAP_HOST", "imap.test.com"),
            ("EMAIL_USERNAME", "me"),
            ("EMAIL_PASSWORD", "  "),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "EMAIL_PASSWORD"));
    }

    #[test]
    fn invalid_port_rejected() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("EMAIL_IMAP_PORT", "not-a-port"));
        let err = MailConfig::from_lookup(env(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "EMAIL_IMAP_PORT"));
    }

    #[test]
    fn zero_fetch_limit_rejected() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("EMAIL_FETCH_LIMIT", "0"));
        assert!(MailConfig::from_lookup(env(&pairs)).is_err());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let mut pairs = MINIMAL.to_vec();
        pairs.extend([
            ("EMAIL_SMTP_HOST", "relay.test.com"),
            ("EMAIL_SMTP_PORT", "587"),
            ("EMAIL_FROM_ADDRESS", "Me <me@test.com>"),
            ("EMAIL_FETCH_LIMIT", "25"),
            ("EMAIL_TIMEOUT_SECS", "5"),
        ]);
        let config = MailConfig::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.smtp_host, "relay.test.com");
        assert_eq!(config.smtp_port, 587);
        assert_eq!(config.from_address, "Me <me@test.com>");
        assert_eq!(config.fetch_limit, 25);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}
