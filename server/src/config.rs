use std::{
    fmt,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use color_eyre::eyre::{eyre, WrapErr};
use serde::Deserialize;
use tower_cookies::Key;
use tracing::{debug, warn};

use crate::errors::AuthError;

pub const CONFIG_FILE_NAME: &str = "okta.yaml";
const ENV_PREFIX: &str = "OKTA_IDX_";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Identity provider settings for the interaction-code flow
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdxConfig {
    pub client_id: String,
    pub client_secret: String,
    pub issuer: String,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
}

impl fmt::Debug for IdxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdxConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("scopes", &self.scopes)
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    okta: OktaSection,
}

#[derive(Deserialize, Default)]
struct OktaSection {
    #[serde(default)]
    idx: IdxConfig,
}

/// `$HOME/.okta` first, then the working directory
pub fn default_search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join(".okta"));
    }
    dirs.push(PathBuf::from("."));
    dirs
}

impl IdxConfig {
    pub fn load() -> Result<Self, AuthError> {
        Self::load_from(&default_search_dirs(), |name| std::env::var(name).ok())
    }

    /// Read the first `okta.yaml` found in `dirs`, let the environment fill
    /// whatever it left empty, then validate
    pub fn load_from(
        dirs: &[PathBuf],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AuthError> {
        let mut config = match dirs
            .iter()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|path| path.is_file())
        {
            Some(path) => Self::read_file(&path)?,
            None => {
                debug!("No {CONFIG_FILE_NAME} found, using the environment only");
                Self::default()
            }
        };

        config.fill_from_env(env);
        config.issuer = config.issuer.trim_end_matches('/').to_string();
        config.validate()?;

        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, AuthError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AuthError::Configuration(format!("could not read {}: {e}", path.display()))
        })?;

        let file: ConfigFile = serde_yml::from_str(&contents).map_err(|e| {
            AuthError::Configuration(format!("could not parse {}: {e}", path.display()))
        })?;

        debug!(path = %path.display(), "Loaded identity provider settings");
        Ok(file.okta.idx)
    }

    fn fill_from_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| env(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        let fields = [
            (&mut self.client_id, "CLIENTID"),
            (&mut self.client_secret, "CLIENTSECRET"),
            (&mut self.issuer, "ISSUER"),
            (&mut self.redirect_uri, "REDIRECTURI"),
        ];
        for (field, name) in fields {
            if field.is_empty() {
                if let Some(value) = var(name) {
                    *field = value;
                }
            }
        }

        if self.scopes.is_empty() {
            if let Some(scopes) = var("SCOPES") {
                self.scopes = scopes
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        }
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        let required = [
            ("clientId", &self.client_id),
            ("clientSecret", &self.client_secret),
            ("issuer", &self.issuer),
            ("redirectUri", &self.redirect_uri),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(AuthError::Configuration(format!("{name} is required")));
        }

        if self.scopes.is_empty() || self.scopes.iter().any(|s| s.trim().is_empty()) {
            return Err(AuthError::Configuration(
                "scopes must list at least one non-empty scope".to_string(),
            ));
        }

        for (name, value) in [("issuer", &self.issuer), ("redirectUri", &self.redirect_uri)] {
            url::Url::parse(value).map_err(|e| {
                AuthError::Configuration(format!("{name} is not an absolute URL ({value}): {e}"))
            })?;
        }

        Ok(())
    }
}

/// Process-level settings for the HTTP server
#[derive(Clone)]
pub struct ServerSettings {
    pub bind_addr: SocketAddr,
    pub cookie_key: Key,
    pub secure_cookies: bool,
}

impl ServerSettings {
    pub fn from_env() -> color_eyre::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> color_eyre::Result<Self> {
        let bind_addr = env("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .wrap_err("BIND_ADDR is not a socket address")?;

        let cookie_key = match env("COOKIE_KEY") {
            Some(encoded) => cookie_key_from_base64(&encoded)?,
            None => {
                warn!("COOKIE_KEY not set, generating one. Sessions will not survive a restart");
                Key::generate()
            }
        };

        Ok(Self {
            bind_addr,
            cookie_key,
            secure_cookies: env("PROTO").is_some_and(|p| p == "https"),
        })
    }
}

fn cookie_key_from_base64(encoded: &str) -> color_eyre::Result<Key> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .wrap_err("COOKIE_KEY is not valid base64")?;

    Key::try_from(bytes.as_slice())
        .map_err(|_| eyre!("COOKIE_KEY must decode to at least 64 bytes, got {}", bytes.len()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const FULL_YAML: &str = r#"
okta:
  idx:
    clientId: "0oa-file"
    clientSecret: "file-secret"
    issuer: "https://dev-123.okta.com/oauth2/default/"
    scopes:
      - "openid"
      - "profile"
    redirectUri: "http://localhost:8080/login/callback"
"#;

    #[test]
    fn loads_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), FULL_YAML).unwrap();

        let config = IdxConfig::load_from(&[dir.path().to_path_buf()], env_of(&[])).unwrap();

        assert_eq!(config.client_id, "0oa-file");
        assert_eq!(config.issuer, "https://dev-123.okta.com/oauth2/default");
        assert_eq!(config.scopes, vec!["openid", "profile"]);
    }

    #[test]
    fn first_directory_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join(CONFIG_FILE_NAME), FULL_YAML).unwrap();
        std::fs::write(
            second.path().join(CONFIG_FILE_NAME),
            FULL_YAML.replace("0oa-file", "0oa-second"),
        )
        .unwrap();

        let config = IdxConfig::load_from(
            &[first.path().to_path_buf(), second.path().to_path_buf()],
            env_of(&[]),
        )
        .unwrap();

        assert_eq!(config.client_id, "0oa-file");
    }

    #[test]
    fn environment_alone_is_enough() {
        let config = IdxConfig::load_from(
            &[],
            env_of(&[
                ("OKTA_IDX_CLIENTID", "0oa-env"),
                ("OKTA_IDX_CLIENTSECRET", "env-secret"),
                ("OKTA_IDX_ISSUER", "https://dev-123.okta.com"),
                ("OKTA_IDX_SCOPES", "openid, profile,,email"),
                ("OKTA_IDX_REDIRECTURI", "http://localhost:8080/login/callback"),
            ]),
        )
        .unwrap();

        assert_eq!(config.client_id, "0oa-env");
        assert_eq!(config.scopes, vec!["openid", "profile", "email"]);
    }

    #[test]
    fn environment_only_fills_empty_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            FULL_YAML.replace("    clientSecret: \"file-secret\"\n", ""),
        )
        .unwrap();

        let config = IdxConfig::load_from(
            &[dir.path().to_path_buf()],
            env_of(&[
                ("OKTA_IDX_CLIENTID", "0oa-env"),
                ("OKTA_IDX_CLIENTSECRET", "env-secret"),
            ]),
        )
        .unwrap();

        assert_eq!(config.client_id, "0oa-file");
        assert_eq!(config.client_secret, "env-secret");
    }

    #[test]
    fn missing_field_is_a_configuration_error() {
        let err = IdxConfig::load_from(
            &[],
            env_of(&[
                ("OKTA_IDX_CLIENTID", "0oa-env"),
                ("OKTA_IDX_ISSUER", "https://dev-123.okta.com"),
                ("OKTA_IDX_SCOPES", "openid"),
                ("OKTA_IDX_REDIRECTURI", "http://localhost:8080/login/callback"),
            ]),
        )
        .unwrap_err();

        match err {
            AuthError::Configuration(message) => assert!(message.contains("clientSecret")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn issuer_must_be_absolute_url() {
        let config = IdxConfig {
            client_id: "a".into(),
            client_secret: "b".into(),
            issuer: "dev-123.okta.com".into(),
            scopes: vec!["openid".into()],
            redirect_uri: "http://localhost:8080/login/callback".into(),
        };

        assert!(matches!(
            config.validate(),
            Err(AuthError::Configuration(_))
        ));
    }

    #[test]
    fn debug_output_hides_client_secret() {
        let config = IdxConfig {
            client_secret: "super-secret".into(),
            ..IdxConfig::default()
        };

        assert!(!format!("{config:?}").contains("super-secret"));
    }

    #[test]
    fn server_settings_defaults() {
        let settings = ServerSettings::from_lookup(env_of(&[])).unwrap();

        assert_eq!(settings.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert!(!settings.secure_cookies);
    }

    #[test]
    fn server_settings_from_environment() {
        let key = STANDARD.encode([7u8; 64]);
        let settings = ServerSettings::from_lookup(env_of(&[
            ("BIND_ADDR", "0.0.0.0:3000"),
            ("COOKIE_KEY", key.as_str()),
            ("PROTO", "https"),
        ]))
        .unwrap();

        assert_eq!(settings.bind_addr.port(), 3000);
        assert!(settings.secure_cookies);
        assert_eq!(settings.cookie_key.master(), [7u8; 64].as_slice());
    }

    #[test]
    fn short_cookie_key_is_rejected() {
        let key = STANDARD.encode([7u8; 16]);
        assert!(ServerSettings::from_lookup(env_of(&[("COOKIE_KEY", key.as_str())])).is_err());
    }
}
