use crate::envelope::EnvelopeKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::{fs, path::Path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Without a database section the service keeps bins in memory.
    #[serde(default)]
    pub database: Option<DbConfig>,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    pub brokers: Vec<BrokerConfig>,
}

fn default_client_id_prefix() -> String {
    "smartbin-ingest".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Table holding one row per bin; may be schema-qualified.
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_max_connections() -> u32 {
    10
}

fn default_table() -> String {
    "smartbin.mockdata".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:6969".into()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// One broker to listen on. Each entry gets its own listener task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Topic filter, MQTT wildcards allowed.
    pub topic: String,
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// "plain" | "network_server"
    #[serde(default)]
    pub envelope: EnvelopeKind,
}

fn default_port() -> u16 {
    1883
}

fn default_qos() -> u8 {
    1
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// Afterwards, if DATABASE_URL env is set, override `database.url`
    /// (creating the section when the file has none).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, anyhow::Error> {
        let expanded = expand_env_placeholders(raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            match cfg.database.as_mut() {
                Some(db) => db.url = url,
                None => {
                    cfg.database = Some(DbConfig {
                        url,
                        max_connections: default_max_connections(),
                        table: default_table(),
                    })
                }
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(
            !self.brokers.is_empty(),
            "config must include at least one broker"
        );

        let mut names = HashSet::new();
        for b in &self.brokers {
            anyhow::ensure!(!b.name.trim().is_empty(), "broker name must not be empty");
            anyhow::ensure!(
                names.insert(b.name.as_str()),
                "broker name '{}' is used more than once",
                b.name
            );
            anyhow::ensure!(
                !b.host.trim().is_empty(),
                "broker '{}' must specify a host",
                b.name
            );
            anyhow::ensure!(
                !b.topic.trim().is_empty(),
                "broker '{}' must specify a topic",
                b.name
            );
            anyhow::ensure!(b.qos <= 2, "broker '{}' qos must be 0, 1 or 2", b.name);
        }

        if let Some(db) = &self.database {
            anyhow::ensure!(!db.url.trim().is_empty(), "database url must not be empty");
            anyhow::ensure!(db.max_connections > 0, "database max_connections must be > 0");
            anyhow::ensure!(
                is_table_identifier(&db.table),
                "database table '{}' is not a valid identifier",
                db.table
            );
        }
        Ok(())
    }
}

/// `name` or `schema.name`, each part `[A-Za-z_][A-Za-z0-9_]*`. The table name
/// is interpolated into SQL, so nothing else gets through.
fn is_table_identifier(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|p| {
            let mut chars = p.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$" (escape).
fn expand_env_placeholders(input: &str) -> Result<String, anyhow::Error> {
    use anyhow::Context;

    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, close)
            .with_context(|| format!("unterminated env placeholder: missing '{}'", close))?;
        let val = std::env::var(&var)
            .with_context(|| format!("missing environment variable: {}", var))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Read characters until we hit `end`, returning the collected string.
/// Consumes the closing delimiter.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_BROKERS: &str = r#"
api:
  bind: "127.0.0.1:8080"
brokers:
  - name: "local"
    host: "localhost"
    topic: "smartbin/#"
    envelope: "plain"
  - name: "ttn"
    host: "eu1.cloud.thethings.network"
    port: 8883
    username: "app@ttn"
    password: "secret"
    topic: "v3/+/devices/+/down/queued"
    qos: 0
    envelope: "network_server"
"#;

    #[test]
    fn test_parse_brokers_and_defaults() {
        let cfg: Config = serde_yaml::from_str(TWO_BROKERS).unwrap();
        cfg.validate().unwrap();

        assert!(cfg.database.is_none());
        assert_eq!(cfg.api.bind, "127.0.0.1:8080");
        assert_eq!(cfg.client_id_prefix, "smartbin-ingest");
        assert_eq!(cfg.brokers.len(), 2);

        let local = &cfg.brokers[0];
        assert_eq!(local.port, 1883);
        assert_eq!(local.qos, 1);
        assert_eq!(local.envelope, EnvelopeKind::Plain);
        assert!(local.username.is_none());

        let ttn = &cfg.brokers[1];
        assert_eq!(ttn.port, 8883);
        assert_eq!(ttn.qos, 0);
        assert_eq!(ttn.envelope, EnvelopeKind::NetworkServer);
    }

    #[test]
    fn test_missing_host_is_a_startup_error() {
        let cfg: Config = serde_yaml::from_str(
            r#"
brokers:
  - name: "local"
    host: ""
    topic: "smartbin/#"
"#,
        )
        .unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must specify a host"));
    }

    #[test]
    fn test_duplicate_and_empty_broker_lists_rejected() {
        let cfg: Config = serde_yaml::from_str("brokers: []").unwrap();
        assert!(cfg.validate().is_err());

        let cfg: Config = serde_yaml::from_str(
            r#"
brokers:
  - { name: "a", host: "h1", topic: "t" }
  - { name: "a", host: "h2", topic: "t" }
"#,
        )
        .unwrap();
        assert!(cfg
            .validate()
            .unwrap_err()
            .to_string()
            .contains("more than once"));
    }

    #[test]
    fn test_table_identifier() {
        assert!(is_table_identifier("mockdata"));
        assert!(is_table_identifier("smartbin.mockdata"));
        assert!(is_table_identifier("_bins2"));
        assert!(!is_table_identifier("bins; DROP TABLE x"));
        assert!(!is_table_identifier("a.b.c"));
        assert!(!is_table_identifier("1bins"));
        assert!(!is_table_identifier(""));
    }

    #[test]
    fn test_expand_env_placeholders() {
        std::env::set_var("SMARTBIN_TEST_HOST", "broker.local");
        let out = expand_env_placeholders("a: ${SMARTBIN_TEST_HOST} b: $(SMARTBIN_TEST_HOST) $$x $y")
            .unwrap();
        assert_eq!(out, "a: broker.local b: broker.local $x $y");

        assert!(expand_env_placeholders("${SMARTBIN_TEST_UNSET_VAR_123}").is_err());
        assert!(expand_env_placeholders("${UNTERMINATED").is_err());
    }
}
