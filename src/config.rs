use std::{collections::HashMap, path::Path};

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

pub const USER_CONFIG_VAR: &str = "USER_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "config.env";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

/// Browsing identity shared by every page and http request of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct UserConfig {
    pub user_agent: String,
    /// DevTools `CookieParam` objects (`name`, `value`, `domain`, `path`, ...)
    pub cookies: Vec<Value>,
}

impl Default for UserConfig {
    fn default() -> Self {
        UserConfig {
            user_agent: DEFAULT_USER_AGENT.into(),
            cookies: vec![],
        }
    }
}

// {"userAgent": "...", "<site host>": {"<domain>": {"<cookie name>": {...}}}}
#[derive(Deserialize)]
struct RawUserConfig {
    #[serde(rename = "userAgent")]
    user_agent: Option<String>,
    #[serde(flatten)]
    sites: HashMap<String, Value>,
}

impl UserConfig {
    /// Loads `env_file` into the environment (a missing file is fine) and parses
    /// `USER_CONFIG`, picking the cookie section of `site_host`.
    pub fn load(env_file: &Path, site_host: &str) -> anyhow::Result<Self> {
        match dotenvy::from_path(env_file) {
            Ok(_) => debug!("loaded environment from {:?}", env_file),
            Err(e) if e.not_found() => debug!("no environment file at {:?}", env_file),
            Err(e) => return Err(e).context(format!("could not read {:?}", env_file)),
        }

        match std::env::var(USER_CONFIG_VAR) {
            Ok(raw) => Self::from_json(&raw, site_host),
            Err(_) => {
                warn!("{} is not set, browsing without cookies", USER_CONFIG_VAR);
                Ok(Self::default())
            }
        }
    }

    pub fn from_json(raw: &str, site_host: &str) -> anyhow::Result<Self> {
        let parsed: RawUserConfig =
            serde_json::from_str(raw).context(format!("{} is not valid JSON", USER_CONFIG_VAR))?;

        let section = parsed.sites.get(site_host).or_else(|| {
            site_host
                .strip_prefix("www.")
                .and_then(|bare| parsed.sites.get(bare))
        });

        let mut cookies = vec![];
        if let Some(Value::Object(domains)) = section {
            for named in domains.values() {
                if let Value::Object(named) = named {
                    cookies.extend(named.values().cloned());
                }
            }
        }
        debug!("{} cookie(s) configured for {}", cookies.len(), site_host);

        Ok(UserConfig {
            user_agent: parsed
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            cookies,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const RAW: &str = r#"{
        "userAgent": "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0",
        "site.example": {
            "site.example": {
                "session": {"name": "session", "value": "abc", "domain": "site.example", "path": "/"},
                "consent": {"name": "consent", "value": "1", "domain": "site.example", "path": "/"}
            }
        },
        "other.example": {
            "other.example": {"x": {"name": "x", "value": "y", "domain": "other.example"}}
        }
    }"#;

    #[test]
    fn picks_the_section_of_the_entry_host() {
        let c = UserConfig::from_json(RAW, "site.example").unwrap();
        assert_eq!(c.user_agent, "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0");
        assert_eq!(c.cookies.len(), 2);
        assert!(c
            .cookies
            .iter()
            .all(|c| c["domain"] == Value::String("site.example".into())));
    }

    #[test]
    fn www_prefix_falls_back_to_the_bare_host() {
        let c = UserConfig::from_json(RAW, "www.site.example").unwrap();
        assert_eq!(c.cookies.len(), 2);
    }

    #[test]
    fn defaults_when_fields_are_missing() {
        let c = UserConfig::from_json("{}", "site.example").unwrap();
        assert_eq!(c, UserConfig::default());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(UserConfig::from_json("{not json", "site.example").is_err());
    }
}
