use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{dedup::DedupScope, domain::Credential, errors::Error, mirror::ReactionMirror, Result};

/// Typed configuration for the fleet.
#[derive(Clone, Debug)]
pub struct Config {
    pub tokens_file: PathBuf,

    // Mirroring
    pub trigger_emoji: String,
    pub mirror_emoji: String,

    // Dedup
    pub dedup_scope: DedupScope,
    /// `None` keeps every key for the process lifetime.
    pub dedup_window: Option<Duration>,

    // Backend calls
    pub outbound_timeout: Duration,
    pub close_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tokens_file: PathBuf::from("tokens.json"),
            trigger_emoji: "🔺".to_string(),
            mirror_emoji: "⭐".to_string(),
            dedup_scope: DedupScope::PerSession,
            dedup_window: Some(Duration::from_secs(900)),
            outbound_timeout: Duration::from_millis(10_000),
            close_timeout: Duration::from_millis(5_000),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let str_var = |key: &str| var(key).and_then(non_empty);
        let u64_var = |key: &str| -> Result<Option<u64>> {
            match str_var(key) {
                None => Ok(None),
                Some(s) => s
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|e| Error::Config(format!("{key}: {e}"))),
            }
        };

        let tokens_file = str_var("MASSSTAR_TOKENS_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.tokens_file);
        let trigger_emoji = str_var("MASSSTAR_TRIGGER_EMOJI").unwrap_or(defaults.trigger_emoji);
        let mirror_emoji = str_var("MASSSTAR_MIRROR_EMOJI").unwrap_or(defaults.mirror_emoji);

        let dedup_scope = match str_var("MASSSTAR_DEDUP_SCOPE") {
            Some(s) => DedupScope::parse(&s)?,
            None => defaults.dedup_scope,
        };
        // 0 disables eviction.
        let dedup_window = match u64_var("MASSSTAR_DEDUP_WINDOW_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.dedup_window,
        };

        let outbound_timeout = u64_var("MASSSTAR_OUTBOUND_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.outbound_timeout);
        let close_timeout = u64_var("MASSSTAR_CLOSE_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.close_timeout);

        let cfg = Self {
            tokens_file,
            trigger_emoji,
            mirror_emoji,
            dedup_scope,
            dedup_window,
            outbound_timeout,
            close_timeout,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ReactionMirror::new(self.trigger_emoji.as_str(), self.mirror_emoji.as_str())?;
        if self.outbound_timeout.is_zero() {
            return Err(Error::Config(
                "MASSSTAR_OUTBOUND_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load_credentials(&self) -> Result<Vec<Credential>> {
        load_credentials(&self.tokens_file)
    }
}

/// On-disk credential record: `{"name": "...", "token": "..."}`.
#[derive(Deserialize)]
struct TokenRecord {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    token: String,
}

pub fn load_credentials(path: &Path) -> Result<Vec<Credential>> {
    let raw = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "failed to read credential file {}: {e}",
            path.display()
        ))
    })?;
    parse_credentials(&raw)
}

/// Parse an ordered credential list. Order is preserved; it is the fleet's open order.
pub fn parse_credentials(raw: &str) -> Result<Vec<Credential>> {
    let records: Vec<TokenRecord> = serde_json::from_str(raw)?;
    if records.is_empty() {
        return Err(Error::Config("credential file lists no tokens".to_string()));
    }

    let mut names = HashSet::new();
    let mut out = Vec::with_capacity(records.len());
    for (idx, rec) in records.into_iter().enumerate() {
        let name = rec
            .name
            .and_then(non_empty)
            .map(|n| n.trim().to_string())
            .unwrap_or_else(|| format!("bot-{}", idx + 1));

        let secret = rec.token.trim().to_string();
        if secret.is_empty() {
            return Err(Error::Config(format!("credential {name:?} has an empty token")));
        }
        if !names.insert(name.clone()) {
            return Err(Error::Config(format!("duplicate credential name {name:?}")));
        }
        out.push(Credential::new(name, secret));
    }
    Ok(out)
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
