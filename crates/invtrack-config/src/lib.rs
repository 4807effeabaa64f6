//! invtrack-config
//!
//! Layered YAML configuration for the invite engine.
//!
//! - Documents merge in order: earlier docs are base, later docs override.
//! - The merged document is canonicalized to JSON and hashed (SHA-256) so a
//!   run can log exactly which configuration it used.
//! - Literal secrets are refused. Credentials stay with the host process
//!   (env or `.env.local`); the engine schema has no place for them.
//! - [`EngineConfig`] is the typed view the runtime consumes; every key has a
//!   default so an empty document is valid.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// A string leaf starting with one of these is treated as an embedded
/// credential and aborts loading.
const CREDENTIAL_MARKERS: &[&str] = &["Bot ", "Bearer ", "Basic ", "mfa.", "sk-", "-----BEGIN"];

/// Shorter strings are never flagged ("sk-" alone is not a key).
const MIN_CREDENTIAL_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Layered loading
// ---------------------------------------------------------------------------

/// Merged configuration plus its identity.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Hex SHA-256 of `canonical_json`.
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

/// Read and merge YAML files in order.
pub fn load_layered_yaml<P: AsRef<Path>>(paths: &[P]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| {
            let p = p.as_ref();
            fs::read_to_string(p).with_context(|| format!("read config layer {}", p.display()))
        })
        .collect::<Result<Vec<String>>>()?;

    let doc_refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

/// Merge in-memory YAML documents in order. Empty documents are empty layers.
pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Map::new());
    for (idx, raw) in yaml_docs.iter().enumerate() {
        let layer: Value = serde_yaml::from_str::<Option<Value>>(raw)
            .with_context(|| format!("config layer {idx}: invalid yaml"))?
            .unwrap_or(Value::Null);
        if !layer.is_null() {
            merge_into(&mut merged, layer);
        }
    }

    if let Some(pointer) = find_credential(&merged, &mut String::new()) {
        bail!("CONFIG_SECRET_DETECTED leaf={pointer} value=REDACTED");
    }

    // serde_json's default map is key-ordered, so the compact form is canonical.
    let canonical_json = serde_json::to_string(&merged).context("serialize canonical config")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Objects merge key by key; any other overlay value replaces the base.
fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// JSON pointer of the first leaf that looks like a credential.
fn find_credential(v: &Value, pointer: &mut String) -> Option<String> {
    let mark = pointer.len();
    let found = match v {
        Value::String(s) => is_credential(s).then(|| pointer.clone()),
        Value::Object(map) => map.iter().find_map(|(key, child)| {
            pointer.truncate(mark);
            pointer.push('/');
            pointer.push_str(&key.replace('~', "~0").replace('/', "~1"));
            find_credential(child, pointer)
        }),
        Value::Array(items) => items.iter().enumerate().find_map(|(i, child)| {
            pointer.truncate(mark);
            pointer.push_str(&format!("/{i}"));
            find_credential(child, pointer)
        }),
        _ => None,
    };
    pointer.truncate(mark);
    found
}

fn is_credential(s: &str) -> bool {
    let t = s.trim_start();
    t.len() >= MIN_CREDENTIAL_LEN && CREDENTIAL_MARKERS.iter().any(|m| t.starts_with(m))
}

// ---------------------------------------------------------------------------
// Typed engine config
// ---------------------------------------------------------------------------

/// Runtime knobs for the engine. Missing keys fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub dispatch: DispatchSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    /// Upper bound on one invite snapshot fetch. Expiry counts as a transport
    /// failure: the join is recorded unattributed.
    pub fetch_timeout_ms: u64,
    /// Max guilds fetched concurrently during startup bootstrap.
    pub bootstrap_concurrency: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 10_000,
            bootstrap_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchSection {
    /// Bound of each guild's event queue.
    pub queue_capacity: usize,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Build from a loaded (merged, secret-checked) document and validate.
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        let cfg: EngineConfig = serde_json::from_value(loaded.config_json.clone())
            .context("config does not match engine schema")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.fetch_timeout_ms == 0 {
            bail!("engine.fetch_timeout_ms must be > 0");
        }
        if self.engine.bootstrap_concurrency == 0 {
            bail!("engine.bootstrap_concurrency must be > 0");
        }
        if self.dispatch.queue_capacity == 0 {
            bail!("dispatch.queue_capacity must be > 0");
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.fetch_timeout_ms)
    }
}
