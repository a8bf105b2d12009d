use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use engine_client::{Credentials, Role};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HarnessError;

/// Keys older harness versions left in the file; not scenarios.
const RESERVED_KEYS: &[&str] = &["__path", "info"];

// ═══════════════════════════════════════════════════════════════
//  ScenarioRecord
// ═══════════════════════════════════════════════════════════════

/// Credentials and metadata of one provisioned scenario.
///
/// Older files spell the fields `adm`, `adm_secret`, `app`, `app_secret`;
/// they are read and rewritten in the current spelling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioRecord {
    /// Store key; not part of the serialized value.
    #[serde(skip)]
    pub id: u32,
    #[serde(alias = "adm")]
    pub admin_key: String,
    #[serde(alias = "adm_secret")]
    pub admin_secret: String,
    #[serde(default, alias = "app", skip_serializing_if = "Option::is_none")]
    pub child_key: Option<String>,
    #[serde(default, alias = "app_secret", skip_serializing_if = "Option::is_none")]
    pub child_secret: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl ScenarioRecord {
    pub fn new(principal: &Credentials) -> Self {
        Self {
            admin_key: principal.key.clone(),
            admin_secret: principal.secret.clone(),
            ..Default::default()
        }
    }

    pub fn with_child(mut self, child: &Credentials) -> Self {
        self.child_key = Some(child.key.clone());
        self.child_secret = Some(child.secret.clone());
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn principal_credentials(&self) -> Credentials {
        Credentials::new(Role::Principal, &self.admin_key, &self.admin_secret)
    }

    /// Present only when both key and secret were stored.
    pub fn child_credentials(&self) -> Option<Credentials> {
        match (&self.child_key, &self.child_secret) {
            (Some(key), Some(secret)) => Some(Credentials::new(Role::Child, key, secret)),
            _ => None,
        }
    }

    /// Keys and secrets are replaced, child fields only when `update`
    /// carries them, metadata entries merge key by key.
    fn merge(&mut self, update: ScenarioRecord) {
        self.admin_key = update.admin_key;
        self.admin_secret = update.admin_secret;
        if update.child_key.is_some() {
            self.child_key = update.child_key;
        }
        if update.child_secret.is_some() {
            self.child_secret = update.child_secret;
        }
        self.metadata.extend(update.metadata);
    }
}

// ═══════════════════════════════════════════════════════════════
//  CredentialStore
// ═══════════════════════════════════════════════════════════════

/// JSON file of scenario records keyed by decimal id.
///
/// Every mutation rewrites the whole file through a temp file + rename.
/// One writer process at a time; concurrent writers are last-write-wins.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    records: BTreeMap<u32, ScenarioRecord>,
}

impl CredentialStore {
    /// Open the store, creating an empty one if the file does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, HarnessError> {
        let path = path.into();

        if !path.exists() {
            let store = Self {
                path,
                records: BTreeMap::new(),
            };
            store.persist()?;
            tracing::info!(path = %store.path.display(), "credential store created");
            return Ok(store);
        }

        let text = std::fs::read_to_string(&path).map_err(|e| HarnessError::io(&path, e))?;
        let records = parse_records(&text)
            .map_err(|e| HarnessError::Configuration(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), records = records.len(), "credential store loaded");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: u32) -> Option<&ScenarioRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.records.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.records.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Merge `record` into the entry for `id` (or insert it) and rewrite.
    pub fn upsert(&mut self, id: u32, mut record: ScenarioRecord) -> Result<&ScenarioRecord, HarnessError> {
        record.id = id;
        match self.records.get_mut(&id) {
            Some(existing) => existing.merge(record),
            None => {
                self.records.insert(id, record);
            }
        }
        self.persist()?;
        tracing::debug!(id, path = %self.path.display(), "scenario stored");
        self.records
            .get(&id)
            .ok_or_else(|| HarnessError::Configuration(format!("scenario {id} vanished after upsert")))
    }

    /// Drop the entry for `id` and rewrite.
    pub fn remove(&mut self, id: u32) -> Result<Option<ScenarioRecord>, HarnessError> {
        let removed = self.records.remove(&id);
        self.persist()?;
        Ok(removed)
    }

    /// Pretty JSON, 4-space indent, numeric id order, trailing newline.
    pub fn to_json_string(&self) -> Result<String, HarnessError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.records
            .serialize(&mut ser)
            .map_err(|e| HarnessError::Configuration(format!("encode store: {e}")))?;
        buf.push(b'\n');
        String::from_utf8(buf).map_err(|e| HarnessError::Configuration(format!("encode store: {e}")))
    }

    fn persist(&self) -> Result<(), HarnessError> {
        let text = self.to_json_string()?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| HarnessError::io(&dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| HarnessError::io(&dir, e))?;
        tmp.write_all(text.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| HarnessError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| HarnessError::io(&self.path, e.error))?;
        Ok(())
    }
}

fn parse_records(text: &str) -> Result<BTreeMap<u32, ScenarioRecord>, String> {
    let root: Map<String, Value> = serde_json::from_str(text).map_err(|e| format!("malformed store: {e}"))?;

    let mut records = BTreeMap::new();
    for (key, value) in root {
        if RESERVED_KEYS.contains(&key.as_str()) {
            tracing::debug!(key = %key, "skipping legacy store key");
            continue;
        }
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("scenario id '{key}' is not a decimal number"));
        }
        let id: u32 = key
            .parse()
            .map_err(|e| format!("scenario id '{key}': {e}"))?;
        if id.to_string() != key {
            return Err(format!("scenario id '{key}' has leading zeros"));
        }
        let mut record: ScenarioRecord =
            serde_json::from_value(value).map_err(|e| format!("scenario {key}: {e}"))?;
        record.id = id;
        records.insert(id, record);
    }
    Ok(records)
}
