//! Curated canonical names plus raw-text corrections, persisted as a small
//! JSON document and shared across runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::name_extract::MIN_IDENTITY_LEN;

/// Lowercase lookup tables built once per registry snapshot.
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    canonical: HashMap<String, usize>,
    corrections: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnownIdentityRegistry {
    #[serde(default)]
    canonical_names: Vec<String>,
    #[serde(default)]
    corrections: BTreeMap<String, String>,
    #[serde(skip)]
    index: OnceLock<NameIndex>,
}

fn validate_name(name: &str) -> Result<String, RegistryError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RegistryError::EmptyName);
    }
    if name.chars().count() < MIN_IDENTITY_LEN {
        return Err(RegistryError::NameTooShort(name.to_string()));
    }
    Ok(name.to_string())
}

impl KnownIdentityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from raw parts, validating every entry.
    pub fn from_parts<N, C>(names: N, corrections: C) -> Result<Self, RegistryError>
    where
        N: IntoIterator,
        N::Item: AsRef<str>,
        C: IntoIterator<Item = (String, String)>,
    {
        let mut registry = Self::new();
        for name in names {
            registry.add_name(name.as_ref())?;
        }
        for (raw, target) in corrections {
            registry.add_correction(&raw, &target)?;
        }
        Ok(registry)
    }

    #[must_use]
    pub fn canonical_names(&self) -> &[String] {
        &self.canonical_names
    }

    #[must_use]
    pub fn corrections(&self) -> &BTreeMap<String, String> {
        &self.corrections
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.canonical_names.is_empty() && self.corrections.is_empty()
    }

    fn index(&self) -> &NameIndex {
        self.index.get_or_init(|| {
            debug!(
                names = self.canonical_names.len(),
                corrections = self.corrections.len(),
                "building name index"
            );
            NameIndex {
                canonical: self
                    .canonical_names
                    .iter()
                    .enumerate()
                    .map(|(position, name)| (name.to_lowercase(), position))
                    .collect(),
                corrections: self
                    .corrections
                    .iter()
                    .map(|(raw, target)| (raw.to_lowercase(), target.clone()))
                    .collect(),
            }
        })
    }

    fn invalidate(&mut self) {
        self.index.take();
    }

    /// Canonical casing of `name`, if it is a known name.
    #[must_use]
    pub fn canonical(&self, name: &str) -> Option<&str> {
        let position = *self.index().canonical.get(&name.trim().to_lowercase())?;
        self.canonical_names.get(position).map(String::as_str)
    }

    /// Correction target registered for `raw`, compared case-insensitively.
    #[must_use]
    pub fn correction_for(&self, raw: &str) -> Option<&str> {
        self.index()
            .corrections
            .get(&raw.trim().to_lowercase())
            .map(String::as_str)
    }

    /// Adds a canonical name; returns `false` when it was already known.
    pub fn add_name(&mut self, name: &str) -> Result<bool, RegistryError> {
        let name = validate_name(name)?;
        if self.canonical(&name).is_some() {
            return Ok(false);
        }
        self.canonical_names.push(name);
        self.invalidate();
        Ok(true)
    }

    /// Removes a canonical name together with every correction pointing at it.
    pub fn remove_name(&mut self, name: &str) -> Result<(), RegistryError> {
        let lowered = name.trim().to_lowercase();
        let position = self
            .canonical_names
            .iter()
            .position(|known| known.to_lowercase() == lowered)
            .ok_or_else(|| RegistryError::UnknownName(name.trim().to_string()))?;
        self.canonical_names.remove(position);
        self.corrections
            .retain(|_, target| target.to_lowercase() != lowered);
        self.invalidate();
        Ok(())
    }

    /// Maps `raw` onto `target`, adding `target` as a canonical name if needed.
    pub fn add_correction(&mut self, raw: &str, target: &str) -> Result<(), RegistryError> {
        let raw = validate_name(raw)?;
        let target = validate_name(target)?;
        if raw.to_lowercase() == target.to_lowercase() {
            return Err(RegistryError::SelfCorrection(raw));
        }

        let lowered = raw.to_lowercase();
        self.corrections.retain(|known, _| known.to_lowercase() != lowered);
        self.corrections.insert(raw, target.clone());
        if self.canonical(&target).is_none() {
            self.canonical_names.push(target);
        }
        self.invalidate();
        Ok(())
    }

    pub fn remove_correction(&mut self, raw: &str) -> Result<(), RegistryError> {
        let lowered = raw.trim().to_lowercase();
        let key = self
            .corrections
            .keys()
            .find(|known| known.to_lowercase() == lowered)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCorrection(raw.trim().to_string()))?;
        self.corrections.remove(&key);
        self.invalidate();
        Ok(())
    }

    /// Restores the document invariants after loading: canonical names are
    /// unique case-insensitively and every correction target is canonical.
    fn heal(&mut self) {
        for name in &mut self.canonical_names {
            *name = name.trim().to_string();
        }
        let mut seen = HashSet::new();
        self.canonical_names.retain(|name| {
            name.chars().count() >= MIN_IDENTITY_LEN && seen.insert(name.to_lowercase())
        });
        let targets = self
            .corrections
            .values()
            .map(|target| target.trim().to_string())
            .collect::<Vec<_>>();
        for target in targets {
            if seen.insert(target.to_lowercase()) {
                self.canonical_names.push(target);
            }
        }
        self.invalidate();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurationAction {
    AddName(String),
    RemoveName(String),
    AddCorrection { raw: String, target: String },
    RemoveCorrection(String),
}

/// A registry bound to the file it is persisted in. Every curation action is
/// written back before it returns.
#[derive(Debug)]
pub struct RegistryStore {
    path: PathBuf,
    registry: KnownIdentityRegistry,
}

impl RegistryStore {
    /// Opens the registry at `path`; a missing file is an empty registry.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let registry = load_registry(&path)?;
        Ok(Self { path, registry })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn registry(&self) -> &KnownIdentityRegistry {
        &self.registry
    }

    /// Re-reads the document, picking up edits made by other processes.
    pub fn reload(&mut self) -> Result<(), RegistryError> {
        self.registry = load_registry(&self.path)?;
        Ok(())
    }

    pub fn apply(&mut self, action: CurationAction) -> Result<(), RegistryError> {
        match &action {
            CurationAction::AddName(name) => {
                self.registry.add_name(name)?;
            }
            CurationAction::RemoveName(name) => self.registry.remove_name(name)?,
            CurationAction::AddCorrection { raw, target } => {
                self.registry.add_correction(raw, target)?;
            }
            CurationAction::RemoveCorrection(raw) => self.registry.remove_correction(raw)?,
        }
        self.save()?;
        info!(?action, path = %self.path.display(), "registry updated");
        Ok(())
    }

    pub fn save(&self) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(&self.registry)?;
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, body)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

fn load_registry(path: &Path) -> Result<KnownIdentityRegistry, RegistryError> {
    if !path.exists() {
        debug!(path = %path.display(), "registry file missing, starting empty");
        return Ok(KnownIdentityRegistry::new());
    }
    let body = fs::read_to_string(path)?;
    let mut registry: KnownIdentityRegistry = serde_json::from_str(&body)?;
    registry.heal();
    Ok(registry)
}
