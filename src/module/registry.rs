//! Module registry for loading and sharing module definitions.
//!
//! Modules are parsed once, wrapped in `Arc` and handed to every context
//! that needs them. The registry itself is built up front and then shared
//! read-only, so worker threads never contend on it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use ahash::AHashMap;
use tracing::{debug, info};

use crate::core::error::{Result, SimError};
use crate::module::definition::{ModuleDef, StateDef, StateKind, INITIAL};
use crate::module::validation;

/// An immutable, loaded module
#[derive(Debug)]
pub struct Module {
    /// Registry key; submodules are keyed by their path, e.g. `medications/statin`
    key: String,
    name: String,
    remarks: Vec<String>,
    submodule: bool,
    states: BTreeMap<String, Arc<StateDef>>,
}

impl Module {
    pub fn new(key: &str, def: ModuleDef, submodule: bool) -> Result<Self> {
        if !def.states.contains_key(INITIAL) {
            return Err(SimError::MissingInitial(def.name));
        }
        if let Some((name, _)) = def
            .states
            .iter()
            .find(|(name, d)| matches!(d.kind, StateKind::Initial) && name.as_str() != INITIAL)
        {
            return Err(SimError::InvalidField {
                context: format!("module {}", def.name),
                message: format!("Initial state must be named '{}', found '{}'", INITIAL, name),
            });
        }

        Ok(Self {
            key: key.to_string(),
            name: def.name,
            remarks: def.remarks,
            submodule,
            states: def
                .states
                .into_iter()
                .map(|(name, state)| (name, Arc::new(state)))
                .collect(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn remarks(&self) -> &[String] {
        &self.remarks
    }

    pub fn is_submodule(&self) -> bool {
        self.submodule
    }

    pub fn state_def(&self, name: &str) -> Option<&StateDef> {
        self.states.get(name).map(|d| d.as_ref())
    }

    pub(crate) fn shared_state_def(&self, name: &str) -> Result<Arc<StateDef>> {
        self.states
            .get(name)
            .cloned()
            .ok_or_else(|| SimError::UnknownState {
                module: self.key.clone(),
                state: name.to_string(),
            })
    }

    pub fn states(&self) -> impl Iterator<Item = (&String, &Arc<StateDef>)> {
        self.states.iter()
    }

    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    /// Names of submodules this module calls
    pub fn submodule_calls(&self) -> impl Iterator<Item = &str> {
        self.states.values().filter_map(|d| match &d.kind {
            StateKind::CallSubmodule { submodule } => submodule.as_deref(),
            _ => None,
        })
    }

    pub fn validate(&self) -> Vec<String> {
        validation::validate_module(self)
    }
}

/// Registry of all loaded modules, keyed by name
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: AHashMap<String, Arc<Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parsed module under `key`, replacing any previous one
    pub fn register(&mut self, key: &str, def: ModuleDef) -> Result<Arc<Module>> {
        let submodule = key.contains('/');
        let module = Arc::new(Module::new(key, def, submodule)?);
        debug!(key, name = module.name(), submodule, "Registered module");
        self.modules.insert(key.to_string(), Arc::clone(&module));
        Ok(module)
    }

    /// Parse and register a module from JSON text
    pub fn load_str(&mut self, key: &str, json: &str) -> Result<Arc<Module>> {
        let def: ModuleDef = serde_json::from_str(json).map_err(|e| SimError::Parse {
            path: key.to_string(),
            message: e.to_string(),
        })?;
        self.register(key, def)
    }

    /// Load a module file, keyed by `key`
    pub fn load_file(&mut self, path: &Path, key: &str) -> Result<Arc<Module>> {
        let content = std::fs::read_to_string(path)?;
        let def: ModuleDef = serde_json::from_str(&content).map_err(|e| SimError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.register(key, def)
    }

    /// Load every `.json` file below `path`.
    ///
    /// Keys are the path relative to `path` without extension, using `/`
    /// separators, so files in sub-directories become submodules.
    pub fn load_directory(&mut self, path: &Path) -> Result<usize> {
        let mut count = 0;
        self.load_directory_recursive(path, "", &mut count)?;
        info!(count, dir = %path.display(), "Loaded modules");
        Ok(count)
    }

    fn load_directory_recursive(&mut self, path: &Path, prefix: &str, count: &mut usize) -> Result<()> {
        let mut entries = std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();

        for entry_path in entries {
            let Some(stem) = entry_path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let key = if prefix.is_empty() {
                stem.to_string()
            } else {
                format!("{}/{}", prefix, stem)
            };

            if entry_path.is_dir() {
                self.load_directory_recursive(&entry_path, &key, count)?;
            } else if entry_path.extension().map_or(false, |ext| ext == "json") {
                self.load_file(&entry_path, &key)?;
                *count += 1;
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Arc<Module>> {
        self.modules.get(key).cloned()
    }

    pub fn require(&self, key: &str) -> Result<Arc<Module>> {
        self.get(key)
            .ok_or_else(|| SimError::UnknownModule(key.to_string()))
    }

    /// Modules that run directly against a person, sorted by key
    pub fn top_level(&self) -> Vec<Arc<Module>> {
        let mut modules: Vec<Arc<Module>> = self
            .modules
            .values()
            .filter(|m| !m.is_submodule())
            .cloned()
            .collect();
        modules.sort_by(|a, b| a.key().cmp(b.key()));
        modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Validate every module plus cross-module submodule references
    pub fn validate_all(&self) -> Vec<String> {
        let mut modules: Vec<(&String, &Arc<Module>)> = self.modules.iter().collect();
        modules.sort_by_key(|(key, _)| *key);

        let mut messages = Vec::new();
        for (key, module) in modules {
            messages.extend(module.validate());
            for called in module.submodule_calls() {
                if !self.modules.contains_key(called) {
                    messages.push(format!("{}: calls unknown submodule '{}'", key, called));
                }
            }
        }
        messages
    }
}
