//! Mapping-profile registry.
//!
//! Profiles are TOML documents in a configured directory, one file per
//! profile, all loaded at startup. There is no runtime discovery: a source
//! naming a profile that is not in the registry fails before the job's
//! gather stage starts.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

use crate::config::Config;
use crate::mapper::MappingProfile;

/// All mapping profiles known to this process, keyed by profile name.
pub struct ProfileRegistry {
    profiles: HashMap<String, MappingProfile>,
}

impl ProfileRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            profiles: HashMap::new(),
        }
    }

    /// Load every `*.toml` file in the configured profile directory.
    ///
    /// A file that fails to parse aborts loading; a half-loaded registry
    /// would let a job start and then fail mid-pipeline.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::from_dir(&config.profiles.dir)
    }

    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::new();

        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read profiles directory: {}", dir.display()))?;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read profile: {}", path.display()))?;
            let profile = MappingProfile::from_toml(&content)
                .with_context(|| format!("Failed to parse profile: {}", path.display()))?;
            registry.register(profile)?;
        }

        Ok(registry)
    }

    /// Register a profile. Duplicate names are an error, not a silent
    /// override.
    pub fn register(&mut self, profile: MappingProfile) -> Result<()> {
        let name = profile.name.clone();
        if self.profiles.insert(name.clone(), profile).is_some() {
            anyhow::bail!("duplicate mapping profile: {}", name);
        }
        Ok(())
    }

    /// Resolve a profile by name.
    pub fn find(&self, name: &str) -> Option<&MappingProfile> {
        self.profiles.get(name)
    }

    /// Profile names in sorted order, for CLI listing.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}
