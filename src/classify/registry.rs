//! Known-bot registry.
//!
//! A curated, ordered list of literal substrings identifying known automated
//! agents. Loaded once at startup and never mutated by the engine.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read bot registry {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
struct Entry {
    pattern: String,
    folded: String,
}

/// Ordered, immutable list of known-agent substrings.
#[derive(Debug, Clone, Default)]
pub struct BotRegistry {
    entries: Vec<Entry>,
}

impl BotRegistry {
    /// Build a registry from patterns in priority order. Blank patterns are ignored.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = patterns
            .into_iter()
            .filter_map(|p| {
                let pattern = p.as_ref().trim();
                (!pattern.is_empty()).then(|| Entry {
                    pattern: pattern.to_string(),
                    folded: pattern.to_lowercase(),
                })
            })
            .collect();
        Self { entries }
    }

    /// Parse newline-delimited registry text. `#` lines are comments.
    pub fn parse(text: &str) -> Self {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.starts_with('#')),
        )
    }

    /// Load a registry file.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let registry = Self::parse(&text);
        tracing::info!(
            "Loaded {} known-bot patterns from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Load a registry file, degrading to an empty registry if it is missing or unreadable.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(registry) => registry,
            Err(e) => {
                tracing::warn!("{}; continuing with an empty registry", e);
                Self::default()
            }
        }
    }

    /// First registry pattern (in file order) contained in `agent`, case-insensitively.
    pub fn matching(&self, agent: &str) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let folded = agent.to_lowercase();
        self.entries
            .iter()
            .find(|entry| folded.contains(&entry.folded))
            .map(|entry| entry.pattern.as_str())
    }

    /// True if any registry pattern occurs in `agent`.
    pub fn is_known(&self, agent: &str) -> bool {
        self.matching(agent).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.pattern.as_str())
    }
}
