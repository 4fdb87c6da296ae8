//! Sizer registry: catalogue of available sizing strategies.
//!
//! Accounts name their sizer in configuration (`sizer: kelly`). The
//! coordinator resolves that name here at startup and holds one instance
//! per account. Lookup is by exact, case-sensitive name; `list()` preserves
//! insertion order.

use crate::{KellySizer, PositionSizing};

/// Thread-safe factory producing a fresh sizer.
pub type SizerFactory = Box<dyn Fn() -> Box<dyn PositionSizing> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SizerMeta {
    pub name: String,
    pub description: String,
}

impl SizerMeta {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateName { name: String },
    UnknownSizer { name: String },
    EmptyName,
    /// The factory produced a sizer reporting a different name.
    NameMismatch { registered: String, reported: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName { name } => write!(f, "sizer '{name}' is already registered"),
            Self::UnknownSizer { name } => write!(f, "no sizer named '{name}' is registered"),
            Self::EmptyName => write!(f, "sizer name must not be empty"),
            Self::NameMismatch {
                registered,
                reported,
            } => write!(
                f,
                "sizer registered as '{registered}' reports name '{reported}'"
            ),
        }
    }
}

impl std::error::Error for RegistryError {}

// ---------------------------------------------------------------------------
// SizerRegistry
// ---------------------------------------------------------------------------

struct RegistryEntry {
    meta: SizerMeta,
    factory: SizerFactory,
}

pub struct SizerRegistry {
    entries: Vec<RegistryEntry>,
}

impl SizerRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registry pre-loaded with `kelly` and `half_kelly`.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        // Names are distinct constants; registration into an empty registry
        // cannot collide.
        let _ = reg.register(
            SizerMeta::new("kelly", "Risk-budget-constrained full Kelly"),
            || Box::new(KellySizer::full()),
        );
        let _ = reg.register(
            SizerMeta::new("half_kelly", "Risk-budget-constrained half Kelly"),
            || Box::new(KellySizer::half()),
        );
        reg
    }

    pub fn register<F>(&mut self, meta: SizerMeta, factory: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn PositionSizing> + Send + Sync + 'static,
    {
        if meta.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.contains(&meta.name) {
            return Err(RegistryError::DuplicateName {
                name: meta.name.clone(),
            });
        }
        self.entries.push(RegistryEntry {
            meta,
            factory: Box::new(factory),
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.meta.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn list(&self) -> Vec<&SizerMeta> {
        self.entries.iter().map(|e| &e.meta).collect()
    }

    pub fn lookup(&self, name: &str) -> Result<&SizerMeta, RegistryError> {
        self.entry(name).map(|e| &e.meta)
    }

    /// Fresh instance from the named factory. The instance must report the
    /// name it was registered under.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn PositionSizing>, RegistryError> {
        let entry = self.entry(name)?;
        let sizer = (entry.factory)();
        if sizer.name() != entry.meta.name {
            return Err(RegistryError::NameMismatch {
                registered: entry.meta.name.clone(),
                reported: sizer.name().to_string(),
            });
        }
        Ok(sizer)
    }

    pub fn deregister(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.meta.name != name);
        self.entries.len() < before
    }

    fn entry(&self, name: &str) -> Result<&RegistryEntry, RegistryError> {
        self.entries
            .iter()
            .find(|e| e.meta.name == name)
            .ok_or_else(|| RegistryError::UnknownSizer {
                name: name.to_string(),
            })
    }
}

impl Default for SizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
