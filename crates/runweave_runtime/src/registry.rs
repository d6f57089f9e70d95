//! Protocol kind registry.
//!
//! Maps a kind identifier to its declaration (label, parameters, approval
//! gate) and, when the kind can run in-process, to its handler. Populated
//! once at startup and shared read-only afterwards.

use crate::context::{HandlerResult, RunContext};
use indexmap::IndexMap;
use runweave_core::{CoreError, CoreResult, ParamValue};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Error from registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Kind already registered
    #[error("Protocol kind already registered: {0}")]
    AlreadyRegistered(String),

    /// Kind not found
    #[error("Protocol kind not found: {0}")]
    NotFound(String),
}

/// In-process implementation of a protocol kind
pub trait ProtocolHandler: Send + Sync {
    /// Execute against the run's private store
    ///
    /// # Errors
    ///
    /// Any error fails the run and is recorded as its cause
    fn execute(&self, ctx: &mut RunContext<'_>) -> HandlerResult;
}

/// Declared input of a kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Input name
    pub name: String,
    /// True when the input references another entity
    #[serde(default)]
    pub pointer: bool,
    /// Initial literal value for new runs
    #[serde(default)]
    pub default: Option<ParamValue>,
}

impl ParamSpec {
    /// Literal parameter with a default
    #[must_use]
    pub fn literal(name: impl Into<String>, default: impl Into<ParamValue>) -> Self {
        Self {
            name: name.into(),
            pointer: false,
            default: Some(default.into()),
        }
    }

    /// Pointer parameter
    #[must_use]
    pub fn pointer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pointer: true,
            default: None,
        }
    }
}

/// Serializable kind declaration, as found in `.config/protocols.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindDefinition {
    /// Kind identifier
    pub name: String,
    /// Label given to new runs
    pub label: String,
    /// Runs pause for approval
    #[serde(default)]
    pub interactive: bool,
    /// Declared inputs
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

/// A registered protocol kind
#[derive(Clone)]
pub struct ProtocolKind {
    /// Declaration
    pub definition: KindDefinition,
    /// Executor, when the kind runs in-process
    pub handler: Option<Arc<dyn ProtocolHandler>>,
}

impl ProtocolKind {
    /// Kind with no handler
    #[must_use]
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            definition: KindDefinition {
                name: name.into(),
                label: label.into(),
                interactive: false,
                params: Vec::new(),
            },
            handler: None,
        }
    }

    /// Kind from a declaration
    #[must_use]
    pub fn from_definition(definition: KindDefinition) -> Self {
        Self {
            definition,
            handler: None,
        }
    }

    /// Set approval gate
    #[must_use]
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.definition.interactive = interactive;
        self
    }

    /// Declare an input
    #[must_use]
    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.definition.params.push(param);
        self
    }

    /// Attach a handler
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn ProtocolHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Kind identifier
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Label for new runs
    #[must_use]
    pub fn label(&self) -> &str {
        &self.definition.label
    }

    /// Declared input by name
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.definition.params.iter().find(|p| p.name == name)
    }

    /// True when `name` is a declared pointer input
    #[must_use]
    pub fn is_pointer_param(&self, name: &str) -> bool {
        self.param(name).is_some_and(|p| p.pointer)
    }
}

impl std::fmt::Debug for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolKind")
            .field("definition", &self.definition)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Registry of protocol kinds
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: IndexMap<String, ProtocolKind>,
}

impl KindRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            kinds: IndexMap::new(),
        }
    }

    /// Register a kind
    ///
    /// # Errors
    ///
    /// Returns error if the name is taken
    pub fn register(&mut self, kind: ProtocolKind) -> Result<(), RegistryError> {
        let name = kind.name().to_string();
        if self.kinds.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.kinds.insert(name, kind);
        Ok(())
    }

    /// Attach a handler to a registered kind
    ///
    /// # Errors
    ///
    /// Returns error if the kind is not registered
    pub fn set_handler(&mut self, name: &str, handler: Arc<dyn ProtocolHandler>) -> Result<(), RegistryError> {
        self.kinds
            .get_mut(name)
            .map(|k| k.handler = Some(handler))
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Kind by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProtocolKind> {
        self.kinds.get(name)
    }

    /// Whether a kind is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Registered names in registration order
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.kinds.keys().cloned().collect()
    }

    /// Remove a kind
    ///
    /// # Errors
    ///
    /// Returns error if the kind is not registered
    pub fn unregister(&mut self, name: &str) -> Result<ProtocolKind, RegistryError> {
        self.kinds
            .shift_remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Number of kinds
    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// True when empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Register every declaration of a JSON file; existing names are skipped
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load_definitions(&mut self, path: &Path) -> CoreResult<usize> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, &e))?;
        let defs: Vec<KindDefinition> = serde_json::from_str(&text).map_err(|e| CoreError::ParseError {
            message: format!("{}: {}", path.display(), e),
        })?;
        let mut added = 0;
        for def in defs {
            if self.register(ProtocolKind::from_definition(def)).is_ok() {
                added += 1;
            }
        }
        Ok(added)
    }
}
