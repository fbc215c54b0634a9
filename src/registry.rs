use std::collections::{BTreeMap, HashSet};

use derivative::Derivative;
use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, error};

use crate::httpserver;

pub const HTTP_PIPELINE_KIND: &str = "HTTPPipeline";

/// Checks the `config` of a spec declared with a given kind.
pub type SpecValidator = fn(&serde_json::Value) -> anyhow::Result<()>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("empty kind")]
    EmptyKind,
    #[error("conflict kind: {0}")]
    KindExists(String),
    #[error("{kind}: repeated depend object kind: {depend}")]
    RepeatedDependency { kind: String, depend: String },
    #[error("depend cycle: {0}")]
    DependencyCycle(String),
    #[error("{kind}: unresolved depend object kind: {depend}")]
    UnresolvedDependency { kind: String, depend: String },
    #[error("unknown kind: {0}")]
    UnknownKind(String),
    #[error("invalid {kind} spec: {reason}")]
    InvalidSpec { kind: String, reason: String },
}

#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct ObjectKind {
    pub kind: String,
    pub depends_on: Vec<String>,
    #[derivative(Debug = "ignore")]
    pub validate: SpecValidator,
}

impl ObjectKind {
    pub fn new(kind: impl Into<String>, validate: SpecValidator) -> Self {
        Self {
            kind: kind.into(),
            depends_on: Vec::new(),
            validate,
        }
    }

    pub fn depends_on(mut self, kind: impl Into<String>) -> Self {
        self.depends_on.push(kind.into());
        self
    }
}

/// Known object kinds and the dependencies declared between them.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    kinds: BTreeMap<String, ObjectKind>,
}

fn validate_object_config(config: &serde_json::Value) -> anyhow::Result<()> {
    anyhow::ensure!(
        config.is_null() || config.is_object(),
        "config must be an object"
    );
    Ok(())
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();

        // both registrations are static and acyclic
        let kinds = [
            ObjectKind::new(httpserver::KIND, httpserver::validate_config),
            ObjectKind::new(HTTP_PIPELINE_KIND, validate_object_config)
                .depends_on(httpserver::KIND),
        ];
        for kind in kinds {
            if let Err(e) = registry.register(kind) {
                error!("BUG: register builtin kind failed, err: {e}");
            }
        }

        registry
    }

    /// Register a kind. Dependencies may name kinds registered later, but the
    /// dependency graph must stay acyclic.
    pub fn register(&mut self, object: ObjectKind) -> Result<(), RegistryError> {
        if object.kind.is_empty() {
            return Err(RegistryError::EmptyKind);
        }

        if self.kinds.contains_key(&object.kind) {
            return Err(RegistryError::KindExists(object.kind));
        }

        let mut seen = HashSet::new();
        for depend in object.depends_on.iter() {
            if !seen.insert(depend) {
                return Err(RegistryError::RepeatedDependency {
                    kind: object.kind.clone(),
                    depend: depend.clone(),
                });
            }
        }

        if let Some(cycle) = self.find_cycle(&object) {
            return Err(RegistryError::DependencyCycle(cycle.iter().join(" -> ")));
        }

        debug!(
            "register object kind {}, depends on [{}]",
            object.kind,
            object.depends_on.iter().join(", ")
        );
        self.kinds.insert(object.kind.clone(), object);

        Ok(())
    }

    // depth-first search from the new kind back to itself
    fn find_cycle(&self, object: &ObjectKind) -> Option<Vec<String>> {
        let mut stack: Vec<(String, Vec<String>)> = object
            .depends_on
            .iter()
            .map(|d| (d.clone(), vec![object.kind.clone(), d.clone()]))
            .collect();
        let mut visited = HashSet::new();

        while let Some((kind, path)) = stack.pop() {
            if kind == object.kind {
                return Some(path);
            }

            if !visited.insert(kind.clone()) {
                continue;
            }

            if let Some(known) = self.kinds.get(&kind) {
                for depend in known.depends_on.iter() {
                    let mut next = path.clone();
                    next.push(depend.clone());
                    stack.push((depend.clone(), next));
                }
            }
        }

        None
    }

    /// Every declared dependency names a registered kind.
    pub fn check_dependencies(&self) -> Result<(), RegistryError> {
        for object in self.kinds.values() {
            for depend in object.depends_on.iter() {
                if !self.kinds.contains_key(depend) {
                    return Err(RegistryError::UnresolvedDependency {
                        kind: object.kind.clone(),
                        depend: depend.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn kinds(&self) -> Vec<String> {
        self.kinds.keys().cloned().collect()
    }

    pub fn get(&self, kind: &str) -> Option<&ObjectKind> {
        self.kinds.get(kind)
    }

    pub fn validate(&self, kind: &str, config: &serde_json::Value) -> Result<(), RegistryError> {
        let object = self
            .kinds
            .get(kind)
            .ok_or_else(|| RegistryError::UnknownKind(kind.to_string()))?;

        (object.validate)(config).map_err(|e| RegistryError::InvalidSpec {
            kind: kind.to_string(),
            reason: format!("{e:#}"),
        })
    }
}
