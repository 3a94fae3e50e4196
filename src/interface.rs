// Copyright 2025 Cornell University
// released under MIT License

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::declaration::Declaration;
use crate::errors::{TranslationError, TranslationResult};
use crate::ir::{Label, Process};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Container,
    Resource,
    Callback,
    Parameter,
    #[default]
    Other,
}

/// External classification of a C declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// e.g. `usb.probe`
    pub identifier: String,
    pub category: String,
    pub kind: InterfaceKind,
    pub declaration: Declaration,
}

/// Looks up interfaces by identifier. Queried while declaring variables and
/// never cached across translation runs.
pub trait InterfaceOracle {
    fn resolve(&self, identifier: &str) -> Option<&Interface>;
}

/// In-memory oracle, usually filled from a process description file
#[derive(Debug, Clone, Default)]
pub struct InterfaceMap {
    interfaces: FxHashMap<String, Interface>,
}

impl InterfaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the interface previously registered under the same identifier
    pub fn insert(&mut self, interface: Interface) -> Option<Interface> {
        self.interfaces
            .insert(interface.identifier.clone(), interface)
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

impl InterfaceOracle for InterfaceMap {
    fn resolve(&self, identifier: &str) -> Option<&Interface> {
        self.interfaces.get(identifier)
    }
}

/// Determines the C type of a label: its own declaration if it has one,
/// otherwise the first of its interfaces known to the oracle. A label with the
/// pointer role holds a pointer to the interface type.
pub fn resolve_label_type(
    process: &Process,
    label: &Label,
    oracle: &dyn InterfaceOracle,
) -> TranslationResult<Declaration> {
    if let Some(declaration) = &label.declaration {
        return Ok(declaration.clone());
    }
    let interface = label
        .interfaces
        .iter()
        .find_map(|identifier| oracle.resolve(identifier))
        .ok_or_else(|| TranslationError::UnresolvedType {
            process: process.name.clone(),
            label: label.name.clone(),
        })?;
    log::debug!(
        "label `{}` of `{}` resolved through interface `{}`",
        label.name,
        process.name,
        interface.identifier
    );
    if label.roles.pointer {
        Ok(interface.declaration.clone().pointer_to())
    } else {
        Ok(interface.declaration.clone())
    }
}
