// Copyright 2025 Cornell University
// released under MIT License

//! JSON process descriptions. A description names the processes of a
//! collection, gives each one its DSL behaviour, its labels and the attributes
//! of every action the DSL mentions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::declaration::Declaration;
use crate::errors::{DescriptionError, ProcessError, ProcessResult};
use crate::interface::{Interface, InterfaceKind, InterfaceMap};
use crate::ir::*;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionDescription {
    pub entry: Option<ProcessDescription>,
    pub models: Vec<ProcessDescription>,
    pub environment: Vec<ProcessDescription>,
    pub interfaces: Vec<InterfaceDescription>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessDescription {
    pub name: String,
    pub category: String,
    pub comment: Option<String>,
    pub file: Option<String>,
    /// Behaviour in the process DSL
    pub process: String,
    pub labels: BTreeMap<String, LabelDescription>,
    pub actions: BTreeMap<String, ActionDescription>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelDescription {
    /// C type, e.g. `struct usb_device *`
    pub declaration: Option<String>,
    pub value: Option<String>,
    pub interfaces: Vec<String>,
    pub container: bool,
    pub resource: bool,
    pub callback: bool,
    pub parameter: bool,
    pub pointer: bool,
    pub retval: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescribedKind {
    Dispatch,
    Receive,
    Condition,
    Subprocess,
}

impl DescribedKind {
    fn action_kind(self) -> ActionKind {
        match self {
            DescribedKind::Dispatch => ActionKind::Dispatch,
            DescribedKind::Receive => ActionKind::Receive,
            DescribedKind::Condition => ActionKind::Condition,
            DescribedKind::Subprocess => ActionKind::Subprocess,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescription {
    pub kind: DescribedKind,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub condition: Vec<String>,
    #[serde(default)]
    pub statements: Vec<String>,
    #[serde(default)]
    pub pre_call: Vec<String>,
    #[serde(default)]
    pub post_call: Vec<String>,
    /// The signal invokes the function pointer in `target`
    #[serde(default)]
    pub callback: bool,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub retval: Option<String>,
    #[serde(default)]
    pub trace: bool,
    /// Body of a subprocess in the process DSL
    #[serde(default)]
    pub process: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescription {
    pub identifier: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub kind: InterfaceKind,
    pub declaration: String,
}

/// Everything a description yields
#[derive(Debug, Clone, Default)]
pub struct Loaded {
    pub collection: ProcessCollection,
    pub interfaces: InterfaceMap,
}

pub fn load_file(path: impl AsRef<Path>) -> Result<Loaded, DescriptionError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    load_str(&text)
}

pub fn load_str(text: &str) -> Result<Loaded, DescriptionError> {
    let description: CollectionDescription = serde_json::from_str(text)?;
    description.build()
}

impl CollectionDescription {
    pub fn build(&self) -> Result<Loaded, DescriptionError> {
        let mut interfaces = InterfaceMap::new();
        for interface in self.interfaces.iter() {
            let previous = interfaces.insert(Interface {
                identifier: interface.identifier.clone(),
                category: interface.category.clone(),
                kind: interface.kind,
                declaration: Declaration::parse(&interface.declaration)?,
            });
            if previous.is_some() {
                log::warn!("interface `{}` is described twice", interface.identifier);
            }
        }

        let mut collection = ProcessCollection::new();
        if let Some(entry) = &self.entry {
            let process = entry.build()?;
            collection
                .set_entry(process)
                .map_err(|e| collection_error(&entry.name, e))?;
        }
        for model in self.models.iter() {
            let process = model.build()?;
            collection
                .add_model(process)
                .map_err(|e| collection_error(&model.name, e))?;
        }
        for environment in self.environment.iter() {
            let process = environment.build()?;
            collection
                .add_environment(process)
                .map_err(|e| collection_error(&environment.name, e))?;
        }
        log::info!(
            "loaded {} processes and {} interfaces",
            collection.len(),
            interfaces.len()
        );
        Ok(Loaded {
            collection,
            interfaces,
        })
    }
}

fn collection_error(process: &str, error: ProcessError) -> DescriptionError {
    match error {
        ProcessError::DuplicateProcess { .. } => DescriptionError::Collection(error),
        source => DescriptionError::Process {
            process: process.to_string(),
            source,
        },
    }
}

impl ProcessDescription {
    /// Builds the process and checks it against its action descriptions
    pub fn build(&self) -> Result<Process, DescriptionError> {
        let error = |source: ProcessError| DescriptionError::Process {
            process: self.name.clone(),
            source,
        };
        let dsl_error = |text: &str, source: ProcessError| DescriptionError::Dsl {
            process: self.name.clone(),
            text: text.to_string(),
            source,
        };

        let mut process = Process::new(&self.name, &self.category);
        process.comment = self.comment.clone();
        process.file = self.file.clone();
        for (name, label) in self.labels.iter() {
            process.add_label(label.build(name)?).map_err(error)?;
        }

        process
            .parse_root(&self.process)
            .map_err(|e| dsl_error(&self.process, e))?;
        // bodies may jump to further subprocesses
        while let Some(name) = pending_subprocess(&process) {
            let body = self.subprocess_body(&process, &name).map_err(error)?;
            process
                .define_subprocess(&name, body)
                .map_err(|e| dsl_error(body, e))?;
        }

        let named: Vec<(ActionId, String)> = process
            .named_actions()
            .map(|(id, action)| (id, action.name().unwrap_or_default().to_string()))
            .collect();
        for (id, name) in named.iter() {
            let description = self.described(&process, name).map_err(error)?;
            apply(&self.name, process.action_mut(*id), description).map_err(error)?;
        }
        for name in self.actions.keys() {
            if process.action_id(name).is_none() {
                return Err(error(ProcessError::UnreachableAction {
                    process: self.name.clone(),
                    name: name.clone(),
                }));
            }
        }
        log::debug!(
            "built process `{}` with {} actions",
            self.name,
            named.len()
        );
        Ok(process)
    }

    /// Description of the parsed action `name`, which must have the same kind
    fn described(&self, process: &Process, name: &str) -> ProcessResult<&ActionDescription> {
        let description =
            self.actions
                .get(name)
                .ok_or_else(|| ProcessError::UndeclaredAction {
                    process: self.name.clone(),
                    name: name.to_string(),
                })?;
        let used = process
            .action(name)
            .map(Action::kind)
            .unwrap_or(ActionKind::Condition);
        if description.kind.action_kind() != used {
            return Err(ProcessError::KindMismatch {
                process: self.name.clone(),
                name: name.to_string(),
                declared: description.kind.action_kind().to_string(),
                used: used.to_string(),
            });
        }
        Ok(description)
    }

    fn subprocess_body(&self, process: &Process, name: &str) -> ProcessResult<&str> {
        let description = self.described(process, name)?;
        description
            .process
            .as_deref()
            .ok_or_else(|| ProcessError::MissingSpecification {
                process: self.name.clone(),
                action: name.to_string(),
                field: "process".to_string(),
            })
    }
}

fn pending_subprocess(process: &Process) -> Option<String> {
    process.named_actions().find_map(|(_, action)| match action {
        Action::Subprocess(Subprocess { attrs, body: None }) => Some(attrs.name.clone()),
        _ => None,
    })
}

impl LabelDescription {
    fn build(&self, name: &str) -> Result<Label, DescriptionError> {
        let declaration = self
            .declaration
            .as_deref()
            .map(Declaration::parse)
            .transpose()?;
        Ok(Label {
            name: name.to_string(),
            declaration,
            value: self.value.clone(),
            interfaces: self.interfaces.clone(),
            roles: LabelRoles {
                container: self.container,
                resource: self.resource,
                callback: self.callback,
                parameter: self.parameter,
                pointer: self.pointer,
                retval: self.retval,
            },
        })
    }
}

/// Copies the described attributes onto a parsed action
fn apply(process: &str, action: &mut Action, description: &ActionDescription) -> ProcessResult<()> {
    let callback = if description.callback {
        Some(Callback {
            target: description.target.clone().unwrap_or_default(),
            retval: description.retval.clone(),
        })
    } else {
        None
    };
    match action {
        Action::Dispatch(dispatch) => {
            if let Some(callback) = &callback {
                if callback.target.is_empty() {
                    return Err(ProcessError::MissingSpecification {
                        process: process.to_string(),
                        action: dispatch.attrs.name.clone(),
                        field: "target".to_string(),
                    });
                }
            }
            dispatch.callback = callback;
        }
        Action::Receive(receive) => receive.callback = callback,
        _ => {}
    }
    if let Some(attrs) = action.attributes_mut() {
        attrs.comment = description.comment.clone();
        attrs.parameters = description.parameters.clone();
        attrs.condition = description.condition.clone();
        attrs.statements = description.statements.clone();
        attrs.pre_call = description.pre_call.clone();
        attrs.post_call = description.post_call.clone();
        attrs.trace_relevant = description.trace;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::InterfaceOracle;

    fn process(dsl: &str, actions: serde_json::Value) -> ProcessDescription {
        serde_json::from_value(serde_json::json!({
            "name": "usb",
            "category": "usb",
            "process": dsl,
            "actions": actions,
        }))
        .unwrap()
    }

    #[test]
    fn subprocess_bodies_are_parsed_on_demand() {
        let description = process(
            "(!register).{main}",
            serde_json::json!({
                "register": {"kind": "receive", "parameters": ["%drv%"]},
                "main": {"kind": "subprocess", "process": "[probe].{loop}"},
                "loop": {"kind": "subprocess", "process": "[remove].{main} | (deregister)"},
                "probe": {"kind": "dispatch", "callback": true, "target": "%probe%"},
                "remove": {"kind": "dispatch"},
                "deregister": {"kind": "receive"}
            }),
        );
        let built = description.build().unwrap();
        built.validate().unwrap();
        assert_eq!(built.outline().subprocesses.len(), 2);
        let Some(Action::Dispatch(probe)) = built.action("probe") else {
            panic!("probe should be a dispatch");
        };
        assert_eq!(probe.callback.as_ref().unwrap().target, "%probe%");
        assert_eq!(
            built.action("register").unwrap().attributes().unwrap().parameters,
            vec!["%drv%".to_string()]
        );
    }

    #[test]
    fn description_must_match_the_dsl() {
        let undeclared = process("[a].[b]", serde_json::json!({"a": {"kind": "dispatch"}}));
        assert!(matches!(
            undeclared.build(),
            Err(DescriptionError::Process { source: ProcessError::UndeclaredAction { name, .. }, .. }) if name == "b"
        ));

        let unused = process(
            "[a]",
            serde_json::json!({"a": {"kind": "dispatch"}, "c": {"kind": "condition"}}),
        );
        assert!(matches!(
            unused.build(),
            Err(DescriptionError::Process { source: ProcessError::UnreachableAction { name, .. }, .. }) if name == "c"
        ));

        let mismatch = process("[a]", serde_json::json!({"a": {"kind": "receive"}}));
        let Err(DescriptionError::Process { source, .. }) = mismatch.build() else {
            panic!("kind mismatch expected");
        };
        assert_eq!(
            source,
            ProcessError::KindMismatch {
                process: "usb".to_string(),
                name: "a".to_string(),
                declared: "receive".to_string(),
                used: "dispatch".to_string(),
            }
        );
    }

    #[test]
    fn required_fields_are_reported() {
        let no_body = process("{s}", serde_json::json!({"s": {"kind": "subprocess"}}));
        assert!(matches!(
            no_body.build(),
            Err(DescriptionError::Process { source: ProcessError::MissingSpecification { field, .. }, .. }) if field == "process"
        ));
        let no_target = process("[cb]", serde_json::json!({"cb": {"kind": "dispatch", "callback": true}}));
        assert!(matches!(
            no_target.build(),
            Err(DescriptionError::Process { source: ProcessError::MissingSpecification { field, .. }, .. }) if field == "target"
        ));
    }

    #[test]
    fn grammar_errors_keep_their_text() {
        let broken = process("[a] | ", serde_json::json!({"a": {"kind": "dispatch"}}));
        let Err(DescriptionError::Dsl { text, source, .. }) = broken.build() else {
            panic!("grammar error expected");
        };
        assert_eq!(text, "[a] | ");
        assert!(source.span().is_some());
    }

    #[test]
    fn collection_with_interfaces() {
        let loaded = load_str(
            r#"{
                "entry": {"name": "main", "process": "[register]",
                          "actions": {"register": {"kind": "dispatch", "parameters": ["%drv%"]}},
                          "labels": {"drv": {"interfaces": ["usb.driver"], "pointer": true}}},
                "models": [{"name": "usb", "process": "(register)",
                            "actions": {"register": {"kind": "receive"}}}],
                "interfaces": [{"identifier": "usb.driver", "kind": "container",
                                "declaration": "struct usb_driver"}]
            }"#,
        )
        .unwrap();
        assert_eq!(loaded.collection.len(), 2);
        assert_eq!(loaded.collection.models().len(), 1);
        let interface = loaded.interfaces.resolve("usb.driver").unwrap();
        assert_eq!(interface.kind, InterfaceKind::Container);

        let duplicate = load_str(
            r#"{"models": [{"name": "m", "process": "<a>", "actions": {"a": {"kind": "condition"}}},
                           {"name": "m", "process": "<b>", "actions": {"b": {"kind": "condition"}}}]}"#,
        );
        assert!(matches!(
            duplicate,
            Err(DescriptionError::Collection(ProcessError::DuplicateProcess { .. }))
        ));
    }
}
