// Copyright 2025 Cornell University
// released under MIT License

use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::{FxHashMap, FxHashSet};
use std::ops::Index;

use crate::declaration::Declaration;
use crate::errors::{ProcessError, ProcessResult};
use crate::parser::parse_action_tree;
use crate::peers::PeerIndex;

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ActionId(u32);
entity_impl!(ActionId, "action");

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct LabelId(u32);
entity_impl!(LabelId, "label");

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ProcessId(u32);
entity_impl!(ProcessId, "process");

/// How many times a leaf action is performed before control moves on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Count {
    Fixed(u32),
    /// The value is read at runtime from the named label of the owning process
    Label(String),
}

impl Default for Count {
    fn default() -> Self {
        Count::Fixed(1)
    }
}

impl Count {
    pub fn is_single(&self) -> bool {
        matches!(self, Count::Fixed(1))
    }
}

/// Attributes shared by all named (atomic) actions
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Attributes {
    pub name: String,
    pub count: Count,
    pub comment: Option<String>,
    /// Label references (`%label%`) passed along with a signal
    pub parameters: Vec<String>,
    /// C expressions that guard the action
    pub condition: Vec<String>,
    /// C statements executed by the action
    pub statements: Vec<String>,
    pub pre_call: Vec<String>,
    pub post_call: Vec<String>,
    /// Must show up in the error trace
    pub trace_relevant: bool,
    /// The DSL text of the leaf, e.g. `[@probe[2]]`
    pub source: String,
}

impl Attributes {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            ..Default::default()
        }
    }
}

/// Binds a signal action to a function pointer stored in a label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    /// Label reference holding the function pointer
    pub target: String,
    /// Label reference receiving the return value
    pub retval: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub attrs: Attributes,
    pub broadcast: bool,
    pub callback: Option<Callback>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receive {
    pub attrs: Attributes,
    pub replicative: bool,
    pub callback: Option<Callback>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subprocess {
    pub attrs: Attributes,
    /// Root of the subprocess' own action tree
    pub body: Option<ActionId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Dispatch(Dispatch),
    Receive(Receive),
    /// Guarded block of conditions and statements, written `<name>`
    Block(Attributes),
    /// Jump to a named subtree of the same process, written `{name}`
    Subprocess(Subprocess),
    Choice(Vec<ActionId>),
    Concatenation(Vec<ActionId>),
    Parentheses(ActionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Dispatch,
    Receive,
    Condition,
    Subprocess,
    Choice,
    Concatenation,
    Parentheses,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Dispatch => write!(f, "dispatch"),
            ActionKind::Receive => write!(f, "receive"),
            ActionKind::Condition => write!(f, "condition"),
            ActionKind::Subprocess => write!(f, "subprocess"),
            ActionKind::Choice => write!(f, "choice"),
            ActionKind::Concatenation => write!(f, "concatenation"),
            ActionKind::Parentheses => write!(f, "parentheses"),
        }
    }
}

/// Distinguishes plain signals from callback invocations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Signal,
    Call,
    CallRetval,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Dispatch(_) => ActionKind::Dispatch,
            Action::Receive(_) => ActionKind::Receive,
            Action::Block(_) => ActionKind::Condition,
            Action::Subprocess(_) => ActionKind::Subprocess,
            Action::Choice(_) => ActionKind::Choice,
            Action::Concatenation(_) => ActionKind::Concatenation,
            Action::Parentheses(_) => ActionKind::Parentheses,
        }
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            Action::Dispatch(d) => Some(&d.attrs),
            Action::Receive(r) => Some(&r.attrs),
            Action::Block(attrs) => Some(attrs),
            Action::Subprocess(s) => Some(&s.attrs),
            _ => None,
        }
    }

    pub fn attributes_mut(&mut self) -> Option<&mut Attributes> {
        match self {
            Action::Dispatch(d) => Some(&mut d.attrs),
            Action::Receive(r) => Some(&mut r.attrs),
            Action::Block(attrs) => Some(attrs),
            Action::Subprocess(s) => Some(&mut s.attrs),
            _ => None,
        }
    }

    /// Operators have no name
    pub fn name(&self) -> Option<&str> {
        self.attributes().map(|attrs| attrs.name.as_str())
    }

    pub fn signal_kind(&self) -> Option<SignalKind> {
        match self {
            Action::Dispatch(d) if d.callback.is_some() => Some(SignalKind::Call),
            Action::Receive(r) if r.callback.is_some() => Some(SignalKind::CallRetval),
            Action::Dispatch(_) | Action::Receive(_) => Some(SignalKind::Signal),
            _ => None,
        }
    }

    pub fn is_callback(&self) -> bool {
        matches!(
            self.signal_kind(),
            Some(SignalKind::Call) | Some(SignalKind::CallRetval)
        )
    }

    /// Direct children in the tree. A subprocess is a jump, so its body is not a child.
    pub fn children(&self) -> Vec<ActionId> {
        match self {
            Action::Choice(alternatives) => alternatives.clone(),
            Action::Concatenation(sequence) => sequence.clone(),
            Action::Parentheses(inner) => vec![*inner],
            _ => vec![],
        }
    }
}

/// Roles a label may play, used when its type is resolved through interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LabelRoles {
    pub container: bool,
    pub resource: bool,
    pub callback: bool,
    pub parameter: bool,
    pub pointer: bool,
    pub retval: bool,
}

/// A process-local declaration slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Label {
    pub name: String,
    pub declaration: Option<Declaration>,
    /// Literal C initializer
    pub value: Option<String>,
    /// Candidate interface identifiers, resolved by an `InterfaceOracle`
    pub interfaces: Vec<String>,
    pub roles: LabelRoles,
}

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_declaration(name: impl Into<String>, declaration: Declaration) -> Self {
        Self {
            name: name.into(),
            declaration: Some(declaration),
            ..Default::default()
        }
    }
}

/// Order in which the trees of a process are visited: the root first, then each
/// subprocess body once, in the order the subprocesses are first jumped to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Outline {
    /// Preorder of the root tree
    pub root: Vec<ActionId>,
    /// Subprocess and preorder of its body
    pub subprocesses: Vec<(ActionId, Vec<ActionId>)>,
}

impl Outline {
    /// All tree nodes in visiting order (subprocess ids precede their bodies)
    pub fn nodes(&self) -> impl Iterator<Item = ActionId> + '_ {
        self.root.iter().copied().chain(
            self.subprocesses
                .iter()
                .flat_map(|(sub, body)| std::iter::once(*sub).chain(body.iter().copied())),
        )
    }

    /// Receive actions numbered from 1 in visiting order
    pub fn receives(&self, process: &Process) -> Vec<ActionId> {
        let mut seen = FxHashSet::default();
        self.nodes()
            .filter(|id| matches!(process[*id], Action::Receive(_)) && seen.insert(*id))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub name: String,
    pub category: String,
    pub comment: Option<String>,
    /// C file the generated code should be attached to
    pub file: Option<String>,
    labels: PrimaryMap<LabelId, Label>,
    labels_by_name: FxHashMap<String, LabelId>,
    actions: PrimaryMap<ActionId, Action>,
    actions_by_name: FxHashMap<String, ActionId>,
    root: Option<ActionId>,
}

impl Process {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            comment: None,
            file: None,
            labels: PrimaryMap::new(),
            labels_by_name: FxHashMap::default(),
            actions: PrimaryMap::new(),
            actions_by_name: FxHashMap::default(),
            root: None,
        }
    }

    /// Creates a process whose behaviour is given by `dsl`
    pub fn from_dsl(
        name: impl Into<String>,
        category: impl Into<String>,
        dsl: &str,
    ) -> ProcessResult<Self> {
        let mut process = Self::new(name, category);
        process.parse_root(dsl)?;
        Ok(process)
    }

    pub fn add_label(&mut self, label: Label) -> ProcessResult<LabelId> {
        if self.labels_by_name.contains_key(&label.name) {
            return Err(ProcessError::DuplicateLabel {
                process: self.name.clone(),
                label: label.name,
            });
        }
        let name = label.name.clone();
        let id = self.labels.push(label);
        self.labels_by_name.insert(name, id);
        Ok(id)
    }

    pub fn label_id(&self, name: &str) -> Option<LabelId> {
        self.labels_by_name.get(name).copied()
    }

    pub fn label(&self, name: &str) -> Option<&Label> {
        self.label_id(name).map(|id| &self.labels[id])
    }

    pub fn labels(&self) -> impl Iterator<Item = (LabelId, &Label)> {
        self.labels.iter()
    }

    pub fn action_id(&self, name: &str) -> Option<ActionId> {
        self.actions_by_name.get(name).copied()
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.action_id(name).map(|id| &self.actions[id])
    }

    pub fn action_mut(&mut self, id: ActionId) -> &mut Action {
        &mut self.actions[id]
    }

    /// All actions in creation order
    pub fn actions(&self) -> impl Iterator<Item = (ActionId, &Action)> {
        self.actions.iter()
    }

    /// Named actions in creation order
    pub fn named_actions(&self) -> impl Iterator<Item = (ActionId, &Action)> {
        self.actions.iter().filter(|(_, action)| action.name().is_some())
    }

    pub fn root(&self) -> Option<ActionId> {
        self.root
    }

    /// Registers a new action, indexing it by name when it has one.
    /// Callers must have checked for collisions beforehand.
    pub(crate) fn push_action(&mut self, action: Action) -> ActionId {
        let name = action.name().map(|name| name.to_string());
        let id = self.actions.push(action);
        if let Some(name) = name {
            self.actions_by_name.insert(name, id);
        }
        id
    }

    /// Parses `dsl` and makes it the behaviour of the process
    pub fn parse_root(&mut self, dsl: &str) -> ProcessResult<ActionId> {
        let root = parse_action_tree(self, dsl)?;
        self.root = Some(root);
        Ok(root)
    }

    /// Parses `dsl` as the body of the subprocess `name`, which must already be
    /// referenced by a `{name}` jump
    pub fn define_subprocess(&mut self, name: &str, dsl: &str) -> ProcessResult<ActionId> {
        let id = self
            .action_id(name)
            .ok_or_else(|| ProcessError::UnreachableAction {
                process: self.name.clone(),
                name: name.to_string(),
            })?;
        match &self.actions[id] {
            Action::Subprocess(Subprocess { body: None, .. }) => {}
            Action::Subprocess(Subprocess { attrs, .. }) => {
                return Err(ProcessError::NamingCollision {
                    process: self.name.clone(),
                    name: name.to_string(),
                    first: attrs.source.clone(),
                    second: dsl.to_string(),
                })
            }
            other => {
                return Err(ProcessError::KindMismatch {
                    process: self.name.clone(),
                    name: name.to_string(),
                    declared: ActionKind::Subprocess.to_string(),
                    used: other.kind().to_string(),
                })
            }
        }
        let body = parse_action_tree(self, dsl)?;
        if let Action::Subprocess(subprocess) = &mut self.actions[id] {
            subprocess.body = Some(body);
        }
        Ok(body)
    }

    pub fn outline(&self) -> Outline {
        let mut outline = Outline::default();
        let mut queued = FxHashSet::default();
        let mut queue = vec![];
        if let Some(root) = self.root {
            self.preorder(root, &mut outline.root, &mut queued, &mut queue);
        }
        let mut next = 0;
        while next < queue.len() {
            let sub = queue[next];
            let mut body_nodes = vec![];
            if let Action::Subprocess(Subprocess {
                body: Some(body), ..
            }) = &self.actions[sub]
            {
                self.preorder(*body, &mut body_nodes, &mut queued, &mut queue);
            }
            outline.subprocesses.push((sub, body_nodes));
            next += 1;
        }
        outline
    }

    fn preorder(
        &self,
        id: ActionId,
        out: &mut Vec<ActionId>,
        queued: &mut FxHashSet<ActionId>,
        queue: &mut Vec<ActionId>,
    ) {
        out.push(id);
        if let Action::Subprocess(_) = &self.actions[id] {
            if queued.insert(id) {
                queue.push(id);
            }
        }
        for child in self.actions[id].children() {
            self.preorder(child, out, queued, queue);
        }
    }

    /// Checks that every subprocess has a body, that every action is reachable
    /// from the root and that dynamic repetition counts name existing labels
    pub fn validate(&self) -> ProcessResult<()> {
        let Some(_) = self.root else {
            return Err(ProcessError::Grammar {
                fragment: String::new(),
                message: format!("process `{}` has no behaviour", self.name),
                span: (0, 0),
            });
        };
        let outline = self.outline();
        for (sub, _) in outline.subprocesses.iter() {
            if let Action::Subprocess(Subprocess { attrs, body: None }) = &self.actions[*sub] {
                return Err(ProcessError::UnresolvedSubprocess {
                    process: self.name.clone(),
                    name: attrs.name.clone(),
                });
            }
        }
        let reachable: FxHashSet<ActionId> = outline.nodes().collect();
        for (id, action) in self.named_actions() {
            if !reachable.contains(&id) {
                return Err(ProcessError::UnreachableAction {
                    process: self.name.clone(),
                    name: action.name().unwrap_or_default().to_string(),
                });
            }
            if let Some(Attributes {
                count: Count::Label(label),
                ..
            }) = action.attributes()
            {
                if self.label_id(label).is_none() {
                    return Err(ProcessError::UnknownLabel {
                        process: self.name.clone(),
                        label: label.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Index<ActionId> for Process {
    type Output = Action;

    fn index(&self, index: ActionId) -> &Self::Output {
        &self.actions[index]
    }
}

impl Index<LabelId> for Process {
    type Output = Label;

    fn index(&self, index: LabelId) -> &Self::Output {
        &self.labels[index]
    }
}

/// One entry process, model processes and environment processes.
/// Names are unique across the three groups.
#[derive(Debug, Clone, Default)]
pub struct ProcessCollection {
    processes: PrimaryMap<ProcessId, Process>,
    by_name: FxHashMap<String, ProcessId>,
    entry: Option<ProcessId>,
    models: Vec<ProcessId>,
    environment: Vec<ProcessId>,
    pub(crate) peers: Option<PeerIndex>,
}

impl ProcessCollection {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, process: Process) -> ProcessResult<ProcessId> {
        if self.by_name.contains_key(&process.name) {
            return Err(ProcessError::DuplicateProcess { name: process.name });
        }
        process.validate()?;
        let name = process.name.clone();
        let id = self.processes.push(process);
        self.by_name.insert(name, id);
        // any earlier resolution is stale now
        self.peers = None;
        Ok(id)
    }

    pub fn set_entry(&mut self, process: Process) -> ProcessResult<ProcessId> {
        if let Some(entry) = self.entry {
            return Err(ProcessError::DuplicateProcess {
                name: self.processes[entry].name.clone(),
            });
        }
        let id = self.insert(process)?;
        self.entry = Some(id);
        Ok(id)
    }

    pub fn add_model(&mut self, process: Process) -> ProcessResult<ProcessId> {
        let id = self.insert(process)?;
        self.models.push(id);
        Ok(id)
    }

    pub fn add_environment(&mut self, process: Process) -> ProcessResult<ProcessId> {
        let id = self.insert(process)?;
        self.environment.push(id);
        Ok(id)
    }

    pub fn entry(&self) -> Option<ProcessId> {
        self.entry
    }

    pub fn models(&self) -> &[ProcessId] {
        &self.models
    }

    pub fn environment(&self) -> &[ProcessId] {
        &self.environment
    }

    pub fn by_name(&self, name: &str) -> Option<ProcessId> {
        self.by_name.get(name).copied()
    }

    /// Entry first, then models, then environment processes, each in insertion order
    pub fn ordered(&self) -> Vec<ProcessId> {
        self.entry
            .iter()
            .chain(self.models.iter())
            .chain(self.environment.iter())
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// The peer relation, available once `establish_peers` has run
    pub fn peers(&self) -> Option<&PeerIndex> {
        self.peers.as_ref()
    }
}

impl Index<ProcessId> for ProcessCollection {
    type Output = Process;

    fn index(&self, index: ProcessId) -> &Self::Output {
        &self.processes[index]
    }
}
