// Copyright 2025 Cornell University
// released under MIT License

//! Lowering of automata into C control functions. Both backends share the
//! helpers in this module: nondeterministic choice, rendezvous, callback
//! invocation and variable declaration.

pub mod comment;
pub mod label;
pub mod state;

use itertools::Itertools;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use label::LabelTranslator;
pub use state::StateTranslator;

use crate::automaton::{substitute_foreign, Automaton, AutomatonId};
use crate::errors::{TranslationError, TranslationResult};
use crate::interface::{resolve_label_type, InterfaceOracle};
use crate::ir::{ActionId, Attributes, Count, Dispatch, Process, ProcessCollection, ProcessId};
use crate::peers::{Peer, PeerIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One state variable per automaton, all polled from a single loop
    State,
    /// Structured code with `goto` labels
    #[default]
    Label,
}

/// What the `default` branch of an n-way choice does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChoiceDefault {
    /// The branch is unreachable
    #[default]
    Terminal,
    /// The choice is made again
    Loop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    #[default]
    Sequential,
    /// Each control function runs as a separate thread
    Thread,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub backend: Backend,
    /// Name of the generated main function
    pub entry_point: String,
    /// File receiving the entry point and every process without a file of its own
    pub entry_file: String,
    pub nested_automata: bool,
    pub choice_default: ChoiceDefault,
    pub function_kind: FunctionKind,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            entry_point: "ldv_main".to_string(),
            entry_file: "environment_model.c".to_string(),
            nested_automata: false,
            choice_default: ChoiceDefault::default(),
            function_kind: FunctionKind::default(),
        }
    }
}

/// A file-scope variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Global {
    /// Declaration without the trailing semicolon, e.g. `int ldv_0_state`
    pub declaration: String,
    pub initializer: Option<String>,
}

impl Global {
    pub fn new(declaration: impl Into<String>, initializer: Option<&str>) -> Self {
        Self {
            declaration: declaration.into(),
            initializer: initializer.map(|i| i.to_string()),
        }
    }

    pub fn definition(&self) -> String {
        match &self.initializer {
            Some(initializer) => format!("{} = {};", self.declaration, initializer),
            None => format!("{};", self.declaration),
        }
    }

    pub fn external(&self) -> String {
        format!("extern {};", self.declaration)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFunction {
    pub function_name: String,
    /// e.g. `void ldv_usb_1(void)`
    pub signature: String,
    /// C file the function is attached to
    pub file: String,
    pub declarations: Vec<Global>,
    pub body: Vec<String>,
}

impl ControlFunction {
    pub fn prototype(&self) -> String {
        format!("{};", self.signature)
    }

    /// The complete C definition
    pub fn definition(&self) -> String {
        let mut out = format!("{}\n{{\n", self.signature);
        for line in indent(self.body.clone()) {
            out.push_str(&line);
            out.push('\n');
        }
        out.push('}');
        out
    }
}

/// Output of one translation run, ready to be woven into C files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CModel {
    pub entry_point: String,
    pub files_to_declarations: BTreeMap<String, Vec<String>>,
    pub files_to_definitions: BTreeMap<String, Vec<String>>,
    pub functions: Vec<ControlFunction>,
}

impl CModel {
    pub fn new(entry_point: String, functions: Vec<ControlFunction>) -> Self {
        let mut files_to_declarations: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut files_to_definitions: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for function in functions.iter() {
            files_to_declarations
                .entry(function.file.clone())
                .or_default()
                .extend(function.declarations.iter().map(Global::definition));
            files_to_definitions
                .entry(function.file.clone())
                .or_default()
                .push(function.definition());
        }
        // control functions reach into the globals of other files
        for (file, declarations) in files_to_declarations.iter_mut() {
            for function in functions.iter().filter(|f| &f.file != file) {
                declarations.extend(function.declarations.iter().map(Global::external));
                declarations.push(function.prototype());
            }
        }
        Self {
            entry_point,
            files_to_declarations,
            files_to_definitions,
            functions,
        }
    }
}

/// Shared capability of the code generators
pub trait Translator {
    /// Generates the control function of one automaton
    fn translate(&mut self, automaton: &mut Automaton<'_>) -> TranslationResult<ControlFunction>;

    /// Turns the translated automata into the final functions, entry point included
    fn assemble(&self, functions: Vec<ControlFunction>) -> TranslationResult<Vec<ControlFunction>>;
}

/// Read-only view of the collection shared by a translation run
pub struct TranslationContext<'a> {
    pub collection: &'a ProcessCollection,
    pub peers: &'a PeerIndex,
    pub oracle: &'a dyn InterfaceOracle,
    pub config: &'a TranslationConfig,
    automata: FxHashMap<ProcessId, AutomatonId>,
}

impl<'a> TranslationContext<'a> {
    pub fn new(
        collection: &'a ProcessCollection,
        oracle: &'a dyn InterfaceOracle,
        config: &'a TranslationConfig,
    ) -> TranslationResult<Self> {
        let peers = collection
            .peers()
            .ok_or(TranslationError::PeersNotEstablished)?;
        // same numbering as `Automaton::instantiate`
        let automata = collection
            .ordered()
            .into_iter()
            .enumerate()
            .map(|(index, process)| (process, AutomatonId::from_u32(index as u32)))
            .collect();
        Ok(Self {
            collection,
            peers,
            oracle,
            config,
            automata,
        })
    }

    pub fn automaton_of(&self, process: ProcessId) -> AutomatonId {
        self.automata[&process]
    }

    pub fn peers_of(&self, automaton: &Automaton, action: ActionId) -> &'a [Peer] {
        self.peers.peers(automaton.process_id, action)
    }

    pub fn file_of(&self, process: &Process) -> String {
        process
            .file
            .clone()
            .unwrap_or_else(|| self.config.entry_file.clone())
    }

    pub fn function_name(&self, automaton: &Automaton) -> String {
        format!("ldv_{}_{}", c_identifier(automaton.name()), automaton.id.as_u32())
    }

    /// Lines for the `default` branch of an n-way choice inside a polling loop
    pub fn polling_default(&self) -> Vec<String> {
        match self.config.choice_default {
            ChoiceDefault::Terminal => vec![assume("0")],
            ChoiceDefault::Loop => vec!["break;".to_string()],
        }
    }

    /// Main function that repeatedly runs one of `calls`
    pub fn entry_point(&self, calls: Vec<String>, declarations: Vec<Global>) -> ControlFunction {
        let branches = calls.into_iter().map(|call| vec![call]).collect();
        let mut body = vec![
            comment::artificial("Run the control functions of all automata."),
            "while (1) {".to_string(),
        ];
        body.extend(indent(choice(branches, self.polling_default())));
        body.push("}".to_string());
        ControlFunction {
            function_name: self.config.entry_point.clone(),
            signature: format!("void {}(void)", self.config.entry_point),
            file: self.config.entry_file.clone(),
            declarations,
            body,
        }
    }
}

/// Translates every automaton of an established collection
pub fn translate_collection(
    collection: &ProcessCollection,
    oracle: &dyn InterfaceOracle,
    config: &TranslationConfig,
) -> TranslationResult<CModel> {
    if collection.entry().is_none() {
        return Err(TranslationError::MissingEntry);
    }
    let context = TranslationContext::new(collection, oracle, config)?;
    let mut translator: Box<dyn Translator + '_> = match config.backend {
        Backend::State => Box::new(StateTranslator::new(context)?),
        Backend::Label => Box::new(LabelTranslator::new(context)?),
    };
    let mut automata = Automaton::instantiate(collection);
    let functions = automata
        .values_mut()
        .map(|automaton| translator.translate(automaton))
        .collect::<TranslationResult<Vec<_>>>()?;
    let functions = translator.assemble(functions)?;
    log::info!(
        "generated {} control functions with the {:?} backend",
        functions.len(),
        config.backend
    );
    Ok(CModel::new(config.entry_point.clone(), functions))
}

/// Replaces characters that cannot appear in a C identifier
pub fn c_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub(crate) fn indent(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .map(|line| {
            if line.is_empty() {
                line
            } else {
                format!("    {line}")
            }
        })
        .collect()
}

pub(crate) fn assume(condition: &str) -> String {
    format!("ldv_assume({condition});")
}

/// Joins C conditions with `&&`, parenthesizing them when there are several
pub(crate) fn conjunction(conditions: &[String]) -> Option<String> {
    match conditions {
        [] => None,
        [single] => Some(single.clone()),
        _ => Some(conditions.iter().map(|c| format!("({c})")).join(" && ")),
    }
}

/// Nondeterministic choice between `branches`, kept in their given order: two
/// branches become an `if`/`else`, more become a `switch` ending in `default`.
pub(crate) fn choice(mut branches: Vec<Vec<String>>, default: Vec<String>) -> Vec<String> {
    match branches.len() {
        0 => vec![],
        1 => branches.remove(0),
        2 => {
            let second = branches.remove(1);
            let first = branches.remove(0);
            let mut lines = vec!["if (ldv_undef_bool()) {".to_string()];
            lines.extend(indent(first));
            lines.push("}".to_string());
            lines.push("else {".to_string());
            lines.extend(indent(second));
            lines.push("}".to_string());
            lines
        }
        _ => {
            let mut lines = vec!["switch (ldv_undef_int()) {".to_string()];
            for (index, branch) in branches.into_iter().enumerate() {
                let mut case = vec![format!("case {index}: {{")];
                case.extend(indent(branch));
                case.push("    break;".to_string());
                case.push("}".to_string());
                lines.extend(indent(case));
            }
            let mut default_case = vec!["default:".to_string()];
            default_case.extend(indent(default));
            lines.extend(indent(default_case));
            lines.push("}".to_string());
            lines
        }
    }
}

/// A peer that may take part in a rendezvous
pub(crate) struct Delivery {
    /// The peer is ready to receive
    pub guard: String,
    /// Hands the signal over to the peer
    pub effect: Vec<String>,
}

/// Synchronizes a dispatch with its ready peers. A broadcast delivers to every
/// ready peer, otherwise exactly one peer must be ready.
pub(crate) fn rendezvous(
    broadcast: bool,
    deliveries: Vec<Delivery>,
    default: Vec<String>,
) -> Vec<String> {
    if broadcast {
        return deliveries
            .into_iter()
            .flat_map(|delivery| {
                let mut lines = vec![format!("if ({}) {{", delivery.guard)];
                lines.extend(indent(delivery.effect));
                lines.push("}".to_string());
                lines
            })
            .collect();
    }
    let branches = deliveries
        .into_iter()
        .map(|delivery| {
            let mut lines = vec![assume(&delivery.guard)];
            lines.extend(delivery.effect);
            lines
        })
        .collect();
    choice(branches, default)
}

/// `ldv_assume` of the action's own condition followed by its statements
pub(crate) fn prologue(
    automaton: &mut Automaton,
    attrs: &Attributes,
) -> TranslationResult<Vec<String>> {
    let conditions = attrs
        .condition
        .iter()
        .map(|condition| automaton.substitute(condition))
        .collect::<TranslationResult<Vec<_>>>()?;
    let mut lines = vec![];
    if let Some(guard) = conjunction(&conditions) {
        lines.push(assume(&guard));
    }
    for statement in attrs.statements.iter() {
        lines.push(automaton.substitute(statement)?);
    }
    Ok(lines)
}

/// Readiness condition of a receive, evaluated by the dispatcher: the peer's
/// own state test followed by the receive's conditions in the peer's namespace
pub(crate) fn peer_guard(
    state_test: String,
    peer: AutomatonId,
    peer_process: &Process,
    receive: &Attributes,
) -> TranslationResult<String> {
    let mut conditions = vec![state_test];
    for condition in receive.condition.iter() {
        conditions.push(substitute_foreign(peer, peer_process, condition)?);
    }
    Ok(conjunction(&conditions).unwrap_or_default())
}

/// Assigns the dispatched arguments to the parameter labels of a receiver
pub(crate) fn parameter_assignments(
    sender: &mut Automaton,
    dispatch: &Attributes,
    receiver: AutomatonId,
    receiver_process: &Process,
    receive: &Attributes,
) -> TranslationResult<Vec<String>> {
    if dispatch.parameters.len() != receive.parameters.len() {
        log::warn!(
            "`{}` of `{}` sends {} parameters but `{}` expects {}",
            dispatch.name,
            sender.name(),
            dispatch.parameters.len(),
            receiver_process.name,
            receive.parameters.len()
        );
    }
    let mut lines = vec![];
    for (argument, parameter) in dispatch.parameters.iter().zip(receive.parameters.iter()) {
        let value = sender.substitute(argument)?;
        let target = substitute_foreign(receiver, receiver_process, parameter)?;
        lines.push(format!("{target} = {value};"));
    }
    Ok(lines)
}

/// Marks the labels of a receive as used. Dispatchers write its parameters and
/// evaluate its conditions, so they must be declared by the receiver.
pub(crate) fn touch_receive(automaton: &mut Automaton, attrs: &Attributes) -> TranslationResult<()> {
    for text in attrs
        .parameters
        .iter()
        .chain(attrs.condition.iter())
        .chain(attrs.statements.iter())
    {
        automaton.substitute(text)?;
    }
    Ok(())
}

/// Upper bound of a repetition count in the automaton's namespace
pub(crate) fn repetition_limit(automaton: &mut Automaton, count: &Count) -> TranslationResult<String> {
    match count {
        Count::Fixed(n) => Ok(n.to_string()),
        Count::Label(label) => automaton.use_variable(label),
    }
}

/// Invokes the function pointer bound to a `Call` dispatch
pub(crate) fn invoke_callback(
    automaton: &mut Automaton,
    dispatch: &Dispatch,
    oracle: &dyn InterfaceOracle,
) -> TranslationResult<Vec<String>> {
    let Some(callback) = &dispatch.callback else {
        return Ok(vec![]);
    };
    let process = automaton.process;
    let target = callback.target.trim();
    if let Some(label) = target
        .strip_prefix('%')
        .and_then(|t| t.strip_suffix('%'))
        .and_then(|name| process.label(name))
    {
        let declaration = resolve_label_type(process, label, oracle)?;
        if !declaration.is_function_pointer() {
            return Err(TranslationError::NotAFunctionPointer {
                process: process.name.clone(),
                label: label.name.clone(),
            });
        }
        if callback.retval.is_some() && declaration.return_type().is_some_and(|r| r.is_void()) {
            log::warn!(
                "`{}` of `{}` stores the result of `{}`, which returns void",
                dispatch.attrs.name,
                process.name,
                label.name
            );
        }
    }

    let function = automaton.substitute(target)?;
    let arguments = dispatch
        .attrs
        .parameters
        .iter()
        .map(|p| automaton.substitute(p))
        .collect::<TranslationResult<Vec<_>>>()?
        .join(", ");
    let call = match &callback.retval {
        Some(retval) => format!("{} = {function}({arguments});", automaton.substitute(retval)?),
        None => format!("{function}({arguments});"),
    };

    let mut lines = vec![];
    for hook in dispatch.attrs.pre_call.iter() {
        lines.push(automaton.substitute(hook)?);
    }
    lines.push(format!("if ({function}) {{"));
    lines.push(format!("    {call}"));
    lines.push("}".to_string());
    for hook in dispatch.attrs.post_call.iter() {
        lines.push(automaton.substitute(hook)?);
    }
    Ok(lines)
}

/// Declarations of the used variables of an automaton
pub(crate) fn declare_variables(
    automaton: &Automaton,
    oracle: &dyn InterfaceOracle,
) -> TranslationResult<Vec<Global>> {
    let process = automaton.process;
    automaton
        .used_variables()
        .map(|variable| {
            let declaration = resolve_label_type(process, &process[variable.label], oracle)?;
            Ok(Global::new(declaration.to_string_with(&variable.name), None))
        })
        .collect()
}

/// Initial values of the used variables: literal values are assigned, other
/// data pointers are allocated externally, everything else stays uninitialized
pub(crate) fn initialize_variables(
    automaton: &Automaton,
    oracle: &dyn InterfaceOracle,
) -> TranslationResult<Vec<String>> {
    let process = automaton.process;
    let mut lines = vec![];
    for variable in automaton.used_variables() {
        let label = &process[variable.label];
        if let Some(value) = &label.value {
            lines.push(format!("{} = {};", variable.name, value));
            continue;
        }
        let declaration = resolve_label_type(process, label, oracle)?;
        if declaration.is_pointer() && !declaration.is_function_pointer() {
            lines.push(format!("{} = ldv_xmalloc_unknown_size(0);", variable.name));
        }
    }
    if !lines.is_empty() {
        lines.insert(0, comment::artificial("Initialize automaton variables."));
    }
    Ok(lines)
}

/// Counters of repeated actions, all starting at zero
pub(crate) fn declare_counters(automaton: &Automaton) -> Vec<Global> {
    automaton
        .counters()
        .into_iter()
        .map(|counter| Global::new(format!("int {counter}"), Some("0")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::Declaration;
    use crate::interface::InterfaceMap;
    use crate::ir::Label;

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn two_way_choice_is_an_if_else() {
        let code = choice(vec![lines(&["a();"]), lines(&["b();"])], lines(&["ldv_assume(0);"]));
        insta::assert_snapshot!(code.join("\n"), @r"
        if (ldv_undef_bool()) {
            a();
        }
        else {
            b();
        }
        ");
    }

    #[test]
    fn n_way_choice_is_a_switch_with_default() {
        let branches = (0..4).map(|i| vec![format!("f{i}();")]).collect();
        let code = choice(branches, lines(&["ldv_assume(0);"]));
        let cases = code.iter().filter(|l| l.trim_start().starts_with("case ")).count();
        let defaults = code.iter().filter(|l| l.trim() == "default:").count();
        assert_eq!((cases, defaults), (4, 1));
        assert_eq!(code[0], "switch (ldv_undef_int()) {");
        assert!(code.iter().position(|l| l.contains("f0")) < code.iter().position(|l| l.contains("f3")));
    }

    #[test]
    fn rendezvous_shapes() {
        let delivery = |n: u32| Delivery {
            guard: format!("ldv_{n}_state == 1"),
            effect: vec![format!("ldv_{n}_state = -1;")],
        };
        assert!(rendezvous(false, vec![], vec![]).is_empty());
        assert_eq!(
            rendezvous(false, vec![delivery(1)], vec![]),
            lines(&["ldv_assume(ldv_1_state == 1);", "ldv_1_state = -1;"])
        );
        let broadcast = rendezvous(true, vec![delivery(1), delivery(2)], vec![]);
        assert_eq!(broadcast.iter().filter(|l| l.starts_with("if (")).count(), 2);
        let one_of_two = rendezvous(false, vec![delivery(1), delivery(2)], vec![]);
        assert_eq!(one_of_two[0], "if (ldv_undef_bool()) {");
    }

    #[test]
    fn variable_initialization() {
        let mut process = Process::from_dsl("p", "test", "<a>").unwrap();
        process
            .add_label(Label::with_declaration("dev", Declaration::parse("struct device *").unwrap()))
            .unwrap();
        process
            .add_label(Label {
                value: Some("4".to_string()),
                ..Label::with_declaration("size", Declaration::primitive("int"))
            })
            .unwrap();
        process
            .add_label(Label::with_declaration("cb", Declaration::parse("int (*)(void)").unwrap()))
            .unwrap();
        process
            .add_label(Label::with_declaration("flag", Declaration::primitive("int")))
            .unwrap();
        process
            .add_label(Label::with_declaration("unused", Declaration::primitive("long")))
            .unwrap();
        let mut automaton = Automaton::new(AutomatonId::from_u32(0), ProcessId::from_u32(0), &process);
        for label in ["dev", "size", "cb", "flag"] {
            automaton.use_variable(label).unwrap();
        }
        let oracle = InterfaceMap::new();

        let declarations: Vec<String> = declare_variables(&automaton, &oracle)
            .unwrap()
            .iter()
            .map(Global::definition)
            .collect();
        assert_eq!(
            declarations,
            lines(&[
                "struct device *ldv_0_dev;",
                "int ldv_0_size;",
                "int (*ldv_0_cb)(void);",
                "int ldv_0_flag;"
            ])
        );
        let init = initialize_variables(&automaton, &oracle).unwrap();
        assert_eq!(
            &init[1..],
            &lines(&["ldv_0_dev = ldv_xmalloc_unknown_size(0);", "ldv_0_size = 4;"])
        );
    }

    #[test]
    fn entry_point_defaults() {
        let config = TranslationConfig::default();
        assert_eq!(config.entry_point, "ldv_main");
        assert_eq!(config.backend, Backend::Label);
        let parsed: TranslationConfig =
            serde_json::from_str(r#"{"backend": "state", "choice_default": "loop"}"#).unwrap();
        assert_eq!(parsed.backend, Backend::State);
        assert_eq!(parsed.choice_default, ChoiceDefault::Loop);
        assert_eq!(parsed.entry_file, "environment_model.c");
    }

    #[test]
    fn identifiers_are_sanitized() {
        assert_eq!(c_identifier("usb-driver.probe"), "usb_driver_probe");
    }
}
