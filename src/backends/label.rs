// Copyright 2025 Cornell University
// released under MIT License

//! Label backend: the action tree becomes structured C with a `goto` label
//! per subprocess. An automaton parks at a receive by saving the number of the
//! receive in its state variable and yielding; the dispatcher hands over the
//! parameters and negates the state, after which the automaton resumes right
//! after the receive.
//!
//! State values: `0` running, `k` parked at receive `k`, `-k` delivered at
//! receive `k`, one past the last receive when finished.

use rustc_hash::FxHashMap;

use super::comment::{self, Marker, ModelComment};
use super::*;
use crate::automaton::{Automaton, AutomatonId};
use crate::errors::{TranslationError, TranslationResult};
use crate::ir::{Action, ActionId, Attributes, Subprocess};

/// Receives of one process numbered from 1 in outline order
#[derive(Debug, Clone, Default)]
struct ReceiveNumbers {
    numbers: FxHashMap<ActionId, u32>,
    finished: u32,
}

impl ReceiveNumbers {
    fn new(process: &Process) -> Self {
        let receives = process.outline().receives(process);
        let finished = receives.len() as u32 + 1;
        let numbers = receives
            .into_iter()
            .zip(1..)
            .collect();
        Self { numbers, finished }
    }

    fn number(&self, receive: ActionId) -> u32 {
        self.numbers.get(&receive).copied().unwrap_or_default()
    }
}

fn state_variable(id: AutomatonId) -> String {
    format!("ldv_{}_state", id.as_u32())
}

fn subprocess_label(id: AutomatonId, name: &str) -> String {
    format!("ldv_{}_sub_{}", id.as_u32(), name)
}

fn resume_label(id: AutomatonId, receive: u32) -> String {
    format!("ldv_{}_resume_{}", id.as_u32(), receive)
}

fn begin_label(id: AutomatonId) -> String {
    format!("ldv_begin_{}", id.as_u32())
}

fn out_label(id: AutomatonId) -> String {
    format!("out_{}", id.as_u32())
}

pub struct LabelTranslator<'a> {
    context: TranslationContext<'a>,
    receives: FxHashMap<ProcessId, ReceiveNumbers>,
}

impl<'a> LabelTranslator<'a> {
    pub fn new(context: TranslationContext<'a>) -> TranslationResult<Self> {
        if context.config.nested_automata && context.config.function_kind == FunctionKind::Thread {
            return Err(TranslationError::BackendMisuse {
                backend: "label".to_string(),
                request: "nested automata as thread control functions".to_string(),
            });
        }
        let receives = context
            .collection
            .ordered()
            .into_iter()
            .map(|process| (process, ReceiveNumbers::new(&context.collection[process])))
            .collect();
        Ok(Self { context, receives })
    }

    /// Gives control back to whoever runs the automaton
    fn yield_control(&self, id: AutomatonId) -> String {
        if self.context.config.nested_automata {
            format!("goto {};", out_label(id))
        } else {
            match self.context.config.function_kind {
                FunctionKind::Sequential => "return;".to_string(),
                FunctionKind::Thread => "return 0;".to_string(),
            }
        }
    }

    fn finish(&self, id: AutomatonId, numbers: &ReceiveNumbers) -> Vec<String> {
        vec![
            comment::artificial("The automaton has finished."),
            format!("{} = {};", state_variable(id), numbers.finished),
            self.yield_control(id),
        ]
    }

    /// Jumps to the receive the automaton was delivered at, or yields when it
    /// is still parked or finished
    fn resume_switch(&self, id: AutomatonId, numbers: &ReceiveNumbers) -> Vec<String> {
        let mut cases = vec!["case 0:".to_string(), "    break;".to_string()];
        for receive in 1..numbers.finished {
            cases.push(format!("case -{receive}:"));
            cases.push(format!("    goto {};", resume_label(id, receive)));
        }
        cases.push("default:".to_string());
        cases.push(format!("    {}", self.yield_control(id)));

        let mut lines = vec![
            comment::artificial("Resume after a delivered signal."),
            format!("switch ({}) {{", state_variable(id)),
        ];
        lines.extend(indent(cases));
        lines.push("}".to_string());
        lines
    }

    fn repeat(
        &self,
        automaton: &mut Automaton,
        action: ActionId,
        attrs: &Attributes,
        code: Vec<String>,
    ) -> TranslationResult<Vec<String>> {
        if attrs.count.is_single() {
            return Ok(code);
        }
        let limit = repetition_limit(automaton, &attrs.count)?;
        let counter = automaton.counter(action);
        let mut lines = vec![format!(
            "for ({counter} = 0; {counter} < {limit}; {counter}++) {{"
        )];
        lines.extend(indent(code));
        lines.push("}".to_string());
        Ok(lines)
    }

    /// Code of the subtree rooted at `action`
    pub fn action_code(
        &self,
        automaton: &mut Automaton,
        action: ActionId,
    ) -> TranslationResult<Vec<String>> {
        let process = automaton.process;
        let id = automaton.id;
        match &process[action] {
            Action::Concatenation(sequence) => {
                let mut lines = vec![];
                for child in sequence.iter() {
                    lines.extend(self.action_code(automaton, *child)?);
                }
                Ok(lines)
            }
            Action::Parentheses(inner) => self.action_code(automaton, *inner),
            Action::Choice(alternatives) => {
                let branches = alternatives
                    .iter()
                    .map(|alternative| self.action_code(automaton, *alternative))
                    .collect::<TranslationResult<Vec<_>>>()?;
                let mut lines = vec![comment::artificial(&format!(
                    "Choose one of {} alternatives.",
                    branches.len()
                ))];
                let default = match self.context.config.choice_default {
                    ChoiceDefault::Loop if branches.len() > 2 => {
                        let label = format!("ldv_{}_choice_{}", id.as_u32(), action.as_u32());
                        lines.push(format!("{label}:"));
                        vec![format!("goto {label};")]
                    }
                    _ => vec![assume("0")],
                };
                lines.extend(choice(branches, default));
                Ok(lines)
            }
            Action::Subprocess(subprocess) => {
                let mut lines: Vec<String> =
                    ModelComment::for_action(&process[action], Marker::Single)
                        .map(|c| c.render())
                        .into_iter()
                        .collect();
                lines.push(format!(
                    "goto {};",
                    subprocess_label(id, &subprocess.attrs.name)
                ));
                Ok(lines)
            }
            Action::Dispatch(dispatch) => {
                let mut code = prologue(automaton, &dispatch.attrs)?;
                if dispatch.callback.is_some() {
                    code.extend(invoke_callback(automaton, dispatch, self.context.oracle)?);
                } else {
                    code.extend(self.dispatch(automaton, action, dispatch)?);
                }
                let code = comment::wrap(&process[action], code);
                self.repeat(automaton, action, &dispatch.attrs, code)
            }
            Action::Receive(receive) => {
                touch_receive(automaton, &receive.attrs)?;
                let number = self.receives[&automaton.process_id].number(action);
                let state = state_variable(id);
                let mut code = vec![
                    format!("{state} = {number};"),
                    self.yield_control(id),
                    format!("{}:", resume_label(id, number)),
                    format!("{state} = 0;"),
                ];
                for statement in receive.attrs.statements.iter() {
                    code.push(automaton.substitute(statement)?);
                }
                let code = comment::wrap(&process[action], code);
                self.repeat(automaton, action, &receive.attrs, code)
            }
            Action::Block(attrs) => {
                let code = comment::wrap(&process[action], prologue(automaton, attrs)?);
                self.repeat(automaton, action, attrs, code)
            }
        }
    }

    fn dispatch(
        &self,
        automaton: &mut Automaton,
        action: ActionId,
        dispatch: &Dispatch,
    ) -> TranslationResult<Vec<String>> {
        let mut deliveries = vec![];
        for peer in self.context.peers_of(automaton, action) {
            let peer_process = &self.context.collection[peer.process];
            let Action::Receive(receive) = &peer_process[peer.action] else {
                continue;
            };
            let peer_id = self.context.automaton_of(peer.process);
            let number = self.receives[&peer.process].number(peer.action);
            let peer_state = state_variable(peer_id);

            let state_test = if receive.replicative {
                format!("{peer_state} == {number} || {peer_state} == -{number}")
            } else {
                format!("{peer_state} == {number}")
            };
            let guard = super::peer_guard(state_test, peer_id, peer_process, &receive.attrs)?;
            let mut effect = parameter_assignments(
                automaton,
                &dispatch.attrs,
                peer_id,
                peer_process,
                &receive.attrs,
            )?;
            effect.push(format!("{peer_state} = -{number};"));
            deliveries.push(Delivery { guard, effect });
        }
        log::debug!(
            "dispatch `{}` of `{}` has {} possible receivers",
            dispatch.attrs.name,
            automaton.name(),
            deliveries.len()
        );
        Ok(rendezvous(dispatch.broadcast, deliveries, vec![assume("0")]))
    }
}

impl Translator for LabelTranslator<'_> {
    fn translate(&mut self, automaton: &mut Automaton<'_>) -> TranslationResult<ControlFunction> {
        let process = automaton.process;
        let id = automaton.id;
        let numbers = &self.receives[&automaton.process_id];

        let mut code = vec![];
        if let Some(root) = process.root() {
            code.extend(self.action_code(automaton, root)?);
        }
        code.extend(self.finish(id, numbers));
        for (sub, _) in process.outline().subprocesses {
            let Action::Subprocess(Subprocess {
                attrs,
                body: Some(body),
            }) = &process[sub]
            else {
                continue;
            };
            code.push(format!("{}:", subprocess_label(id, &attrs.name)));
            let body = self.action_code(automaton, *body)?;
            code.extend(comment::wrap(&process[sub], body));
            code.extend(self.finish(id, numbers));
        }

        let nested = self.context.config.nested_automata;
        let mut body = vec![];
        if nested {
            body.push(format!("{}:", begin_label(id)));
        }
        body.push(comment::artificial(&format!(
            "Control function of process '{}'.",
            automaton.name()
        )));
        body.extend(self.resume_switch(id, numbers));
        body.extend(initialize_variables(automaton, self.context.oracle)?);
        body.extend(code);
        if nested {
            body.push(format!("{}:", out_label(id)));
            body.push("continue;".to_string());
        }

        let mut declarations = vec![Global::new(
            format!("int {}", state_variable(id)),
            Some("0"),
        )];
        declarations.extend(declare_counters(automaton));
        declarations.extend(declare_variables(automaton, self.context.oracle)?);

        // in nested mode the fragment is entered through its begin label
        let function_name = if nested {
            begin_label(id)
        } else {
            self.context.function_name(automaton)
        };
        let signature = match self.context.config.function_kind {
            FunctionKind::Sequential => format!("void {function_name}(void)"),
            FunctionKind::Thread => format!("void *{function_name}(void *arg)"),
        };
        log::info!(
            "translated `{}` into `{}` with {} receives",
            automaton.name(),
            function_name,
            numbers.finished - 1
        );
        Ok(ControlFunction {
            function_name,
            signature,
            file: self.context.file_of(process),
            declarations,
            body,
        })
    }

    fn assemble(
        &self,
        mut functions: Vec<ControlFunction>,
    ) -> TranslationResult<Vec<ControlFunction>> {
        let config = self.context.config;
        if !config.nested_automata {
            let calls = functions
                .iter()
                .map(|f| match config.function_kind {
                    FunctionKind::Sequential => format!("{}();", f.function_name),
                    FunctionKind::Thread => format!("{}(0);", f.function_name),
                })
                .collect();
            functions.push(self.context.entry_point(calls, vec![]));
            return Ok(functions);
        }

        // one function: pick an automaton, run it until it yields, repeat
        let jumps = functions
            .iter()
            .map(|f| vec![format!("goto {};", f.function_name)])
            .collect();
        let default = match config.choice_default {
            ChoiceDefault::Terminal => vec![assume("0")],
            ChoiceDefault::Loop => vec!["continue;".to_string()],
        };
        let mut inner = choice(jumps, default);
        let mut declarations = vec![];
        for function in functions {
            inner.extend(function.body);
            declarations.extend(function.declarations);
        }
        let mut body = vec![
            comment::artificial("Run all automata in one control function."),
            "while (1) {".to_string(),
        ];
        body.extend(indent(inner));
        body.push("}".to_string());
        Ok(vec![ControlFunction {
            function_name: config.entry_point.clone(),
            signature: format!("void {}(void)", config.entry_point),
            file: config.entry_file.clone(),
            declarations,
            body,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::InterfaceMap;
    use crate::ir::ProcessCollection;

    fn translate(collection: &ProcessCollection, config: &TranslationConfig) -> CModel {
        translate_collection(collection, &InterfaceMap::new(), config).unwrap()
    }

    fn single(dsl: &str) -> ProcessCollection {
        let mut collection = ProcessCollection::new();
        let mut process = Process::from_dsl("main", "test", dsl).unwrap();
        for sub in ["s", "t"] {
            if process.action_id(sub).is_some() {
                process.define_subprocess(sub, "<body>.{s} | <leave>").unwrap();
            }
        }
        collection.set_entry(process).unwrap();
        collection.establish_peers();
        collection
    }

    #[test]
    fn subprocess_is_emitted_once() {
        let collection = single("<a>.{s} | <b>.{s} | <c>");
        let model = translate(&collection, &TranslationConfig::default());
        let body = &model.functions[0].body;
        let labels = body.iter().filter(|l| l.trim() == "ldv_0_sub_s:").count();
        let jumps = body.iter().filter(|l| l.trim() == "goto ldv_0_sub_s;").count();
        // two from the root, one from the body of `s` itself
        assert_eq!((labels, jumps), (1, 3));
        let blocks = body.iter().filter(|l| l.contains("\"CONDITION_BEGIN\"") && l.contains("\"body\"")).count();
        assert_eq!(blocks, 1);
    }

    #[test]
    fn receive_parks_and_resumes() {
        let mut collection = ProcessCollection::new();
        collection
            .set_entry(Process::from_dsl("main", "test", "[@sig]").unwrap())
            .unwrap();
        collection
            .add_model(Process::from_dsl("model", "test", "(!sig).<done>").unwrap())
            .unwrap();
        collection.establish_peers();
        let model = translate(&collection, &TranslationConfig::default());

        insta::assert_snapshot!(model.functions[1].definition(), @r#"
        void ldv_model_1(void)
        {
            /* LDV {"type":"ARTIFICIAL","comment":"Control function of process 'model'.","action":null} */
            /* LDV {"type":"ARTIFICIAL","comment":"Resume after a delivered signal.","action":null} */
            switch (ldv_1_state) {
                case 0:
                    break;
                case -1:
                    goto ldv_1_resume_1;
                default:
                    return;
            }
            /* LDV {"type":"RECEIVE_BEGIN","comment":"Receive signal 'sig'.","action":"sig"} */
            ldv_1_state = 1;
            return;
            ldv_1_resume_1:
            ldv_1_state = 0;
            /* LDV {"type":"RECEIVE_END","comment":"Receive signal 'sig'.","action":"sig"} */
            /* LDV {"type":"CONDITION_BEGIN","comment":"Execute block 'done'.","action":"done"} */
            /* LDV {"type":"CONDITION_END","comment":"Execute block 'done'.","action":"done"} */
            /* LDV {"type":"ARTIFICIAL","comment":"The automaton has finished.","action":null} */
            ldv_1_state = 2;
            return;
        }
        "#);

        let sender = &model.functions[0].body;
        assert!(sender
            .iter()
            .any(|l| l.trim() == "if (ldv_1_state == 1 || ldv_1_state == -1) {"));
        assert!(sender.iter().any(|l| l.trim() == "ldv_1_state = -1;"));
    }

    #[test]
    fn nested_mode_shares_one_function() {
        let mut collection = ProcessCollection::new();
        collection
            .set_entry(Process::from_dsl("main", "test", "[sig]").unwrap())
            .unwrap();
        collection
            .add_model(Process::from_dsl("model", "test", "(sig)").unwrap())
            .unwrap();
        collection.establish_peers();
        let config = TranslationConfig {
            nested_automata: true,
            ..Default::default()
        };
        let model = translate(&collection, &config);
        assert_eq!(model.functions.len(), 1);
        let body = &model.functions[0].body;
        assert_eq!(model.functions[0].function_name, "ldv_main");
        for id in 0..2 {
            assert!(body.iter().any(|l| l.trim() == format!("ldv_begin_{id}:")));
            assert!(body.iter().any(|l| l.trim() == format!("goto ldv_begin_{id};")));
            assert!(body.iter().any(|l| l.trim() == format!("goto out_{id};")));
        }
        assert!(!body.iter().any(|l| l.trim() == "return;"));
    }

    #[test]
    fn choices_keep_their_order() {
        let two = translate(&single("<a> | <b>"), &TranslationConfig::default());
        let body = &two.functions[0].body;
        let branch = |name: &str| {
            body.iter()
                .position(|l| l.contains(&format!("\"CONDITION_BEGIN\",\"comment\":\"Execute block '{name}'.\"")))
                .unwrap()
        };
        assert!(body.iter().any(|l| l.trim() == "if (ldv_undef_bool()) {"));
        assert!(body.iter().any(|l| l.trim() == "else {"));
        assert!(branch("a") < branch("b"));

        let four = translate(&single("<a> | <b> | <c> | <d>"), &TranslationConfig::default());
        let body = &four.functions[0].body;
        let cases: Vec<&str> = body
            .iter()
            .map(|l| l.trim())
            .filter(|l| l.starts_with("case ") && l.ends_with('{'))
            .collect();
        assert_eq!(cases, vec!["case 0: {", "case 1: {", "case 2: {", "case 3: {"]);
        assert_eq!(body.iter().filter(|l| l.trim() == "default:").count(), 2);
    }

    #[test]
    fn loop_default_retries_the_choice() {
        let collection = single("<a> | <b> | <c> | <d>");
        let config = TranslationConfig {
            choice_default: ChoiceDefault::Loop,
            ..Default::default()
        };
        let model = translate(&collection, &config);
        let body = &model.functions[0].body;
        let label = body.iter().find(|l| l.ends_with(':') && l.contains("_choice_")).unwrap();
        let target = format!("goto {};", label.trim().trim_end_matches(':'));
        assert!(body.iter().any(|l| l.trim() == target));
    }

    #[test]
    fn subprocess_labels_do_not_clash_with_resume_labels() {
        let mut process = Process::from_dsl("main", "test", "(sig).{resume_1}").unwrap();
        process.define_subprocess("resume_1", "(other)").unwrap();
        let mut collection = ProcessCollection::new();
        collection.set_entry(process).unwrap();
        collection.establish_peers();
        let model = translate(&collection, &TranslationConfig::default());
        let labels: Vec<&str> = model.functions[0]
            .body
            .iter()
            .map(|l| l.trim())
            .filter(|l| l.ends_with(':') && l.starts_with("ldv_"))
            .collect();
        assert_eq!(
            labels,
            vec!["ldv_0_resume_1:", "ldv_0_sub_resume_1:", "ldv_0_resume_2:"]
        );
    }

    #[test]
    fn control_blocks_carry_model_comments() {
        let model = translate(&single("<a>.(<b> | <c> | <d>)"), &TranslationConfig::default());
        let body = &model.functions[0].body;
        let comment_before = |line: &str| {
            let index = body.iter().position(|l| l.trim() == line).unwrap();
            let previous = ModelComment::parse(&body[index - 1]).unwrap();
            assert_eq!(previous.kind, "ARTIFICIAL");
            previous.comment
        };
        assert_eq!(comment_before("switch (ldv_0_state) {"), "Resume after a delivered signal.");
        assert_eq!(comment_before("switch (ldv_undef_int()) {"), "Choose one of 3 alternatives.");
        assert_eq!(comment_before("ldv_0_state = 1;"), "The automaton has finished.");
    }

    #[test]
    fn thread_functions_return_a_value() {
        let collection = single("(sig)");
        let config = TranslationConfig {
            function_kind: FunctionKind::Thread,
            ..Default::default()
        };
        let model = translate(&collection, &config);
        assert_eq!(model.functions[0].signature, "void *ldv_main_0(void *arg)");
        assert!(model.functions[0].body.iter().any(|l| l.trim() == "return 0;"));
        let entry = model.functions.last().unwrap();
        assert!(entry.body.iter().any(|l| l.trim() == "ldv_main_0(0);"));
    }
}
