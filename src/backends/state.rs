// Copyright 2025 Cornell University
// released under MIT License

//! State-variable backend: every automaton gets one integer state variable and
//! a step function that performs a single action per call. All step functions
//! are polled from one loop, so receives never block: the dispatcher advances
//! the receiver.

use rustc_hash::FxHashMap;

use super::comment::{self, Marker, ModelComment};
use super::*;
use crate::automaton::{counter_name, substitute_foreign, Automaton, AutomatonId};
use crate::errors::{TranslationError, TranslationResult};
use crate::ir::{Action, ActionId, Attributes, Count, Process, Subprocess};

/// Numbering of the states of one process. State 0 initializes the automaton,
/// every atomic leaf, subprocess and choice has its own state, and the last
/// state is the idle final one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateMap {
    states: FxHashMap<ActionId, u32>,
    order: Vec<ActionId>,
    successors: FxHashMap<ActionId, u32>,
    initial: u32,
    final_state: u32,
}

impl StateMap {
    pub fn new(process: &Process) -> Self {
        let mut map = StateMap::default();
        let outline = process.outline();
        let mut next = 1;
        for id in outline.nodes() {
            let stateful = !matches!(
                process[id],
                Action::Concatenation(_) | Action::Parentheses(_)
            );
            if stateful && !map.states.contains_key(&id) {
                map.states.insert(id, next);
                map.order.push(id);
                next += 1;
            }
        }
        map.final_state = next;
        if let Some(root) = process.root() {
            map.initial = map.entry(process, root);
            map.follow(process, root, map.final_state);
        }
        for (sub, _) in outline.subprocesses.iter() {
            let target = match &process[*sub] {
                Action::Subprocess(Subprocess {
                    body: Some(body), ..
                }) => {
                    // reaching the end of a subprocess body ends the automaton
                    map.follow(process, *body, map.final_state);
                    map.entry(process, *body)
                }
                _ => map.final_state,
            };
            map.successors.insert(*sub, target);
        }
        map
    }

    pub fn state(&self, action: ActionId) -> Option<u32> {
        self.states.get(&action).copied()
    }

    /// State entered after `action` is complete
    pub fn successor(&self, action: ActionId) -> u32 {
        self.successors
            .get(&action)
            .copied()
            .unwrap_or(self.final_state)
    }

    pub fn initial(&self) -> u32 {
        self.initial
    }

    pub fn final_state(&self) -> u32 {
        self.final_state
    }

    /// First state of the subtree rooted at `id`
    fn entry(&self, process: &Process, id: ActionId) -> u32 {
        match &process[id] {
            Action::Concatenation(sequence) => sequence
                .first()
                .map_or(self.final_state, |first| self.entry(process, *first)),
            Action::Parentheses(inner) => self.entry(process, *inner),
            _ => self.states.get(&id).copied().unwrap_or(self.final_state),
        }
    }

    fn follow(&mut self, process: &Process, id: ActionId, next: u32) {
        match &process[id] {
            Action::Dispatch(_) | Action::Receive(_) | Action::Block(_) => {
                self.successors.insert(id, next);
            }
            // jumps continue with the subprocess body
            Action::Subprocess(_) => {}
            Action::Choice(alternatives) => {
                for alternative in alternatives.iter() {
                    self.follow(process, *alternative, next);
                }
            }
            Action::Concatenation(sequence) => {
                for (index, child) in sequence.iter().enumerate() {
                    let after = match sequence.get(index + 1) {
                        Some(following) => self.entry(process, *following),
                        None => next,
                    };
                    self.follow(process, *child, after);
                }
            }
            Action::Parentheses(inner) => self.follow(process, *inner, next),
        }
    }
}

fn state_variable(id: AutomatonId) -> String {
    format!("ldv_statevar_{}", id.as_u32())
}

fn case_block(state: u32, lines: Vec<String>) -> Vec<String> {
    let mut block = vec![format!("case {state}: {{")];
    block.extend(indent(lines));
    block.push("    break;".to_string());
    block.push("}".to_string());
    block
}

/// Moves the state variable on, once the repetition counter (if any) is exhausted
fn advance(state_variable: &str, successor: u32, repeat: Option<(String, String)>) -> Vec<String> {
    match repeat {
        None => vec![format!("{state_variable} = {successor};")],
        Some((counter, limit)) => vec![
            format!("{counter}++;"),
            format!("if ({counter} >= {limit}) {{"),
            format!("    {counter} = 0;"),
            format!("    {state_variable} = {successor};"),
            "}".to_string(),
        ],
    }
}

pub struct StateTranslator<'a> {
    context: TranslationContext<'a>,
    layouts: FxHashMap<ProcessId, StateMap>,
}

impl<'a> StateTranslator<'a> {
    /// Fails when thread control functions are requested, the single polling
    /// loop cannot run automata as threads
    pub fn new(context: TranslationContext<'a>) -> TranslationResult<Self> {
        if context.config.function_kind == FunctionKind::Thread {
            return Err(TranslationError::BackendMisuse {
                backend: "state".to_string(),
                request: "thread control functions".to_string(),
            });
        }
        if context.config.nested_automata {
            log::warn!("the state backend ignores the nested automata mode");
        }
        let layouts = context
            .collection
            .ordered()
            .into_iter()
            .map(|process| (process, StateMap::new(&context.collection[process])))
            .collect();
        Ok(Self { context, layouts })
    }

    fn choice_default(&self) -> Vec<String> {
        match self.context.config.choice_default {
            ChoiceDefault::Terminal => vec![assume("0")],
            // the state is unchanged, so the choice is made again next step
            ChoiceDefault::Loop => vec!["break;".to_string()],
        }
    }

    /// Default of a rendezvous. It sits inside the dispatch case, so leaving the
    /// inner `switch` would still advance the dispatcher.
    fn rendezvous_default(&self) -> Vec<String> {
        match self.context.config.choice_default {
            ChoiceDefault::Terminal => vec![assume("0")],
            ChoiceDefault::Loop => vec!["return;".to_string()],
        }
    }

    fn own_repeat(
        &self,
        automaton: &mut Automaton,
        action: ActionId,
        attrs: &Attributes,
    ) -> TranslationResult<Option<(String, String)>> {
        if attrs.count.is_single() {
            return Ok(None);
        }
        let limit = repetition_limit(automaton, &attrs.count)?;
        Ok(Some((automaton.counter(action), limit)))
    }

    /// Statements of the `case` of one stateful action
    pub fn action_code(
        &self,
        automaton: &mut Automaton,
        action: ActionId,
    ) -> TranslationResult<Vec<String>> {
        let process = automaton.process;
        let layout = &self.layouts[&automaton.process_id];
        let state_variable = state_variable(automaton.id);
        match &process[action] {
            Action::Receive(receive) => {
                // the dispatcher does all the work
                touch_receive(automaton, &receive.attrs)?;
                if let Count::Label(label) = &receive.attrs.count {
                    automaton.use_variable(label)?;
                }
                if !receive.attrs.count.is_single() {
                    automaton.counter(action);
                }
                let comment = ModelComment::for_action(&process[action], Marker::Single);
                Ok(comment.map(|c| c.render()).into_iter().collect())
            }
            Action::Dispatch(dispatch) => {
                let mut code = prologue(automaton, &dispatch.attrs)?;
                if dispatch.callback.is_some() {
                    code.extend(invoke_callback(automaton, dispatch, self.context.oracle)?);
                } else {
                    code.extend(self.dispatch(automaton, action, dispatch)?);
                }
                let repeat = self.own_repeat(automaton, action, &dispatch.attrs)?;
                code.extend(advance(&state_variable, layout.successor(action), repeat));
                Ok(comment::wrap(&process[action], code))
            }
            Action::Block(attrs) => {
                let mut code = prologue(automaton, attrs)?;
                let repeat = self.own_repeat(automaton, action, attrs)?;
                code.extend(advance(&state_variable, layout.successor(action), repeat));
                Ok(comment::wrap(&process[action], code))
            }
            Action::Subprocess(_) => {
                let mut code: Vec<String> = ModelComment::for_action(&process[action], Marker::Single)
                    .map(|c| c.render())
                    .into_iter()
                    .collect();
                code.push(format!("{state_variable} = {};", layout.successor(action)));
                Ok(code)
            }
            Action::Choice(alternatives) => {
                let branches = alternatives
                    .iter()
                    .map(|alternative| {
                        vec![format!(
                            "{state_variable} = {};",
                            layout.entry(process, *alternative)
                        )]
                    })
                    .collect();
                let mut code = vec![comment::artificial(&format!(
                    "Choose one of {} alternatives.",
                    alternatives.len()
                ))];
                code.extend(choice(branches, self.choice_default()));
                Ok(code)
            }
            Action::Concatenation(_) | Action::Parentheses(_) => Ok(vec![]),
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
            let layout = &self.layouts[&peer.process];
            let peer_state = state_variable(peer_id);
            let state = layout.state(peer.action).unwrap_or_default();
            let successor = layout.successor(peer.action);

            let state_test = if receive.replicative {
                format!("{peer_state} == {state} || {peer_state} == {successor}")
            } else {
                format!("{peer_state} == {state}")
            };
            let guard = peer_guard(state_test, peer_id, peer_process, &receive.attrs)?;

            let mut effect = parameter_assignments(
                automaton,
                &dispatch.attrs,
                peer_id,
                peer_process,
                &receive.attrs,
            )?;
            for statement in receive.attrs.statements.iter() {
                effect.push(substitute_foreign(peer_id, peer_process, statement)?);
            }
            let repeat = match &receive.attrs.count {
                count if count.is_single() => None,
                count => {
                    let limit = match count {
                        Count::Fixed(n) => n.to_string(),
                        Count::Label(label) => {
                            substitute_foreign(peer_id, peer_process, &format!("%{label}%"))?
                        }
                    };
                    Some((counter_name(peer_id, &receive.attrs.name), limit))
                }
            };
            effect.extend(advance(&peer_state, successor, repeat));
            deliveries.push(Delivery { guard, effect });
        }
        log::debug!(
            "dispatch `{}` of `{}` has {} possible receivers",
            dispatch.attrs.name,
            automaton.name(),
            deliveries.len()
        );
        Ok(rendezvous(
            dispatch.broadcast,
            deliveries,
            self.rendezvous_default(),
        ))
    }
}

impl Translator for StateTranslator<'_> {
    fn translate(&mut self, automaton: &mut Automaton<'_>) -> TranslationResult<ControlFunction> {
        let layout = &self.layouts[&automaton.process_id];
        let state_variable = state_variable(automaton.id);

        let mut cases = vec![];
        for action in layout.order.iter() {
            let state = layout.states[action];
            cases.extend(case_block(state, self.action_code(automaton, *action)?));
        }

        let mut init = initialize_variables(automaton, self.context.oracle)?;
        if init.is_empty() {
            init.push(comment::artificial("Start the automaton."));
        }
        init.push(format!("{state_variable} = {};", layout.initial()));
        let finished = vec![comment::artificial("The automaton has finished.")];

        let mut body = vec![
            comment::artificial(&format!(
                "Control function of process '{}'.",
                automaton.name()
            )),
            format!("switch ({state_variable}) {{"),
        ];
        body.extend(indent(case_block(0, init)));
        body.extend(indent(cases));
        body.extend(indent(case_block(layout.final_state(), finished)));
        body.extend(indent(vec!["default:".to_string(), format!("    {}", assume("0"))]));
        body.push("}".to_string());

        let mut declarations = vec![Global::new(format!("int {state_variable}"), Some("0"))];
        declarations.extend(declare_counters(automaton));
        declarations.extend(declare_variables(automaton, self.context.oracle)?);

        let function_name = self.context.function_name(automaton);
        log::info!(
            "translated `{}` into `{}` with {} states",
            automaton.name(),
            function_name,
            layout.final_state() + 1
        );
        Ok(ControlFunction {
            signature: format!("void {function_name}(void)"),
            function_name,
            file: self.context.file_of(automaton.process),
            declarations,
            body,
        })
    }

    fn assemble(
        &self,
        mut functions: Vec<ControlFunction>,
    ) -> TranslationResult<Vec<ControlFunction>> {
        let calls = functions
            .iter()
            .map(|f| format!("{}();", f.function_name))
            .collect();
        functions.push(self.context.entry_point(calls, vec![]));
        Ok(functions)
    }
}
