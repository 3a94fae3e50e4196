// Copyright 2025 Cornell University
// released under MIT License

use cranelift_entity::{entity_impl, PrimaryMap};
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{TranslationError, TranslationResult};
use crate::ir::{ActionId, LabelId, Process, ProcessCollection, ProcessId};

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct AutomatonId(u32);
entity_impl!(AutomatonId, "automaton");

/// C name of a label of the automaton `id`
pub fn variable_name(id: AutomatonId, label: &str) -> String {
    format!("ldv_{}_{}", id.as_u32(), label)
}

/// C name of the repetition counter of an action of the automaton `id`
pub fn counter_name(id: AutomatonId, action: &str) -> String {
    format!("ldv_{}_{}_iter", id.as_u32(), action)
}

/// Replaces every `%label%` reference in a C fragment by the result of
/// `resolve`. Any other `%` is kept as is.
pub fn substitute(
    text: &str,
    mut resolve: impl FnMut(&str) -> TranslationResult<String>,
) -> TranslationResult<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..len];
        let is_reference = !name.is_empty()
            && !name.starts_with(|c: char| c.is_ascii_digit())
            && after[len..].starts_with('%');
        if is_reference {
            out.push_str(&resolve(name)?);
            rest = &after[len + 1..];
        } else {
            out.push('%');
            rest = after;
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Renders `text` in the namespace of another automaton without recording uses.
/// That automaton records them itself when it is translated.
pub fn substitute_foreign(id: AutomatonId, process: &Process, text: &str) -> TranslationResult<String> {
    substitute(text, |label| {
        process
            .label_id(label)
            .map(|_| variable_name(id, label))
            .ok_or_else(|| TranslationError::UnknownLabel {
                process: process.name.clone(),
                label: label.to_string(),
            })
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub label: LabelId,
    pub name: String,
    uses: u32,
}

impl Variable {
    pub fn uses(&self) -> u32 {
        self.uses
    }
}

/// Translation unit of one process instance. Variables are created on demand
/// and only the ones with a positive use count are ever declared.
#[derive(Debug, Clone)]
pub struct Automaton<'p> {
    pub id: AutomatonId,
    pub process_id: ProcessId,
    pub process: &'p Process,
    variables: BTreeMap<LabelId, Variable>,
    counters: BTreeSet<ActionId>,
}

impl<'p> Automaton<'p> {
    pub fn new(id: AutomatonId, process_id: ProcessId, process: &'p Process) -> Self {
        Self {
            id,
            process_id,
            process,
            variables: BTreeMap::new(),
            counters: BTreeSet::new(),
        }
    }

    /// One automaton per process: the entry gets id 0, then models, then the environment
    pub fn instantiate(collection: &'p ProcessCollection) -> PrimaryMap<AutomatonId, Self> {
        let mut automata = PrimaryMap::new();
        for process_id in collection.ordered() {
            let id = automata.next_key();
            automata.push(Automaton::new(id, process_id, &collection[process_id]));
        }
        log::info!("instantiated {} automata", automata.len());
        automata
    }

    pub fn name(&self) -> &str {
        &self.process.name
    }

    /// Returns the variable of `label`, creating it with a use count of zero
    pub fn variable(&mut self, label: &str) -> TranslationResult<&mut Variable> {
        let label_id =
            self.process
                .label_id(label)
                .ok_or_else(|| TranslationError::UnknownLabel {
                    process: self.process.name.clone(),
                    label: label.to_string(),
                })?;
        let id = self.id;
        Ok(self.variables.entry(label_id).or_insert_with(|| Variable {
            label: label_id,
            name: variable_name(id, label),
            uses: 0,
        }))
    }

    /// Records a reference to `label` and returns its C name
    pub fn use_variable(&mut self, label: &str) -> TranslationResult<String> {
        let variable = self.variable(label)?;
        variable.uses += 1;
        Ok(variable.name.clone())
    }

    /// Replaces `%label%` references in `text`, recording a use of each label
    pub fn substitute(&mut self, text: &str) -> TranslationResult<String> {
        substitute(text, |label| self.use_variable(label))
    }

    /// Variables referenced at least once, in label order
    pub fn used_variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values().filter(|v| v.uses > 0)
    }

    /// Registers the repetition counter of `action` and returns its C name
    pub fn counter(&mut self, action: ActionId) -> String {
        self.counters.insert(action);
        self.counter_of(action)
    }

    fn counter_of(&self, action: ActionId) -> String {
        counter_name(self.id, self.process[action].name().unwrap_or_default())
    }

    pub fn counters(&self) -> Vec<String> {
        self.counters.iter().map(|a| self.counter_of(*a)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Label;

    #[test]
    fn ids_follow_collection_order() {
        let mut collection = ProcessCollection::new();
        collection
            .add_environment(Process::from_dsl("env", "test", "[a]").unwrap())
            .unwrap();
        collection
            .add_model(Process::from_dsl("model", "test", "(a)").unwrap())
            .unwrap();
        collection
            .set_entry(Process::from_dsl("main", "test", "<go>").unwrap())
            .unwrap();

        let automata = Automaton::instantiate(&collection);
        let names: Vec<(u32, &str)> = automata
            .values()
            .map(|a| (a.id.as_u32(), a.name()))
            .collect();
        assert_eq!(names, vec![(0, "main"), (1, "model"), (2, "env")]);
    }

    #[test]
    fn variables_count_their_uses() {
        let mut process = Process::from_dsl("p", "test", "[a]").unwrap();
        process.add_label(Label::new("x")).unwrap();
        process.add_label(Label::new("y")).unwrap();
        let mut automaton = Automaton::new(AutomatonId::from_u32(3), ProcessId::from_u32(0), &process);

        assert_eq!(automaton.variable("y").unwrap().uses(), 0);
        assert_eq!(automaton.use_variable("x").unwrap(), "ldv_3_x");
        assert_eq!(automaton.use_variable("x").unwrap(), "ldv_3_x");
        let used: Vec<(&str, u32)> = automaton
            .used_variables()
            .map(|v| (v.name.as_str(), v.uses()))
            .collect();
        assert_eq!(used, vec![("ldv_3_x", 2)]);
        assert!(matches!(
            automaton.use_variable("z"),
            Err(TranslationError::UnknownLabel { .. })
        ));
    }

    #[test]
    fn label_references_in_fragments() {
        let mut process = Process::from_dsl("p", "test", "[a]").unwrap();
        process.add_label(Label::new("dev")).unwrap();
        process.add_label(Label::new("n")).unwrap();
        let mut automaton = Automaton::new(AutomatonId::from_u32(1), ProcessId::from_u32(0), &process);

        let text = automaton.substitute("%dev%->count = %n% % 4; /* 50% */").unwrap();
        assert_eq!(text, "ldv_1_dev->count = ldv_1_n % 4; /* 50% */");
        assert_eq!(automaton.used_variables().count(), 2);

        let foreign = substitute_foreign(AutomatonId::from_u32(7), &process, "%n% + 1").unwrap();
        assert_eq!(foreign, "ldv_7_n + 1");
        assert!(substitute_foreign(AutomatonId::from_u32(7), &process, "%missing%").is_err());
    }
}
