// Copyright 2025 Cornell University
// released under MIT License

use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::ir::*;

fn serialize_count(count: &Count) -> String {
    match count {
        count if count.is_single() => String::new(),
        Count::Fixed(n) => format!("[{n}]"),
        Count::Label(label) => format!("[%{label}%]"),
    }
}

/// Prints the tree rooted at `id` in DSL syntax. Subprocess jumps are printed
/// as jumps, their bodies are not expanded.
pub fn serialize_action(process: &Process, id: ActionId) -> String {
    match &process[id] {
        Action::Dispatch(dispatch) => format!(
            "[{}{}{}]",
            if dispatch.broadcast { "@" } else { "" },
            dispatch.attrs.name,
            serialize_count(&dispatch.attrs.count)
        ),
        Action::Receive(receive) => format!(
            "({}{}{})",
            if receive.replicative { "!" } else { "" },
            receive.attrs.name,
            serialize_count(&receive.attrs.count)
        ),
        Action::Block(attrs) => format!("<{}{}>", attrs.name, serialize_count(&attrs.count)),
        Action::Subprocess(subprocess) => format!("{{{}}}", subprocess.attrs.name),
        Action::Choice(alternatives) => alternatives
            .iter()
            .map(|a| serialize_action(process, *a))
            .join(" | "),
        Action::Concatenation(sequence) => sequence
            .iter()
            .map(|a| serialize_action(process, *a))
            .join("."),
        Action::Parentheses(inner) => format!("({})", serialize_action(process, *inner)),
    }
}

impl Display for Process {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "process {} ({}) {{", self.name, self.category)?;
        for (_, label) in self.labels() {
            match &label.declaration {
                Some(declaration) => writeln!(f, "  label {}: {}", label.name, declaration)?,
                None if !label.interfaces.is_empty() => writeln!(
                    f,
                    "  label {}: {}",
                    label.name,
                    label.interfaces.join(" | ")
                )?,
                None => writeln!(f, "  label {}", label.name)?,
            }
        }
        if let Some(root) = self.root() {
            writeln!(f, "  {}", serialize_action(self, root))?;
        }
        for (sub, _) in self.outline().subprocesses {
            if let Action::Subprocess(Subprocess {
                attrs,
                body: Some(body),
            }) = &self[sub]
            {
                writeln!(f, "  {} = {}", attrs.name, serialize_action(self, *body))?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::Declaration;

    #[test]
    fn trees_print_back_in_dsl_syntax() {
        let dsl = "(!register).[@probe[2]].(<ok> | <fail[%n%]>).{main}";
        let mut process = Process::from_dsl("usb", "driver", dsl).unwrap();
        process.define_subprocess("main", "[remove].{main} | (deregister)").unwrap();
        process
            .add_label(Label::with_declaration("n", Declaration::primitive("int")))
            .unwrap();

        let root = process.root().unwrap();
        assert_eq!(serialize_action(&process, root), dsl);
        insta::assert_snapshot!(process.to_string(), @r"
        process usb (driver) {
          label n: int
          (!register).[@probe[2]].(<ok> | <fail[%n%]>).{main}
          main = [remove].{main} | (deregister)
        }
        ");
    }

    #[test]
    fn printed_trees_parse_to_the_same_shape() {
        let first = Process::from_dsl("p", "test", "([a] | [b]).(c[3])").unwrap();
        let printed = serialize_action(&first, first.root().unwrap());
        let second = Process::from_dsl("p", "test", &printed).unwrap();
        assert_eq!(printed, serialize_action(&second, second.root().unwrap()));
    }
}
