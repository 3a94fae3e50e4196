// Copyright 2025 Cornell University
// released under MIT License

//! Machine-readable comments that let a trace visualizer map generated C back
//! to DSL actions. Format: `/* LDV {"type":..,"comment":..,"action":..,"callback":..,"relevant":..} */`

use serde::{Deserialize, Serialize};

use crate::ir::{Action, SignalKind};

const PREFIX: &str = "/* LDV ";
const SUFFIX: &str = " */";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Single,
    Begin,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelComment {
    #[serde(rename = "type")]
    pub kind: String,
    pub comment: String,
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub callback: Option<bool>,
    /// The action must show up in the error trace
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relevant: Option<bool>,
}

impl ModelComment {
    pub fn new(
        kind: &str,
        marker: Marker,
        action: Option<&str>,
        comment: &str,
        callback: bool,
    ) -> Self {
        let kind = match marker {
            Marker::Single => kind.to_string(),
            Marker::Begin => format!("{kind}_BEGIN"),
            Marker::End => format!("{kind}_END"),
        };
        Self {
            kind,
            comment: comment.to_string(),
            action: action.map(|a| a.to_string()),
            callback: callback.then_some(true),
            relevant: None,
        }
    }

    /// Comment for generated code that corresponds to no action
    pub fn artificial(comment: &str) -> Self {
        Self::new("ARTIFICIAL", Marker::Single, None, comment, false)
    }

    /// Comment for an atomic action; operators have none
    pub fn for_action(action: &Action, marker: Marker) -> Option<Self> {
        let attrs = action.attributes()?;
        let callback = action.is_callback();
        let (kind, default) = match action {
            Action::Dispatch(_) if action.signal_kind() == Some(SignalKind::Call) => {
                ("DISPATCH", format!("Call callback '{}'.", attrs.name))
            }
            Action::Dispatch(_) => ("DISPATCH", format!("Send signal '{}'.", attrs.name)),
            Action::Receive(_) => ("RECEIVE", format!("Receive signal '{}'.", attrs.name)),
            Action::Block(_) => ("CONDITION", format!("Execute block '{}'.", attrs.name)),
            Action::Subprocess(_) => ("SUBPROCESS", format!("Jump to '{}'.", attrs.name)),
            _ => return None,
        };
        let comment = attrs.comment.clone().unwrap_or(default);
        Some(Self {
            relevant: attrs.trace_relevant.then_some(true),
            ..Self::new(kind, marker, Some(&attrs.name), &comment, callback)
        })
    }

    /// Renders the comment as one line of C
    pub fn render(&self) -> String {
        // serde_json cannot fail on this struct; `*/` would end the comment early
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{PREFIX}{}{SUFFIX}", json.replace("*/", "*\\/"))
    }

    /// Recovers a comment from a line of generated C
    pub fn parse(line: &str) -> Option<Self> {
        let json = line.trim().strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
        serde_json::from_str(json).ok()
    }
}

/// Shorthand for a rendered artificial comment
pub fn artificial(comment: &str) -> String {
    ModelComment::artificial(comment).render()
}

/// Begin and end comments of an atomic action wrapped around `code`
pub fn wrap(action: &Action, code: Vec<String>) -> Vec<String> {
    let mut lines = Vec::with_capacity(code.len() + 2);
    if let Some(begin) = ModelComment::for_action(action, Marker::Begin) {
        lines.push(begin.render());
    }
    lines.extend(code);
    if let Some(end) = ModelComment::for_action(action, Marker::End) {
        lines.push(end.render());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Attributes, Callback, Dispatch, Receive};

    #[test]
    fn artificial_comments_have_a_null_action() {
        insta::assert_snapshot!(
            artificial("Initialize automaton variables."),
            @r#"/* LDV {"type":"ARTIFICIAL","comment":"Initialize automaton variables.","action":null} */"#
        );
    }

    #[test]
    fn callback_flag_only_on_callbacks() {
        let mut dispatch = Dispatch {
            attrs: Attributes::new("probe", "[probe]"),
            broadcast: false,
            callback: None,
        };
        let plain = ModelComment::for_action(&Action::Dispatch(dispatch.clone()), Marker::Begin)
            .unwrap()
            .render();
        insta::assert_snapshot!(plain, @r#"/* LDV {"type":"DISPATCH_BEGIN","comment":"Send signal 'probe'.","action":"probe"} */"#);

        dispatch.callback = Some(Callback {
            target: "%cb%".to_string(),
            retval: None,
        });
        let call = ModelComment::for_action(&Action::Dispatch(dispatch), Marker::End).unwrap();
        assert_eq!(call.kind, "DISPATCH_END");
        assert_eq!(call.callback, Some(true));
        assert_eq!(ModelComment::parse(&call.render()), Some(call));
    }

    #[test]
    fn trace_relevant_actions_are_flagged() {
        let mut attrs = Attributes::new("register", "(register)");
        attrs.trace_relevant = true;
        let receive = Action::Receive(Receive {
            attrs,
            replicative: false,
            callback: None,
        });
        insta::assert_snapshot!(
            ModelComment::for_action(&receive, Marker::Single).unwrap().render(),
            @r#"/* LDV {"type":"RECEIVE","comment":"Receive signal 'register'.","action":"register","relevant":true} */"#
        );
    }

    #[test]
    fn comment_text_cannot_close_the_c_comment() {
        let line = ModelComment::artificial("a */ b").render();
        assert_eq!(line.matches("*/").count(), 1);
        assert_eq!(ModelComment::parse(&line).unwrap().comment, "a */ b");
    }

    #[test]
    fn operators_have_no_comment() {
        assert!(ModelComment::for_action(&Action::Choice(vec![]), Marker::Single).is_none());
    }
}
