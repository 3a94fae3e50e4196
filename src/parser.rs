// Copyright 2025 Cornell University
// released under MIT License

use pest::error::InputLocation;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use rustc_hash::FxHashMap;

use crate::errors::{ProcessError, ProcessResult};
use crate::ir::*;

#[derive(Parser)]
#[grammar = "process.pest"]
struct ProcessParser;

/// Parse result that has not been registered with the process yet
#[derive(Debug)]
enum Node {
    Leaf {
        kind: ActionKind,
        name: String,
        count: Count,
        /// `@` on a dispatch, `!` on a receive
        marked: bool,
        source: String,
    },
    Choice(Vec<Node>),
    Concatenation(Vec<Node>),
    Parentheses(Box<Node>),
}

struct ParserContext<'a> {
    process: &'a Process,
    input: &'a str,
}

impl ParserContext<'_> {
    fn error(&self, span: (usize, usize), message: &str) -> ProcessError {
        ProcessError::Grammar {
            fragment: self.input[span.0..span.1].to_string(),
            message: message.to_string(),
            span,
        }
    }

    // Helper method for expected rule errors
    fn expect_rule<T>(
        &self,
        option: Option<T>,
        context_pair: &Pair<Rule>,
        message: &str,
    ) -> ProcessResult<T> {
        option.ok_or_else(|| {
            let span = context_pair.as_span();
            self.error((span.start(), span.end()), message)
        })
    }

    fn parse_action_list(&self, pair: Pair<Rule>) -> ProcessResult<Node> {
        let mut alternatives = pair
            .into_inner()
            .map(|concatenation| self.parse_concatenation(concatenation))
            .collect::<ProcessResult<Vec<_>>>()?;
        if alternatives.len() == 1 {
            Ok(alternatives.remove(0))
        } else {
            Ok(Node::Choice(alternatives))
        }
    }

    fn parse_concatenation(&self, pair: Pair<Rule>) -> ProcessResult<Node> {
        let mut sequence = pair
            .into_inner()
            .map(|action| self.parse_action(action))
            .collect::<ProcessResult<Vec<_>>>()?;
        if sequence.len() == 1 {
            Ok(sequence.remove(0))
        } else {
            Ok(Node::Concatenation(sequence))
        }
    }

    fn parse_action(&self, pair: Pair<Rule>) -> ProcessResult<Node> {
        let kind = match pair.as_rule() {
            Rule::dispatch => ActionKind::Dispatch,
            Rule::receive => ActionKind::Receive,
            Rule::subprocess => ActionKind::Subprocess,
            Rule::condition => ActionKind::Condition,
            Rule::parentheses => {
                let inner = self.expect_rule(
                    pair.clone().into_inner().next(),
                    &pair,
                    "expected an action list inside parentheses",
                )?;
                return Ok(Node::Parentheses(Box::new(self.parse_action_list(inner)?)));
            }
            rule => unreachable!("parse_action expected an action, found {:?}", rule),
        };

        let mut marked = false;
        let mut name = None;
        let mut count = Count::default();
        for inner in pair.clone().into_inner() {
            match inner.as_rule() {
                Rule::broadcast | Rule::replicative => marked = true,
                Rule::identifier => name = Some(inner.as_str().to_string()),
                Rule::count => count = self.parse_count(inner)?,
                rule => unreachable!("unexpected {:?} inside an action", rule),
            }
        }
        let name = self.expect_rule(name, &pair, "expected an action name")?;
        Ok(Node::Leaf {
            kind,
            name,
            count,
            marked,
            source: pair.as_str().to_string(),
        })
    }

    fn parse_count(&self, pair: Pair<Rule>) -> ProcessResult<Count> {
        let inner = self.expect_rule(
            pair.clone().into_inner().next(),
            &pair,
            "expected a repetition count",
        )?;
        let span = (inner.as_span().start(), inner.as_span().end());
        match inner.as_rule() {
            Rule::number => match inner.as_str().parse::<u32>() {
                Ok(0) => Err(self.error(span, "repetition count must be positive")),
                Ok(n) => Ok(Count::Fixed(n)),
                Err(_) => Err(self.error(span, "repetition count is too large")),
            },
            Rule::dynamic => {
                let label = self.expect_rule(
                    inner.clone().into_inner().next(),
                    &inner,
                    "expected a label name",
                )?;
                Ok(Count::Label(label.as_str().to_string()))
            }
            rule => unreachable!("unexpected {:?} inside a count", rule),
        }
    }

    /// Each name may be defined by one leaf. Only subprocess jumps may repeat.
    fn check_names(
        &self,
        node: &Node,
        seen: &mut FxHashMap<String, (ActionKind, String)>,
    ) -> ProcessResult<()> {
        match node {
            Node::Leaf {
                kind, name, source, ..
            } => {
                let collision = |first: &str| ProcessError::NamingCollision {
                    process: self.process.name.clone(),
                    name: name.clone(),
                    first: first.to_string(),
                    second: source.clone(),
                };
                if let Some(existing) = self.process.action(name) {
                    let reuse =
                        *kind == ActionKind::Subprocess && existing.kind() == ActionKind::Subprocess;
                    if !reuse {
                        let first = existing.attributes().map(|a| a.source.as_str());
                        return Err(collision(first.unwrap_or_default()));
                    }
                }
                if let Some((first_kind, first)) = seen.get(name) {
                    if !(*kind == ActionKind::Subprocess && *first_kind == ActionKind::Subprocess) {
                        return Err(collision(first));
                    }
                }
                seen.insert(name.clone(), (*kind, source.clone()));
                Ok(())
            }
            Node::Choice(children) | Node::Concatenation(children) => children
                .iter()
                .try_for_each(|child| self.check_names(child, seen)),
            Node::Parentheses(inner) => self.check_names(inner, seen),
        }
    }
}

fn commit(process: &mut Process, node: Node) -> ActionId {
    match node {
        Node::Leaf {
            kind,
            name,
            count,
            marked,
            source,
        } => {
            if kind == ActionKind::Subprocess {
                if let Some(existing) = process.action_id(&name) {
                    return existing;
                }
            }
            let attrs = Attributes {
                count,
                ..Attributes::new(name, source)
            };
            let action = match kind {
                ActionKind::Dispatch => Action::Dispatch(Dispatch {
                    attrs,
                    broadcast: marked,
                    callback: None,
                }),
                ActionKind::Receive => Action::Receive(Receive {
                    attrs,
                    replicative: marked,
                    callback: None,
                }),
                ActionKind::Subprocess => Action::Subprocess(Subprocess { attrs, body: None }),
                _ => Action::Block(attrs),
            };
            process.push_action(action)
        }
        Node::Choice(children) => {
            let ids = children.into_iter().map(|c| commit(process, c)).collect();
            process.push_action(Action::Choice(ids))
        }
        Node::Concatenation(children) => {
            let ids = children.into_iter().map(|c| commit(process, c)).collect();
            process.push_action(Action::Concatenation(ids))
        }
        Node::Parentheses(inner) => {
            let id = commit(process, *inner);
            process.push_action(Action::Parentheses(id))
        }
    }
}

fn grammar_error(input: &str, err: pest::error::Error<Rule>) -> ProcessError {
    let (start, end) = match err.location {
        InputLocation::Span((start, end)) => (start, end),
        InputLocation::Pos(pos) => {
            // point at the offending character, if there is one
            let width = input[pos..].chars().next().map_or(0, char::len_utf8);
            (pos, pos + width)
        }
    };
    let fragment = if start == end {
        "<end of input>".to_string()
    } else {
        input[start..end].to_string()
    };
    ProcessError::Grammar {
        fragment,
        message: err.variant.message().to_string(),
        span: (start, end),
    }
}

/// Parses `input` into an action tree of `process` and returns its root.
/// On error the process is left untouched.
pub fn parse_action_tree(process: &mut Process, input: &str) -> ProcessResult<ActionId> {
    let mut pairs =
        ProcessParser::parse(Rule::process, input).map_err(|e| grammar_error(input, e))?;
    let ctx = ParserContext { process, input };
    let top = pairs.next().ok_or_else(|| ctx.error((0, input.len()), "expected actions"))?;
    let list = ctx.expect_rule(top.clone().into_inner().next(), &top, "expected actions")?;
    let tree = ctx.parse_action_list(list)?;
    ctx.check_names(&tree, &mut FxHashMap::default())?;

    let root = commit(process, tree);
    log::debug!("parsed `{}` for process `{}`", input.trim(), process.name);
    Ok(root)
}
