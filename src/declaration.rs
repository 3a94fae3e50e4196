// Copyright 2025 Cornell University
// released under MIT License

//! C declarations of label types, e.g. `struct usb_device *` or
//! `int (*)(struct device *, void *)`.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use rustc_hash::FxHashSet;
use std::fmt::{Display, Formatter};

use crate::errors::{ProcessError, ProcessResult};

#[derive(Parser)]
#[grammar = "declaration.pest"]
struct DeclarationParser;

lazy_static::lazy_static! {
    /// Reserved words that the grammar accepts as plain identifiers
    static ref RESERVED: FxHashSet<&'static str> = [
        "auto", "break", "case", "continue", "default", "do", "else", "extern", "for", "goto",
        "if", "inline", "register", "return", "sizeof", "static", "switch", "typedef", "while",
    ]
    .into_iter()
    .collect();
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Declaration {
    /// Base type including its qualifiers, e.g. `const unsigned long` or `struct file`
    Primitive(String),
    Pointer(Box<Declaration>),
    Array {
        element: Box<Declaration>,
        size: Option<String>,
    },
    Function {
        ret: Box<Declaration>,
        parameters: Vec<Declaration>,
        variadic: bool,
    },
}

impl Declaration {
    pub fn primitive(name: impl Into<String>) -> Self {
        Declaration::Primitive(name.into())
    }

    /// Parses a C declaration. A declarator name, if present, is discarded.
    pub fn parse(text: &str) -> ProcessResult<Self> {
        let error = |message: String| ProcessError::Declaration {
            declaration: text.to_string(),
            message,
        };
        let mut pairs = DeclarationParser::parse(Rule::declaration, text)
            .map_err(|e| error(e.variant.message().to_string()))?;
        let top = pairs
            .next()
            .ok_or_else(|| error("empty declaration".to_string()))?;
        let mut inner = top.into_inner();
        let (Some(base), Some(declarator)) = (inner.next(), inner.next()) else {
            return Err(error("expected a type".to_string()));
        };
        let (declaration, name) = apply_declarator(parse_base(base), declarator)?;
        match name {
            Some(name) if RESERVED.contains(name.as_str()) => {
                Err(error(format!("`{name}` is a reserved word")))
            }
            _ => Ok(declaration),
        }
    }

    pub fn pointer_to(self) -> Self {
        Declaration::Pointer(Box::new(self))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Declaration::Pointer(_))
    }

    pub fn is_function_pointer(&self) -> bool {
        matches!(self, Declaration::Pointer(inner) if matches!(**inner, Declaration::Function { .. }))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Declaration::Primitive(name) if name == "void")
    }

    /// Return type of a function or function pointer
    pub fn return_type(&self) -> Option<&Declaration> {
        match self {
            Declaration::Function { ret, .. } => Some(ret),
            Declaration::Pointer(inner) => match inner.as_ref() {
                Declaration::Function { ret, .. } => Some(ret),
                _ => None,
            },
            _ => None,
        }
    }

    /// Renders the declaration of a variable called `name`. An empty name gives
    /// the abstract type.
    pub fn to_string_with(&self, name: &str) -> String {
        self.render(name.to_string())
    }

    fn render(&self, declarator: String) -> String {
        match self {
            Declaration::Primitive(base) if declarator.is_empty() => base.clone(),
            Declaration::Primitive(base) => format!("{base} {declarator}"),
            Declaration::Pointer(inner) => {
                let declarator = match inner.as_ref() {
                    Declaration::Array { .. } | Declaration::Function { .. } => {
                        format!("(*{declarator})")
                    }
                    _ => format!("*{declarator}"),
                };
                inner.render(declarator)
            }
            Declaration::Array { element, size } => {
                let size = size.as_deref().unwrap_or_default();
                element.render(format!("{declarator}[{size}]"))
            }
            Declaration::Function {
                ret,
                parameters,
                variadic,
            } => {
                let mut rendered: Vec<String> =
                    parameters.iter().map(|p| p.to_string_with("")).collect();
                if *variadic {
                    rendered.push("...".to_string());
                }
                let rendered = if rendered.is_empty() {
                    "void".to_string()
                } else {
                    rendered.join(", ")
                };
                ret.render(format!("{declarator}({rendered})"))
            }
        }
    }
}

impl Display for Declaration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_with(""))
    }
}

fn parse_base(pair: Pair<Rule>) -> Declaration {
    let words: Vec<&str> = pair
        .into_inner()
        .flat_map(|inner| match inner.as_rule() {
            Rule::tagged => inner.into_inner().map(|p| p.as_str()).collect::<Vec<_>>(),
            _ => vec![inner.as_str()],
        })
        .collect();
    Declaration::Primitive(words.join(" "))
}

enum Suffix {
    Array(Option<String>),
    Function(Vec<Declaration>, bool),
}

/// Applies a declarator to `base` following C's inside-out reading order
fn apply_declarator(
    base: Declaration,
    pair: Pair<Rule>,
) -> ProcessResult<(Declaration, Option<String>)> {
    let mut declaration = base;
    let mut name = None;
    let mut nested = None;
    let mut suffixes = vec![];
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::pointer => declaration = declaration.pointer_to(),
            Rule::direct_declarator => {
                for direct in inner.into_inner() {
                    match direct.as_rule() {
                        Rule::name => name = Some(direct.as_str().to_string()),
                        Rule::declarator => nested = Some(direct),
                        rule => unreachable!("unexpected {:?} in a direct declarator", rule),
                    }
                }
            }
            Rule::array_suffix => {
                let size = inner.into_inner().next().map(|s| s.as_str().to_string());
                suffixes.push(Suffix::Array(size));
            }
            Rule::parameters => {
                let mut parameters = vec![];
                let mut variadic = false;
                for parameter in inner.into_inner() {
                    if parameter.as_rule() == Rule::ellipsis {
                        variadic = true;
                        continue;
                    }
                    let mut parts = parameter.into_inner();
                    let (Some(base), Some(declarator)) = (parts.next(), parts.next()) else {
                        unreachable!("a parameter always has a type and a declarator");
                    };
                    parameters.push(apply_declarator(parse_base(base), declarator)?.0);
                }
                // `(void)` declares no parameters
                if parameters.len() == 1 && parameters[0].is_void() {
                    parameters.clear();
                }
                suffixes.push(Suffix::Function(parameters, variadic));
            }
            rule => unreachable!("unexpected {:?} in a declarator", rule),
        }
    }
    for suffix in suffixes.into_iter().rev() {
        declaration = match suffix {
            Suffix::Array(size) => Declaration::Array {
                element: Box::new(declaration),
                size,
            },
            Suffix::Function(parameters, variadic) => Declaration::Function {
                ret: Box::new(declaration),
                parameters,
                variadic,
            },
        };
    }
    match nested {
        Some(nested) => {
            let (declaration, inner_name) = apply_declarator(declaration, nested)?;
            Ok((declaration, inner_name.or(name)))
        }
        None => Ok((declaration, name)),
    }
}
