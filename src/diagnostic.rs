// Copyright 2025 Cornell University
// released under MIT License

use std::io::Write;

use clap::ColorChoice;
use codespan_reporting::diagnostic::{
    Diagnostic as CodespanDiagnostic, Label as CodespanLabel, LabelStyle, Severity,
};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{Buffer, Color, ColorSpec, WriteColor};
use rustc_hash::FxHashSet;

use crate::errors::{DescriptionError, ProcessError};

/// Severity of diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
}

impl Level {
    fn title(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
        }
    }
}

/// A part of a DSL string
#[derive(Debug, Clone, PartialEq, Eq)]
struct Label {
    message: Option<String>,
    range: (usize, usize),
}

impl Label {
    fn to_codespan_label(&self, fileid: usize) -> CodespanLabel<usize> {
        CodespanLabel::new(LabelStyle::Primary, fileid, self.range.0..self.range.1)
            .with_message(self.message.clone().unwrap_or_default())
    }
}

struct Diagnostic {
    message: String,
    level: Level,
    location: Option<(usize, Label)>,
}

impl Diagnostic {
    fn emit(&self, buffer: &mut Buffer, files: &SimpleFiles<String, String>) -> anyhow::Result<()> {
        if let Some((fileid, label)) = &self.location {
            let severity = match self.level {
                Level::Error => Severity::Error,
                Level::Warning => Severity::Warning,
            };
            let diagnostic = CodespanDiagnostic::new(severity)
                .with_message(&self.message)
                .with_labels(vec![label.to_codespan_label(*fileid)]);
            term::emit(buffer, &term::Config::default(), files, &diagnostic)?;
        } else {
            let color = match self.level {
                Level::Error => Color::Red,
                Level::Warning => Color::Yellow,
            };
            buffer.set_color(ColorSpec::new().set_bold(true).set_fg(Some(color)))?;
            write!(buffer, "{}", self.level.title())?;
            buffer.set_color(&ColorSpec::new())?;
            writeln!(buffer, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Renders errors for the user and keeps a plain copy of everything it printed
pub struct DiagnosticHandler {
    files: SimpleFiles<String, String>,
    reported: FxHashSet<(usize, usize, usize)>,
    error_string: String,
    color_choice: ColorChoice,
}

impl Default for DiagnosticHandler {
    fn default() -> Self {
        Self::new(ColorChoice::Never)
    }
}

impl DiagnosticHandler {
    pub fn new(color_choice: ColorChoice) -> Self {
        Self {
            files: SimpleFiles::new(),
            reported: FxHashSet::default(),
            error_string: String::new(),
            color_choice,
        }
    }

    fn create_buffer(&self) -> Buffer {
        if self.color_choice == ColorChoice::Never {
            Buffer::no_color()
        } else {
            Buffer::ansi()
        }
    }

    pub fn add_file(&mut self, name: String, content: String) -> usize {
        self.files.add(name, content)
    }

    pub fn error_string(&self) -> &str {
        &self.error_string
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        let mut buffer = self.create_buffer();
        if let Err(e) = diagnostic.emit(&mut buffer, &self.files) {
            log::error!("failed to render diagnostic: {e}");
            return;
        }
        let message = String::from_utf8_lossy(buffer.as_slice());
        self.error_string.push_str(&message);
        eprint!("{}", message);
    }

    /// Points at the offending fragment of a grammar error, other process
    /// errors have no location and are printed as a plain message
    pub fn emit_process_error(&mut self, fileid: usize, error: &ProcessError, level: Level) {
        let location = match error {
            ProcessError::Grammar { message, span, .. } => {
                if !self.reported.insert((fileid, span.0, span.1)) {
                    return;
                }
                Some((
                    fileid,
                    Label {
                        message: Some(message.clone()),
                        range: *span,
                    },
                ))
            }
            _ => None,
        };
        self.report(Diagnostic {
            message: error.to_string(),
            level,
            location,
        });
    }

    pub fn emit_description_error(&mut self, error: &DescriptionError) {
        match error {
            DescriptionError::Dsl {
                process,
                text,
                source,
            } => {
                let fileid = self.add_file(process.clone(), text.clone());
                self.emit_process_error(fileid, source, Level::Error);
            }
            other => self.emit_general_message(&other.to_string(), Level::Error),
        }
    }

    pub fn emit_general_message(&mut self, message: &str, level: Level) {
        self.report(Diagnostic {
            message: message.to_string(),
            level,
            location: None,
        });
    }
}
