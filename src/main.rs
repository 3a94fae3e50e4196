// Copyright 2025 Cornell University
// released under MIT License

use anyhow::{anyhow, Context};
use clap::{ColorChoice, Parser};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use emg::backends::{translate_collection, Backend, ChoiceDefault, FunctionKind, TranslationConfig};
use emg::description::{load_str, Loaded};
use emg::diagnostic::DiagnosticHandler;

// $ cargo run -- --description tests/descriptions/usb.json --backend state

/// Args for the environment model generator
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, disable_version_flag = true)]
struct Cli {
    /// Path to a JSON process description
    #[arg(short, long, value_name = "DESCRIPTION_FILE")]
    description: String,

    /// Path to a JSON translation configuration
    #[arg(short, long, value_name = "CONFIG_FILE")]
    config: Option<String>,

    /// Overrides the backend of the configuration
    #[arg(short, long, value_enum)]
    backend: Option<BackendArg>,

    /// Run all automata from a single control function
    #[arg(long)]
    nested: bool,

    /// Generate control functions that run as threads
    #[arg(long)]
    threads: bool,

    /// Retry a nondeterministic choice instead of treating its default as unreachable
    #[arg(long)]
    loop_default: bool,

    /// Name of the generated main function
    #[arg(long, value_name = "NAME")]
    entry_point: Option<String>,

    /// Writes the generated model as JSON instead of printing the C code
    #[arg(short, long, value_name = "OUTPUT_FILE")]
    output: Option<String>,

    /// Users can specify `-v` or `--verbose` to toggle logging
    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,

    /// To suppress colors in error messages, pass in `--color never`
    #[arg(long, value_name = "COLOR_CHOICE", default_value = "auto")]
    color: ColorChoice,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    State,
    Label,
}

impl Cli {
    fn translation_config(&self) -> anyhow::Result<TranslationConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read configuration {path}"))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("malformed configuration {path}"))?
            }
            None => TranslationConfig::default(),
        };
        if let Some(backend) = self.backend {
            config.backend = match backend {
                BackendArg::State => Backend::State,
                BackendArg::Label => Backend::Label,
            };
        }
        if self.nested {
            config.nested_automata = true;
        }
        if self.threads {
            config.function_kind = FunctionKind::Thread;
        }
        if self.loop_default {
            config.choice_default = ChoiceDefault::Loop;
        }
        if let Some(entry_point) = &self.entry_point {
            config.entry_point = entry_point.clone();
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::new();
    logger
        .format_timestamp(None)
        .filter_level(cli.verbosity.log_level_filter());
    if cli.color == ColorChoice::Never {
        logger.write_style(env_logger::WriteStyle::Never);
    }
    logger.init();

    let config = cli.translation_config()?;
    let mut handler = DiagnosticHandler::new(cli.color);

    let text = std::fs::read_to_string(&cli.description)
        .with_context(|| format!("failed to read description {}", cli.description))?;
    let Loaded {
        mut collection,
        interfaces,
    } = match load_str(&text) {
        Ok(loaded) => loaded,
        Err(e) => {
            handler.emit_description_error(&e);
            return Err(anyhow!("failed to load {}", cli.description));
        }
    };

    collection.establish_peers();
    let model = translate_collection(&collection, &interfaces, &config)
        .with_context(|| format!("failed to translate {}", cli.description))?;

    match &cli.output {
        Some(path) => {
            let json = serde_json::to_string_pretty(&model)?;
            std::fs::write(path, json).with_context(|| format!("failed to write {path}"))?;
            log::info!("wrote {} control functions to {path}", model.functions.len());
        }
        None => {
            for (file, definitions) in model.files_to_definitions.iter() {
                println!("/* {file} */");
                for declaration in model.files_to_declarations[file].iter() {
                    println!("{declaration}");
                }
                for definition in definitions.iter() {
                    println!("\n{definition}");
                }
            }
        }
    }
    Ok(())
}
