use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use env_logger::Env;
use log::debug;
use nnexport::{
    Architecture, LayerGraph,
    config::Config,
    export_architecture,
    exporting::keras::{BUILD_FUNCTION_OPTION, TRAVERSAL_OPTION},
};

/// Generate Keras source code from a layer graph
#[derive(Parser, Debug)]
#[command(name = "nnexport", version, about)]
struct Cli {
    /// Architecture JSON file (reads from stdin if not provided)
    input: Option<PathBuf>,

    /// Target framework
    #[arg(short, long)]
    framework: Option<String>,

    /// Line ending of the generated code (lf, crlf)
    #[arg(long)]
    line_break: Option<String>,

    /// Indentation of the generated code (tabs, 2_spaces, 4_spaces, 8_spaces)
    #[arg(long)]
    indent: Option<String>,

    /// Emit a Sequential model when the layers form a single chain
    #[arg(long)]
    prefer_sequential: bool,

    /// Layer order of functional models (depth_first, level_order)
    #[arg(long)]
    traversal: Option<String>,

    /// Wrap model construction in a build_model() function
    #[arg(long)]
    build_function: bool,

    /// Extra emitter option, may be repeated
    #[arg(short = 'O', long = "option", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    options: Vec<(String, String)>,

    /// Config file applied on top of the user and NNEXPORT_CONFIG files
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write output to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the full export result as JSON
    #[arg(long, conflicts_with = "topology")]
    json: bool,

    /// Print the linked topology instead of code
    #[arg(long)]
    topology: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(framework) = &self.framework {
            config.framework.clone_from(framework);
        }
        if let Some(line_break) = &self.line_break {
            config.line_break = line_break.parse()?;
        }
        if let Some(indent) = &self.indent {
            config.indent = indent.parse()?;
        }
        config.prefer_sequential |= self.prefer_sequential;

        if let Some(traversal) = &self.traversal {
            config
                .emitter_options
                .insert(TRAVERSAL_OPTION.to_owned(), traversal.clone());
        }
        if self.build_function {
            config
                .emitter_options
                .insert(BUILD_FUNCTION_OPTION.to_owned(), "true".to_owned());
        }
        for (key, value) in &self.options {
            config.emitter_options.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

fn parse_key_value(option: &str) -> Result<(String, String), String> {
    match option.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.trim().to_owned()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{option}'")),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read architecture from {}", path.display())),
        None => {
            let mut source = String::new();
            io::stdin()
                .read_to_string(&mut source)
                .context("Failed to read architecture from stdin")?;
            Ok(source)
        }
    }
}

fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => fs::write(path, text)
            .with_context(|| format!("Failed to write output to {}", path.display())),
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config)?;
    debug!("Effective configuration: {config:?}");

    let source = read_input(cli.input.as_deref())?;
    let architecture =
        Architecture::from_json(&source).context("Failed to parse architecture JSON")?;
    let layer_types = config.layer_registry();

    let text = if cli.topology {
        layer_types.validate(&architecture.layers)?;
        let graph = LayerGraph::link(&architecture.layers)?;
        format!("{}\n", graph.render_topology("\n"))
    } else {
        let result = export_architecture(&architecture, &config.export_options(), &layer_types)
            .with_context(|| format!("Failed to export '{}'", architecture.name))?;
        if cli.json {
            format!("{}\n", serde_json::to_string_pretty(&result)?)
        } else {
            result.source_code
        }
    };

    write_output(cli.output.as_deref(), &text)
}
