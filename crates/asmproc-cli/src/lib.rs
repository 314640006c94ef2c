//! asmproc command line
//!
//! ```text
//! asmproc [options] <inputfile> [-o <outputfile>]
//! ```
//!
//! Flags override values loaded with `--config`. Without `-o` the input is
//! rewritten in place.
//!
//! # Example
//!
//! ```rust,ignore
//! let code = asmproc_cli::run(["asmproc", "--serialization", "-d", "bin", "bin/Game.dll"]);
//! std::process::exit(code);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod task;

use anyhow::Context;
use asmproc_core::{format_error_chain, LogSink, Platform, ProcessorApp, ProcessorOptions, StdoutSink};
use clap::error::ErrorKind;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command definition
#[must_use]
pub fn build_command() -> Command {
    Command::new("asmproc")
        .version(VERSION)
        .about("Post-build artifact processor")
        .arg(
            Arg::new("input")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Artifact to process"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_parser(value_parser!(PathBuf))
                .help("Where to write the result (defaults to the input)"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .help("TOML file with default options"),
        )
        .arg(
            Arg::new("platform")
                .long("platform")
                .value_parser(|s: &str| s.parse::<Platform>().map_err(|e| e.to_string()))
                .help("Platform the artifact targets"),
        )
        .arg(
            Arg::new("target-framework")
                .long("targetFramework")
                .help("Framework version folder for mobile platforms"),
        )
        .arg(
            Arg::new("framework-root")
                .long("framework-root")
                .value_parser(value_parser!(PathBuf))
                .help("Root of the per-platform framework folders"),
        )
        .arg(
            Arg::new("directory")
                .short('d')
                .long("directory")
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf))
                .help("Additional search directory"),
        )
        .arg(
            Arg::new("reference")
                .long("reference")
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf))
                .help("Artifact file to register before searching"),
        )
        .arg(
            Arg::new("add-reference")
                .long("add-reference")
                .action(ArgAction::Append)
                .help("Artifact name the output must reference"),
        )
        .arg(
            Arg::new("sign-key-file")
                .long("signkeyfile")
                .value_parser(value_parser!(PathBuf))
                .help("Public key file for strong-named artifacts"),
        )
        .arg(flag("serialization", "Generate and merge serializers"))
        .arg(flag("parameter-key", "Generate parameter key initialization"))
        .arg(flag("no-module-initializer", "Leave the module constructor untouched"))
        .arg(flag("no-update-engine", "Skip update engine registration of serializable members"))
        .arg(
            Arg::new("rename-assembly")
                .long("rename-assembly")
                .help("New artifact name"),
        )
        .arg(flag("symbols", "Read and write debug symbols"))
        .arg(flag("keep-original", "Back up the input to <name>.old.<ext> before writing the output"))
        .arg(flag("delete-output-on-error", "Remove the output when processing fails"))
        .arg(flag("treat-warnings-as-errors", "Fail when any warning is reported"))
}

fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).long(name).action(ArgAction::SetTrue).help(help)
}

/// Parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub options: ProcessorOptions,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl Invocation {
    /// Options from `--config` (if any) with the flags applied on top
    pub fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let mut options = match matches.get_one::<PathBuf>("config") {
            Some(path) => ProcessorOptions::from_toml_file(path)
                .with_context(|| format!("failed to load options from {}", path.display()))?,
            None => ProcessorOptions::new(),
        };

        if let Some(platform) = matches.get_one::<Platform>("platform") {
            options.platform = *platform;
        }
        if let Some(framework) = matches.get_one::<String>("target-framework") {
            options.target_framework = Some(framework.clone());
        }
        if let Some(root) = matches.get_one::<PathBuf>("framework-root") {
            options.framework_root = Some(root.clone());
        }
        if let Some(dirs) = matches.get_many::<PathBuf>("directory") {
            options.search_directories.extend(dirs.cloned());
        }
        if let Some(files) = matches.get_many::<PathBuf>("reference") {
            options.references.extend(files.cloned());
        }
        if let Some(names) = matches.get_many::<String>("add-reference") {
            options.add_references.extend(names.cloned());
        }
        if let Some(key) = matches.get_one::<PathBuf>("sign-key-file") {
            options.sign_key_file = Some(key.clone());
        }
        if let Some(name) = matches.get_one::<String>("rename-assembly") {
            options.rename = Some(name.clone());
        }
        options.serialization |= matches.get_flag("serialization");
        options.parameter_key |= matches.get_flag("parameter-key");
        if matches.get_flag("no-module-initializer") {
            options.module_initializer = false;
        }
        if matches.get_flag("no-update-engine") {
            options.update_engine = false;
        }
        options.use_symbols |= matches.get_flag("symbols");
        options.keep_original |= matches.get_flag("keep-original");
        options.delete_output_on_error |= matches.get_flag("delete-output-on-error");
        options.treat_warnings_as_errors |= matches.get_flag("treat-warnings-as-errors");

        let input = matches
            .get_one::<PathBuf>("input")
            .cloned()
            .context("missing input file")?;
        let output = matches
            .get_one::<PathBuf>("output")
            .cloned()
            .unwrap_or_else(|| input.clone());
        Ok(Self { options, input, output })
    }
}

/// Run with the given arguments (program name first); returns the exit code
///
/// Failures are printed to standard output.
pub fn run<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    run_with_sink(args, Arc::new(StdoutSink))
}

/// [`run`] reporting through `sink`
pub fn run_with_sink<I, T>(args: I, sink: Arc<dyn LogSink>) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = match build_command().try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(err) => {
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                let _ = err.print();
                return 0;
            }
            let rendered = err.render().to_string();
            let message = rendered.trim_end();
            sink.error(message.strip_prefix("error: ").unwrap_or(message));
            return 1;
        }
    };

    let invocation = match Invocation::from_matches(&matches) {
        Ok(invocation) => invocation,
        Err(err) => {
            error!("{err:#}");
            sink.error(&format_error_chain(err.as_ref()));
            return 1;
        }
    };

    let app = ProcessorApp::new(invocation.options).with_sink(sink);
    if app.run(&invocation.input, &invocation.output) {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmproc_core::{CollectingSink, Level};
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn parse(args: &[&str]) -> Invocation {
        let matches = build_command()
            .try_get_matches_from(std::iter::once("asmproc").chain(args.iter().copied()))
            .unwrap();
        Invocation::from_matches(&matches).unwrap()
    }

    #[test]
    fn command_is_well_formed() {
        build_command().debug_assert();
    }

    #[test]
    fn output_defaults_to_input() {
        let inv = parse(&["bin/Game.dll"]);
        assert_eq!(inv.input, Path::new("bin/Game.dll"));
        assert_eq!(inv.output, inv.input);
        assert_eq!(inv.options, ProcessorOptions::new());
    }

    #[test]
    fn flags_map_to_options() {
        let inv = parse(&[
            "--platform",
            "Android",
            "--targetFramework",
            "v13.0",
            "-d",
            "a",
            "--directory",
            "b",
            "--add-reference",
            "Engine.Rendering",
            "--signkeyfile",
            "key.snk",
            "--serialization",
            "--parameter-key",
            "--no-module-initializer",
            "--no-update-engine",
            "--rename-assembly",
            "Game.Client",
            "--symbols",
            "--keep-original",
            "--delete-output-on-error",
            "in.dll",
            "-o",
            "out.dll",
        ]);
        let o = &inv.options;
        assert_eq!(o.platform, Platform::Android);
        assert_eq!(o.target_framework.as_deref(), Some("v13.0"));
        assert_eq!(o.search_directories, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(o.add_references, vec!["Engine.Rendering".to_string()]);
        assert_eq!(o.sign_key_file.as_deref(), Some(Path::new("key.snk")));
        assert!(o.serialization && o.parameter_key && !o.module_initializer);
        assert!(!o.update_engine);
        assert_eq!(o.rename.as_deref(), Some("Game.Client"));
        assert!(o.use_symbols && o.keep_original && o.delete_output_on_error);
        assert!(!o.treat_warnings_as_errors);
        assert_eq!(inv.output, Path::new("out.dll"));
    }

    #[test]
    fn flags_layer_over_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("asmproc.toml");
        std::fs::write(&config, "search-directories = [\"from-config\"]\nparameter-key = true\n").unwrap();
        let inv = parse(&["--config", config.to_str().unwrap(), "-d", "from-flag", "in.dll"]);
        assert_eq!(
            inv.options.search_directories,
            vec![PathBuf::from("from-config"), PathBuf::from("from-flag")]
        );
        assert!(inv.options.parameter_key);
    }

    #[test]
    fn bad_platform_and_missing_input_fail() {
        assert_eq!(run(["asmproc", "--platform", "Amiga", "in.dll"]), 1);
        assert_eq!(run(["asmproc"]), 1);
        assert_eq!(run(["asmproc", "--help"]), 0);
    }

    #[test]
    fn unreadable_config_fails() {
        assert_eq!(run(["asmproc", "--config", "/nonexistent/asmproc.toml", "in.dll"]), 1);
    }

    #[test]
    fn failures_reach_the_sink() {
        let sink = Arc::new(CollectingSink::new());
        let code = run_with_sink(["asmproc", "--config", "/nonexistent/asmproc.toml", "in.dll"], sink.clone());
        assert_eq!(code, 1);
        assert!(sink.contains(Level::Error, "failed to load options from /nonexistent/asmproc.toml"));

        let usage = Arc::new(CollectingSink::new());
        assert_eq!(run_with_sink(["asmproc"], usage.clone()), 1);
        let errors = usage.at(Level::Error);
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].starts_with("error:"));
        assert!(errors[0].contains("<input>"));
    }
}
