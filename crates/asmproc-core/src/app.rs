//! End-to-end processing of one artifact

use crate::error::ProcessError;
use crate::options::ProcessorOptions;
use asmproc_artifact::codec::{self, ReadOptions, WriteOptions};
use asmproc_artifact::Artifact;
use asmproc_pipeline::stages::{
    AddReferenceStage, CompileMergeStage, DispatcherPoolingStage, InitLocalsStage, ModuleInitializerStage,
    OpenSourceSignStage, ParameterKeyStage, RenameStage, SerializationStage, UpdateEngineStage,
};
use asmproc_pipeline::{
    format_error_chain, is_processed, mark_processed, Level, LogSink, Pipeline, ProcessorContext, StdoutSink,
};
use asmproc_resolver::Resolver;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// How a successful run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The marker was present; the artifact was copied through unchanged
    AlreadyProcessed,
    /// No stage changed anything
    Unchanged,
    /// At least one stage changed the artifact, which is now marked
    Processed,
}

/// Forwards to another sink and counts warnings
#[derive(Debug)]
struct CountingSink {
    inner: Arc<dyn LogSink>,
    warnings: AtomicUsize,
}

impl LogSink for CountingSink {
    fn log(&self, level: Level, message: &str) {
        if level == Level::Warn {
            self.warnings.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.log(level, message);
    }
}

/// Processes artifacts with one set of options
#[derive(Debug, Clone)]
pub struct ProcessorApp {
    options: ProcessorOptions,
    sink: Arc<dyn LogSink>,
}

impl ProcessorApp {
    /// App reporting to standard output
    #[must_use]
    pub fn new(options: ProcessorOptions) -> Self {
        Self {
            options,
            sink: Arc::new(StdoutSink),
        }
    }

    /// Report through `sink` instead of standard output
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    #[inline]
    #[must_use]
    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    /// Process `input` into `output`, reporting failures to the sink
    ///
    /// Returns whether the run succeeded. On failure nothing is written;
    /// with `delete_output_on_error` an existing output file is removed too.
    #[must_use]
    pub fn run(&self, input: &Path, output: &Path) -> bool {
        match self.process(input, output) {
            Ok(outcome) => {
                debug!(?outcome, input = %input.display(), "run finished");
                true
            }
            Err(err) => {
                error!(error = %err, input = %input.display(), "processing failed");
                self.sink.error(&format_error_chain(&err));
                if self.options.delete_output_on_error && output.exists() {
                    if let Err(e) = std::fs::remove_file(output) {
                        self.sink
                            .error(&format!("cannot delete {}: {e}", output.display()));
                    }
                }
                false
            }
        }
    }

    /// Process `input` into `output`
    ///
    /// # Errors
    /// Returns a [`ProcessError`] for any failure; the output is not
    /// written in that case.
    pub fn process(&self, input: &Path, output: &Path) -> Result<Outcome, ProcessError> {
        let counter = Arc::new(CountingSink {
            inner: Arc::clone(&self.sink),
            warnings: AtomicUsize::new(0),
        });
        let sink: Arc<dyn LogSink> = if self.options.treat_warnings_as_errors {
            Arc::clone(&counter) as Arc<dyn LogSink>
        } else {
            Arc::clone(&self.sink)
        };

        let resolver = self.build_resolver(input)?;
        let read_symbols = self.options.use_symbols && codec::symbols_path(input).exists();
        let artifact = codec::read(input, ReadOptions { read_symbols })?;
        let copy_through = !same_file(input, output);

        if is_processed(&artifact) {
            sink.info("artifact has already been processed, skip it");
            if copy_through {
                self.write(&artifact, input, output)?;
            }
            return Ok(Outcome::AlreadyProcessed);
        }

        resolver.register(Arc::new(artifact.clone()));
        let mut ctx = ProcessorContext::new(artifact, resolver, self.options.platform, sink);
        let mut pipeline = self.build_pipeline()?;
        let modified = pipeline.run(&mut ctx)?;

        let warnings = counter.warnings.load(Ordering::Relaxed);
        if warnings > 0 {
            return Err(ProcessError::WarningsAsErrors { count: warnings });
        }
        if modified {
            mark_processed(&mut ctx.artifact, &ctx.resolver)?;
        }
        if modified || copy_through {
            self.write(&ctx.artifact, input, output)?;
        }
        info!(artifact = %ctx.artifact.name, modified, "artifact processed");
        Ok(if modified { Outcome::Processed } else { Outcome::Unchanged })
    }

    /// Resolver over the configured directories, the platform framework
    /// folders and the input's own directory
    fn build_resolver(&self, input: &Path) -> Result<Resolver, ProcessError> {
        let options = &self.options;
        let mut resolver = Resolver::new();
        for dir in &options.search_directories {
            resolver.add_search_directory(dir);
        }
        if let Some(root) = &options.framework_root {
            for dir in options
                .platform
                .framework_directories(root, options.target_framework.as_deref())?
            {
                resolver.add_search_directory(dir);
            }
        } else if options.platform.requires_target_framework() && options.target_framework.is_none() {
            return Err(asmproc_resolver::ResolveError::MissingTargetFramework {
                platform: options.platform.to_string(),
            }
            .into());
        }
        if let Some(dir) = input.parent().filter(|d| !d.as_os_str().is_empty()) {
            resolver.add_search_directory(dir);
        }
        for reference in &options.references {
            resolver.register_file(reference)?;
        }
        Ok(resolver)
    }

    /// Stage sequence enabled by the options, in the fixed default order
    ///
    /// # Errors
    /// Fails when the sign key file cannot be read or the stage order is
    /// inconsistent.
    pub fn build_pipeline(&self) -> Result<Pipeline, ProcessError> {
        let options = &self.options;
        let sign_key = options
            .sign_key_file
            .as_deref()
            .map(|path| std::fs::read(path).map_err(|e| ProcessError::io(path, e)))
            .transpose()?;

        let mut builder = Pipeline::builder();
        if !options.add_references.is_empty() {
            builder = builder.stage(AddReferenceStage::new(options.add_references.clone()));
        }
        if options.parameter_key {
            builder = builder.stage(ParameterKeyStage);
        }
        if let Some(name) = &options.rename {
            builder = builder.stage(RenameStage::new(name.clone()));
        }
        builder = builder.stage(DispatcherPoolingStage);
        if options.serialization {
            builder = builder.stage(SerializationStage::new(sign_key.clone()));
            if options.update_engine {
                builder = builder.stage(UpdateEngineStage::new(sign_key));
            }
            builder = builder.stage(CompileMergeStage);
        }
        if options.module_initializer {
            builder = builder.stage(ModuleInitializerStage);
        }
        let pipeline = builder
            .stage(InitLocalsStage)
            .stage(OpenSourceSignStage)
            .build()?;
        debug!(stages = ?pipeline.stage_names(), "pipeline built");
        Ok(pipeline)
    }

    /// Write `artifact` to `output`, first backing up `input` when asked
    fn write(&self, artifact: &Artifact, input: &Path, output: &Path) -> Result<(), ProcessError> {
        if self.options.keep_original {
            codec::keep_original(input)?;
        }
        codec::write(
            artifact,
            output,
            WriteOptions {
                write_symbols: self.options.use_symbols && artifact.has_symbols,
            },
        )?;
        Ok(())
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmproc_pipeline::CollectingSink;

    #[test]
    fn default_pipeline_skips_optional_stages() {
        let app = ProcessorApp::new(ProcessorOptions::default());
        assert_eq!(
            app.build_pipeline().unwrap().stage_names(),
            vec!["dispatcher-pooling", "module-initializer", "init-locals", "open-source-sign"]
        );
    }

    #[test]
    fn full_pipeline_in_fixed_order() {
        let mut options = ProcessorOptions::new()
            .with_serialization(true)
            .with_parameter_key(true)
            .with_rename("Game.Client");
        options.add_references = vec!["Engine.Rendering".into()];
        let app = ProcessorApp::new(options);
        assert_eq!(
            app.build_pipeline().unwrap().stage_names(),
            vec![
                "add-reference",
                "parameter-key",
                "rename",
                "dispatcher-pooling",
                "serialization",
                "update-engine",
                "compile-merge",
                "module-initializer",
                "init-locals",
                "open-source-sign",
            ]
        );
    }

    #[test]
    fn update_engine_can_be_turned_off() {
        let options = ProcessorOptions::new()
            .with_serialization(true)
            .with_update_engine(false);
        let names = ProcessorApp::new(options).build_pipeline().unwrap().stage_names();
        assert!(names.contains(&"serialization"));
        assert!(!names.contains(&"update-engine"));
    }

    #[test]
    fn missing_sign_key_file_fails_pipeline_build() {
        let app = ProcessorApp::new(ProcessorOptions::new().with_sign_key_file("/nonexistent/key.snk"));
        assert!(matches!(app.build_pipeline(), Err(ProcessError::Io { .. })));
    }

    #[test]
    fn counting_sink_counts_only_warnings() {
        let inner = Arc::new(CollectingSink::new());
        let sink = CountingSink {
            inner: inner.clone(),
            warnings: AtomicUsize::new(0),
        };
        sink.info("a");
        sink.warn("b");
        sink.warn("c");
        assert_eq!(sink.warnings.load(Ordering::Relaxed), 2);
        assert_eq!(inner.messages().len(), 3);
    }
}
