//! Pipeline stage: consumer, processor and producer wired together.
//!
//! A [`Stage`] goes through `Created → Configured → Running` and ends
//! `Stopped` or `Failed`:
//!
//! - [`Stage::configure`] resolves the command line, loads the `--config`
//!   file and builds the consumer and producer;
//! - [`Stage::run`] feeds every input record to the [`Processor`] (one by
//!   one, or in batches with `-b N`) and writes the messages it outputs;
//! - [`Stage::stop`] closes the consumer and the producer. `run` always
//!   calls it, whatever the outcome.
//!
//! ```no_run
//! use dkbflow::stage::{Stage, StageContext, from_fn};
//! use dkbflow::Message;
//!
//! fn main() -> std::process::ExitCode {
//!     dkbflow::logging::init_logging();
//!     let mut stage = Stage::new(
//!         "copy",
//!         from_fn(|ctx: &mut StageContext, msg: Message| {
//!             ctx.output(msg)?;
//!             Ok(true)
//!         }),
//!     );
//!     stage.execute(std::env::args_os()).into()
//! }
//! ```

pub mod args;
pub mod config;
pub mod processor;
pub mod stats;

pub use args::{Mode, StageArgs};
pub use config::StageConfig;
pub use processor::{FnProcessor, Processor, StageContext, from_fn};
pub use stats::StageStats;

use crate::consumer::{Consumer, SourceInfo, build_consumer};
use crate::context::IoContext;
use crate::error::{ConfigError, DataflowError, ExitCode, Result};
use crate::logging::panic_message;
use crate::message::{Message, MessageType};
use crate::producer::{Producer, build_producer};
use log::{debug, error, info, warn};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Lifecycle state of a [`Stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Created,
    Configured,
    Running,
    Stopped,
    Failed,
}

impl StageState {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Configured => "CONFIGURED",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One pipeline step.
pub struct Stage<P> {
    name: String,
    processor: P,
    io: IoContext,
    state: StageState,
    args: Option<StageArgs>,
    consumer: Option<Box<dyn Consumer>>,
    producer: Option<Box<dyn Producer>>,
    ctx: StageContext,
    stats: StageStats,
    exit_code: ExitCode,
    released: bool,
}

impl<P: Processor> Stage<P> {
    /// Stage reading and writing JSON messages.
    pub fn new(name: impl Into<String>, processor: P) -> Self {
        Self {
            name: name.into(),
            processor,
            io: IoContext::new(),
            state: StageState::Created,
            args: None,
            consumer: None,
            producer: None,
            ctx: StageContext::new(MessageType::Json, MessageType::Json),
            stats: StageStats::new(),
            exit_code: ExitCode::Success,
            released: false,
        }
    }

    /// Set the input and output message types.
    #[must_use]
    pub fn with_types(mut self, input: MessageType, output: MessageType) -> Self {
        self.ctx = StageContext::new(input, output);
        self
    }

    /// Replace the process I/O context (HDFS client, stdin, stdout).
    #[must_use]
    pub fn with_io(mut self, io: IoContext) -> Self {
        self.io = io;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> StageState {
        self.state
    }

    /// Resolved command line, once configured.
    #[must_use]
    pub fn args(&self) -> Option<&StageArgs> {
        self.args.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &StageConfig {
        self.ctx.config()
    }

    #[must_use]
    pub fn stats(&self) -> &StageStats {
        &self.stats
    }

    #[must_use]
    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    /// Exit code decided by the last `configure`/`run`.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    /// Parse `argv` and configure the stage.
    ///
    /// # Errors
    ///
    /// See [`Stage::configure`]; malformed command lines are reported as
    /// [`ConfigError::Usage`].
    pub fn configure_from<I, T>(&mut self, argv: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        if self.state != StageState::Created {
            return Err(ConfigError::State(self.state.name()));
        }
        match StageArgs::try_parse_args(argv) {
            Ok(args) => self.configure(args),
            Err(e) => {
                self.fail_configuration(&e);
                Err(e)
            }
        }
    }

    /// `Created → Configured`: load the config file and build the consumer
    /// and producer.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the stage was already configured, the
    /// options conflict, the config file cannot be read or the I/O cannot
    /// be set up. The stage is then `Failed` and never runs.
    pub fn configure(&mut self, args: StageArgs) -> Result<(), ConfigError> {
        if self.state != StageState::Created {
            return Err(ConfigError::State(self.state.name()));
        }
        match self.build_io(&args) {
            Ok(()) => {
                self.args = Some(args);
                self.state = StageState::Configured;
                Ok(())
            }
            Err(e) => {
                self.fail_configuration(&e);
                Err(e)
            }
        }
    }

    fn build_io(&mut self, args: &StageArgs) -> Result<(), ConfigError> {
        if args.skip && args.is_batch() {
            warn!(target: &self.name, "skip mode ignores the batch size");
        }
        let config = args.load_config()?;
        if let Some(path) = config.path() {
            debug!(target: &self.name, "loaded configuration from {}", path.display());
        }
        let consumer_config = args.consumer_config(self.ctx.input_type())?;
        let producer_config = args.producer_config(self.ctx.output_type())?;
        info!(
            target: &self.name,
            "configured: mode {:?}, source {}, destination {}",
            args.mode,
            consumer_config.kind,
            producer_config.kind
        );
        let consumer = build_consumer(consumer_config, &mut self.io)?;
        let producer = build_producer(producer_config, &mut self.io)?;
        self.ctx.set_config(config);
        self.consumer = Some(consumer);
        self.producer = Some(producer);
        Ok(())
    }

    fn fail_configuration(&mut self, e: &ConfigError) {
        self.state = StageState::Failed;
        self.exit_code = e.exit_code();
    }

    /// `Configured → Running → Stopped | Failed`.
    ///
    /// Errors returned by the processor (other than decode errors) and
    /// panics stop the loop; [`Stage::stop`] runs on every path.
    pub fn run(&mut self) -> ExitCode {
        match self.state {
            StageState::Configured => {}
            StageState::Failed => return self.exit_code,
            state => {
                error!(target: &self.name, "stage cannot run in state {state}");
                return ExitCode::Internal;
            }
        }
        self.state = StageState::Running;
        self.stats.record_start();
        info!(target: &self.name, "starting");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_loop()));
        let code = match outcome {
            Ok(Ok(())) => self.ctx.problems().unwrap_or(ExitCode::Success),
            Ok(Err(e)) => {
                error!(target: &self.name, "{e}");
                ExitCode::Dataflow
            }
            Err(panic) => {
                error!(
                    target: &self.name,
                    "unexpected failure: {}",
                    panic_message(panic.as_ref())
                );
                ExitCode::Internal
            }
        };

        if let Err(e) = self.stop() {
            error!(target: &self.name, "failed to stop cleanly: {e}");
        }
        self.state = match code {
            ExitCode::Dataflow | ExitCode::Internal => StageState::Failed,
            _ => StageState::Stopped,
        };
        self.exit_code = code;
        info!(target: &self.name, "finished with exit code {}", code.code());
        code
    }

    /// Close the consumer and the producer (writing the EOP marker and
    /// moving finished HDFS files). Only the first call does anything.
    ///
    /// # Errors
    ///
    /// Returns the first close failure; the other side is closed anyway.
    pub fn stop(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut failure = None;
        if let Some(mut consumer) = self.consumer.take()
            && let Err(e) = consumer.close()
        {
            error!(target: &self.name, "failed to close input: {e}");
            failure.get_or_insert(e);
        }
        if let Some(mut producer) = self.producer.take()
            && let Err(e) = producer.close()
        {
            error!(target: &self.name, "failed to close output: {e}");
            failure.get_or_insert(e);
        }
        if matches!(self.state, StageState::Running | StageState::Configured) {
            self.stats.record_end();
            self.stats.log_summary();
            self.state = StageState::Stopped;
        }
        failure.map_or(Ok(()), Err)
    }

    /// Configure from `argv` and run. Help and usage errors are printed
    /// by clap; configuration errors are logged.
    pub fn execute<I, T>(&mut self, argv: I) -> ExitCode
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        match self.configure_from(argv) {
            Ok(()) => self.run(),
            Err(e) => {
                match &e {
                    ConfigError::Usage(usage) => {
                        if let Err(print) = usage.print() {
                            error!(target: &self.name, "{print}");
                        }
                    }
                    other => error!(target: &self.name, "configuration failed: {other}"),
                }
                if let Err(stop) = self.stop() {
                    error!(target: &self.name, "{stop}");
                }
                e.exit_code()
            }
        }
    }

    fn run_loop(&mut self) -> Result<()> {
        let batch_size = match &self.args {
            Some(args) if args.is_batch() && !args.skip => args.batch_size,
            _ => 1,
        };
        let skip = self.args.as_ref().is_some_and(|args| args.skip);
        let mut pending = Vec::new();

        while let Some((record, source)) = self.next_input()? {
            self.stats.read += 1;
            if source != self.ctx.source().cloned() {
                if !pending.is_empty() {
                    self.dispatch_batch(std::mem::take(&mut pending))?;
                }
                self.switch_source(source);
            }
            let Some(message) = self.wrap(record) else {
                continue;
            };
            if batch_size > 1 {
                pending.push(message);
                if pending.len() >= batch_size {
                    self.dispatch_batch(std::mem::take(&mut pending))?;
                }
            } else {
                let outcome = if skip {
                    self.processor.skip_process(&mut self.ctx, message)
                } else {
                    self.processor.process(&mut self.ctx, message)
                };
                self.settle(outcome, 1)?;
            }
        }
        if !pending.is_empty() {
            self.dispatch_batch(pending)?;
        }
        Ok(())
    }

    fn next_input(&mut self) -> Result<Option<(Vec<u8>, Option<SourceInfo>)>> {
        let consumer = self
            .consumer
            .as_mut()
            .ok_or_else(|| DataflowError::stage("stage has no input"))?;
        Ok(consumer
            .next_record()?
            .map(|record| (record, consumer.source_info())))
    }

    fn switch_source(&mut self, source: Option<SourceInfo>) {
        if let Some(producer) = self.producer.as_mut() {
            producer.set_source(source.clone());
        }
        self.ctx.set_source(source);
    }

    /// Turn a raw record into a decoded message of the input type; records
    /// that do not decode are logged and dropped.
    fn wrap(&mut self, record: Vec<u8>) -> Option<Message> {
        let text = match String::from_utf8(record) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    target: &self.name,
                    "failed to read input message as {}: {e}; record skipped",
                    self.ctx.input_type()
                );
                self.stats.undecodable += 1;
                return None;
            }
        };
        let message = Message::from_wire(self.ctx.input_type(), text);
        if let Err(e) = message.content() {
            warn!(target: &self.name, "{e}; record skipped");
            self.stats.undecodable += 1;
            return None;
        }
        Some(message)
    }

    fn dispatch_batch(&mut self, messages: Vec<Message>) -> Result<()> {
        let n = messages.len() as u64;
        debug!(target: &self.name, "processing batch of {n} messages");
        let outcome = self.processor.batch_process(&mut self.ctx, messages);
        self.settle(outcome, n)
    }

    /// Apply the outcome of a callback to the output buffer and counters.
    fn settle(&mut self, outcome: Result<bool>, records: u64) -> Result<()> {
        match outcome {
            Ok(true) => {
                self.stats.processed += records;
                self.flush_output()
            }
            Ok(false) => {
                self.stats.failed += records;
                let dropped = self.ctx.discard_output();
                warn!(
                    target: &self.name,
                    "failed to process input ({records} record(s), {dropped} output message(s) discarded)"
                );
                Ok(())
            }
            Err(DataflowError::Decode(e)) => {
                self.stats.undecodable += records;
                self.ctx.discard_output();
                warn!(target: &self.name, "{e}; record skipped");
                Ok(())
            }
            Err(e) => {
                self.ctx.discard_output();
                Err(e)
            }
        }
    }

    fn flush_output(&mut self) -> Result<()> {
        let messages = self.ctx.take_output();
        if messages.is_empty() {
            return Ok(());
        }
        let producer = self
            .producer
            .as_mut()
            .ok_or_else(|| DataflowError::stage("stage has no output"))?;
        for message in &messages {
            producer.write(message)?;
            self.stats.written += 1;
        }
        Ok(())
    }
}

impl<P> Drop for Stage<P> {
    fn drop(&mut self) {
        if !self.released && (self.consumer.is_some() || self.producer.is_some()) {
            warn!(target: &self.name, "stage dropped without being stopped");
            if let Some(mut producer) = self.producer.take()
                && let Err(e) = producer.close()
            {
                error!(target: &self.name, "failed to close output: {e}");
            }
        }
    }
}
