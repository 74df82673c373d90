//! Processing callbacks and the context they run in.

use crate::consumer::SourceInfo;
use crate::error::{DataflowError, ExitCode, Result};
use crate::message::{Message, MessageType};
use crate::stage::StageConfig;
use log::debug;

/// State a processor sees while handling a record.
///
/// Messages passed to [`StageContext::output`] are buffered; the stage
/// writes them out when the callback returns `Ok(true)` and drops them
/// otherwise.
#[derive(Debug)]
pub struct StageContext {
    input_type: MessageType,
    output_type: MessageType,
    config: StageConfig,
    source: Option<SourceInfo>,
    buffer: Vec<Message>,
    problems: Option<ExitCode>,
}

impl StageContext {
    pub fn new(input_type: MessageType, output_type: MessageType) -> Self {
        Self {
            input_type,
            output_type,
            config: StageConfig::default(),
            source: None,
            buffer: Vec::new(),
            problems: None,
        }
    }

    /// Queue a result message.
    ///
    /// # Errors
    ///
    /// Returns [`DataflowError::MessageType`] if `message` is not of the
    /// stage output type.
    pub fn output(&mut self, message: Message) -> Result<()> {
        let actual = message.message_type();
        if actual != self.output_type {
            return Err(DataflowError::MessageType {
                expected: self.output_type,
                actual,
            });
        }
        self.buffer.push(message);
        Ok(())
    }

    #[must_use]
    pub fn input_type(&self) -> MessageType {
        self.input_type
    }

    #[must_use]
    pub fn output_type(&self) -> MessageType {
        self.output_type
    }

    /// Contents of the `--config` file (empty without one).
    #[must_use]
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Input file of the current record, if any.
    #[must_use]
    pub fn source(&self) -> Option<&SourceInfo> {
        self.source.as_ref()
    }

    /// Finish with a stage-specific status (e.g. "differences found")
    /// instead of success, once all input has been processed. Runtime
    /// failures still take precedence.
    pub fn report_problems(&mut self, code: ExitCode) {
        debug!("stage reported problems (exit code {})", code.code());
        self.problems = Some(code);
    }

    #[must_use]
    pub fn problems(&self) -> Option<ExitCode> {
        self.problems
    }

    pub(crate) fn set_config(&mut self, config: StageConfig) {
        self.config = config;
    }

    pub(crate) fn set_source(&mut self, source: Option<SourceInfo>) {
        self.source = source;
    }

    pub(crate) fn take_output(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.buffer)
    }

    /// Drop buffered messages, returning how many there were.
    pub(crate) fn discard_output(&mut self) -> usize {
        let n = self.buffer.len();
        self.buffer.clear();
        n
    }
}

/// Per-stage transformation.
///
/// Each callback returns `Ok(true)` when the input was handled (whether or
/// not it produced output), `Ok(false)` when it could not be processed (the
/// stage logs it and carries on) and `Err(_)` for a failure that must stop
/// the stage.
pub trait Processor {
    /// Handle one message.
    ///
    /// # Errors
    ///
    /// Any error stops the stage, except [`DataflowError::Decode`] which
    /// only skips the record.
    fn process(&mut self, ctx: &mut StageContext, message: Message) -> Result<bool>;

    /// Handle a batch of messages (`-b N`, N > 1), in input order.
    ///
    /// # Errors
    ///
    /// The default implementation fails with
    /// [`DataflowError::Unsupported`].
    fn batch_process(&mut self, _ctx: &mut StageContext, _messages: Vec<Message>) -> Result<bool> {
        Err(DataflowError::Unsupported("batch processing"))
    }

    /// Handle a message in skip mode (`--skip`).
    ///
    /// The default forwards the input content, marked as incomplete.
    ///
    /// # Errors
    ///
    /// Fails if the input cannot be decoded or its type differs from the
    /// output type.
    fn skip_process(&mut self, ctx: &mut StageContext, message: Message) -> Result<bool> {
        let mut forward = Message::from_payload(message.into_content()?);
        forward.mark_incomplete()?;
        ctx.output(forward)?;
        Ok(true)
    }
}

/// [`Processor`] made of a closure handling one message at a time.
pub struct FnProcessor<F>(pub F);

impl<F> Processor for FnProcessor<F>
where
    F: FnMut(&mut StageContext, Message) -> Result<bool>,
{
    fn process(&mut self, ctx: &mut StageContext, message: Message) -> Result<bool> {
        (self.0)(ctx, message)
    }
}

/// Wrap a closure into a [`Processor`].
pub fn from_fn<F>(f: F) -> FnProcessor<F>
where
    F: FnMut(&mut StageContext, Message) -> Result<bool>,
{
    FnProcessor(f)
}
