//! # dkbflow
//!
//! A **stage framework** for the DKB dataflow ETL scripts. Every stage is a
//! small process that reads messages from a source, transforms them and
//! writes the results to a sink; stages are chained with files, pipes or
//! HDFS directories.
//!
//! ## Key Features
//!
//! - **Two wire formats** - JSON (decoded lazily, on first access) and TTL text
//! - **Delimiter framing** - configurable end-of-message and end-of-process markers
//! - **Three kinds of I/O** - local files, stdin/stdout streams and HDFS
//! - **Uniform command line** - `-m`, `-s`, `-d`, `--hdfs`, `-e`, `-E`, `-c`, ... for every stage
//! - **Batch mode** - hand N messages at a time to the processor
//! - **Distinct exit codes** - configuration errors, declared failures and bugs end differently
//!
//! ## Quick Start
//!
//! ```no_run
//! use dkbflow::stage::{Stage, StageContext, from_fn};
//! use dkbflow::{DataflowError, Message};
//! use serde_json::Value;
//!
//! fn main() -> std::process::ExitCode {
//!     dkbflow::logging::init_logging();
//!     let add_id = from_fn(|ctx: &mut StageContext, msg: Message| {
//!         let mut doc = msg.as_json()?.clone();
//!         let Some(id) = doc.get("taskid").cloned() else {
//!             return Ok(false);
//!         };
//!         doc.as_object_mut()
//!             .ok_or_else(|| DataflowError::stage("input is not a JSON object"))?
//!             .insert("_id".into(), id);
//!         ctx.output(Message::json(doc))?;
//!         Ok(true)
//!     });
//!     Stage::new("add_id", add_id).execute(std::env::args_os()).into()
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Message
//!
//! A [`Message`] is one framed unit of data. Built from wire text, it is
//! decoded when its content is first needed; a decoding failure is a
//! [`DecodeError`] and only costs the stage that record.
//!
//! ### Consumer and Producer
//!
//! A [`Consumer`](consumer::Consumer) yields raw records from files, a
//! stream or HDFS; a [`Producer`](producer::Producer) writes encoded
//! messages to files, a stream or HDFS. Both are chosen from the command
//! line by the stage.
//!
//! ### Stage
//!
//! A [`Stage`](stage::Stage) wires a consumer, a
//! [`Processor`](stage::Processor) and a producer together and owns their
//! lifecycle, including cleanup when processing fails.

pub mod consumer;
pub mod context;
pub mod error;
pub mod framing;
pub mod hdfs;
pub mod logging;
pub mod message;
pub mod offset;
pub mod producer;
pub mod stage;
pub mod testing;

pub use context::IoContext;
pub use error::{ConfigError, DataflowError, DecodeError, ExitCode, Result};
pub use framing::{DelimitedReader, Delimiters};
pub use message::{Message, MessageType, Payload};
pub use offset::{FileOffsetStorage, OffsetStorage};
pub use stage::{Processor, Stage, StageArgs, StageContext};
