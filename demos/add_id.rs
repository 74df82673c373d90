//! Example stage: copy a field of every JSON document into `_id`.
//!
//! ```text
//! $ cargo run --example add_id -- -o out tasks.json
//! $ printf '{"taskid":1}\n' | cargo run --example add_id -- -m s -E ''
//! ```

use clap::Parser;
use dkbflow::stage::{Stage, StageArgs, StageContext};
use dkbflow::{ConfigError, Message, Processor, Result};
use log::error;
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(about = "Add `_id` to task metadata documents", long_about = None)]
struct Args {
    #[command(flatten)]
    stage: StageArgs,

    /// Field copied into `_id`
    #[arg(long, default_value = "taskid")]
    id_field: String,
}

struct AddId {
    field: String,
}

impl Processor for AddId {
    fn process(&mut self, ctx: &mut StageContext, message: Message) -> Result<bool> {
        let Some(mut doc) = message.as_json()?.as_object().cloned() else {
            return Ok(false);
        };
        let Some(id) = doc.get(&self.field).cloned() else {
            return Ok(false);
        };
        doc.insert("_id".to_string(), id);
        ctx.output(Message::json(Value::Object(doc)))?;
        Ok(true)
    }
}

fn main() -> std::process::ExitCode {
    dkbflow::logging::init_logging();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ConfigError::from(e).exit_code().into();
        }
    };
    let mut stage = Stage::new("add_id", AddId {
        field: args.id_field,
    });
    if let Err(e) = stage.configure(args.stage) {
        error!("configuration failed: {e}");
        return e.exit_code().into();
    }
    stage.run().into()
}
