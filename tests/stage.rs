use anyhow::Result;
use dkbflow::stage::{Stage, StageContext, StageState, from_fn};
use dkbflow::testing::{TestDir, parse_ndjson, stream_io};
use dkbflow::{DataflowError, ExitCode, Message, Processor};
use serde_json::{Value, json};

/// Copy `taskid` into `_id`; documents without it are a soft failure.
fn add_id(ctx: &mut StageContext, message: Message) -> dkbflow::Result<bool> {
    let mut doc = message.as_json()?.clone();
    let Some(id) = doc.get("taskid").cloned() else {
        return Ok(false);
    };
    let Some(object) = doc.as_object_mut() else {
        return Ok(false);
    };
    object.insert("_id".to_string(), id);
    ctx.output(Message::json(doc))?;
    Ok(true)
}

fn copy(ctx: &mut StageContext, message: Message) -> dkbflow::Result<bool> {
    ctx.output(message)?;
    Ok(true)
}

#[test]
fn file_mode_writes_next_to_input() -> Result<()> {
    let dir = TestDir::new()?;
    dir.write_file("tasks.json", "{\"taskid\":1}\n{\"taskid\":2}\n")?;

    let mut stage = Stage::new("add_id", from_fn(add_id));
    let code = stage.execute(["add_id", dir.join("tasks.json").as_str()]);
    assert_eq!(code, ExitCode::Success);
    assert_eq!(stage.state(), StageState::Stopped);

    let written = parse_ndjson(&dir.read_file("out/tasks.json")?)?;
    assert_eq!(
        written,
        vec![
            json!({"taskid": 1, "_id": 1}),
            json!({"taskid": 2, "_id": 2})
        ]
    );
    // key order survives
    assert!(dir.read_file("out/tasks.json")?.starts_with(r#"{"taskid":1,"_id":1}"#));
    assert_eq!(stage.stats().read, 2);
    assert_eq!(stage.stats().written, 2);
    Ok(())
}

#[test]
fn input_directory_with_several_files() -> Result<()> {
    let dir = TestDir::new()?;
    dir.write_file("in/a.json", "{\"taskid\":\"a\"}\n")?;
    dir.write_file("in/b.json", "{\"taskid\":\"b\"}\n")?;
    let out = dir.join("result");

    let mut stage = Stage::new("add_id", from_fn(add_id));
    let code = stage.execute(["add_id", "-i", dir.join("in").as_str(), "-o", out.as_str()]);
    assert_eq!(code, ExitCode::Success);
    assert_eq!(dir.read_file("result/a.json")?, "{\"taskid\":\"a\",\"_id\":\"a\"}\n");
    assert_eq!(dir.read_file("result/b.json")?, "{\"taskid\":\"b\",\"_id\":\"b\"}\n");
    Ok(())
}

#[test]
fn soft_failures_do_not_change_exit_code() -> Result<()> {
    let (io, out) = stream_io("{\"taskid\":1}\n{\"name\":\"x\"}\n{\"taskid\":3}\n");
    let mut stage = Stage::new("add_id", from_fn(add_id)).with_io(io);
    assert_eq!(stage.execute(["add_id", "-m", "m"]), ExitCode::Success);

    assert_eq!(
        parse_ndjson(&out.text())?,
        vec![
            json!({"taskid": 1, "_id": 1}),
            json!({"taskid": 3, "_id": 3})
        ]
    );
    assert_eq!(stage.stats().failed, 1);
    assert_eq!(stage.stats().processed, 2);
    Ok(())
}

#[test]
fn soft_failure_discards_its_output() -> Result<()> {
    let (io, out) = stream_io("1\n2\n3\n");
    let processor = from_fn(|ctx: &mut StageContext, m: Message| {
        let even = m.as_json()?.as_u64().is_some_and(|n| n % 2 == 0);
        ctx.output(m)?;
        Ok(!even)
    });
    let mut stage = Stage::new("odd", processor).with_io(io);
    assert_eq!(stage.execute(["odd", "-m", "m"]), ExitCode::Success);
    assert_eq!(out.lines(), vec!["1", "3"]);
    Ok(())
}

#[test]
fn panic_is_internal_failure_and_output_is_kept() -> Result<()> {
    let dir = TestDir::new()?;
    let input: String = (1..=10).map(|i| format!("{{\"taskid\":{i}}}\n")).collect();
    dir.write_file("tasks.json", input)?;

    let processor = from_fn(|ctx: &mut StageContext, m: Message| {
        if m.as_json()?["taskid"] == json!(5) {
            panic!("unexpected record");
        }
        ctx.output(m)?;
        Ok(true)
    });
    let mut stage = Stage::new("fragile", processor);
    let code = stage.execute(["fragile", dir.join("tasks.json").as_str()]);
    assert_eq!(code, ExitCode::Internal);
    assert_eq!(stage.state(), StageState::Failed);

    let ids: Vec<Value> = parse_ndjson(&dir.read_file("out/tasks.json")?)?
        .into_iter()
        .map(|doc| doc["taskid"].clone())
        .collect();
    assert_eq!(ids, vec![json!(1), json!(2), json!(3), json!(4)]);
    Ok(())
}

#[test]
fn processing_error_stops_with_dataflow_code() -> Result<()> {
    let (io, out) = stream_io("1\n2\n3\n");
    let processor = from_fn(|ctx: &mut StageContext, m: Message| {
        if m.as_json()? == &json!(2) {
            return Err(DataflowError::stage("service unavailable"));
        }
        ctx.output(m)?;
        Ok(true)
    });
    let mut stage = Stage::new("fails", processor).with_io(io);
    assert_eq!(stage.execute(["fails", "-m", "m"]), ExitCode::Dataflow);
    assert_eq!(stage.state(), StageState::Failed);
    assert_eq!(stage.exit_code(), ExitCode::Dataflow);
    assert_eq!(out.lines(), vec!["1"]);
    Ok(())
}

#[test]
fn undecodable_records_are_skipped() -> Result<()> {
    let (io, out) = stream_io(b"{\"taskid\":1}\n{broken\n\xff\xfe\n{\"taskid\":2}\n".to_vec());
    let mut stage = Stage::new("add_id", from_fn(add_id)).with_io(io);
    assert_eq!(stage.execute(["add_id", "-m", "m"]), ExitCode::Success);

    assert_eq!(out.lines().len(), 2);
    assert_eq!(stage.stats().read, 4);
    assert_eq!(stage.stats().undecodable, 2);
    Ok(())
}

#[test]
fn missing_config_file_is_configuration_error() -> Result<()> {
    let dir = TestDir::new()?;
    let mut stage = Stage::new("copy", from_fn(copy));
    let code = stage.execute(["copy", "-m", "s", "-c", dir.join("nope.yaml").as_str()]);
    assert_eq!(code, ExitCode::Configuration);
    assert_eq!(stage.state(), StageState::Failed);
    // a failed stage never runs
    assert_eq!(stage.run(), ExitCode::Configuration);
    Ok(())
}

#[test]
fn conflicting_options_are_configuration_errors() {
    for argv in [
        vec!["copy", "--hdfs", "-s", "f"],
        vec!["copy", "-m", "s", "-s", "f"],
        vec!["copy", "-e", ""],
        vec!["copy", "--mode", "x"],
    ] {
        let mut stage = Stage::new("copy", from_fn(copy));
        assert_eq!(stage.execute(argv.clone()), ExitCode::Configuration, "{argv:?}");
        assert_eq!(stage.state(), StageState::Failed);
    }
}

#[test]
fn help_is_a_clean_exit() {
    let mut stage = Stage::new("copy", from_fn(copy));
    assert_eq!(stage.execute(["copy", "--help"]), ExitCode::Success);
}

#[test]
fn config_file_values_reach_the_processor() -> Result<()> {
    let dir = TestDir::new()?;
    let config = dir.write_file("stage.yaml", "index: tasks\nfields: [taskid, status]\n")?;
    let (io, out) = stream_io("{\"taskid\":1,\"status\":\"done\",\"extra\":0}\n");

    let processor = from_fn(|ctx: &mut StageContext, m: Message| {
        let config = ctx.config();
        let fields: Vec<String> = config
            .get("fields")
            .map_err(|e| DataflowError::stage(e.to_string()))?
            .unwrap_or_default();
        let index: Option<String> = config
            .get("index")
            .map_err(|e| DataflowError::stage(e.to_string()))?;
        let doc = m.as_json()?;
        let mut result = serde_json::Map::new();
        for field in fields {
            if let Some(v) = doc.get(&field) {
                result.insert(field, v.clone());
            }
        }
        result.insert("_index".to_string(), json!(index));
        ctx.output(Message::json(Value::Object(result)))?;
        Ok(true)
    });
    let mut stage = Stage::new("select", processor).with_io(io);
    let config = config.to_string_lossy().into_owned();
    assert_eq!(stage.execute(["select", "-m", "m", "-c", config.as_str()]), ExitCode::Success);
    assert!(stage.config().contains_key("index"));
    assert_eq!(
        out.lines(),
        vec![r#"{"taskid":1,"status":"done","_index":"tasks"}"#]
    );
    Ok(())
}

struct Count;

impl Processor for Count {
    fn process(&mut self, ctx: &mut StageContext, message: Message) -> dkbflow::Result<bool> {
        self.batch_process(ctx, vec![message])
    }

    fn batch_process(
        &mut self,
        ctx: &mut StageContext,
        messages: Vec<Message>,
    ) -> dkbflow::Result<bool> {
        let ids = messages
            .iter()
            .map(|m| m.as_json().cloned())
            .collect::<Result<Vec<_>, _>>()?;
        ctx.output(Message::json(json!({"ids": ids})))?;
        Ok(true)
    }
}

#[test]
fn batch_mode_groups_messages() -> Result<()> {
    let (io, out) = stream_io("1\n2\n3\n4\n5\n");
    let mut stage = Stage::new("count", Count).with_io(io);
    assert_eq!(stage.execute(["count", "-m", "m", "-b", "2"]), ExitCode::Success);
    assert_eq!(
        parse_ndjson(&out.text())?,
        vec![json!({"ids": [1, 2]}), json!({"ids": [3, 4]}), json!({"ids": [5]})]
    );
    Ok(())
}

#[test]
fn batch_is_flushed_when_input_file_changes() -> Result<()> {
    let dir = TestDir::new()?;
    dir.write_file("a.json", "1\n2\n3\n")?;
    dir.write_file("b.json", "4\n")?;

    let mut stage = Stage::new("count", Count);
    let code = stage.execute(["count", "-b", "2", "-i", dir.dir().as_str()]);
    assert_eq!(code, ExitCode::Success);
    assert_eq!(
        parse_ndjson(&dir.read_file("out/a.json")?)?,
        vec![json!({"ids": [1, 2]}), json!({"ids": [3]})]
    );
    assert_eq!(
        parse_ndjson(&dir.read_file("out/b.json")?)?,
        vec![json!({"ids": [4]})]
    );
    Ok(())
}

#[test]
fn batch_without_batch_callback_fails() {
    let (io, out) = stream_io("1\n2\n");
    let mut stage = Stage::new("copy", from_fn(copy)).with_io(io);
    assert_eq!(stage.execute(["copy", "-m", "m", "-b", "5"]), ExitCode::Dataflow);
    assert!(out.lines().is_empty());
}

#[test]
fn skip_mode_forwards_input_marked_incomplete() -> Result<()> {
    let (io, out) = stream_io("{\"taskid\":1}\n{\"taskid\":2}\n");
    let processor = from_fn(|_: &mut StageContext, _: Message| -> dkbflow::Result<bool> {
        panic!("process must not run in skip mode")
    });
    let mut stage = Stage::new("skip", processor).with_io(io);
    assert_eq!(stage.execute(["skip", "-m", "m", "--skip", "-b", "10"]), ExitCode::Success);
    assert_eq!(
        out.lines(),
        vec![
            r#"{"taskid":1,"_incomplete":true}"#,
            r#"{"taskid":2,"_incomplete":true}"#
        ]
    );
    Ok(())
}

#[test]
fn reported_problems_set_custom_exit_code() {
    let (io, out) = stream_io("{\"a\":1}\n{\"a\":2}\n");
    let processor = from_fn(|ctx: &mut StageContext, m: Message| {
        if m.as_json()?["a"] == json!(2) {
            ctx.report_problems(ExitCode::Custom(4));
        }
        ctx.output(m)?;
        Ok(true)
    });
    let mut stage = Stage::new("check", processor).with_io(io);
    assert_eq!(stage.execute(["check", "-m", "m"]), ExitCode::Custom(4));
    assert_eq!(stage.state(), StageState::Stopped);
    assert_eq!(out.lines().len(), 2);
}

#[test]
fn wrong_output_type_is_dataflow_error() {
    let (io, _out) = stream_io("{\"a\":1}\n");
    let processor = from_fn(|ctx: &mut StageContext, _: Message| {
        ctx.output(Message::ttl("<a> <b> <c> ."))?;
        Ok(true)
    });
    let mut stage = Stage::new("ttl", processor).with_io(io);
    assert_eq!(stage.execute(["ttl", "-m", "m"]), ExitCode::Dataflow);
}

#[test]
fn stream_mode_ends_with_eop_once() -> Result<()> {
    let (io, out) = stream_io("{\"a\":1}\n");
    let mut stage = Stage::new("copy", from_fn(copy)).with_io(io);
    assert_eq!(stage.execute(["copy", "-m", "s"]), ExitCode::Success);
    stage.stop()?;
    stage.stop()?;
    assert_eq!(out.contents(), b"{\"a\":1}\n\0");
    Ok(())
}

#[test]
fn run_requires_configuration() {
    let mut stage = Stage::new("copy", from_fn(copy));
    assert_eq!(stage.state(), StageState::Created);
    assert_eq!(stage.run(), ExitCode::Internal);
}

#[test]
fn configure_twice_is_rejected() -> Result<()> {
    let (io, _out) = stream_io("");
    let mut stage = Stage::new("copy", from_fn(copy)).with_io(io);
    stage.configure_from(["copy", "-m", "m"])?;
    assert_eq!(stage.state(), StageState::Configured);
    assert!(stage.configure_from(["copy", "-m", "m"]).is_err());
    assert_eq!(stage.run(), ExitCode::Success);
    Ok(())
}

#[test]
fn failed_reconfiguration_keeps_configured_state() -> Result<()> {
    let (io, out) = stream_io("{\"a\":1}\n");
    let mut stage = Stage::new("copy", from_fn(copy)).with_io(io);
    stage.configure_from(["copy", "-m", "m"])?;
    // an unparsable second command line must not fail the configured stage
    assert!(matches!(
        stage.configure_from(["copy", "--mode", "x"]),
        Err(dkbflow::ConfigError::State(_))
    ));
    assert_eq!(stage.state(), StageState::Configured);
    assert_eq!(stage.run(), ExitCode::Success);
    assert_eq!(out.lines(), vec![r#"{"a":1}"#]);
    Ok(())
}

#[test]
fn malformed_records_never_reach_the_output() -> Result<()> {
    let (io, out) = stream_io("{\"a\":1}\n{broken\n{\"a\":2}\n");
    let mut stage = Stage::new("copy", from_fn(copy)).with_io(io);
    assert_eq!(stage.execute(["copy", "-m", "m"]), ExitCode::Success);
    assert_eq!(out.lines(), vec![r#"{"a":1}"#, r#"{"a":2}"#]);
    assert_eq!(stage.stats().undecodable, 1);
    assert_eq!(stage.stats().written, 2);
    Ok(())
}

#[test]
fn batch_keeps_good_records_around_a_malformed_one() -> Result<()> {
    let (io, out) = stream_io("1\n{broken\n3\n4\n");
    let mut stage = Stage::new("count", Count).with_io(io);
    assert_eq!(stage.execute(["count", "-m", "m", "-b", "3"]), ExitCode::Success);
    assert_eq!(parse_ndjson(&out.text())?, vec![json!({"ids": [1, 3, 4]})]);
    assert_eq!(stage.stats().undecodable, 1);
    assert_eq!(stage.stats().processed, 3);
    Ok(())
}
