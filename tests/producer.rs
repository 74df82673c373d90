use anyhow::Result;
use dkbflow::consumer::{Consumer, ConsumerConfig, FileConsumer, SourceKind, SourceInfo};
use dkbflow::producer::{
    FileProducer, LocalTarget, Producer, ProducerConfig, SinkKind, StreamProducer,
};
use dkbflow::testing::{SharedBuffer, TestDir};
use dkbflow::{Delimiters, Message, MessageType};
use serde_json::json;

fn source(dir: &TestDir, name: &str) -> SourceInfo {
    SourceInfo {
        name: name.to_string(),
        dir: dir.dir(),
        full_path: dir.join(name),
    }
}

fn file_producer(dir: &TestDir, output_dir: &str) -> FileProducer<LocalTarget> {
    let config =
        ProducerConfig::new(SinkKind::File, MessageType::Json).with_output_dir(output_dir);
    FileProducer::new(LocalTarget::new(dir.path()), config)
}

#[test]
fn written_messages_read_back_in_order() -> Result<()> {
    let dir = TestDir::new()?;
    let delimiters = Delimiters::new("<EOM>", "")?;
    let values: Vec<_> = (0..5)
        .map(|i| json!({"id": i, "text": format!("line\nwith newline {i}")}))
        .collect();

    let config = ProducerConfig::new(SinkKind::File, MessageType::Json)
        .with_output_dir(dir.join("out"))
        .with_delimiters(delimiters.clone());
    let mut producer = FileProducer::new(LocalTarget::new(dir.path()), config);
    producer.set_source(Some(source(&dir, "input.json")));
    for v in &values {
        producer.write(&Message::json(v.clone()))?;
    }
    producer.close()?;

    let config = ConsumerConfig::new(SourceKind::File, MessageType::Json)
        .with_input_dir(dir.join("out"))
        .with_delimiters(delimiters);
    let mut consumer = FileConsumer::local(config)?;
    let mut back = Vec::new();
    while let Some(record) = consumer.next_record()? {
        let m = Message::from_wire(MessageType::Json, String::from_utf8(record)?);
        back.push(m.as_json()?.clone());
    }
    assert_eq!(back, values);
    Ok(())
}

#[test]
fn output_file_named_after_input() -> Result<()> {
    let dir = TestDir::new()?;
    let mut producer = file_producer(&dir, "out");
    producer.set_source(Some(source(&dir, "tasks.json")));
    producer.write(&Message::json(json!({"taskid": 1})))?;
    assert_eq!(producer.destination(), Some(dir.join("out/tasks.json")));
    producer.close()?;

    assert_eq!(dir.read_file("out/tasks.json")?, "{\"taskid\":1}\n");
    Ok(())
}

#[test]
fn new_file_per_source() -> Result<()> {
    let dir = TestDir::new()?;
    let mut producer = file_producer(&dir, &dir.join("result"));
    producer.set_source(Some(source(&dir, "a.json")));
    producer.write(&Message::json(json!(1)))?;
    producer.set_source(Some(source(&dir, "b.json")));
    producer.write(&Message::json(json!(2)))?;
    producer.write(&Message::json(json!(3)))?;
    producer.close()?;

    assert_eq!(dir.read_file("result/a.json")?, "1\n");
    assert_eq!(dir.read_file("result/b.json")?, "2\n3\n");
    Ok(())
}

#[test]
fn output_dir_resolution() -> Result<()> {
    let dir = TestDir::new()?;
    let input = TestDir::new()?;
    let src = source(&input, "tasks.json");

    // relative: next to the input file, or under the base without one
    let producer = file_producer(&dir, "out");
    assert_eq!(producer.output_dir_for(Some(&src)), input.join("out"));
    assert_eq!(producer.output_dir_for(None), dir.join("out"));

    // explicitly relative to the working directory, or absolute: as is
    let absolute = dir.join("abs");
    for fixed in ["./out", "../out", ".", absolute.as_str()] {
        let producer = file_producer(&dir, fixed);
        assert_eq!(producer.output_dir_for(Some(&src)), fixed);
    }
    Ok(())
}

#[test]
fn absolute_output_dir_and_no_source() -> Result<()> {
    let dir = TestDir::new()?;
    let mut producer = file_producer(&dir, &dir.join("fixed"));
    producer.write(&Message::json(json!({"n": 1})))?;
    let path = producer.destination().expect("output file");
    producer.close()?;

    let name = std::path::Path::new(&path)
        .file_name()
        .and_then(|n| n.to_str())
        .expect("file name")
        .to_string();
    assert!(path.starts_with(&dir.join("fixed")));
    assert!(name.ends_with("_0.json"), "unexpected name {name}");
    Ok(())
}

#[test]
fn existing_output_is_never_overwritten() -> Result<()> {
    let dir = TestDir::new()?;
    dir.write_file("out/tasks.json", "previous\n")?;

    let mut producer = file_producer(&dir, "out");
    producer.set_source(Some(source(&dir, "tasks.json")));
    assert!(producer.write(&Message::json(json!(1))).is_err());
    producer.close()?;

    assert_eq!(dir.read_file("out/tasks.json")?, "previous\n");
    Ok(())
}

#[test]
fn file_eop_written_on_close() -> Result<()> {
    let dir = TestDir::new()?;
    let config = ProducerConfig::new(SinkKind::File, MessageType::Json)
        .with_output_dir("out")
        .with_delimiters(Delimiters::new("\n", "\0")?);
    let mut producer = FileProducer::new(LocalTarget::new(dir.path()), config);
    producer.set_source(Some(source(&dir, "x.json")));
    producer.write(&Message::json(json!(1)))?;
    producer.close()?;
    producer.close()?;

    assert_eq!(dir.read_file("out/x.json")?, "1\n\0");
    Ok(())
}

#[test]
fn stream_producer_frames_and_ends_with_eop_once() -> Result<()> {
    let out = SharedBuffer::new();
    let mut producer = StreamProducer::with_write(out.clone(), Delimiters::new("\n", "\0")?);
    producer.write(&Message::json(json!({"a": 1})))?;
    // flushed right away
    assert_eq!(out.contents(), b"{\"a\":1}\n");
    producer.write(&Message::ttl("<a> <b> <c> ."))?;
    producer.close()?;
    producer.close()?;

    assert_eq!(out.contents(), b"{\"a\":1}\n<a> <b> <c> .\n\0");
    assert!(producer.write(&Message::json(json!(2))).is_err());
    Ok(())
}

#[test]
fn wire_messages_pass_through_verbatim() -> Result<()> {
    let out = SharedBuffer::new();
    let mut producer = StreamProducer::with_write(out.clone(), Delimiters::default());
    producer.write(&Message::from_wire(MessageType::Json, r#"{ "b" : 2, "a":1 }"#))?;
    producer.close()?;
    assert_eq!(out.text(), "{ \"b\" : 2, \"a\":1 }\n");
    Ok(())
}
