//! Purpose: End-to-end tests for the TCP host and the blocking remote transport.
//! Exports: None (integration test module).
//! Role: Validate resolution, retrieval, and failure isolation across real sockets.
//! Invariants: Uses a loopback-only server on an ephemeral port.
//! Invariants: Bounded waits avoid test flakiness.
//! Invariants: Servers are shut down on drop.

mod common;

use common::{DemoLibrary, TestResult, array, kwargs};
use remora::api::{
    Consumer, Error, ErrorKind, GetPointer, Kwargs, Mirror, ObjectHandle, Producer,
    RemoteTransport, Surface, Value,
};
use remora::serve::{OverflowPolicy, ServeConfig, Server, ShutdownHandle};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

struct TestServer {
    runtime: tokio::runtime::Runtime,
    addr: SocketAddr,
    surface: Surface,
    consumer: Arc<Consumer>,
    shutdown: ShutdownHandle,
    task: Option<tokio::task::JoinHandle<Result<(), Error>>>,
}

impl TestServer {
    fn start() -> TestResult<Self> {
        Self::start_with(|config| config)
    }

    fn start_with(configure: impl FnOnce(ServeConfig) -> ServeConfig) -> TestResult<Self> {
        let (consumer, surface, _) = DemoLibrary::new().into_consumer();
        let config = configure(ServeConfig::new("127.0.0.1:0".parse()?));
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let consumer = Arc::new(consumer);
        let server = runtime.block_on(Server::bind(config, Arc::clone(&consumer)))?;
        let addr = server.local_addr()?;
        let shutdown = server.shutdown_handle();
        let task = runtime.spawn(server.run());
        Ok(Self {
            runtime,
            addr,
            surface,
            consumer,
            shutdown,
            task: Some(task),
        })
    }

    fn producer(&self) -> TestResult<Producer> {
        let transport = RemoteTransport::connect(self.addr)?;
        Ok(Producer::new(Arc::new(transport)).with_request_timeout(Duration::from_secs(5)))
    }

    fn mirror(&self) -> TestResult<Mirror> {
        Ok(Mirror::new(self.surface.clone(), self.producer()?))
    }

    fn raw(&self) -> TestResult<TcpStream> {
        let stream = TcpStream::connect(self.addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        Ok(stream)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.shutdown();
        if let Some(task) = self.task.take() {
            let _ = self
                .runtime
                .block_on(async { tokio::time::timeout(Duration::from_secs(5), task).await });
        }
    }
}

fn assert_closed_by_host(stream: &mut TcpStream) {
    let mut rest = Vec::new();
    match stream.read_to_end(&mut rest) {
        Ok(_) => {}
        Err(err) => assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset),
    }
}

#[test]
fn scenario_a_over_tcp() -> TestResult<()> {
    let server = TestServer::start()?;
    let mirror = server.mirror()?;
    let x = mirror.function("array")?.call(vec![Value::list([1, 2, 3])], Kwargs::new())?;
    let y = x.add(&x)?;
    assert_eq!(y.retrieve()?, array(&[2.0, 4.0, 6.0]));
    Ok(())
}

#[test]
fn scenario_b_over_tcp() -> TestResult<()> {
    let server = TestServer::start()?;
    let mirror = server.mirror()?;
    let widget = mirror
        .class("Widget")?
        .call(vec![], kwargs(&[("x", Value::Int(1))]))?;
    widget.set_attr("x", 2)?;
    assert_eq!(widget.attr("x").retrieve()?, Value::Int(2));
    Ok(())
}

#[test]
fn scenario_c_retrieval_times_out() -> TestResult<()> {
    let server = TestServer::start()?;
    let producer = server.producer()?.with_request_timeout(Duration::from_millis(100));
    let never_sent = ObjectHandle::root(producer.clone(), "constants");
    let err = producer
        .request(GetPointer::target(never_sent.id().clone()))
        .expect_err("no reply for an unsent id");
    assert_eq!(err.kind(), ErrorKind::Timeout);

    // The connection stays usable after a timeout.
    let mirror = Mirror::new(
        server.surface.clone(),
        producer.with_request_timeout(Duration::from_secs(5)),
    );
    let tick = mirror.function("tick")?.call(vec![], Kwargs::new())?;
    assert_eq!(tick.retrieve()?, Value::Int(1));
    Ok(())
}

#[test]
fn resolution_failures_reply_with_errors() -> TestResult<()> {
    let server = TestServer::start()?;
    let mirror = server.mirror()?;
    let failed = mirror.function("fail")?.call(vec![], Kwargs::new())?;
    let err = failed.retrieve().expect_err("invocation failure");
    assert_eq!(err.kind(), ErrorKind::Invocation);
    assert_eq!(err.pointer(), Some(failed.id()));

    let missing = ObjectHandle::root(mirror.producer().clone(), "missing").attr("deeper");
    assert_eq!(missing.retrieve().expect_err("lookup").kind(), ErrorKind::Lookup);

    let tick = mirror.function("tick")?.call(vec![], Kwargs::new())?;
    assert_eq!(tick.retrieve()?, Value::Int(1));
    Ok(())
}

#[test]
fn host_objects_are_refused_at_the_wire() -> TestResult<()> {
    let server = TestServer::start()?;
    let mirror = server.mirror()?;
    let widget = mirror.class("Widget")?.call(vec![], Kwargs::new())?;
    let instance = widget.as_object()?;
    let err = instance.retrieve().expect_err("objects have no wire form");
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(widget.attr("x").retrieve()?, Value::Int(0));
    Ok(())
}

#[test]
fn clients_share_one_store() -> TestResult<()> {
    let server = TestServer::start()?;
    let first = server.mirror()?;
    let x = first.function("array")?.call(vec![Value::list([1, 2])], Kwargs::new())?;
    assert_eq!(x.retrieve()?, array(&[1.0, 2.0]));

    let second = server.producer()?;
    assert_eq!(second.request(GetPointer::target(x.id().clone()))?, array(&[1.0, 2.0]));
    let all = second.scan(0, 0)?;
    assert_eq!(all.len(), 1);
    assert_eq!(&all[0].0, x.id());
    Ok(())
}

#[test]
fn concurrent_clients_resolve_independently() -> TestResult<()> {
    let server = TestServer::start()?;
    let workers: Vec<_> = (0..4i64)
        .map(|worker| {
            let mirror = server.mirror().map_err(|err| err.to_string());
            std::thread::spawn(move || -> Result<(), String> {
                let mirror = mirror?;
                let array = mirror.function("array").map_err(|err| err.to_string())?;
                for step in 0..10i64 {
                    let x = array
                        .call(vec![Value::list([worker, step])], Kwargs::new())
                        .and_then(|x| x.mul(2))
                        .map_err(|err| err.to_string())?;
                    let value = x.retrieve().map_err(|err| err.to_string())?;
                    let expected = Value::Array(remora::api::NdArray::from_vec(vec![
                        (worker * 2) as f64,
                        (step * 2) as f64,
                    ]));
                    if value != expected {
                        return Err(format!("worker {worker} step {step}: {value:?}"));
                    }
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        worker.join().map_err(|_| "worker panicked")??;
    }
    Ok(())
}

#[test]
fn malformed_messages_close_only_that_connection() -> TestResult<()> {
    let server = TestServer::start()?;
    let healthy = server.mirror()?;
    let x = healthy.function("array")?.call(vec![Value::list([5])], Kwargs::new())?;

    let mut bad = server.raw()?;
    bad.write_all(b"{\"kind\":\"not-a-pointer\"}\n")?;
    bad.flush()?;
    assert_closed_by_host(&mut bad);

    assert_eq!(x.retrieve()?, array(&[5.0]));
    Ok(())
}

#[test]
fn oversized_messages_close_the_connection() -> TestResult<()> {
    let server = TestServer::start_with(|mut config| {
        config.max_message_bytes = 256;
        config
    })?;
    let mut bad = server.raw()?;
    let mut line = vec![b'x'; 1024];
    line.push(b'\n');
    bad.write_all(&line)?;
    bad.flush()?;
    assert_closed_by_host(&mut bad);

    let mirror = server.mirror()?;
    let tick = mirror.function("tick")?.call(vec![], Kwargs::new())?;
    assert_eq!(tick.retrieve()?, Value::Int(1));
    Ok(())
}

#[test]
fn reply_lines_are_keyed_json() -> TestResult<()> {
    let server = TestServer::start()?;
    let mut stream = server.raw()?;
    let call = remora::api::Pointer::Callable(remora::api::CallablePointer::new(
        "stack",
        vec![Value::from("hello")],
        Kwargs::new(),
    ));
    let get = remora::api::Pointer::Get(GetPointer::target(call.id().clone()));
    stream.write_all(&remora::api::codec::encode_pointer(&call)?)?;
    stream.write_all(&remora::api::codec::encode_pointer(&get)?)?;
    stream.flush()?;

    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line)?;
    let reply: serde_json::Value = serde_json::from_str(&line)?;
    assert_eq!(reply["key"], call.id().as_str());
    assert_eq!(reply["value"], serde_json::json!({ "str": "hello" }));
    Ok(())
}

#[test]
fn drop_oldest_policy_keeps_the_connection_open() -> TestResult<()> {
    let server = TestServer::start_with(|mut config| {
        config.max_pending_replies = 1;
        config.overflow = OverflowPolicy::DropOldest;
        config
    })?;
    let mirror = server.mirror()?;
    let tick = mirror.function("tick")?.call(vec![], Kwargs::new())?;
    for _ in 0..3 {
        assert_eq!(tick.retrieve()?, Value::Int(1));
    }
    Ok(())
}

#[test]
fn plain_handles_work_without_a_mirror() -> TestResult<()> {
    let server = TestServer::start()?;
    let producer = server.producer()?;
    let constants = ObjectHandle::root(producer, "constants");
    assert_eq!(constants.index("e")?.retrieve()?, Value::Float(2.5));
    Ok(())
}

#[test]
fn shutdown_lets_an_in_flight_resolution_finish() -> TestResult<()> {
    let mut server = TestServer::start()?;
    let mut stream = server.raw()?;
    let call = remora::api::Pointer::Callable(remora::api::CallablePointer::new(
        "slow",
        vec![],
        Kwargs::new(),
    ));
    stream.write_all(&remora::api::codec::encode_pointer(&call)?)?;
    stream.flush()?;
    std::thread::sleep(Duration::from_millis(100));

    server.shutdown.shutdown();
    let task = server.task.take().expect("server task");
    server
        .runtime
        .block_on(async { tokio::time::timeout(Duration::from_secs(5), task).await })???;

    assert_eq!(server.consumer.store().get(call.id()), Some(Value::from("done")));
    assert_closed_by_host(&mut stream);
    Ok(())
}
