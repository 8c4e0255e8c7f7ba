//! Purpose: Demo host library and host helpers shared by integration tests.
//! Exports: `DemoLibrary`, `HostThread`, `TestResult`.
//! Role: Stands in for a numerical library: arrays, classes, namespaces, a side-effect counter.
//! Invariants: Every call to `tick` increments the counter exactly once.
#![allow(dead_code)]

use remora::api::{
    Consumer, EmbeddedHost, Error, ErrorKind, Kwargs, NativeClass, NdArray, Namespace, Surface,
    Value,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

pub struct DemoLibrary {
    pub ticks: Arc<AtomicUsize>,
    pub surface: Surface,
    root: Namespace,
}

impl DemoLibrary {
    pub fn new() -> Self {
        let ticks = Arc::new(AtomicUsize::new(0));
        let root = build(Arc::clone(&ticks));
        Self {
            ticks,
            surface: root.surface(),
            root,
        }
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn into_consumer(self) -> (Consumer, Surface, Arc<AtomicUsize>) {
        (Consumer::new(self.root.into_root()), self.surface, self.ticks)
    }
}

fn first_arg(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or(Value::Null)
}

fn build(ticks: Arc<AtomicUsize>) -> Namespace {
    let mut constants = std::collections::BTreeMap::new();
    constants.insert("e".to_string(), Value::Float(2.5));
    constants.insert("answer".to_string(), Value::Int(42));

    Namespace::new("demo")
        .with_function("array", |args, _| Ok(Value::Array(NdArray::from_value(&first_arg(&args))?)))
        .with_function("stack", |args, _| Ok(first_arg(&args)))
        .with_function("tick", move |_, _| {
            Ok(Value::Int(ticks.fetch_add(1, Ordering::SeqCst) as i64 + 1))
        })
        .with_function("slow", |_, _| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Value::from("done"))
        })
        .with_function("fail", |_, _| {
            Err(Error::new(ErrorKind::Invocation).with_message("requested failure"))
        })
        .with_attribute("constants", Value::Map(constants))
        .with_namespace(
            Namespace::new("linalg").with_function("norm", |args, _| {
                let array = NdArray::from_value(&first_arg(&args))?;
                Ok(Value::Float(array.data().iter().map(|v| v * v).sum::<f64>().sqrt()))
            }),
        )
        .with_namespace(
            Namespace::new("tree").with_namespace(
                Namespace::new("l1").with_namespace(
                    Namespace::new("l2").with_namespace(Namespace::new("l3").with_attribute("l4", 4)),
                ),
            ),
        )
        .with_class(widget_class())
        .with_class(father_class())
}

fn widget_class() -> NativeClass {
    NativeClass::new("Widget")
        .with_attribute("kind", "widget")
        .with_init(|instance, _args, kwargs| {
            instance.set_field("x", kwargs.get("x").cloned().unwrap_or(Value::Int(0)));
            instance.set_field("items", Value::list([0, 0, 0]));
            Ok(Value::Null)
        })
        .with_method("describe", |instance, _args, _kwargs| {
            let x = instance.field("x").unwrap_or(Value::Null);
            Ok(Value::from(format!("widget x={x:?}")))
        })
}

fn father_class() -> NativeClass {
    NativeClass::new("FatherClass")
        .with_init(|instance, args, _kwargs| {
            instance.set_field("value", first_arg(&args));
            Ok(Value::Null)
        })
        .with_method("father_method", |instance, _args, _kwargs| {
            let value = instance.field("value").and_then(|v| v.as_int()).unwrap_or(0);
            Ok(Value::Int(value * 2))
        })
}

/// Runs `EmbeddedHost::listen` on a background thread until dropped.
pub struct HostThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HostThread {
    pub fn spawn(host: EmbeddedHost) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                if host.listen() == 0 {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for HostThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn kwargs(entries: &[(&str, Value)]) -> Kwargs {
    entries
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

pub fn array(data: &[f64]) -> Value {
    Value::Array(NdArray::from_vec(data.to_vec()))
}
