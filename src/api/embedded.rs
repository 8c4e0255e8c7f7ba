//! Purpose: In-process broker channel for single-process (embedded) mode.
//! Exports: `channel`, `EmbeddedHost`.
//! Role: Producer and consumer share memory; the host drains the queue on demand.
//! Invariants: Messages execute in send order; `listen` returns once the queue is empty.
//! Invariants: Replies are keyed by correlation id and handed out at most once.
#![allow(clippy::result_large_err)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use super::ApiResult;
use super::consumer::{Consumer, Reply};
use super::producer::{Producer, Transport, timeout_error};
use crate::core::id::PointerId;
use crate::core::pointer::Pointer;
use crate::core::value::Value;

#[derive(Default)]
struct Queues {
    inbound: VecDeque<Pointer>,
    replies: HashMap<PointerId, Reply>,
}

#[derive(Default)]
struct Shared {
    queues: Mutex<Queues>,
    replied: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

struct EmbeddedTransport {
    shared: Arc<Shared>,
}

impl Transport for EmbeddedTransport {
    fn send(&self, pointer: &Pointer) -> ApiResult<()> {
        self.shared.lock().inbound.push_back(pointer.clone());
        Ok(())
    }

    fn recv_reply(&self, key: &PointerId, timeout: Duration) -> ApiResult<Value> {
        let deadline = Instant::now() + timeout;
        let mut queues = self.shared.lock();
        loop {
            if let Some(reply) = queues.replies.remove(key) {
                return reply;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(timeout_error(key, timeout));
            }
            queues = self
                .shared
                .replied
                .wait_timeout(queues, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poison| poison.into_inner().0);
        }
    }

    fn take_reply(&self, key: &PointerId) -> ApiResult<Option<Value>> {
        self.shared.lock().replies.remove(key).transpose()
    }
}

/// Host half of an embedded channel.
pub struct EmbeddedHost {
    consumer: Arc<Consumer>,
    shared: Arc<Shared>,
}

/// Connects a producer to `consumer` through shared in-memory queues.
pub fn channel(consumer: Consumer) -> (Producer, EmbeddedHost) {
    let shared = Arc::new(Shared::default());
    let transport = EmbeddedTransport {
        shared: Arc::clone(&shared),
    };
    let host = EmbeddedHost {
        consumer: Arc::new(consumer),
        shared,
    };
    (Producer::new(Arc::new(transport)), host)
}

impl EmbeddedHost {
    pub fn consumer(&self) -> &Consumer {
        &self.consumer
    }

    /// Executes queued messages until the queue is empty; returns how many ran.
    pub fn listen(&self) -> usize {
        let mut processed = 0;
        // The lock is released while executing so producers may keep sending.
        while let Some(pointer) = self.next_message() {
            let _ = self.consumer.execute(&pointer, &mut |key, reply| {
                self.shared.lock().replies.insert(key, reply);
                self.shared.replied.notify_all();
            });
            processed += 1;
        }
        debug!(processed, "embedded queue drained");
        processed
    }

    pub fn pending(&self) -> usize {
        self.shared.lock().inbound.len()
    }

    fn next_message(&self) -> Option<Pointer> {
        self.shared.lock().inbound.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::channel;
    use crate::api::consumer::Consumer;
    use crate::core::error::ErrorKind;
    use crate::core::library::Namespace;
    use crate::core::pointer::{CallablePointer, GetPointer, Pointer};
    use crate::core::value::{Kwargs, Value};
    use std::time::Duration;

    fn host_library() -> Consumer {
        Consumer::new(
            Namespace::new("lib")
                .with_function("double", |args, _| {
                    let n = args.first().and_then(Value::as_int).unwrap_or(0);
                    Ok(Value::Int(n * 2))
                })
                .into_root(),
        )
    }

    #[test]
    fn listen_drains_in_order_and_answers_gets() {
        let (producer, host) = channel(host_library());
        let first = Pointer::Callable(CallablePointer::new("double", vec![Value::Int(4)], Kwargs::new()));
        let second = Pointer::Callable(CallablePointer::new(
            "double",
            vec![Value::from(first.clone())],
            Kwargs::new(),
        ));
        producer.send(&first).expect("send");
        producer.send(&second).expect("send");
        let pending = producer
            .submit(GetPointer::target(second.id().clone()))
            .expect("submit");
        assert_eq!(host.pending(), 3);
        assert!(pending.try_take().expect("take").is_none());

        assert_eq!(host.listen(), 3);
        assert_eq!(host.pending(), 0);
        assert_eq!(pending.try_take().expect("take"), Some(Value::Int(16)));
        assert_eq!(host.listen(), 0);
    }

    #[test]
    fn request_blocks_until_a_host_thread_answers() {
        let (producer, host) = channel(host_library());
        let call = Pointer::Callable(CallablePointer::new("double", vec![Value::Int(21)], Kwargs::new()));
        producer.send(&call).expect("send");
        let worker = std::thread::spawn(move || {
            let mut processed = 0;
            while processed < 2 {
                processed += host.listen();
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        let value = producer
            .request(GetPointer::target(call.id().clone()))
            .expect("reply");
        assert_eq!(value, Value::Int(42));
        worker.join().expect("join");
    }

    #[test]
    fn unknown_targets_time_out() {
        let (producer, host) = channel(host_library());
        let producer = producer.with_request_timeout(Duration::from_millis(20));
        let get = GetPointer::target(crate::core::id::PointerId::generate());
        let pending = producer.submit(get).expect("submit");
        assert_eq!(host.listen(), 1);
        let err = pending.wait(producer.request_timeout()).expect_err("timeout");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
