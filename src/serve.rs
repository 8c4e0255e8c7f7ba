//! Purpose: Network host: accept client connections and resolve their pointers.
//! Exports: `ServeConfig`, `OverflowPolicy`, `Server`, `ShutdownHandle`, `serve`,
//!          `validate_config`, `init_tracing`.
//! Role: Service-mode consumer face over TCP using the JSON Lines codec.
//! Invariants: Each connection owns its reply queue; nothing is registered process-wide.
//! Invariants: Messages on one connection resolve strictly in arrival order.
//! Invariants: A protocol failure or queue overflow closes only the offending connection.
//! Invariants: Shutdown is observed between messages; a resolution in progress runs to
//!             completion and its replies are flushed before the connection tears down.
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, watch};
use tokio::task::JoinSet;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::codec::{decode_pointer, encode_reply};
use crate::api::{Consumer, Error, ErrorKind};

pub const DEFAULT_MAX_PENDING_REPLIES: usize = 1024;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// What a connection does when its outbound reply queue is full.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OverflowPolicy {
    DropOldest,
    #[default]
    CloseConnection,
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub max_pending_replies: usize,
    pub overflow: OverflowPolicy,
    pub max_message_bytes: usize,
}

impl ServeConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            max_pending_replies: DEFAULT_MAX_PENDING_REPLIES,
            overflow: OverflowPolicy::default(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

pub fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if config.max_pending_replies == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("max_pending_replies must be greater than zero")
            .with_hint("Use a positive value like 1024."));
    }
    if config.max_message_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("max_message_bytes must be greater than zero")
            .with_hint("Use a positive value like 16777216."));
    }
    Ok(())
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

/// Binds `config.bind` and serves `consumer` until Ctrl-C or SIGTERM.
pub async fn serve(config: ServeConfig, consumer: Consumer) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let server = Server::bind(config, Arc::new(consumer)).await?;
    let shutdown = server.shutdown_handle();
    let run = server.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = shutdown_signal() => {
            shutdown.shutdown();
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut run).await {
                Ok(result) => result,
                Err(_) => Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out")),
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

/// Stops the accept loop and asks live connections to finish.
#[derive(Clone)]
pub struct ShutdownHandle {
    stop: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.stop.send_replace(true);
    }
}

pub struct Server {
    listener: TcpListener,
    consumer: Arc<Consumer>,
    config: ServeConfig,
    stop: Arc<watch::Sender<bool>>,
}

impl Server {
    pub async fn bind(config: ServeConfig, consumer: Arc<Consumer>) -> Result<Self, Error> {
        validate_config(&config)?;
        let listener = TcpListener::bind(config.bind).await.map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
        let (stop, _) = watch::channel(false);
        Ok(Self {
            listener,
            consumer,
            config,
            stop: Arc::new(stop),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.listener.local_addr().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read local address")
                .with_source(err)
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Accepts connections until shut down, then waits for live connections.
    pub async fn run(self) -> Result<(), Error> {
        let addr = self.local_addr()?;
        info!(%addr, "listening");
        let mut stop = self.stop.subscribe();
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(handle_connection(
                            stream,
                            peer,
                            Arc::clone(&self.consumer),
                            self.config.clone(),
                            self.stop.subscribe(),
                        ));
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
                _ = wait_for_stop(&mut stop) => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
        drop(self.listener);
        while connections.join_next().await.is_some() {}
        info!(%addr, "server stopped");
        Ok(())
    }
}

async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// State owned by one connection's handler: its bounded outbound reply queue.
struct ConnectionContext {
    peer: SocketAddr,
    replies: Mutex<VecDeque<Vec<u8>>>,
    ready: Notify,
    max_pending: usize,
    overflow: OverflowPolicy,
    overflowed: AtomicBool,
    closed: AtomicBool,
}

impl ConnectionContext {
    fn new(peer: SocketAddr, config: &ServeConfig) -> Self {
        Self {
            peer,
            replies: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
            max_pending: config.max_pending_replies,
            overflow: config.overflow,
            overflowed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn lock_replies(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.replies
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn push(&self, line: Vec<u8>) {
        {
            let mut replies = self.lock_replies();
            if replies.len() >= self.max_pending {
                match self.overflow {
                    OverflowPolicy::DropOldest => {
                        replies.pop_front();
                        warn!(peer = %self.peer, "reply queue full; dropped oldest reply");
                    }
                    OverflowPolicy::CloseConnection => {
                        self.overflowed.store(true, Ordering::Release);
                        return;
                    }
                }
            }
            replies.push_back(line);
        }
        self.ready.notify_one();
    }

    fn drain(&self) -> Vec<Vec<u8>> {
        self.lock_replies().drain(..).collect()
    }

    fn has_overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    consumer: Arc<Consumer>,
    config: ServeConfig,
    stop: watch::Receiver<bool>,
) {
    info!(%peer, "connection opened");
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let context = Arc::new(ConnectionContext::new(peer, &config));
    let outbound = tokio::spawn(outbound_loop(write_half, Arc::clone(&context)));

    let result = inbound_loop(
        read_half,
        consumer,
        Arc::clone(&context),
        config.max_message_bytes,
        stop,
    )
    .await;
    if let Err(err) = result {
        warn!(%peer, error = %err, "closing connection");
    }

    context.close();
    if context.has_overflowed() {
        outbound.abort();
    }
    let _ = outbound.await;
    info!(%peer, "connection closed");
}

async fn inbound_loop(
    read_half: OwnedReadHalf,
    consumer: Arc<Consumer>,
    context: Arc<ConnectionContext>,
    max_message_bytes: usize,
    mut stop: watch::Receiver<bool>,
) -> Result<(), Error> {
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();
    loop {
        line.clear();
        // Shutdown is only observed here, between messages.
        let mut limited = (&mut reader).take(max_message_bytes as u64 + 1);
        let read = tokio::select! {
            read = limited.read_until(b'\n', &mut line) => read.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read message")
                    .with_source(err)
            })?,
            _ = wait_for_stop(&mut stop) => {
                debug!(peer = %context.peer, "server stopping; closing connection");
                return Ok(());
            }
        };
        if read == 0 {
            return Ok(());
        }
        let payload_len = line.strip_suffix(b"\n").map_or(line.len(), <[u8]>::len);
        if payload_len > max_message_bytes {
            return Err(Error::new(ErrorKind::Protocol).with_message(format!(
                "message exceeds {max_message_bytes} bytes"
            )));
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let pointer = decode_pointer(&line)?;

        let consumer = Arc::clone(&consumer);
        let replies = Arc::clone(&context);
        tokio::task::spawn_blocking(move || {
            let _ = consumer.execute(&pointer, &mut |key, reply| {
                replies.push(encode_reply(&key, &reply));
            });
        })
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("resolution task failed")
                .with_source(err)
        })?;

        if context.has_overflowed() {
            return Err(Error::new(ErrorKind::Io).with_message("reply queue overflowed"));
        }
    }
}

async fn outbound_loop(mut write_half: OwnedWriteHalf, context: Arc<ConnectionContext>) {
    loop {
        let closed = context.is_closed();
        for line in context.drain() {
            if let Err(err) = write_half.write_all(&line).await {
                warn!(peer = %context.peer, error = %err, "failed to send reply");
                return;
            }
        }
        if let Err(err) = write_half.flush().await {
            warn!(peer = %context.peer, error = %err, "failed to flush replies");
            return;
        }
        if closed {
            let _ = write_half.shutdown().await;
            return;
        }
        context.ready.notified().await;
    }
}
