//! Purpose: Blocking TCP client transport speaking the JSON Lines pointer protocol.
//! Exports: `RemoteTransport`.
//! Role: Client half of service mode; plugs into `Producer` like the embedded channel.
//! Invariants: Replies for other keys are buffered, never dropped, until claimed.
//! Invariants: The reader lock is held for short read slices so concurrent waiters progress.
#![allow(clippy::result_large_err)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind as IoErrorKind, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use super::ApiResult;
use super::codec::{decode_reply, encode_pointer};
use super::producer::{Transport, timeout_error};
use crate::core::error::{Error, ErrorKind};
use crate::core::id::PointerId;
use crate::core::pointer::Pointer;
use crate::core::value::Value;

const READ_SLICE: Duration = Duration::from_millis(50);
const MIN_READ_SLICE: Duration = Duration::from_millis(1);

struct ReplyReader {
    reader: BufReader<TcpStream>,
    line: Vec<u8>,
    pending: HashMap<PointerId, ApiResult<Value>>,
}

impl ReplyReader {
    /// Reads one complete reply line, or `None` if the slice elapsed first.
    fn read_reply(&mut self, slice: Duration) -> ApiResult<Option<(PointerId, ApiResult<Value>)>> {
        self.reader
            .get_ref()
            .set_read_timeout(Some(slice.max(MIN_READ_SLICE)))
            .map_err(io_error("failed to set read timeout"))?;
        match self.reader.read_until(b'\n', &mut self.line) {
            Ok(0) => Err(Error::new(ErrorKind::Io).with_message("connection closed by host")),
            Ok(_) if !self.line.ends_with(b"\n") => {
                Err(Error::new(ErrorKind::Io).with_message("connection closed mid-reply"))
            }
            Ok(_) => {
                let line = std::mem::take(&mut self.line);
                decode_reply(&line).map(Some)
            }
            Err(err) if matches!(err.kind(), IoErrorKind::WouldBlock | IoErrorKind::TimedOut) => Ok(None),
            Err(err) if err.kind() == IoErrorKind::Interrupted => Ok(None),
            Err(err) => Err(Error::new(ErrorKind::Io)
                .with_message("failed to read reply")
                .with_source(err)),
        }
    }
}

pub struct RemoteTransport {
    peer: SocketAddr,
    writer: Mutex<TcpStream>,
    reader: Mutex<ReplyReader>,
}

impl RemoteTransport {
    pub fn connect(addr: impl ToSocketAddrs) -> ApiResult<Self> {
        let stream = TcpStream::connect(addr).map_err(io_error("failed to connect to host"))?;
        stream
            .set_nodelay(true)
            .map_err(io_error("failed to configure socket"))?;
        let peer = stream
            .peer_addr()
            .map_err(io_error("failed to read peer address"))?;
        let reader = stream
            .try_clone()
            .map_err(io_error("failed to clone socket"))?;
        debug!(%peer, "connected to host");
        Ok(Self {
            peer,
            writer: Mutex::new(stream),
            reader: Mutex::new(ReplyReader {
                reader: BufReader::new(reader),
                line: Vec::new(),
                pending: HashMap::new(),
            }),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn lock_reader(&self) -> MutexGuard<'_, ReplyReader> {
        self.reader
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Transport for RemoteTransport {
    fn send(&self, pointer: &Pointer) -> ApiResult<()> {
        let line = encode_pointer(pointer)?;
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        writer
            .write_all(&line)
            .and_then(|_| writer.flush())
            .map_err(io_error("failed to send pointer"))
    }

    fn recv_reply(&self, key: &PointerId, timeout: Duration) -> ApiResult<Value> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut state = self.lock_reader();
            if let Some(reply) = state.pending.remove(key) {
                return reply;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(timeout_error(key, timeout));
            }
            if let Some((reply_key, reply)) = state.read_reply((deadline - now).min(READ_SLICE))? {
                if &reply_key == key {
                    return reply;
                }
                state.pending.insert(reply_key, reply);
            }
        }
    }

    fn take_reply(&self, key: &PointerId) -> ApiResult<Option<Value>> {
        let mut state = self.lock_reader();
        loop {
            if let Some(reply) = state.pending.remove(key) {
                return reply.map(Some);
            }
            match state.read_reply(MIN_READ_SLICE)? {
                Some((reply_key, reply)) => {
                    state.pending.insert(reply_key, reply);
                }
                None => return Ok(None),
            }
        }
    }
}

fn io_error(message: &'static str) -> impl Fn(std::io::Error) -> Error {
    move |err| {
        Error::new(ErrorKind::Io)
            .with_message(message)
            .with_source(err)
    }
}
