//! # In-Process Mock Store
//!
//! A small RESP2 server for tests. It implements enough of the store's string
//! commands, MULTI/EXEC queueing and `DEBUG SLEEP` to exercise the bridge end
//! to end, and counts every connection and command it sees.
//!
//! Enabled for this crate's tests and, through the `mock` feature, for
//! dependent crates' tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::resp::{decode, RespValue};

#[derive(Default)]
struct MockState {
    data: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    commands: AtomicUsize,
    connections: AtomicUsize,
    generation: AtomicU64,
}

/// Handle to a running mock store.
#[derive(Clone)]
pub struct MockStore {
    addr: String,
    state: Arc<MockState>,
}

impl MockStore {
    /// Binds to an ephemeral loopback port and starts serving.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(Self::serve(listener))
    }

    /// Serves on an already-bound listener.
    pub fn serve(listener: TcpListener) -> Self {
        let addr = listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        let state = Arc::new(MockState::default());

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let conn_state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, conn_state).await;
                });
            }
        });

        MockStore { addr, state }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of command frames received so far.
    pub fn commands(&self) -> usize {
        self.state.commands.load(Ordering::SeqCst)
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Severs every open connection the next time it receives a command.
    pub fn drop_connections(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Reads a key directly, bypassing the protocol.
    pub fn value(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.state.data.lock().get(key).cloned()
    }

    /// Writes a key directly, bypassing the protocol.
    pub fn insert(&self, key: &[u8], value: &[u8]) {
        self.state.data.lock().insert(key.to_vec(), value.to_vec());
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<MockState>) -> std::io::Result<()> {
    let generation = state.generation.load(Ordering::SeqCst);
    let mut buffer = BytesMut::with_capacity(4 * 1024);
    let mut queue: Option<Vec<Vec<Vec<u8>>>> = None;
    let mut dirty = false;

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            return Ok(());
        }

        while let Ok(Some(frame)) = decode(&mut buffer) {
            if state.generation.load(Ordering::SeqCst) != generation {
                return Ok(());
            }
            state.commands.fetch_add(1, Ordering::SeqCst);

            let args = match frame_args(frame) {
                Some(args) if !args.is_empty() => args,
                _ => {
                    stream.write_all(&resp_error("ERR protocol error")).await?;
                    continue;
                }
            };
            let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();

            let in_multi = queue.is_some();
            let reply = match (name.as_str(), in_multi) {
                ("MULTI", true) => resp_error("ERR MULTI calls can not be nested"),
                ("MULTI", false) => {
                    queue = Some(Vec::new());
                    dirty = false;
                    resp_simple("OK")
                }
                ("EXEC", false) | ("DISCARD", false) => {
                    resp_error(&format!("ERR {} without MULTI", name))
                }
                ("DISCARD", true) => {
                    queue = None;
                    resp_simple("OK")
                }
                ("EXEC", true) => {
                    let queued = queue.take().unwrap_or_default();
                    if dirty {
                        resp_error("EXECABORT Transaction discarded because of previous errors.")
                    } else {
                        let mut out = format!("*{}\r\n", queued.len()).into_bytes();
                        for queued_args in &queued {
                            out.extend_from_slice(&dispatch_command(queued_args, &state));
                        }
                        out
                    }
                }
                (_, true) => match validate(&args) {
                    Ok(()) => {
                        if let Some(pending) = queue.as_mut() {
                            pending.push(args);
                        }
                        resp_simple("QUEUED")
                    }
                    Err(reply) => {
                        dirty = true;
                        reply
                    }
                },
                ("DEBUG", false) => match validate(&args) {
                    Ok(()) => {
                        debug_sleep(&args[2]).await;
                        resp_simple("OK")
                    }
                    Err(reply) => reply,
                },
                (_, false) => match validate(&args) {
                    Ok(()) => dispatch_command(&args, &state),
                    Err(reply) => reply,
                },
            };
            stream.write_all(&reply).await?;
        }
    }
}

fn frame_args(frame: RespValue) -> Option<Vec<Vec<u8>>> {
    match frame {
        RespValue::Array(Some(items)) => items
            .into_iter()
            .map(|item| match item {
                RespValue::Bulk(Some(data)) => Some(data),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

/// Queue-time checks: known command and arity.
fn validate(args: &[Vec<u8>]) -> Result<(), Vec<u8>> {
    let name = String::from_utf8_lossy(&args[0]).to_ascii_lowercase();
    let ok = match name.as_str() {
        "ping" => args.len() <= 2,
        "echo" | "get" | "incr" => args.len() == 2,
        "incrby" => args.len() == 3,
        "set" => args.len() >= 3,
        "del" | "exists" => args.len() >= 2,
        "debug" => args.len() == 3 && args[1].eq_ignore_ascii_case(b"sleep"),
        _ => return Err(resp_error(&format!("ERR unknown command '{}'", name))),
    };
    if ok {
        Ok(())
    } else {
        Err(resp_error(&format!(
            "ERR wrong number of arguments for '{}' command",
            name
        )))
    }
}

fn dispatch_command(args: &[Vec<u8>], state: &MockState) -> Vec<u8> {
    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    let mut data = state.data.lock();
    match name.as_str() {
        "PING" if args.len() == 2 => resp_bulk(&args[1]),
        "PING" => resp_simple("PONG"),
        "ECHO" => resp_bulk(&args[1]),
        "GET" => match data.get(&args[1]) {
            Some(value) => resp_bulk(value),
            None => resp_null(),
        },
        "SET" => {
            data.insert(args[1].clone(), args[2].clone());
            resp_simple("OK")
        }
        "DEL" => {
            let removed = args[1..].iter().filter(|key| data.remove(*key).is_some()).count();
            resp_integer(removed as i64)
        }
        "EXISTS" => {
            let found = args[1..].iter().filter(|key| data.contains_key(*key)).count();
            resp_integer(found as i64)
        }
        "INCR" | "INCRBY" => {
            let delta = if name == "INCR" {
                Some(1)
            } else {
                parse_i64(&args[2])
            };
            let current = match data.get(&args[1]) {
                Some(value) => parse_i64(value),
                None => Some(0),
            };
            match (current, delta) {
                (Some(current), Some(delta)) => {
                    let next = current + delta;
                    data.insert(args[1].clone(), next.to_string().into_bytes());
                    resp_integer(next)
                }
                _ => resp_error("ERR value is not an integer or out of range"),
            }
        }
        _ => resp_error("ERR unknown command"),
    }
}

/// `DEBUG SLEEP <seconds>`: stalls this connection only.
async fn debug_sleep(seconds: &[u8]) {
    let seconds = std::str::from_utf8(seconds)
        .ok()
        .and_then(|text| text.parse::<f64>().ok())
        .unwrap_or(0.0);
    tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))).await;
}

fn parse_i64(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

fn resp_simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"+");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_error(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"-");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_integer(value: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b":");
    buf.extend_from_slice(value.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"$");
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}
