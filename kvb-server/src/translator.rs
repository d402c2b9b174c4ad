//! # Command Translator
//!
//! Purpose: Turn REST request bodies into store commands, run them on a
//! pooled session, and turn the store's replies back into JSON.
//!
//! ## Design Principles
//! 1. **Faithful Pass-Through**: Store errors are surfaced verbatim; argument
//!    limits are left to the store.
//! 2. **Positional Results**: Result `i` always answers command `i`.
//! 3. **Pipelined Execution**: Every batch is one write and one read pass on
//!    a single session, in input order.
//! 4. **Local Refusals**: Session-stateful and blocking commands (the
//!    `Unsupported` family) are answered here and never reach the store.
//!    Everything else, unknown names included, is forwarded.
//!
//! ## Body Shapes
//!
//! ```text
//! single       ["SET", "a", "1"]
//! pipeline     [["SET", "x", "1"], ["INCR", "y"]]
//! transaction  [["SET", "x", "1"], ["INCR", "y"]]   (run inside MULTI/EXEC)
//! path form    /set/a/1  (POST body appended as the last argument)
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use serde_json::{json, Map, Value as Json};
use tracing::{debug, trace};

use kvb_client::{ClientError, ClientResult, PooledSession, RespValue};
use kvb_common::{BridgeError, BridgeResult, Command, CommandBatch, CommandResult, ExecMode, Value};

/// Header selecting the string encoding of results.
pub const ENCODING_HEADER: &str = "upstash-encoding";

const PARSE_ERROR: &str = "ERR failed to parse command";

/// How string values are rendered in JSON responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultEncoding {
    /// UTF-8 text (lossy for binary values).
    #[default]
    Plain,
    /// Standard base64 of the raw bytes.
    Base64,
}

impl ResultEncoding {
    /// Parses the `Upstash-Encoding` header value.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(value) if value.trim().eq_ignore_ascii_case("base64") => ResultEncoding::Base64,
            _ => ResultEncoding::Plain,
        }
    }
}

// ============================================================================
// PARSING
// ============================================================================

/// Parses a single command body: a JSON array of tokens.
pub fn parse_single(body: &[u8]) -> BridgeResult<CommandBatch> {
    let json = parse_json(body)?;
    let command = command_from_json(&json)?;
    Ok(CommandBatch::single(command))
}

/// Parses a pipeline or transaction body: a JSON array of token arrays.
pub fn parse_batch(body: &[u8], mode: ExecMode) -> BridgeResult<CommandBatch> {
    let json = parse_json(body)?;
    let entries = json
        .as_array()
        .ok_or_else(|| BridgeError::Protocol(PARSE_ERROR.to_string()))?;
    let commands = entries
        .iter()
        .map(command_from_json)
        .collect::<BridgeResult<Vec<_>>>()?;
    Ok(CommandBatch::new(mode, commands))
}

/// Parses the path form: `/cmd/arg/...`, with a non-empty body appended.
///
/// `raw_path` is the request path as sent. It is split on `/` before each
/// segment is percent-decoded, so `%2F` stays inside its argument.
pub fn parse_path(raw_path: &str, body: Bytes) -> BridgeResult<CommandBatch> {
    let mut tokens: Vec<Bytes> = raw_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| Bytes::from(percent_decode_str(segment).collect::<Vec<u8>>()))
        .collect();
    if !body.is_empty() {
        tokens.push(body);
    }
    Command::from_tokens(tokens)
        .map(CommandBatch::single)
        .ok_or_else(|| BridgeError::Protocol(PARSE_ERROR.to_string()))
}

fn parse_json(body: &[u8]) -> BridgeResult<Json> {
    serde_json::from_slice(body).map_err(|_| BridgeError::Protocol(PARSE_ERROR.to_string()))
}

fn command_from_json(json: &Json) -> BridgeResult<Command> {
    let items = json
        .as_array()
        .ok_or_else(|| BridgeError::Protocol(PARSE_ERROR.to_string()))?;
    let tokens = items
        .iter()
        .map(token_from_json)
        .collect::<BridgeResult<Vec<_>>>()?;
    Command::from_tokens(tokens)
        .ok_or_else(|| BridgeError::Protocol("ERR empty command".to_string()))
}

fn token_from_json(json: &Json) -> BridgeResult<Bytes> {
    match json {
        Json::String(text) => Ok(Bytes::from(text.clone())),
        Json::Number(number) => Ok(Bytes::from(number.to_string())),
        Json::Bool(flag) => Ok(Bytes::from(flag.to_string())),
        _ => Err(BridgeError::Protocol(PARSE_ERROR.to_string())),
    }
}

// ============================================================================
// EXECUTION
// ============================================================================

/// Answers batches that need no store round trip.
///
/// Returns `Some` for empty batches, for single/pipeline batches made only
/// of unsupported commands, and for transactions containing any unsupported
/// command (the whole group is aborted before it reaches the store).
pub fn local_results(batch: &CommandBatch) -> Option<Vec<CommandResult>> {
    if batch.is_empty() {
        return Some(Vec::new());
    }

    match batch.mode() {
        ExecMode::Transaction => batch.first_unsupported().map(|cmd| {
            let abort = CommandResult::error(format!(
                "EXECABORT Transaction discarded because of unsupported command '{}'",
                cmd.name()
            ));
            vec![abort; batch.len()]
        }),
        ExecMode::Single | ExecMode::Pipeline => {
            let all_unsupported = batch
                .commands()
                .iter()
                .all(|cmd| !cmd.family().is_supported());
            all_unsupported.then(|| {
                batch
                    .commands()
                    .iter()
                    .map(CommandResult::unsupported)
                    .collect()
            })
        }
    }
}

/// Runs `batch` on `session`, returning one result per command.
///
/// Command-level failures are results; only connection and framing failures
/// are errors.
pub async fn execute(
    session: &mut PooledSession,
    batch: &CommandBatch,
) -> ClientResult<Vec<CommandResult>> {
    debug!(mode = %batch.mode(), commands = batch.len(), "executing batch");
    for cmd in batch.commands() {
        trace!(command = cmd.name(), family = %cmd.family(), "queued command");
    }

    if let Some(results) = local_results(batch) {
        return Ok(results);
    }

    match batch.mode() {
        ExecMode::Single | ExecMode::Pipeline => execute_pipeline(session, batch.commands()).await,
        ExecMode::Transaction => execute_transaction(session, batch.commands()).await,
    }
}

async fn execute_pipeline(
    session: &mut PooledSession,
    commands: &[Command],
) -> ClientResult<Vec<CommandResult>> {
    let forwarded: Vec<Vec<&[u8]>> = commands
        .iter()
        .filter(|cmd| cmd.family().is_supported())
        .map(Command::parts)
        .collect();
    let mut replies = session.exec_pipeline(&forwarded).await?.into_iter();

    let results = commands
        .iter()
        .map(|cmd| {
            if !cmd.family().is_supported() {
                return CommandResult::unsupported(cmd);
            }
            replies
                .next()
                .map(CommandResult::from)
                .unwrap_or_else(|| CommandResult::error("ERR missing reply"))
        })
        .collect();
    Ok(results)
}

async fn execute_transaction(
    session: &mut PooledSession,
    commands: &[Command],
) -> ClientResult<Vec<CommandResult>> {
    let mut wire: Vec<Vec<&[u8]>> = Vec::with_capacity(commands.len() + 2);
    wire.push(vec![&b"MULTI"[..]]);
    wire.extend(commands.iter().map(Command::parts));
    wire.push(vec![&b"EXEC"[..]]);

    let mut replies = session.exec_pipeline(&wire).await?;
    let exec = replies
        .pop()
        .ok_or_else(|| ClientError::Protocol("missing EXEC reply".to_string()))?;

    match exec {
        RespValue::Array(Some(items)) if items.len() == commands.len() => {
            Ok(items.into_iter().map(CommandResult::from).collect())
        }
        RespValue::Array(Some(items)) => {
            session.invalidate();
            Err(ClientError::Protocol(format!(
                "EXEC returned {} replies for {} commands",
                items.len(),
                commands.len()
            )))
        }
        RespValue::Array(None) => Ok(vec![
            CommandResult::error("EXECABORT Transaction aborted");
            commands.len()
        ]),
        RespValue::Error(message) => {
            let abort = CommandResult::Error(String::from_utf8_lossy(&message).into_owned());
            debug!(error = %String::from_utf8_lossy(&message), "transaction aborted by store");
            Ok(vec![abort; commands.len()])
        }
        other => {
            session.invalidate();
            Err(ClientError::Protocol(format!("unexpected EXEC reply {:?}", other)))
        }
    }
}

// ============================================================================
// ENCODING
// ============================================================================

/// Encodes one result as `{"result": ...}` or `{"error": ...}`.
pub fn encode_result(result: &CommandResult, encoding: ResultEncoding) -> Json {
    let mut object = Map::new();
    match result {
        CommandResult::Error(message) => {
            object.insert("error".to_string(), Json::String(message.clone()));
        }
        other => {
            object.insert("result".to_string(), encode_value(other, encoding));
        }
    }
    Json::Object(object)
}

/// Encodes a batch of results as a JSON array.
pub fn encode_results(results: &[CommandResult], encoding: ResultEncoding) -> Json {
    Json::Array(
        results
            .iter()
            .map(|result| encode_result(result, encoding))
            .collect(),
    )
}

fn encode_value(result: &CommandResult, encoding: ResultEncoding) -> Json {
    match result {
        CommandResult::Nil => Json::Null,
        CommandResult::Error(message) => json!({ "error": message }),
        CommandResult::Value(Value::Integer(value)) => json!(value),
        CommandResult::Value(Value::Status(text)) => encode_text(text.as_bytes(), encoding),
        CommandResult::Value(Value::Bytes(data)) => encode_text(data, encoding),
        CommandResult::Value(Value::Array(items)) => Json::Array(
            items
                .iter()
                .map(|item| encode_value(item, encoding))
                .collect(),
        ),
    }
}

fn encode_text(data: &[u8], encoding: ResultEncoding) -> Json {
    match encoding {
        ResultEncoding::Plain => Json::String(String::from_utf8_lossy(data).into_owned()),
        ResultEncoding::Base64 => Json::String(STANDARD.encode(data)),
    }
}
