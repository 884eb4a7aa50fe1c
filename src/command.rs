/*!
 * Command Model
 *
 * Decodes one command off a `RespReader` and executes it against the `Db`.
 * Commands are a closed enum; each variant validates its own argument count
 * and pulls exactly its arguments from the reader.
 */

use crate::error::{ProtocolError, ProtocolResult};
use crate::net::Handler;
use crate::protocol::{resp_null, resp_simple, ByteCursor, LineSource, RespReader};
use crate::storage::Db;
use std::time::Duration;

/// Commands understood by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// PING
    Ping,
    /// ECHO message
    Echo(String),
    /// GET key
    Get(String),
    /// SET key value [PX milliseconds]
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
}

/// Read one complete command.
///
/// # Arguments
///
/// * `rr` - reader over the connection's unconsumed bytes; the command name
///   is matched case-insensitively.
///
/// # Returns
///
/// The decoded `Command`, with the reader's source positioned just past the
/// command's last byte. `ProtocolError::EndOfData` means the frame is not
/// complete yet.
pub fn read_command<S: LineSource>(rr: &mut RespReader<S>) -> ProtocolResult<Command> {
    let len = rr.read_array_len()?;
    if len <= 0 {
        return Err(ProtocolError::EmptyArray);
    }

    let name = rr.read_bulk_string()?;
    let argc = len - 1;

    if name.eq_ignore_ascii_case("PING") {
        Command::read_ping(argc)
    } else if name.eq_ignore_ascii_case("ECHO") {
        Command::read_echo(rr, argc)
    } else if name.eq_ignore_ascii_case("GET") {
        Command::read_get(rr, argc)
    } else if name.eq_ignore_ascii_case("SET") {
        Command::read_set(rr, argc)
    } else {
        Err(ProtocolError::UnknownCommand(name))
    }
}

impl Command {
    fn read_ping(argc: i64) -> ProtocolResult<Command> {
        if argc != 0 {
            return Err(ProtocolError::WrongArity("ping"));
        }
        Ok(Command::Ping)
    }

    fn read_echo<S: LineSource>(rr: &mut RespReader<S>, argc: i64) -> ProtocolResult<Command> {
        if argc != 1 {
            return Err(ProtocolError::WrongArity("echo"));
        }
        Ok(Command::Echo(rr.read_bulk_string()?))
    }

    fn read_get<S: LineSource>(rr: &mut RespReader<S>, argc: i64) -> ProtocolResult<Command> {
        if argc != 1 {
            return Err(ProtocolError::WrongArity("get"));
        }
        Ok(Command::Get(rr.read_bulk_string()?))
    }

    fn read_set<S: LineSource>(rr: &mut RespReader<S>, argc: i64) -> ProtocolResult<Command> {
        if argc != 2 && argc != 4 {
            return Err(ProtocolError::WrongArity("set"));
        }

        let key = rr.read_bulk_string()?;
        let value = rr.read_bulk_string()?;
        if argc == 2 {
            return Ok(Command::Set {
                key,
                value,
                ttl: None,
            });
        }

        let opt = rr.read_bulk_string()?;
        if !opt.eq_ignore_ascii_case("PX") {
            return Err(ProtocolError::Syntax(format!(
                "expected PX as the third argument, got '{opt}'"
            )));
        }

        let raw = rr.read_bulk_string()?;
        let ms = raw
            .parse::<i64>()
            .map_err(|_| ProtocolError::InvalidInteger(raw.clone()))?;
        if ms <= 0 {
            return Err(ProtocolError::InvalidExpire);
        }

        Ok(Command::Set {
            key,
            value,
            ttl: Some(Duration::from_millis(ms as u64)),
        })
    }

    /// Run the command and produce its reply, without the trailing CRLF.
    ///
    /// A SET with a TTL starts its expiry clock here, not at parse time.
    pub fn execute(self, db: &Db) -> String {
        match self {
            Command::Ping => resp_simple("PONG"),
            Command::Echo(msg) => resp_simple(&msg),
            Command::Get(key) => match db.get(&key) {
                Some(value) => resp_simple(&value),
                None => resp_null(),
            },
            Command::Set { key, value, ttl } => {
                db.set(key, value, ttl);
                resp_simple("OK")
            }
        }
    }
}

/// Request handler wiring the command model into the event loop.
#[derive(Clone)]
pub struct CommandHandler {
    db: Db,
}

impl CommandHandler {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }
}

impl Handler for CommandHandler {
    fn handle(&mut self, rr: &mut RespReader<ByteCursor<'_>>) -> ProtocolResult<String> {
        let cmd = read_command(rr)?;
        Ok(cmd.execute(&self.db))
    }
}
