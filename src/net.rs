/*!
 * Network Layer and Event Loop
 *
 * A single-threaded readiness loop. It owns the listening socket, the
 * multiplexer and every client connection, accepts new clients, and runs
 * each connection's read -> parse -> execute -> write cycle. All socket work
 * goes through the `Sys` capability.
 */

use crate::config::Config;
use crate::error::ProtocolResult;
use crate::protocol::{resp_error, ByteCursor, RespReader};
use crate::sys::{is_retryable, Handle, Interest, Readiness, Sys};
use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use hashbrown::HashMap;
use log::{debug, info, warn};
use std::io;
use std::net::SocketAddr;

/// Produces one reply per complete request.
///
/// The reader wraps the unconsumed bytes of one connection. Returning
/// `ProtocolError::EndOfData` means the request is still incomplete; the
/// loop keeps the bytes and calls again once more arrive. Any other error
/// ends the connection.
pub trait Handler {
    fn handle(&mut self, rr: &mut RespReader<ByteCursor<'_>>) -> ProtocolResult<String>;
}

/// Per-client state: bytes read but not yet parsed, replies not yet sent.
#[derive(Debug)]
struct Connection {
    rbuf: BytesMut,
    wbuf: BytesMut,
    interest: Interest,
}

impl Connection {
    fn new(capacity: usize) -> Self {
        Self {
            rbuf: BytesMut::with_capacity(capacity),
            wbuf: BytesMut::new(),
            interest: Interest::Read,
        }
    }

    fn queue_reply(&mut self, reply: &str) {
        self.wbuf.extend_from_slice(reply.as_bytes());
        self.wbuf.extend_from_slice(b"\r\n");
    }
}

/// Outcome of one connection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    /// Keep the connection registered.
    Open,
    /// Peer went away or sent a request that cannot be recovered from.
    Closed,
}

pub struct EventLoop<S: Sys, H: Handler> {
    sys: S,
    handler: H,
    listener: Handle,
    clients: HashMap<Handle, Connection>,
    ready: Vec<Readiness>,
    scratch: Vec<u8>,
    max_events: usize,
    limits: Limits,
}

/// Per-connection buffer caps.
#[derive(Debug, Clone, Copy)]
struct Limits {
    /// Unparsed bytes a single request may occupy.
    max_request: usize,
    /// Reply bytes a connection may leave unsent.
    max_output: usize,
}

impl<S: Sys, H: Handler> EventLoop<S, H> {
    /// Create the listening socket and the multiplexer and register the
    /// listener for read interest.
    pub fn create(mut sys: S, config: &Config, handler: H) -> Result<Self> {
        let addr = config.addr;
        let listener = sys.socket(&addr).context("socket")?;
        sys.bind(listener, &addr)
            .with_context(|| format!("bind {addr}"))?;
        sys.listen(listener, config.backlog).context("listen")?;
        sys.set_nonblocking(listener).context("set listener non-blocking")?;
        sys.create_multiplexer().context("create multiplexer")?;
        sys.register(listener, Interest::Read)
            .context("register listener")?;

        Ok(Self {
            sys,
            handler,
            listener,
            clients: HashMap::new(),
            ready: Vec::with_capacity(config.max_events),
            scratch: vec![0u8; config.read_buffer.max(1)],
            max_events: config.max_events,
            limits: Limits {
                max_request: config.max_request,
                max_output: config.max_output,
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.sys.local_addr(self.listener).context("local address")
    }

    pub fn listener(&self) -> Handle {
        self.listener
    }

    /// Number of live client connections.
    pub fn connections(&self) -> usize {
        self.clients.len()
    }

    /// Borrow the syscall capability.
    ///
    /// # Returns
    ///
    /// The `Sys` the loop was created with, so callers can inspect the
    /// sockets it manages.
    pub fn sys(&self) -> &S {
        &self.sys
    }

    /// Mutable access to the syscall capability, e.g. to queue more
    /// simulated traffic between iterations.
    pub fn sys_mut(&mut self) -> &mut S {
        &mut self.sys
    }

    /// Run until a syscall fails unrecoverably.
    pub fn run(&mut self) -> Result<()> {
        match self.local_addr() {
            Ok(addr) => info!("listening on {}", addr),
            Err(_) => info!("listening"),
        }
        loop {
            self.execute()?;
        }
    }

    /// One iteration: wait for readiness, then visit every ready handle once
    /// in the order the multiplexer reported them.
    pub fn execute(&mut self) -> Result<()> {
        let mut ready = std::mem::take(&mut self.ready);
        match self.sys.wait(&mut ready, self.max_events, None) {
            Ok(()) => {}
            Err(ref e) if is_retryable(e) => {
                ready.clear();
                self.ready = ready;
                return Ok(());
            }
            Err(e) => return Err(e).context("wait for readiness"),
        }

        let result = self.dispatch(&ready);
        ready.clear();
        self.ready = ready;
        result
    }

    fn dispatch(&mut self, ready: &[Readiness]) -> Result<()> {
        for ev in ready {
            if ev.handle == self.listener {
                self.accept()?;
            } else if self.process(*ev)? == Status::Closed {
                self.teardown(ev.handle)?;
            }
        }
        Ok(())
    }

    /// Accept every pending connection and register each for read interest.
    fn accept(&mut self) -> Result<()> {
        loop {
            match self.sys.accept(self.listener) {
                Ok(h) => {
                    self.sys
                        .set_nonblocking(h)
                        .context("set client non-blocking")?;
                    self.sys
                        .register(h, Interest::Read)
                        .context("register client")?;
                    self.clients
                        .insert(h, Connection::new(self.scratch.len()));
                    debug!("accepted connection {}", h.0);
                }
                Err(ref e) if is_retryable(e) => return Ok(()),
                Err(e) => return Err(e).context("accept"),
            }
        }
    }

    /// Close a connection and drop its bookkeeping.
    fn teardown(&mut self, h: Handle) -> Result<()> {
        self.clients.remove(&h);
        self.sys.close(h).context("close client")?;
        debug!("closed connection {}", h.0);
        Ok(())
    }

    fn process(&mut self, ev: Readiness) -> Result<Status> {
        let Self {
            sys,
            handler,
            clients,
            scratch,
            limits,
            ..
        } = self;
        let h = ev.handle;
        let conn = match clients.get_mut(&h) {
            Some(conn) => conn,
            // Already torn down earlier in this batch.
            None => return Ok(Status::Open),
        };

        let mut status = Status::Open;

        if ev.readable || ev.closed {
            if read_available(sys, handler, h, conn, scratch, limits.max_request)?
                == Status::Closed
            {
                status = Status::Closed;
            }
            if dispatch_requests(handler, conn) == Status::Closed {
                status = Status::Closed;
            }
        }

        if status == Status::Closed {
            // Best effort: the peer may already be gone.
            if let Err(e) = flush(sys, h, conn) {
                debug!("dropping unsent reply for {}: {:#}", h.0, e);
            }
            return Ok(status);
        }
        flush(sys, h, conn)?;
        if conn.wbuf.len() > limits.max_output {
            warn!(
                "connection {} has {} unsent reply bytes, closing",
                h.0,
                conn.wbuf.len()
            );
            return Ok(Status::Closed);
        }

        let wanted = if conn.wbuf.is_empty() {
            Interest::Read
        } else {
            Interest::ReadWrite
        };
        if wanted != conn.interest {
            sys.reregister(h, wanted)
                .context("update client interest")?;
            conn.interest = wanted;
        }
        Ok(Status::Open)
    }
}

/// Read until the socket would block. `Closed` once the peer has hung up.
///
/// # Arguments
///
/// * `max_request` - once the read buffer grows past this many bytes, the
///   complete requests in it are executed; if what is left is still too
///   large, the client gets an error and the connection is closed.
fn read_available<S: Sys, H: Handler>(
    sys: &mut S,
    handler: &mut H,
    h: Handle,
    conn: &mut Connection,
    scratch: &mut [u8],
    max_request: usize,
) -> Result<Status> {
    loop {
        match sys.read(h, scratch) {
            Ok(0) => return Ok(Status::Closed),
            Ok(n) => {
                conn.rbuf.extend_from_slice(&scratch[..n]);
                if conn.rbuf.len() > max_request {
                    if dispatch_requests(handler, conn) == Status::Closed {
                        return Ok(Status::Closed);
                    }
                    if conn.rbuf.len() > max_request {
                        warn!(
                            "connection {} sent a request over {} bytes, closing",
                            h.0, max_request
                        );
                        conn.rbuf.clear();
                        conn.queue_reply(&resp_error(&format!(
                            "request exceeds {max_request} bytes"
                        )));
                        return Ok(Status::Closed);
                    }
                }
            }
            Err(ref e) if is_retryable(e) => return Ok(Status::Open),
            Err(e) => return Err(e).context("read"),
        }
    }
}

/// Execute every complete request in the read buffer, queueing replies.
fn dispatch_requests<H: Handler>(handler: &mut H, conn: &mut Connection) -> Status {
    while !conn.rbuf.is_empty() {
        let mut rr = RespReader::new(ByteCursor::new(&conn.rbuf[..]));
        match handler.handle(&mut rr) {
            Ok(reply) => {
                let consumed = rr.get_ref().position();
                conn.rbuf.advance(consumed);
                conn.queue_reply(&reply);
            }
            Err(e) if e.is_incomplete() => break,
            Err(e) => {
                warn!("protocol error, closing connection: {}", e);
                conn.rbuf.clear();
                conn.queue_reply(&resp_error(&e.to_string()));
                return Status::Closed;
            }
        }
    }
    Status::Open
}

/// Write as much of the pending replies as the socket accepts.
fn flush<S: Sys>(sys: &mut S, h: Handle, conn: &mut Connection) -> Result<()> {
    while !conn.wbuf.is_empty() {
        match sys.write(h, &conn.wbuf) {
            Ok(0) => {
                return Err(io::Error::from(io::ErrorKind::WriteZero)).context("write");
            }
            Ok(n) => conn.wbuf.advance(n),
            Err(ref e) if is_retryable(e) => break,
            Err(e) => return Err(e).context("write"),
        }
    }
    Ok(())
}
