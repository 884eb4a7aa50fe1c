/*!
 * Syscall Capability
 *
 * The narrow socket and multiplexer surface the event loop drives. Sockets
 * are named by opaque `Handle`s so the loop's accept/read/write/teardown
 * logic runs unchanged against `MioSys` (real sockets, `mio::Poll`) or a
 * simulated implementation in tests.
 */

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Poll, Token};
use slab::Slab;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

/// Opaque socket handle, stable for the lifetime of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub usize);

/// Readiness a handle is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    ReadWrite,
}

impl Interest {
    fn to_mio(self) -> mio::Interest {
        match self {
            Interest::Read => mio::Interest::READABLE,
            Interest::ReadWrite => mio::Interest::READABLE | mio::Interest::WRITABLE,
        }
    }
}

/// One readiness notification returned by `Sys::wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub handle: Handle,
    pub readable: bool,
    pub writable: bool,
    /// Peer hung up or the socket reported an error.
    pub closed: bool,
}

impl Readiness {
    pub fn readable(handle: Handle) -> Self {
        Self {
            handle,
            readable: true,
            writable: false,
            closed: false,
        }
    }

    pub fn writable(handle: Handle) -> Self {
        Self {
            handle,
            readable: false,
            writable: true,
            closed: false,
        }
    }
}

/// Socket and readiness primitives used by the event loop.
///
/// Every operation reports failure as `io::Error`; `is_retryable` separates
/// "try again later" from hard failures.
pub trait Sys {
    /// Create a TCP socket for the address family of `addr`.
    fn socket(&mut self, addr: &SocketAddr) -> io::Result<Handle>;
    fn bind(&mut self, h: Handle, addr: &SocketAddr) -> io::Result<()>;
    fn listen(&mut self, h: Handle, backlog: i32) -> io::Result<()>;
    fn set_nonblocking(&mut self, h: Handle) -> io::Result<()>;
    fn local_addr(&self, h: Handle) -> io::Result<SocketAddr>;
    /// Accept one pending connection; `WouldBlock` when none is pending.
    fn accept(&mut self, h: Handle) -> io::Result<Handle>;
    fn read(&mut self, h: Handle, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, h: Handle, buf: &[u8]) -> io::Result<usize>;
    /// Deregister and close `h`. The handle may be reused afterwards.
    fn close(&mut self, h: Handle) -> io::Result<()>;
    fn create_multiplexer(&mut self) -> io::Result<()>;
    fn register(&mut self, h: Handle, interest: Interest) -> io::Result<()>;
    fn reregister(&mut self, h: Handle, interest: Interest) -> io::Result<()>;
    /// Block until at least one registered handle is ready or `timeout`
    /// elapses, replacing the contents of `ready` with at most `max_events`
    /// notifications.
    fn wait(
        &mut self,
        ready: &mut Vec<Readiness>,
        max_events: usize,
        timeout: Option<Duration>,
    ) -> io::Result<()>;
}

/// Check if an I/O error only means "try again later"
#[inline]
pub fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[derive(Debug)]
enum Sock {
    /// Created but not yet handed to the multiplexer.
    Raw(Socket),
    Listener(TcpListener),
    Stream(TcpStream),
    /// Transient placeholder while a raw socket is being converted.
    Detached,
}

/// `Sys` backed by real sockets and `mio::Poll`.
///
/// Handles index a slab of sockets and double as mio tokens.
pub struct MioSys {
    poll: Option<Poll>,
    events: Events,
    sockets: Slab<Sock>,
}

impl Default for MioSys {
    fn default() -> Self {
        Self::new()
    }
}

impl MioSys {
    pub fn new() -> Self {
        Self {
            poll: None,
            events: Events::with_capacity(128),
            sockets: Slab::with_capacity(1024),
        }
    }

    fn slot(&mut self, h: Handle) -> io::Result<&mut Sock> {
        self.sockets.get_mut(h.0).ok_or_else(|| unknown_handle(h))
    }

    fn stream(&mut self, h: Handle) -> io::Result<&mut TcpStream> {
        match self.slot(h)? {
            Sock::Stream(s) => Ok(s),
            _ => Err(wrong_kind(h, "stream")),
        }
    }

    fn raw(&mut self, h: Handle) -> io::Result<&mut Socket> {
        match self.slot(h)? {
            Sock::Raw(s) => Ok(s),
            _ => Err(wrong_kind(h, "unregistered socket")),
        }
    }

    fn poll(&self) -> io::Result<&Poll> {
        self.poll
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "multiplexer not created"))
    }

    fn apply(&mut self, h: Handle, interest: Interest, first: bool) -> io::Result<()> {
        let poll = self
            .poll
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "multiplexer not created"))?;
        let slot = self
            .sockets
            .get_mut(h.0)
            .ok_or_else(|| unknown_handle(h))?;

        // A listening socket becomes a mio listener on first registration.
        if let Sock::Raw(_) = slot {
            if let Sock::Raw(raw) = std::mem::replace(slot, Sock::Detached) {
                *slot = Sock::Listener(TcpListener::from_std(raw.into()));
            }
        }

        let registry = poll.registry();
        let token = Token(h.0);
        let interest = interest.to_mio();
        match slot {
            Sock::Listener(l) if first => registry.register(l, token, interest),
            Sock::Listener(l) => registry.reregister(l, token, interest),
            Sock::Stream(s) if first => registry.register(s, token, interest),
            Sock::Stream(s) => registry.reregister(s, token, interest),
            Sock::Raw(_) | Sock::Detached => Err(wrong_kind(h, "registrable socket")),
        }
    }
}

impl Sys for MioSys {
    fn socket(&mut self, addr: &SocketAddr) -> io::Result<Handle> {
        let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;

        #[cfg(unix)]
        socket.set_reuse_address(true)?;

        Ok(Handle(self.sockets.insert(Sock::Raw(socket))))
    }

    fn bind(&mut self, h: Handle, addr: &SocketAddr) -> io::Result<()> {
        self.raw(h)?.bind(&(*addr).into())
    }

    fn listen(&mut self, h: Handle, backlog: i32) -> io::Result<()> {
        self.raw(h)?.listen(backlog)
    }

    fn set_nonblocking(&mut self, h: Handle) -> io::Result<()> {
        match self.slot(h)? {
            Sock::Raw(s) => s.set_nonblocking(true),
            // mio sockets are always non-blocking
            Sock::Listener(_) | Sock::Stream(_) => Ok(()),
            Sock::Detached => Err(wrong_kind(h, "socket")),
        }
    }

    fn local_addr(&self, h: Handle) -> io::Result<SocketAddr> {
        match self.sockets.get(h.0).ok_or_else(|| unknown_handle(h))? {
            Sock::Raw(s) => s.local_addr()?.as_socket().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "not an inet socket")
            }),
            Sock::Listener(l) => l.local_addr(),
            Sock::Stream(s) => s.local_addr(),
            Sock::Detached => Err(wrong_kind(h, "socket")),
        }
    }

    fn accept(&mut self, h: Handle) -> io::Result<Handle> {
        let (stream, _peer) = match self.slot(h)? {
            Sock::Listener(l) => l.accept()?,
            _ => return Err(wrong_kind(h, "listener")),
        };
        stream.set_nodelay(true).ok();
        Ok(Handle(self.sockets.insert(Sock::Stream(stream))))
    }

    fn read(&mut self, h: Handle, buf: &mut [u8]) -> io::Result<usize> {
        self.stream(h)?.read(buf)
    }

    fn write(&mut self, h: Handle, buf: &[u8]) -> io::Result<usize> {
        self.stream(h)?.write(buf)
    }

    fn close(&mut self, h: Handle) -> io::Result<()> {
        if !self.sockets.contains(h.0) {
            return Err(unknown_handle(h));
        }
        let mut sock = self.sockets.remove(h.0);
        if let Some(poll) = &self.poll {
            let res = match &mut sock {
                Sock::Listener(l) => poll.registry().deregister(l),
                Sock::Stream(s) => poll.registry().deregister(s),
                Sock::Raw(_) | Sock::Detached => Ok(()),
            };
            // Never registered is fine; the socket closes on drop either way.
            if let Err(e) = res {
                if e.kind() != io::ErrorKind::NotFound {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn create_multiplexer(&mut self) -> io::Result<()> {
        self.poll = Some(Poll::new()?);
        Ok(())
    }

    fn register(&mut self, h: Handle, interest: Interest) -> io::Result<()> {
        self.apply(h, interest, true)
    }

    fn reregister(&mut self, h: Handle, interest: Interest) -> io::Result<()> {
        self.apply(h, interest, false)
    }

    fn wait(
        &mut self,
        ready: &mut Vec<Readiness>,
        max_events: usize,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        if self.events.capacity() != max_events {
            self.events = Events::with_capacity(max_events.max(1));
        }
        let poll = self
            .poll
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "multiplexer not created"))?;
        poll.poll(&mut self.events, timeout)?;

        ready.clear();
        ready.extend(self.events.iter().take(max_events).map(|ev| Readiness {
            handle: Handle(ev.token().0),
            readable: ev.is_readable(),
            writable: ev.is_writable(),
            closed: ev.is_read_closed() || ev.is_error(),
        }));
        Ok(())
    }
}

impl MioSys {
    /// Whether the multiplexer has been created.
    pub fn has_multiplexer(&self) -> bool {
        self.poll().is_ok()
    }
}

fn unknown_handle(h: Handle) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("unknown handle {}", h.0))
}

fn wrong_kind(h: Handle, expected: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("handle {} is not a {expected}", h.0),
    )
}
