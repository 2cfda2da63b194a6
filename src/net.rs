//! The asynchronous I/O substrate: a mio-based reactor running on its own
//! thread, plus the socket types registered with it.
//!
//! The reactor owns no task logic. It records which direction each socket is
//! waiting on and wakes the registered waker when the corresponding event
//! arrives; where the awoken task resumes is decided entirely by the task
//! runtime.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{self as sys, Shutdown, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use mio::{Events, Token};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::{ReactorError, ReactorResult};

/// Handle to the event loop monitoring all registered sockets.
#[derive(Clone)]
pub struct Reactor {
    shared: Arc<Shared>,
}

/// Registry of monitored sources, shared with the event-loop thread.
struct Shared {
    /// The mio registry used to register I/O interests
    registry: mio::Registry,
    /// Counter for generating unique tokens for new registrations
    token: AtomicUsize,
    /// Map of active I/O sources indexed by their tokens
    sources: Mutex<HashMap<Token, Arc<Source>>>,
}

impl Reactor {
    /// Creates a reactor and spawns its event-loop thread.
    pub fn new() -> ReactorResult<Self> {
        let poll = mio::Poll::new().map_err(ReactorError::Init)?;
        let shared = Arc::new(Shared {
            token: AtomicUsize::new(0),
            registry: poll.registry().try_clone().map_err(ReactorError::Init)?,
            sources: Mutex::new(HashMap::with_capacity(64)),
        });

        std::thread::Builder::new()
            .name("sable-reactor".to_owned())
            .spawn({
                let shared = shared.clone();
                move || shared.run(poll)
            })
            .map_err(ReactorError::Init)?;

        Ok(Reactor { shared })
    }

    /// Registers an already-connected TCP stream for async I/O.
    pub fn register(&self, sys: sys::TcpStream) -> ReactorResult<TcpStream> {
        sys.set_nonblocking(true)
            .map_err(ReactorError::Registration)?;
        self.register_mio(mio::net::TcpStream::from_std(sys))
    }

    /// Begins a non-blocking connect to `addr`. The returned stream is not
    /// yet connected; await [`crate::awaitable::connect`] (or poll
    /// [`TcpStream::poll_connected`]) before using it.
    pub fn connect(&self, addr: SocketAddr) -> ReactorResult<TcpStream> {
        let sys = mio::net::TcpStream::connect(addr)?;
        self.register_mio(sys)
    }

    /// Registers a listening socket for async accepts.
    pub fn listen(&self, sys: sys::TcpListener) -> ReactorResult<TcpListener> {
        sys.set_nonblocking(true)
            .map_err(ReactorError::Registration)?;
        let mut sys = mio::net::TcpListener::from_std(sys);
        let source = self.attach(&mut sys, mio::Interest::READABLE)?;

        Ok(TcpListener {
            sys,
            source,
            reactor: self.clone(),
        })
    }

    fn register_mio(&self, mut sys: mio::net::TcpStream) -> ReactorResult<TcpStream> {
        let source = self.attach(
            &mut sys,
            mio::Interest::READABLE | mio::Interest::WRITABLE,
        )?;

        Ok(TcpStream {
            sys,
            source,
            reactor: self.clone(),
        })
    }

    /// Allocates a token, registers `sys` for `interest`, and records the
    /// source so the event loop can find its wakers.
    fn attach<S>(&self, sys: &mut S, interest: mio::Interest) -> ReactorResult<Arc<Source>>
    where
        S: mio::event::Source,
    {
        let token = Token(self.shared.token.fetch_add(1, Ordering::Relaxed));

        self.shared
            .registry
            .register(sys, token, interest)
            .map_err(ReactorError::Registration)?;

        let source = Arc::new(Source {
            token,
            interest: Default::default(),
            triggered: Default::default(),
        });

        {
            let mut sources = self
                .shared
                .sources
                .lock()
                .map_err(|_| ReactorError::LockPoisoned)?;
            sources.insert(token, source.clone());
        }

        Ok(source)
    }

    fn detach<S>(&self, sys: &mut S, source: &Source)
    where
        S: mio::event::Source,
    {
        if let Ok(mut sources) = self.shared.sources.lock() {
            let _ = sources.remove(&source.token);
        }
        let _ = self.shared.registry.deregister(sys);
    }

    /// Readiness check for one direction of a source. Registers the task's
    /// waker when the operation is not ready, double-checking the triggered
    /// flag afterwards so an event racing the registration is not lost.
    fn poll_ready(
        &self,
        source: &Source,
        direction: usize,
        cx: &Context<'_>,
    ) -> Poll<io::Result<()>> {
        if source.triggered[direction].load(Ordering::Acquire) {
            return Poll::Ready(Ok(()));
        }

        {
            let mut interest = source.interest.lock().unwrap();

            match &mut interest[direction] {
                Some(existing) if existing.will_wake(cx.waker()) => {}
                _ => {
                    interest[direction] = Some(cx.waker().clone());
                }
            }
        }

        // check if anything changed while we were registering
        // our waker
        if source.triggered[direction].load(Ordering::Acquire) {
            return Poll::Ready(Ok(()));
        }

        Poll::Pending
    }

    fn clear_trigger(&self, source: &Source, direction: usize) {
        source.triggered[direction].store(false, Ordering::Release);
    }
}

impl Shared {
    fn run(&self, mut poll: mio::Poll) -> ReactorResult<()> {
        let mut events = Events::with_capacity(64);
        let mut wakers = Vec::new();

        loop {
            if let Err(err) = self.poll(&mut poll, &mut events, &mut wakers) {
                log::warn!("failed to poll reactor: {}", err);
            }

            events.clear();
        }
    }

    fn poll(
        &self,
        poll: &mut mio::Poll,
        events: &mut Events,
        wakers: &mut Vec<Waker>,
    ) -> ReactorResult<()> {
        if let Err(err) = poll.poll(events, None) {
            if err.kind() != io::ErrorKind::Interrupted {
                log::error!("reactor polling error: {}", err);
                return Err(ReactorError::Polling(err));
            }
            return Ok(());
        }

        for event in events.iter() {
            let source = {
                let sources = self
                    .sources
                    .lock()
                    .map_err(|_| ReactorError::LockPoisoned)?;
                match sources.get(&event.token()) {
                    Some(source) => source.clone(),
                    None => continue,
                }
            };

            let mut interest = source
                .interest
                .lock()
                .map_err(|_| ReactorError::LockPoisoned)?;

            if event.is_readable() {
                if let Some(waker) = interest[direction::READ].take() {
                    wakers.push(waker);
                }

                source.triggered[direction::READ].store(true, Ordering::Release);
            }

            if event.is_writable() {
                if let Some(waker) = interest[direction::WRITE].take() {
                    wakers.push(waker);
                }

                source.triggered[direction::WRITE].store(true, Ordering::Release);
            }
        }

        for waker in wakers.drain(..) {
            waker.wake();
        }

        Ok(())
    }
}

mod direction {
    pub const READ: usize = 0;
    pub const WRITE: usize = 1;
}

/// One registered socket's wait state: at most one waker per direction, and
/// a triggered flag recording events that arrived with no waker in place.
struct Source {
    /// Wakers for read/write operations
    interest: Mutex<[Option<Waker>; 2]>,
    /// Flags indicating if read/write operations are ready
    triggered: [AtomicBool; 2],
    /// Unique identifier for this source
    token: Token,
}

/// An asynchronous TCP stream registered with the reactor.
pub struct TcpStream {
    /// The underlying mio TCP stream
    sys: mio::net::TcpStream,
    /// Reference to the reactor managing this stream
    reactor: Reactor,
    /// The I/O source associated with this stream
    source: Arc<Source>,
}

impl TcpStream {
    /// Runs a non-blocking I/O operation once the direction is ready,
    /// re-arming the waker whenever the operation reports `WouldBlock`.
    fn poll_io<T>(
        &self,
        direction: usize,
        mut f: impl FnMut() -> io::Result<T>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<T>> {
        loop {
            if self
                .reactor
                .poll_ready(&self.source, direction, cx)?
                .is_pending()
            {
                return Poll::Pending;
            }

            match f() {
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    // Consumed a stale readiness edge; clear it and loop so
                    // the waker is re-registered before suspending.
                    self.reactor.clear_trigger(&self.source, direction);
                }
                val => return Poll::Ready(val),
            }
        }
    }

    /// Completion check for a stream produced by [`Reactor::connect`].
    /// Readiness is signalled through writability; a failed attempt surfaces
    /// through the socket's error slot.
    pub fn poll_connected(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        loop {
            if self
                .reactor
                .poll_ready(&self.source, direction::WRITE, cx)?
                .is_pending()
            {
                return Poll::Pending;
            }

            if let Some(err) = self.sys.take_error()? {
                return Poll::Ready(Err(err));
            }

            match self.sys.peer_addr() {
                Ok(_) => return Poll::Ready(Ok(())),
                Err(err) if err.kind() == io::ErrorKind::NotConnected => {
                    self.reactor.clear_trigger(&self.source, direction::WRITE);
                }
                Err(err) => return Poll::Ready(Err(err)),
            }
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.sys.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.sys.peer_addr()
    }

    /// Shuts down both halves of the connection.
    pub fn shutdown(&self) -> io::Result<()> {
        self.sys.shutdown(Shutdown::Both)
    }
}

impl AsyncRead for TcpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let unfilled = buf.initialize_unfilled();

        match self.poll_io(direction::READ, || (&self.sys).read(unfilled), cx) {
            Poll::Ready(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for TcpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.poll_io(direction::WRITE, || (&self.sys).write(buf), cx)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_io(direction::WRITE, || (&self.sys).flush(), cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.sys.shutdown(Shutdown::Write))
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        let reactor = self.reactor.clone();
        let source = self.source.clone();
        reactor.detach(&mut self.sys, &source);
    }
}

/// An asynchronous TCP listener registered with the reactor.
pub struct TcpListener {
    sys: mio::net::TcpListener,
    reactor: Reactor,
    source: Arc<Source>,
}

impl TcpListener {
    /// Accepts one connection, registering the accepted stream with the same
    /// reactor.
    pub fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<TcpStream>> {
        loop {
            if self
                .reactor
                .poll_ready(&self.source, direction::READ, cx)?
                .is_pending()
            {
                return Poll::Pending;
            }

            match self.sys.accept() {
                Ok((stream, _)) => {
                    let registered = self
                        .reactor
                        .register_mio(stream)
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
                    return Poll::Ready(registered);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.reactor.clear_trigger(&self.source, direction::READ);
                }
                Err(err) => return Poll::Ready(Err(err)),
            }
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.sys.local_addr()
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        let reactor = self.reactor.clone();
        let source = self.source.clone();
        reactor.detach(&mut self.sys, &source);
    }
}
