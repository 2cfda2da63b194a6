//! Awaitable adapters over the I/O substrate.
//!
//! Each adapter wraps one asynchronous I/O verb — accept, connect, read
//! variants, write — as a future the task runtime can suspend on. The
//! adapters are generic over any stream implementing the tokio I/O traits,
//! so they work with [`crate::net::TcpStream`] and with in-memory test
//! streams alike.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::net::{Reactor, TcpListener, TcpStream};

/// Accept one connection from `listener`.
pub fn accept(listener: &TcpListener) -> Accept<'_> {
    Accept { listener }
}

pub struct Accept<'a> {
    listener: &'a TcpListener,
}

impl Future for Accept<'_> {
    type Output = io::Result<TcpStream>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.listener.poll_accept(cx)
    }
}

/// Open a connection to `addr` through `reactor`. The returned future
/// resolves once the connection is established.
pub fn connect(reactor: &Reactor, addr: SocketAddr) -> io::Result<Connect> {
    let stream = reactor
        .connect(addr)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(Connect {
        stream: Some(stream),
    })
}

pub struct Connect {
    stream: Option<TcpStream>,
}

impl Future for Connect {
    type Output = io::Result<TcpStream>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let stream = this
            .stream
            .as_ref()
            .expect("Connect polled after completion");
        match stream.poll_connected(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(this.stream.take().unwrap())),
            Poll::Ready(Err(err)) => {
                this.stream = None;
                Poll::Ready(Err(err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Read whatever bytes are available into `buf`, returning the count. A
/// return of zero means the peer closed the connection.
pub fn read_some<'a, S>(stream: &'a mut S, buf: &'a mut [u8]) -> ReadSome<'a, S>
where
    S: AsyncRead + Unpin + ?Sized,
{
    ReadSome { stream, buf }
}

pub struct ReadSome<'a, S: ?Sized> {
    stream: &'a mut S,
    buf: &'a mut [u8],
}

impl<S> Future for ReadSome<'_, S>
where
    S: AsyncRead + Unpin + ?Sized,
{
    type Output = io::Result<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut read_buf = ReadBuf::new(this.buf);
        match Pin::new(&mut *this.stream).poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(read_buf.filled().len())),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Read exactly `buf.len()` bytes. EOF before the buffer fills is an
/// `UnexpectedEof` error.
pub fn read_exact<'a, S>(stream: &'a mut S, buf: &'a mut [u8]) -> ReadExact<'a, S>
where
    S: AsyncRead + Unpin + ?Sized,
{
    ReadExact {
        stream,
        buf,
        filled: 0,
    }
}

pub struct ReadExact<'a, S: ?Sized> {
    stream: &'a mut S,
    buf: &'a mut [u8],
    filled: usize,
}

impl<S> Future for ReadExact<'_, S>
where
    S: AsyncRead + Unpin + ?Sized,
{
    type Output = io::Result<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            if this.filled == this.buf.len() {
                return Poll::Ready(Ok(this.filled));
            }

            let mut read_buf = ReadBuf::new(&mut this.buf[this.filled..]);
            match Pin::new(&mut *this.stream).poll_read(cx, &mut read_buf) {
                Poll::Ready(Ok(())) => {
                    let n = read_buf.filled().len();
                    if n == 0 {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed before the requested byte count",
                        )));
                    }
                    this.filled += n;
                }
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Read into `buf` until it contains `delim`, returning the length of the
/// prefix up to and including the delimiter. Bytes past the delimiter may
/// also have been read and are left in `buf`.
pub fn read_until<'a, S>(
    stream: &'a mut S,
    buf: &'a mut Vec<u8>,
    delim: &'a [u8],
) -> ReadUntil<'a, S>
where
    S: AsyncRead + Unpin + ?Sized,
{
    ReadUntil {
        stream,
        buf,
        delim,
        searched: 0,
    }
}

pub struct ReadUntil<'a, S: ?Sized> {
    stream: &'a mut S,
    buf: &'a mut Vec<u8>,
    delim: &'a [u8],
    searched: usize,
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .skip(from)
        .find(|(_, window)| *window == needle)
        .map(|(index, _)| index)
}

impl<S> Future for ReadUntil<'_, S>
where
    S: AsyncRead + Unpin + ?Sized,
{
    type Output = io::Result<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            if let Some(index) = find_from(this.buf, this.delim, this.searched) {
                return Poll::Ready(Ok(index + this.delim.len()));
            }
            // Resume the next search just far enough back to catch a
            // delimiter split across reads.
            this.searched = this
                .buf
                .len()
                .saturating_sub(this.delim.len().saturating_sub(1));

            let mut chunk = [0u8; 4096];
            let mut read_buf = ReadBuf::new(&mut chunk);
            match Pin::new(&mut *this.stream).poll_read(cx, &mut read_buf) {
                Poll::Ready(Ok(())) => {
                    let filled = read_buf.filled();
                    if filled.is_empty() {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed before the delimiter",
                        )));
                    }
                    this.buf.extend_from_slice(filled);
                }
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Write all of `buf`, then flush. Returns the byte count written.
pub fn write_all<'a, S>(stream: &'a mut S, buf: &'a [u8]) -> WriteAll<'a, S>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    WriteAll {
        stream,
        buf,
        written: 0,
    }
}

pub struct WriteAll<'a, S: ?Sized> {
    stream: &'a mut S,
    buf: &'a [u8],
    written: usize,
}

impl<S> Future for WriteAll<'_, S>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    type Output = io::Result<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            if this.written == this.buf.len() {
                return match Pin::new(&mut *this.stream).poll_flush(cx) {
                    Poll::Ready(Ok(())) => Poll::Ready(Ok(this.written)),
                    Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
                    Poll::Pending => Poll::Pending,
                };
            }

            match Pin::new(&mut *this.stream).poll_write(cx, &this.buf[this.written..]) {
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "stream accepted no bytes",
                    )));
                }
                Poll::Ready(Ok(n)) => this.written += n,
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
