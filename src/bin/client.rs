use std::io::{self, Write};
use std::net::ToSocketAddrs;
use std::process;

use sable::awaitable::{connect, read_some, read_until, write_all};
use sable::net::Reactor;
use sable::{sync_await, Lazy};

fn main() {
    pretty_env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (host, port) = match args.as_slice() {
        [host, port] => (host.clone(), port.clone()),
        _ => {
            eprintln!("usage: sable-client <host> <port>");
            process::exit(2);
        }
    };

    if let Err(err) = run(host, port) {
        eprintln!("request failed: {}", err);
        process::exit(1);
    }
}

/// Issue one GET / to the given host, printing the response headers and then
/// streaming the body to stdout until the server closes the connection.
fn run(host: String, port: String) -> io::Result<()> {
    let addr = format!("{}:{}", host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host did not resolve"))?;

    let reactor = Reactor::new().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    sync_await(Lazy::new(async move {
        let mut stream = connect(&reactor, addr)?.await?;
        log::debug!("connected to {}", addr);

        let request = format!(
            "GET / HTTP/1.1\r\nHost: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
            host
        );
        write_all(&mut stream, request.as_bytes()).await?;

        let mut response = Vec::new();
        let header_len = read_until(&mut stream, &mut response, b"\r\n\r\n").await?;

        let head = String::from_utf8_lossy(&response[..header_len]).into_owned();
        if !head.starts_with("HTTP/") {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid response"));
        }

        let mut stdout = io::stdout();
        stdout.write_all(head.as_bytes())?;
        // Whatever followed the header block in the same read is body.
        stdout.write_all(&response[header_len..])?;

        let mut buf = [0u8; 4096];
        loop {
            let n = read_some(&mut stream, &mut buf).await?;
            if n == 0 {
                break;
            }
            stdout.write_all(&buf[..n])?;
        }
        stdout.flush()?;

        stream.shutdown()?;
        Ok(())
    }))
}
