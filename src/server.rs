//! The accept loop: turns a bound listener into a lazy task that wraps each
//! accepted socket in a [`Connection`] and hands it to the executor pool.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;

use crate::awaitable::accept;
use crate::connection::Connection;
use crate::error::ReactorResult;
use crate::executor::ExecutorPool;
use crate::lazy::Lazy;
use crate::net::{Reactor, TcpListener};
use crate::outcome::describe_failure;

pub struct Server {
    listener: TcpListener,
    executors: Arc<ExecutorPool>,
    doc_root: PathBuf,
}

impl Server {
    /// Bind a listener on `addr` and prepare to serve files from `doc_root`,
    /// assigning each accepted connection the next executor from the pool.
    pub fn bind<A: ToSocketAddrs>(
        reactor: &Reactor,
        addr: A,
        executors: Arc<ExecutorPool>,
        doc_root: PathBuf,
    ) -> ReactorResult<Server> {
        let listener = std::net::TcpListener::bind(addr)?;
        let listener = reactor.listen(listener)?;
        Ok(Server {
            listener,
            executors,
            doc_root,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The accept loop as a lazy task. It never completes on its own; accept
    /// failures are logged and skipped.
    pub fn into_task(self) -> Lazy<()> {
        Lazy::new(self.accept_loop())
    }

    /// Drive the accept loop, blocking the calling thread. Since the loop is
    /// infinite this only returns if the task fails.
    pub fn run(self) {
        crate::bridge::sync_await(self.into_task());
    }

    async fn accept_loop(self) {
        if let Ok(addr) = self.listener.local_addr() {
            log::info!("listening on {}", addr);
        }
        loop {
            match accept(&self.listener).await {
                Ok(stream) => {
                    if let Ok(peer) = stream.peer_addr() {
                        log::debug!("accepted connection from {}", peer);
                    }
                    let connection = Connection::new(stream, self.doc_root.clone());
                    Lazy::new(connection.run())
                        .via(self.executors.get())
                        .detach(|failure| {
                            log::error!("connection task failed: {}", describe_failure(&failure));
                        });
                }
                Err(err) => {
                    log::error!("accept failed: {}", err);
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_reports_local_addr() {
        let reactor = Reactor::new().unwrap();
        let executors = Arc::new(ExecutorPool::new(1, Some(1), None));
        let server = Server::bind(&reactor, "127.0.0.1:0", executors, PathBuf::from("."))
            .unwrap();

        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        // Converting to a task must not start accepting by itself.
        let task = server.into_task();
        assert!(!task.is_ready());
    }
}
