use crate::{
    errors::{ErrorKind, Result},
    limits::WaitStrategy,
    router::Dispatch,
    server::connection::{writer, AllLimits, HttpConnection},
    Version,
};
use crossbeam::queue::SegQueue;
use socket2::{Domain, Protocol, Socket, Type};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    task::{yield_now, JoinHandle},
    time::sleep as tokio_sleep,
};

/// Opens a listening socket with `SO_REUSEADDR` set.
///
/// Must be called from within a Tokio runtime.
///
/// ```no_run
/// # #[tokio::main]
/// # async fn main() -> garden_web::Result<()> {
/// let listener = garden_web::bind("0.0.0.0:8080".parse().unwrap(), 1024)?;
/// # Ok(())
/// # }
/// ```
pub fn bind(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(TcpListener::from_std(socket.into())?)
}

/// Accept loop feeding a fixed set of worker tasks.
///
/// Dropping the server stops its workers.
pub(crate) struct Server {
    listener: TcpListener,
    stream_queue: TcpQueue,
    error_queue: TcpQueue,
    limits: AllLimits,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    pub(crate) fn new(listener: TcpListener, dispatcher: Arc<dyn Dispatch>, limits: AllLimits) -> Self {
        let stream_queue = Arc::new(SegQueue::new());
        let error_queue = Arc::new(SegQueue::new());
        let mut tasks = Vec::with_capacity(limits.server.max_connections + 1);

        for _ in 0..limits.server.max_connections {
            tasks.push(Self::spawn_worker(&stream_queue, &dispatcher, &limits));
        }
        if limits.server.count_503_handlers != 0 {
            for _ in 0..limits.server.count_503_handlers {
                tasks.push(Self::spawn_alarmist(&error_queue, &limits));
            }
        } else {
            tasks.push(Self::spawn_quiet_alarmist(&error_queue, &limits));
        }

        Server {
            listener,
            stream_queue,
            error_queue,
            limits,
            tasks,
        }
    }

    #[inline]
    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever.
    pub(crate) async fn launch(&self) {
        loop {
            let value = match self.listener.accept().await {
                Ok(value) => value,
                Err(err) => {
                    tracing::error!(error = %err, "accept failed");
                    continue;
                }
            };

            match self.stream_queue.len() < self.limits.server.max_pending_connections {
                true => self.stream_queue.push(value),
                false => {
                    tracing::warn!(client = %value.1, "connection queue full");
                    self.error_queue.push(value)
                }
            }
        }
    }

    #[inline]
    async fn get_stream(queue: &TcpQueue, wait: &WaitStrategy) -> (TcpStream, SocketAddr) {
        loop {
            if let Some(value) = queue.pop() {
                return value;
            }

            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }

    fn spawn_worker(
        queue: &TcpQueue,
        dispatcher: &Arc<dyn Dispatch>,
        limits: &AllLimits,
    ) -> JoinHandle<()> {
        let queue = queue.clone();
        let mut conn = HttpConnection::new(dispatcher.clone(), limits.clone());

        tokio::spawn(async move {
            loop {
                let (mut stream, addr) =
                    Server::get_stream(&queue, &conn.limits.server.wait_strategy).await;

                if let Err(err) = conn.run(&mut stream, addr).await {
                    match err.kind() {
                        io::ErrorKind::TimedOut
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::BrokenPipe
                        | io::ErrorKind::UnexpectedEof => {
                            tracing::debug!(client = %addr, error = %err, "connection dropped")
                        }
                        _ => tracing::error!(client = %addr, error = %err, "connection failed"),
                    }
                }
            }
        })
    }

    fn spawn_alarmist(queue: &TcpQueue, limits: &AllLimits) -> JoinHandle<()> {
        let queue = queue.clone();
        let limits = limits.clone();

        tokio::spawn(async move {
            let response = ErrorKind::ServiceUnavailable.as_http(Version::Http11, limits.server.json_errors);

            loop {
                let (mut stream, _) = Server::get_stream(&queue, &limits.server.wait_strategy).await;

                let _ = writer::write_bytes(&mut stream, response, &limits.conn).await;
            }
        })
    }

    fn spawn_quiet_alarmist(queue: &TcpQueue, limits: &AllLimits) -> JoinHandle<()> {
        let queue = queue.clone();
        let wait = limits.server.wait_strategy.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = Server::get_stream(&queue, &wait).await;

                drop(stream);
            }
        })
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
