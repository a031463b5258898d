use crate::{
    errors::ErrorKind,
    http::{
        request::{Parser, Request},
        response::Response,
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    router::Dispatch,
};
use std::{io, net::SocketAddr, sync::Arc, time::Instant};
use tokio::net::TcpStream;

/// Every limit a worker needs, cloned into each connection.
#[derive(Debug, Clone, Default)]
pub(crate) struct AllLimits {
    pub(crate) server: ServerLimits,
    pub(crate) conn: ConnLimits,
    pub(crate) req: ReqLimits,
    pub(crate) resp: RespLimits,
}

pub(crate) struct HttpConnection {
    dispatcher: Arc<dyn Dispatch>,

    connection: Connection,
    parser: Parser,
    request: Request,
    response: Response,

    pub(crate) limits: AllLimits,
}

impl HttpConnection {
    #[inline]
    pub(crate) fn new(dispatcher: Arc<dyn Dispatch>, limits: AllLimits) -> Self {
        Self {
            dispatcher,

            connection: Connection::new(),
            parser: Parser::new(&limits.req),
            request: Request::default(),
            response: Response::new(&limits.resp),

            limits,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.limits.resp);
    }
}

impl HttpConnection {
    /// Serves `stream` until it closes, expires or sends garbage.
    #[inline]
    pub(crate) async fn run(&mut self, stream: &mut TcpStream, addr: SocketAddr) -> io::Result<()> {
        match self.impl_run(stream, addr).await {
            Ok(()) => Ok(()),
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(err) => {
                tracing::debug!(client = %addr, error = ?err, "rejecting malformed request");

                let bytes = err.as_http(self.request.version(), self.limits.server.json_errors);
                writer::write_bytes(stream, bytes, &self.limits.conn).await
            }
        }
    }

    async fn impl_run(&mut self, stream: &mut TcpStream, addr: SocketAddr) -> Result<(), ErrorKind> {
        self.connection.reset();
        self.response.keep_alive = true;

        while !self.is_expired() {
            self.reset_request_response();

            let read = self
                .parser
                .fill_buffer(stream, &self.limits.req, self.limits.conn.socket_read_timeout)
                .await?;
            if read == 0 {
                break;
            }

            self.parser.parse(&self.limits.req, &mut self.request)?;
            self.request.client_addr = addr;
            self.response.version = self.request.version();
            self.response.keep_alive = self.request.is_keep_alive();

            self.dispatcher
                .serve_http(&mut self.request, &mut self.response);

            writer::write_bytes(stream, self.response.buffer(), &self.limits.conn).await?;

            if !self.response.keep_alive {
                break;
            }

            self.connection.request_count += 1;
        }

        Ok(())
    }

    #[inline(always)]
    fn is_expired(&self) -> bool {
        let limits = &self.limits.conn;

        !self.response.keep_alive
            || self.connection.request_count >= limits.max_requests_per_connection
            || self.connection.created.elapsed() > limits.connection_lifetime
    }
}

pub(crate) mod writer {
    use crate::limits::ConnLimits;
    use std::io;
    use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};

    #[inline(always)]
    pub(crate) async fn write_bytes(
        stream: &mut TcpStream,
        response: &[u8],
        limits: &ConnLimits,
    ) -> io::Result<()> {
        timeout(limits.socket_write_timeout, stream.write_all(response))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timeout"))?
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline(always)]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}
