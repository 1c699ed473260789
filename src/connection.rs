//! Asynchronous PostgreSQL connection.
//!
//! [`Connection`] is a cheap-to-clone handle; the actual socket and
//! [`Engine`] live in a background driver task. Every handle method turns
//! into a request on the driver's channel, so submissions from any task are
//! serialized in arrival order, and all state transitions, queue mutations
//! and waiter completions happen on the driver task alone.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};

use crate::engine::{Command, Engine, Waiter};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::backend::BackendKeyData;
use crate::protocol::frontend;
use crate::result::ResultGroup;
use crate::state::TxHandle;
use crate::statement::Statement;

/// Transport under a connection.
enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    async fn connect(opts: &Opts) -> Result<Self> {
        if let Some(path) = opts.socket_path() {
            #[cfg(unix)]
            {
                return Ok(Stream::Unix(UnixStream::connect(path).await?));
            }
            #[cfg(not(unix))]
            {
                let _ = path;
                return Err(Error::Unsupported(
                    "Unix sockets are not available on this platform".into(),
                ));
            }
        }
        if opts.host.is_empty() {
            return Err(Error::InvalidUsage("host is empty".into()));
        }
        let tcp = TcpStream::connect((opts.host.as_str(), opts.port)).await?;
        tcp.set_nodelay(true)?;
        Ok(Stream::Tcp(tcp))
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf).await,
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.write_all(buf).await,
            #[cfg(unix)]
            Stream::Unix(s) => s.write_all(buf).await,
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush().await,
            #[cfg(unix)]
            Stream::Unix(s) => s.flush().await,
        }
    }
}

/// A request from a connection handle to the driver task.
enum Request {
    Submit {
        command: Command,
        tx: Option<TxHandle>,
        waiter: Waiter,
    },
    Begin {
        reply: oneshot::Sender<TxHandle>,
        waiter: Waiter,
    },
    Commit {
        handle: TxHandle,
        waiter: Waiter,
    },
    Rollback {
        handle: TxHandle,
        waiter: Waiter,
    },
    Terminate {
        done: oneshot::Sender<()>,
    },
}

struct Shared {
    statement_ids: AtomicU64,
    backend_key: Option<BackendKeyData>,
    server_params: HashMap<String, String>,
}

/// Handle to an asynchronous PostgreSQL connection.
#[derive(Clone)]
pub struct Connection {
    requests: mpsc::UnboundedSender<Request>,
    shared: Arc<Shared>,
}

impl Connection {
    /// Connect to a PostgreSQL server and complete the startup handshake.
    pub async fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        let mut stream = Stream::connect(&opts).await?;
        let (mut engine, mut ready) = Engine::new(&opts);

        // Drive the handshake inline; the driver task takes over once the
        // server reports ReadyForQuery.
        let mut buf = vec![0u8; 8192];
        loop {
            if engine.has_outbound() {
                let out = engine.take_outbound();
                stream.write_all(&out).await?;
                stream.flush().await?;
            }
            match ready.try_recv() {
                Ok(result) => {
                    result?;
                    break;
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => return Err(Error::ConnectionBroken),
            }
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::Protocol(
                    "server closed the connection during startup".into(),
                ));
            }
            engine.receive(&buf[..n])?;
        }

        let shared = Arc::new(Shared {
            statement_ids: AtomicU64::new(0),
            backend_key: engine.backend_key(),
            server_params: engine.server_params().clone(),
        });

        let (requests, request_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(stream, engine, request_rx));

        Ok(Self { requests, shared })
    }

    /// Run a Simple Query.
    ///
    /// The SQL may contain multiple semicolon-separated statements; the
    /// returned group holds one result per statement, in order.
    pub async fn execute(&self, sql: &str) -> Result<ResultGroup> {
        self.run(
            Command::Query {
                sql: sql.to_string(),
            },
            None,
        )
        .await
    }

    /// Prepare a statement for repeated execution.
    pub async fn prepare(&self, sql: &str) -> Result<Statement> {
        Statement::prepare(self, sql, &[], None).await
    }

    /// Prepare a statement with explicit parameter type OIDs.
    pub async fn prepare_typed(
        &self,
        sql: &str,
        param_oids: &[crate::protocol::types::Oid],
    ) -> Result<Statement> {
        Statement::prepare(self, sql, param_oids, None).await
    }

    /// Run `block` inside a BEGIN/COMMIT bracket.
    ///
    /// The block receives a [`Transaction`] whose submissions run inside the
    /// bracket; submissions without it are deferred until the transaction
    /// ends. If the block succeeds, COMMIT is issued and awaited before its
    /// value is returned; if it fails, ROLLBACK is issued and the block's
    /// error is returned unchanged.
    pub async fn transaction<F, Fut, T>(&self, block: F) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (reply, reply_rx) = oneshot::channel();
        let (waiter, begun) = oneshot::channel();
        self.requests
            .send(Request::Begin { reply, waiter })
            .map_err(|_| Error::ConnectionBroken)?;
        let handle = reply_rx.await.map_err(|_| Error::ConnectionBroken)?;
        begun.await.map_err(|_| Error::ConnectionBroken)??;

        let tx = Transaction {
            conn: self.clone(),
            handle,
        };
        match block(tx).await {
            Ok(value) => {
                let (waiter, committed) = oneshot::channel();
                self.requests
                    .send(Request::Commit { handle, waiter })
                    .map_err(|_| Error::ConnectionBroken)?;
                committed.await.map_err(|_| Error::ConnectionBroken)??;
                Ok(value)
            }
            Err(error) => {
                let (waiter, rolled_back) = oneshot::channel();
                if self
                    .requests
                    .send(Request::Rollback { handle, waiter })
                    .is_ok()
                {
                    // Roll back best-effort; the block's own error is what
                    // the caller needs to see.
                    let _ = rolled_back.await;
                }
                Err(error)
            }
        }
    }

    /// Send Terminate and shut the connection down.
    pub async fn close(self) -> Result<()> {
        let (done, closed) = oneshot::channel();
        self.requests
            .send(Request::Terminate { done })
            .map_err(|_| Error::ConnectionBroken)?;
        let _ = closed.await;
        Ok(())
    }

    /// Key data for out-of-band cancellation (see [`cancel`]).
    pub fn backend_key(&self) -> Option<BackendKeyData> {
        self.shared.backend_key
    }

    /// Server parameters reported during the handshake.
    pub fn server_params(&self) -> &HashMap<String, String> {
        &self.shared.server_params
    }

    pub(crate) fn next_statement_id(&self) -> u64 {
        self.shared.statement_ids.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) async fn run(&self, command: Command, tx: Option<TxHandle>) -> Result<ResultGroup> {
        let (waiter, completion) = oneshot::channel();
        self.requests
            .send(Request::Submit {
                command,
                tx,
                waiter,
            })
            .map_err(|_| Error::ConnectionBroken)?;
        completion.await.map_err(|_| Error::ConnectionBroken)?
    }
}

/// An open transaction on a [`Connection`].
///
/// Obtained through [`Connection::transaction`]; operations submitted
/// through it run inside the BEGIN/COMMIT bracket and take priority over
/// untagged submissions, which wait for the transaction to end.
#[derive(Clone)]
pub struct Transaction {
    conn: Connection,
    handle: TxHandle,
}

impl Transaction {
    /// Run a Simple Query inside the transaction.
    pub async fn execute(&self, sql: &str) -> Result<ResultGroup> {
        self.conn
            .run(
                Command::Query {
                    sql: sql.to_string(),
                },
                Some(self.handle),
            )
            .await
    }

    /// Prepare a statement inside the transaction.
    pub async fn prepare(&self, sql: &str) -> Result<Statement> {
        Statement::prepare(&self.conn, sql, &[], Some(self.handle)).await
    }

    /// The identity token routing submissions into this transaction.
    pub fn handle(&self) -> TxHandle {
        self.handle
    }
}

/// Cancel the in-flight query of another connection.
///
/// The v3 protocol has no in-band cancellation: a CancelRequest carrying the
/// target's [`BackendKeyData`] is written on a dedicated connection, which
/// the server closes without replying. The target connection then observes
/// an ErrorResponse and recovers through its normal error path.
pub async fn cancel(opts: &Opts, key: BackendKeyData) -> Result<()> {
    let mut stream = Stream::connect(opts).await?;
    let mut buf = Vec::new();
    frontend::write_cancel_request(&mut buf, key.pid, key.secret);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// The connection's event loop: pump the socket, feed the engine, write
/// whatever it produces.
async fn drive(
    mut stream: Stream,
    mut engine: Engine,
    mut requests: mpsc::UnboundedReceiver<Request>,
) {
    let mut buf = vec![0u8; 8192];
    loop {
        if engine.has_outbound() {
            let out = engine.take_outbound();
            if stream.write_all(&out).await.is_err() || stream.flush().await.is_err() {
                engine.fail_connection(Error::ConnectionBroken);
                return;
            }
        }

        tokio::select! {
            request = requests.recv() => match request {
                Some(Request::Submit { command, tx, waiter }) => {
                    engine.submit_with(command, tx, waiter);
                }
                Some(Request::Begin { reply, waiter }) => {
                    let handle = engine.begin_with(waiter);
                    let _ = reply.send(handle);
                }
                Some(Request::Commit { handle, waiter }) => {
                    engine.commit_with(handle, waiter);
                }
                Some(Request::Rollback { handle, waiter }) => {
                    engine.rollback_with(handle, waiter);
                }
                Some(Request::Terminate { done }) => {
                    shutdown(&mut stream, &mut engine).await;
                    let _ = done.send(());
                    return;
                }
                // Every handle is gone; terminate best-effort.
                None => {
                    shutdown(&mut stream, &mut engine).await;
                    return;
                }
            },
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    engine.fail_connection(Error::ConnectionBroken);
                    return;
                }
                Ok(n) => {
                    if let Err(e) = engine.receive(&buf[..n]) {
                        tracing::debug!(error = %e, "closing connection");
                        return;
                    }
                }
                Err(e) => {
                    engine.fail_connection(e.into());
                    return;
                }
            },
        }
    }
}

async fn shutdown(stream: &mut Stream, engine: &mut Engine) {
    engine.terminate();
    let out = engine.take_outbound();
    let _ = stream.write_all(&out).await;
    let _ = stream.flush().await;
    engine.fail_connection(Error::ConnectionBroken);
}
