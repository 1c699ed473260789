//! Per-connection protocol engine.
//!
//! The engine is sans-I/O: the host event loop feeds it inbound chunks
//! ([`Engine::receive`]) and writes out whatever [`Engine::take_outbound`]
//! returns. Submissions never block; each returns a [`Completion`] that
//! resolves when the backend finishes (or fails) the operation.
//!
//! The v3 protocol has no correlation identifiers, so the engine keeps at
//! most one operation on the wire and serializes the rest through its
//! queues. Two queues exist because of transactions: while one is open,
//! submissions tagged with its [`TxHandle`] run on `this_tx_q`, and
//! everything else is parked on `next_tx_q` until the transaction ends.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::backend::{Authentication, BackendKeyData, BackendMessage};
use crate::protocol::framing::FrameBuffer;
use crate::protocol::frontend;
use crate::protocol::types::{Oid, TransactionStatus};
use crate::result::ResultGroup;
use crate::state::{SessionEvent, SessionState, TxEvent, TxHandle, TxStatus, session, transaction};

/// An operation the engine can put on the wire.
///
/// Extended-query commands are dispatched with a trailing Flush so the
/// backend reports progress without waiting for Sync; Sync itself is only
/// emitted on the error-recovery path.
#[derive(Debug, Clone)]
pub enum Command {
    /// Simple query; may contain multiple semicolon-separated statements
    Query { sql: String },
    /// Create a prepared statement
    Parse {
        name: String,
        sql: String,
        param_oids: Vec<Oid>,
    },
    /// Fetch parameter OIDs and column metadata for a prepared statement
    DescribeStatement { name: String },
    /// Fetch column metadata for a portal
    DescribePortal { name: String },
    /// Bind a prepared statement to a portal
    Bind {
        portal: String,
        statement: String,
        param_formats: Vec<i16>,
        values: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    },
    /// Run a portal; `max_rows` 0 means unlimited
    Execute { portal: String, max_rows: u32 },
    /// Release a portal
    ClosePortal { name: String },
    /// Release a prepared statement
    CloseStatement { name: String },
}

/// Engine half of an operation's completion channel.
pub type Waiter = oneshot::Sender<Result<ResultGroup>>;

/// Caller half of an operation's completion channel.
pub type Completion = oneshot::Receiver<Result<ResultGroup>>;

/// A deferred operation: pre-encoded frames plus the event that marks them
/// sent.
struct QueuedOp {
    frames: Vec<u8>,
    sent: SessionEvent,
    waiter: Waiter,
}

fn encode_command(command: Command) -> Result<(Vec<u8>, SessionEvent)> {
    let mut buf = Vec::new();
    let sent = match command {
        Command::Query { sql } => {
            frontend::write_query(&mut buf, &sql);
            SessionEvent::QuerySent
        }
        Command::Parse {
            name,
            sql,
            param_oids,
        } => {
            frontend::write_parse(&mut buf, &name, &sql, &param_oids);
            frontend::write_flush(&mut buf);
            SessionEvent::ParseSent
        }
        Command::DescribeStatement { name } => {
            frontend::write_describe_statement(&mut buf, &name);
            frontend::write_flush(&mut buf);
            SessionEvent::DescribeStatementSent
        }
        Command::DescribePortal { name } => {
            frontend::write_describe_portal(&mut buf, &name);
            frontend::write_flush(&mut buf);
            SessionEvent::DescribePortalSent
        }
        Command::Bind {
            portal,
            statement,
            param_formats,
            values,
            result_formats,
        } => {
            frontend::write_bind(
                &mut buf,
                &portal,
                &statement,
                &param_formats,
                &values,
                &result_formats,
            )?;
            frontend::write_flush(&mut buf);
            SessionEvent::BindSent
        }
        Command::Execute { portal, max_rows } => {
            frontend::write_execute(&mut buf, &portal, max_rows);
            frontend::write_flush(&mut buf);
            SessionEvent::ExecuteSent
        }
        Command::ClosePortal { name } => {
            frontend::write_close_portal(&mut buf, &name);
            frontend::write_flush(&mut buf);
            SessionEvent::ClosePortalSent
        }
        Command::CloseStatement { name } => {
            frontend::write_close_statement(&mut buf, &name);
            frontend::write_flush(&mut buf);
            SessionEvent::CloseStatementSent
        }
    };
    Ok((buf, sent))
}

/// The per-connection protocol engine.
pub struct Engine {
    user: String,
    password: Option<String>,

    framing: FrameBuffer,
    outbound: Vec<u8>,

    session: SessionState,
    tx_status: TxStatus,
    active_tx: Option<TxHandle>,

    this_tx_q: VecDeque<QueuedOp>,
    next_tx_q: Option<VecDeque<QueuedOp>>,

    in_flight: Option<Waiter>,
    current: Option<ResultGroup>,
    last_error: Option<crate::error::ServerError>,

    server_params: HashMap<String, String>,
    backend_key: Option<BackendKeyData>,
    transaction_status: TransactionStatus,

    // The transaction brackets never change; encode them once.
    begin_frame: Vec<u8>,
    commit_frame: Vec<u8>,
    rollback_frame: Vec<u8>,

    broken: bool,
}

impl Engine {
    /// Create an engine for a fresh connection.
    ///
    /// The StartupMessage is placed in the outbound buffer immediately; the
    /// returned [`Completion`] resolves when the server first reports
    /// ReadyForQuery (or the handshake fails).
    pub fn new(opts: &Opts) -> (Self, Completion) {
        let (waiter, completion) = oneshot::channel();

        let mut outbound = Vec::with_capacity(1024);
        let mut startup_params: Vec<(&str, &str)> = vec![("user", &opts.user)];
        if let Some(database) = &opts.database {
            startup_params.push(("database", database));
        }
        if let Some(app) = &opts.application_name {
            startup_params.push(("application_name", app));
        }
        for (name, value) in &opts.params {
            startup_params.push((name, value));
        }
        frontend::write_startup(&mut outbound, &startup_params);

        let frame = |sql| {
            let mut buf = Vec::new();
            frontend::write_query(&mut buf, sql);
            buf
        };

        let engine = Self {
            user: opts.user.clone(),
            password: opts.password.clone(),
            framing: FrameBuffer::new(),
            outbound,
            session: SessionState::Startup,
            tx_status: TxStatus::None,
            active_tx: None,
            this_tx_q: VecDeque::new(),
            next_tx_q: None,
            in_flight: Some(waiter),
            current: None,
            last_error: None,
            server_params: HashMap::new(),
            backend_key: None,
            transaction_status: TransactionStatus::Idle,
            begin_frame: frame("BEGIN"),
            commit_frame: frame("COMMIT"),
            rollback_frame: frame("ROLLBACK"),
            broken: false,
        };
        (engine, completion)
    }

    // --- host interface -------------------------------------------------

    /// Bytes waiting to be written to the transport.
    pub fn take_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }

    /// True if there are bytes waiting to be written.
    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Feed inbound transport bytes to the engine.
    ///
    /// Every complete frame is decoded and applied. A decode failure is a
    /// protocol violation: the connection is marked failed, all waiters are
    /// notified, and the error is returned so the host stops the pump.
    pub fn receive(&mut self, chunk: &[u8]) -> Result<()> {
        if self.broken {
            return Err(Error::ConnectionBroken);
        }
        for (type_byte, payload) in self.framing.receive(chunk) {
            let msg = match BackendMessage::decode(type_byte, &payload) {
                Ok(msg) => msg,
                Err(Error::Protocol(detail)) => {
                    self.fail_connection(Error::Protocol(detail.clone()));
                    return Err(Error::Protocol(detail));
                }
                Err(e) => {
                    self.fail_connection(Error::ConnectionBroken);
                    return Err(e);
                }
            };
            self.handle_message(msg)?;
        }
        Ok(())
    }

    /// The transport is gone; fail the in-flight operation and everything
    /// queued behind it.
    pub fn fail_connection(&mut self, error: Error) {
        self.broken = true;
        if !self.session.is_terminal() {
            self.session = SessionState::ConnectionFailed;
        }
        self.current = None;
        if let Some(waiter) = self.in_flight.take() {
            let _ = waiter.send(Err(error));
        }
        for op in self.this_tx_q.drain(..) {
            let _ = op.waiter.send(Err(Error::ConnectionBroken));
        }
        if let Some(queue) = self.next_tx_q.take() {
            for op in queue {
                let _ = op.waiter.send(Err(Error::ConnectionBroken));
            }
        }
    }

    // --- submissions ----------------------------------------------------

    /// Submit an operation, optionally bound to an open transaction.
    pub fn submit(&mut self, command: Command, tx: Option<TxHandle>) -> Completion {
        let (waiter, completion) = oneshot::channel();
        self.submit_with(command, tx, waiter);
        completion
    }

    /// Submit with a caller-provided waiter.
    pub fn submit_with(&mut self, command: Command, tx: Option<TxHandle>, waiter: Waiter) {
        if self.broken {
            let _ = waiter.send(Err(Error::ConnectionBroken));
            return;
        }
        match encode_command(command) {
            Ok((frames, sent)) => self.route(QueuedOp { frames, sent, waiter }, tx),
            // Client misuse fails locally; nothing reaches the server.
            Err(e) => {
                let _ = waiter.send(Err(e));
            }
        }
    }

    /// Open a transaction: allocate a handle, park every submission that
    /// does not carry it, and put BEGIN on the wire.
    pub fn begin(&mut self) -> (TxHandle, Completion) {
        let (waiter, completion) = oneshot::channel();
        let handle = self.begin_with(waiter);
        (handle, completion)
    }

    /// [`Engine::begin`] with a caller-provided waiter.
    pub fn begin_with(&mut self, waiter: Waiter) -> TxHandle {
        let handle = TxHandle::next();

        if self.broken {
            let _ = waiter.send(Err(Error::ConnectionBroken));
            return handle;
        }
        if self.tx_status != TxStatus::None {
            let _ = waiter.send(Err(Error::InvalidUsage(
                "a transaction is already in progress on this connection".into(),
            )));
            return handle;
        }

        self.tx_status =
            transaction::apply(self.tx_status, TxEvent::Start).expect("none accepts start");
        self.active_tx = Some(handle);
        // Submissions already waiting do not belong to this transaction;
        // they resume when it ends.
        self.next_tx_q = Some(std::mem::take(&mut self.this_tx_q));

        let op = QueuedOp {
            frames: self.begin_frame.clone(),
            sent: SessionEvent::QuerySent,
            waiter,
        };
        self.route(op, Some(handle));
        handle
    }

    /// Commit the open transaction.
    pub fn commit(&mut self, tx: TxHandle) -> Completion {
        let (waiter, completion) = oneshot::channel();
        self.commit_with(tx, waiter);
        completion
    }

    /// [`Engine::commit`] with a caller-provided waiter.
    pub fn commit_with(&mut self, tx: TxHandle, waiter: Waiter) {
        self.end_with(tx, waiter, TxEvent::Commit);
    }

    /// Roll back the open transaction.
    pub fn rollback(&mut self, tx: TxHandle) -> Completion {
        let (waiter, completion) = oneshot::channel();
        self.rollback_with(tx, waiter);
        completion
    }

    /// [`Engine::rollback`] with a caller-provided waiter.
    pub fn rollback_with(&mut self, tx: TxHandle, waiter: Waiter) {
        self.end_with(tx, waiter, TxEvent::Rollback);
    }

    fn end_with(&mut self, tx: TxHandle, waiter: Waiter, event: TxEvent) {
        if self.broken {
            let _ = waiter.send(Err(Error::ConnectionBroken));
            return;
        }
        if self.active_tx != Some(tx) || self.tx_status != TxStatus::Active {
            let _ = waiter.send(Err(Error::InvalidUsage(
                "no matching open transaction".into(),
            )));
            return;
        }

        self.tx_status =
            transaction::apply(self.tx_status, event).expect("active accepts commit/rollback");
        let frames = match event {
            TxEvent::Commit => self.commit_frame.clone(),
            _ => self.rollback_frame.clone(),
        };
        let op = QueuedOp {
            frames,
            sent: SessionEvent::QuerySent,
            waiter,
        };
        self.route(op, Some(tx));
    }

    /// Put a Terminate message on the wire. The host should flush the
    /// outbound buffer and then call [`Engine::fail_connection`].
    pub fn terminate(&mut self) {
        frontend::write_terminate(&mut self.outbound);
    }

    // --- accessors ------------------------------------------------------

    /// Current session state.
    pub fn session_state(&self) -> SessionState {
        self.session
    }

    /// Current transaction phase.
    pub fn tx_status(&self) -> TxStatus {
        self.tx_status
    }

    /// True once the connection can no longer be used.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Server parameters reported so far.
    pub fn server_params(&self) -> &HashMap<String, String> {
        &self.server_params
    }

    /// Cancellation key data, once the server has sent it.
    pub fn backend_key(&self) -> Option<BackendKeyData> {
        self.backend_key
    }

    /// Transaction status byte from the latest ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    // --- internals ------------------------------------------------------

    /// Queue or dispatch an operation according to the transactional phase.
    fn route(&mut self, op: QueuedOp, tx: Option<TxHandle>) {
        let runs_now = match self.tx_status {
            TxStatus::None => true,
            _ => tx == self.active_tx,
        };
        if !runs_now {
            self.next_tx_q.get_or_insert_default().push_back(op);
            return;
        }
        if self.session == SessionState::Ready {
            self.dispatch(op);
        } else {
            self.this_tx_q.push_back(op);
        }
    }

    /// Put an operation on the wire and mark it in flight.
    fn dispatch(&mut self, op: QueuedOp) {
        debug_assert_eq!(self.session, SessionState::Ready);
        tracing::trace!(event = ?op.sent, "dispatching operation");
        self.outbound.extend_from_slice(&op.frames);
        self.in_flight = Some(op.waiter);
        self.current = Some(ResultGroup::new());
        self.transition(op.sent);
    }

    fn handle_message(&mut self, msg: BackendMessage) -> Result<()> {
        use BackendMessage as B;
        use SessionEvent as E;

        match msg {
            B::Authentication(auth) => self.handle_authentication(auth),
            B::BackendKeyData(key) => {
                self.backend_key = Some(key);
                self.transition(E::BackendKeyData);
            }
            B::ParameterStatus { name, value } => {
                self.server_params.insert(name, value);
                self.transition(E::ParameterStatus);
            }
            B::ReadyForQuery { status } => {
                self.transaction_status = TransactionStatus::from_byte(status).unwrap_or_default();
                self.transition(E::ReadyForQuery);
            }
            B::NoticeResponse(notice) => {
                match &mut self.current {
                    Some(group) => group.add_notice(notice),
                    None => tracing::debug!(message = notice.message(), "notice while idle"),
                }
                self.transition(E::NoticeResponse);
            }
            B::ErrorResponse(error) => {
                tracing::debug!(code = error.code(), message = error.message(), "server error");
                self.last_error = Some(error);
                self.transition(E::ErrorResponse);
            }
            B::NotificationResponse { pid, channel, .. } => {
                tracing::debug!(pid, channel = channel.as_str(), "ignoring notification");
            }
            B::ParseComplete => {
                self.transition(E::ParseComplete);
            }
            B::BindComplete => {
                self.transition(E::BindComplete);
            }
            B::CloseComplete => {
                self.transition(E::CloseComplete);
            }
            B::CommandComplete { tag } => {
                if let Some(group) = &mut self.current {
                    group.finish_current(&tag);
                }
                self.observe_command_tag(&tag);
                self.transition(E::CommandComplete);
            }
            B::EmptyQueryResponse => {
                self.transition(E::EmptyQueryResponse);
            }
            B::PortalSuspended => {
                if let Some(group) = &mut self.current {
                    group.mark_suspended();
                }
                self.transition(E::PortalSuspended);
            }
            B::NoData => {
                self.transition(E::NoData);
            }
            B::RowDescription(columns) => {
                if let Some(group) = &mut self.current {
                    group.set_columns(columns);
                }
                self.transition(E::RowDescription);
            }
            B::ParameterDescription(oids) => {
                if let Some(group) = &mut self.current {
                    group.set_parameter_oids(oids);
                }
                self.transition(E::ParameterDescription);
            }
            B::DataRow(values) => {
                if let Some(group) = &mut self.current {
                    group.append_row(values);
                }
                self.transition(E::DataRow);
            }
            B::CopyInResponse(_) | B::CopyOutResponse(_) | B::CopyBothResponse(_) => {
                self.fail_connection(Error::Unsupported("COPY streaming is not supported".into()));
                return Err(Error::Unsupported("COPY streaming is not supported".into()));
            }
        }
        Ok(())
    }

    fn handle_authentication(&mut self, auth: Authentication) {
        use SessionEvent as E;

        match auth {
            Authentication::Ok => {
                self.transition(E::AuthenticationOk);
            }
            Authentication::CleartextPassword => {
                if self.transition(E::AuthenticationCleartextPassword) {
                    let password = self.password.clone().unwrap_or_default();
                    frontend::write_password(&mut self.outbound, &password);
                }
            }
            Authentication::Md5Password { salt } => {
                if self.transition(E::AuthenticationMd5Password) {
                    let hashed = frontend::md5_password(
                        &self.user,
                        self.password.as_deref().unwrap_or_default(),
                        &salt,
                    );
                    frontend::write_password(&mut self.outbound, &hashed);
                }
            }
            other => {
                tracing::debug!(method = ?other, "unsupported authentication request");
                let event = match other {
                    Authentication::KerberosV5 => E::AuthenticationKerberosV5,
                    Authentication::ScmCredential => E::AuthenticationScmCredential,
                    Authentication::Gss => E::AuthenticationGss,
                    Authentication::GssContinue { .. } => E::AuthenticationGssContinue,
                    Authentication::Sspi => E::AuthenticationSspi,
                    Authentication::Sasl => E::AuthenticationSasl,
                    _ => unreachable!("handled above"),
                };
                self.transition(event);
            }
        }
    }

    /// Watch completion tags for the transaction bracket statements.
    fn observe_command_tag(&mut self, tag: &str) {
        let matches_bracket = match self.tx_status {
            TxStatus::StartPending => tag == "BEGIN",
            TxStatus::CommitPending => tag == "COMMIT",
            TxStatus::RollbackPending => tag == "ROLLBACK",
            _ => false,
        };
        if !matches_bracket {
            return;
        }
        if let Some(next) = transaction::apply(self.tx_status, TxEvent::CommandComplete) {
            tracing::trace!(from = ?self.tx_status, to = ?next, tag, "transaction transition");
            self.tx_status = next;
            if next == TxStatus::None {
                self.end_transaction();
            }
        }
    }

    /// The transaction is over: the deferred queue becomes the active one.
    fn end_transaction(&mut self) {
        self.active_tx = None;
        // Anything still parked on the transaction's own queue can never
        // run; its transaction is gone.
        for op in std::mem::take(&mut self.this_tx_q) {
            let _ = op.waiter.send(Err(Error::InvalidUsage(
                "operation was still queued when its transaction ended".into(),
            )));
        }
        self.this_tx_q = self.next_tx_q.take().unwrap_or_default();
        tracing::debug!(
            resumed = self.this_tx_q.len(),
            "transaction ended; deferred operations resume"
        );
    }

    /// Apply an event to the session machine and run the entry actions of
    /// the state it lands in. Returns false when the event was ignored.
    fn transition(&mut self, event: SessionEvent) -> bool {
        let Some(next) = session::apply(self.session, event) else {
            tracing::trace!(state = ?self.session, ?event, "event ignored");
            return false;
        };
        let prev = self.session;
        self.session = next;
        // Self-transitions (notices, row data) must not re-run entry
        // actions; a notice arriving in a failed state would emit a second
        // Sync otherwise.
        if prev == next {
            return true;
        }
        tracing::trace!(from = ?prev, to = ?next, ?event, "session transition");

        match next {
            SessionState::Ready => self.enter_ready(),
            SessionState::QueryFailed => {
                // Simple Query: the server follows up with ReadyForQuery on
                // its own; no Sync is needed.
                self.fail_in_flight(true, false);
            }
            SessionState::ExecuteFailed => {
                self.fail_in_flight(true, true);
            }
            SessionState::ParseFailed | SessionState::BindFailed => {
                self.fail_in_flight(false, true);
                self.transition(SessionEvent::ErrorReset);
            }
            SessionState::ClosePortalFailed | SessionState::CloseStatementFailed => {
                self.fail_in_flight(false, true);
            }
            SessionState::ConnectionFailed => {
                let error = self.last_error.take().unwrap_or_default();
                self.fail_connection(Error::server(error));
            }
            SessionState::UnsupportedAuthMethod => {
                self.fail_connection(Error::Auth(
                    "server requested an unsupported authentication method".into(),
                ));
            }
            _ => {}
        }
        true
    }

    /// The previous operation is over; hand its result to the waiter and
    /// start the next queued one.
    fn enter_ready(&mut self) {
        let waiter = self.in_flight.take();
        let result = self.current.take().unwrap_or_default();

        if let Some(op) = self.this_tx_q.pop_front() {
            self.dispatch(op);
        }

        // Completed after queue dispatch: by the time the waiter observes
        // its result, the next operation is already on the wire.
        if let Some(waiter) = waiter {
            let _ = waiter.send(Ok(result));
        }
    }

    /// Fail the in-flight waiter with the last server error, optionally
    /// attaching the partially accumulated result, optionally emitting the
    /// recovery Sync.
    fn fail_in_flight(&mut self, with_partial: bool, send_sync: bool) {
        let error = self.last_error.take().unwrap_or_default();
        let partial = match with_partial {
            true => self.current.take(),
            false => {
                self.current = None;
                None
            }
        };
        if let Some(waiter) = self.in_flight.take() {
            let _ = waiter.send(Err(Error::Server { error, partial }));
        }
        if send_sync {
            frontend::write_sync(&mut self.outbound);
        }
    }
}
