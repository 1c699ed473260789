//! Prepared statements.
//!
//! A statement walks a fixed lifecycle: Parse, then DescribeStatement (so
//! the parameter types and column metadata are known before the first
//! execution), then any number of Bind/Execute rounds, each against a fresh
//! portal, and finally CloseStatement.

use crate::connection::Connection;
use crate::conversion::Params;
use crate::engine::Command;
use crate::error::{Error, Result};
use crate::protocol::backend::Column;
use crate::protocol::types::Oid;
use crate::result::QueryResult;
use crate::state::TxHandle;

/// Lifecycle state of a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    /// Parse confirmed
    Prepared,
    /// DescribeStatement on the wire
    DescribeStatementInProgress,
    /// Parameter and column metadata captured
    StatementDescribed,
    /// Bind on the wire
    BindInProgress,
    /// A portal is bound and not yet run
    Bound,
    /// Execute on the wire
    ExecuteInProgress,
    /// Last Execute finished
    Executed,
    /// Close (portal) on the wire
    ClosePortalInProgress,
    /// CloseStatement on the wire
    CloseInProgress,
    /// Statement released on the server
    Closed,
}

/// A portal left behind by the previous Bind.
struct BoundPortal {
    name: String,
    /// The transaction the Bind ran in. The server drops such portals when
    /// the transaction ends, so no explicit Close is owed for them.
    tx: Option<TxHandle>,
}

/// A server-side prepared statement.
pub struct Statement {
    conn: Connection,
    id: u64,
    name: String,
    sql: String,
    parameter_oids: Vec<Oid>,
    columns: Vec<Column>,
    state: StatementState,
    portal: Option<BoundPortal>,
    portal_counter: u64,
}

impl Statement {
    pub(crate) async fn prepare(
        conn: &Connection,
        sql: &str,
        param_oids: &[Oid],
        tx: Option<TxHandle>,
    ) -> Result<Self> {
        let id = conn.next_statement_id();
        let name = format!("stmt_{id:x}");

        conn.run(
            Command::Parse {
                name: name.clone(),
                sql: sql.to_string(),
                param_oids: param_oids.to_vec(),
            },
            tx,
        )
        .await?;

        let mut stmt = Self {
            conn: conn.clone(),
            id,
            name,
            sql: sql.to_string(),
            parameter_oids: Vec::new(),
            columns: Vec::new(),
            state: StatementState::Prepared,
            portal: None,
            portal_counter: 0,
        };

        stmt.state = StatementState::DescribeStatementInProgress;
        let described = stmt
            .conn
            .run(
                Command::DescribeStatement {
                    name: stmt.name.clone(),
                },
                tx,
            )
            .await?
            .into_single();
        stmt.parameter_oids = described.parameter_oids;
        stmt.columns = described.columns;
        stmt.state = StatementState::StatementDescribed;

        Ok(stmt)
    }

    /// Execute with the given parameters, fetching every row.
    pub async fn execute(&mut self, params: impl Params) -> Result<QueryResult> {
        self.execute_portion(params, 0, None).await
    }

    /// Execute inside an open transaction.
    pub async fn execute_in(&mut self, params: impl Params, tx: TxHandle) -> Result<QueryResult> {
        self.execute_portion(params, 0, Some(tx)).await
    }

    /// Execute with a row limit.
    ///
    /// With `max_rows` > 0 the server stops after that many rows and the
    /// result comes back with `suspended` set and no completion tag. The
    /// portal is not resumed automatically; a later execution re-binds.
    pub async fn execute_portion(
        &mut self,
        params: impl Params,
        max_rows: u32,
        tx: Option<TxHandle>,
    ) -> Result<QueryResult> {
        if matches!(
            self.state,
            StatementState::CloseInProgress | StatementState::Closed
        ) {
            return Err(Error::InvalidUsage(format!(
                "statement {} is closed",
                self.name
            )));
        }

        // Each execution binds a fresh portal. A prior portal bound outside
        // any transaction lives until closed; one bound inside a transaction
        // is dropped by the server at transaction end.
        if let Some(prior) = self.portal.take() {
            if prior.tx.is_none() {
                self.state = StatementState::ClosePortalInProgress;
                self.conn
                    .run(Command::ClosePortal { name: prior.name }, tx)
                    .await?;
            }
        }

        let portal = format!("port_{:x}_{:x}", self.id, self.portal_counter);
        self.portal_counter += 1;

        let values: Vec<Option<Vec<u8>>> = params
            .into_values()
            .into_iter()
            .map(|value| value.map(String::into_bytes))
            .collect();

        self.state = StatementState::BindInProgress;
        self.conn
            .run(
                Command::Bind {
                    portal: portal.clone(),
                    statement: self.name.clone(),
                    param_formats: Vec::new(),
                    values,
                    result_formats: Vec::new(),
                },
                tx,
            )
            .await?;
        self.portal = Some(BoundPortal {
            name: portal.clone(),
            tx,
        });
        self.state = StatementState::Bound;

        self.state = StatementState::ExecuteInProgress;
        let mut result = self
            .conn
            .run(Command::Execute { portal, max_rows }, tx)
            .await?
            .into_single();
        self.state = StatementState::Executed;

        // Execute responses carry no RowDescription; attach the metadata
        // captured at describe time.
        result.columns = self.columns.clone();
        Ok(result)
    }

    /// Release the statement on the server.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == StatementState::Closed {
            return Ok(());
        }
        self.state = StatementState::CloseInProgress;
        self.conn
            .run(
                Command::CloseStatement {
                    name: self.name.clone(),
                },
                None,
            )
            .await?;
        self.portal = None;
        self.state = StatementState::Closed;
        Ok(())
    }

    /// Server-side statement name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The SQL this statement was prepared from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter type OIDs reported by DescribeStatement.
    pub fn parameter_oids(&self) -> &[Oid] {
        &self.parameter_oids
    }

    /// Result column metadata reported by DescribeStatement; empty for
    /// statements that return no rows.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StatementState {
        self.state
    }
}
