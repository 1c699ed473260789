//! Session state machine.
//!
//! One authoritative state per connection. The v3 protocol carries no
//! correlation identifiers, so correctness rests on this machine: every
//! decoded backend message and every command the engine sends becomes an
//! event, and the `(state, event)` pair alone decides what the message
//! belonged to.

/// Connection session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// StartupMessage sent, waiting for an authentication request
    Startup,
    /// Password sent, waiting for the verdict
    Authorizing,
    /// Authenticated; collecting parameter status and key data
    ReceiveServerData,
    /// Idle; the next queued operation may be dispatched
    Ready,
    /// Simple Query sent
    QueryInProgress,
    /// Simple Query producing a row set
    RowsetQueryInProgress,
    /// Simple Query turned out to be empty
    EmptyQueryInProgress,
    /// Parse sent
    ParseInProgress,
    /// Bind sent
    BindInProgress,
    /// Describe (statement) sent
    StatementDescribeInProgress,
    /// Describe (portal) sent
    PortalDescribeInProgress,
    /// Execute sent
    ExecuteInProgress,
    /// Close (portal) sent
    ClosePortalInProgress,
    /// Close (statement) sent
    CloseStatementInProgress,
    /// Sync sent after a soft error; waiting for ReadyForQuery
    Syncing,
    /// Simple Query failed; waiting for ReadyForQuery
    QueryFailed,
    /// Parse failed
    ParseFailed,
    /// Bind failed
    BindFailed,
    /// Execute failed; waiting for ReadyForQuery after Sync
    ExecuteFailed,
    /// Close (portal) failed
    ClosePortalFailed,
    /// Close (statement) failed
    CloseStatementFailed,
    /// Startup or authorization failed; terminal
    ConnectionFailed,
    /// Server demanded an authentication method we cannot answer; terminal
    UnsupportedAuthMethod,
}

impl SessionState {
    /// True while an operation is outstanding on the wire.
    pub fn is_in_progress(self) -> bool {
        use SessionState::*;
        matches!(
            self,
            QueryInProgress
                | RowsetQueryInProgress
                | EmptyQueryInProgress
                | ParseInProgress
                | BindInProgress
                | StatementDescribeInProgress
                | PortalDescribeInProgress
                | ExecuteInProgress
                | ClosePortalInProgress
                | CloseStatementInProgress
        )
    }

    /// True once the connection can never accept work again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::ConnectionFailed | SessionState::UnsupportedAuthMethod
        )
    }
}

/// Session machine events.
///
/// Message-derived events carry the name of the backend message that
/// produced them; `*Sent` events fire when the engine puts a command on the
/// wire; `ErrorReset` fires when the engine emits the recovery Sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    AuthenticationOk,
    AuthenticationCleartextPassword,
    AuthenticationMd5Password,
    AuthenticationKerberosV5,
    AuthenticationScmCredential,
    AuthenticationGss,
    AuthenticationGssContinue,
    AuthenticationSspi,
    AuthenticationSasl,
    BackendKeyData,
    ParameterStatus,
    ReadyForQuery,
    NoticeResponse,
    ErrorResponse,
    ParseComplete,
    BindComplete,
    CloseComplete,
    ParameterDescription,
    RowDescription,
    DataRow,
    NoData,
    PortalSuspended,
    EmptyQueryResponse,
    CommandComplete,
    QuerySent,
    ParseSent,
    BindSent,
    DescribeStatementSent,
    DescribePortalSent,
    ExecuteSent,
    ClosePortalSent,
    CloseStatementSent,
    ErrorReset,
}

/// Apply an event to a state.
///
/// Returns the state to enter, or `None` when the event is not meaningful in
/// this state and must be ignored. Entering a state may oblige the engine to
/// run side effects; that mapping lives in the engine, not here.
pub fn apply(state: SessionState, event: SessionEvent) -> Option<SessionState> {
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        // --- startup and authentication ---
        (S::Startup | S::Authorizing, E::AuthenticationOk) => Some(S::ReceiveServerData),
        (S::Startup, E::AuthenticationCleartextPassword | E::AuthenticationMd5Password) => {
            Some(S::Authorizing)
        }
        (
            S::Startup,
            E::AuthenticationKerberosV5
            | E::AuthenticationScmCredential
            | E::AuthenticationGss
            | E::AuthenticationGssContinue
            | E::AuthenticationSspi
            | E::AuthenticationSasl,
        ) => Some(S::UnsupportedAuthMethod),
        (S::ReceiveServerData, E::BackendKeyData | E::ParameterStatus) => Some(state),

        // --- ReadyForQuery closes every cycle ---
        (
            S::ReceiveServerData
            | S::QueryInProgress
            | S::EmptyQueryInProgress
            | S::QueryFailed
            | S::Syncing
            | S::ExecuteFailed
            | S::ClosePortalFailed
            | S::CloseStatementFailed,
            E::ReadyForQuery,
        ) => Some(S::Ready),

        // --- command dispatch out of ready ---
        (S::Ready, E::QuerySent) => Some(S::QueryInProgress),
        (S::Ready, E::ParseSent) => Some(S::ParseInProgress),
        (S::Ready, E::BindSent) => Some(S::BindInProgress),
        (S::Ready, E::DescribeStatementSent) => Some(S::StatementDescribeInProgress),
        (S::Ready, E::DescribePortalSent) => Some(S::PortalDescribeInProgress),
        (S::Ready, E::ExecuteSent) => Some(S::ExecuteInProgress),
        (S::Ready, E::ClosePortalSent) => Some(S::ClosePortalInProgress),
        (S::Ready, E::CloseStatementSent) => Some(S::CloseStatementInProgress),

        // --- extended-query completions return to ready directly; the
        //     trailing Flush means no ReadyForQuery follows ---
        (S::ParseInProgress, E::ParseComplete) => Some(S::Ready),
        (S::BindInProgress, E::BindComplete) => Some(S::Ready),
        (S::ClosePortalInProgress | S::CloseStatementInProgress, E::CloseComplete) => {
            Some(S::Ready)
        }
        (S::StatementDescribeInProgress, E::ParameterDescription) => Some(state),
        (
            S::StatementDescribeInProgress | S::PortalDescribeInProgress,
            E::RowDescription | E::NoData,
        ) => Some(S::Ready),
        (S::ExecuteInProgress, E::DataRow) => Some(state),
        (S::ExecuteInProgress, E::CommandComplete | E::EmptyQueryResponse) => Some(S::Ready),
        // A row-limited Execute stops here; the portal stays open and a later
        // Execute resumes it.
        (S::ExecuteInProgress, E::PortalSuspended) => Some(S::Ready),

        // --- simple query ---
        (S::QueryInProgress | S::RowsetQueryInProgress, E::RowDescription | E::DataRow) => {
            Some(S::RowsetQueryInProgress)
        }
        (S::QueryInProgress, E::EmptyQueryResponse) => Some(S::EmptyQueryInProgress),
        // Next statement of a multi-statement batch begins.
        (
            S::QueryInProgress | S::RowsetQueryInProgress | S::EmptyQueryInProgress,
            E::CommandComplete,
        ) => Some(S::QueryInProgress),

        // --- failure routing ---
        (S::Startup | S::Authorizing | S::ReceiveServerData, E::ErrorResponse) => {
            Some(S::ConnectionFailed)
        }
        (
            S::QueryInProgress | S::RowsetQueryInProgress | S::EmptyQueryInProgress,
            E::ErrorResponse,
        ) => Some(S::QueryFailed),
        (S::ParseInProgress, E::ErrorResponse) => Some(S::ParseFailed),
        // A describe failure recovers exactly like a parse failure.
        (
            S::StatementDescribeInProgress | S::PortalDescribeInProgress,
            E::ErrorResponse,
        ) => Some(S::ParseFailed),
        (S::BindInProgress, E::ErrorResponse) => Some(S::BindFailed),
        (S::ExecuteInProgress, E::ErrorResponse) => Some(S::ExecuteFailed),
        (S::ClosePortalInProgress, E::ErrorResponse) => Some(S::ClosePortalFailed),
        (S::CloseStatementInProgress, E::ErrorResponse) => Some(S::CloseStatementFailed),
        (S::ParseFailed | S::BindFailed, E::ErrorReset) => Some(S::Syncing),

        // Notices are informational in every state.
        (_, E::NoticeResponse) => Some(state),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionEvent as E;
    use SessionState as S;

    fn run(mut state: SessionState, events: &[SessionEvent]) -> SessionState {
        for &event in events {
            state = apply(state, event).unwrap_or(state);
        }
        state
    }

    #[test]
    fn test_startup_to_ready() {
        let state = run(
            S::Startup,
            &[
                E::AuthenticationOk,
                E::ParameterStatus,
                E::BackendKeyData,
                E::ReadyForQuery,
            ],
        );
        assert_eq!(state, S::Ready);
    }

    #[test]
    fn test_md5_handshake() {
        let state = run(
            S::Startup,
            &[E::AuthenticationMd5Password, E::AuthenticationOk],
        );
        assert_eq!(state, S::ReceiveServerData);
    }

    #[test]
    fn test_gss_is_unsupported() {
        assert_eq!(
            apply(S::Startup, E::AuthenticationGss),
            Some(S::UnsupportedAuthMethod)
        );
    }

    #[test]
    fn test_simple_query_cycle() {
        let state = run(
            S::Ready,
            &[
                E::QuerySent,
                E::RowDescription,
                E::DataRow,
                E::DataRow,
                E::CommandComplete,
            ],
        );
        // After CommandComplete the next statement of the batch may begin.
        assert_eq!(state, S::QueryInProgress);
        assert_eq!(apply(state, E::ReadyForQuery), Some(S::Ready));
    }

    #[test]
    fn test_query_error_waits_for_ready() {
        let state = run(S::Ready, &[E::QuerySent, E::ErrorResponse]);
        assert_eq!(state, S::QueryFailed);
        // Row data for the aborted statement is not expected; only
        // ReadyForQuery moves us on.
        assert_eq!(apply(state, E::DataRow), None);
        assert_eq!(apply(state, E::ReadyForQuery), Some(S::Ready));
    }

    #[test]
    fn test_parse_failure_recovers_through_syncing() {
        let state = run(S::Ready, &[E::ParseSent, E::ErrorResponse]);
        assert_eq!(state, S::ParseFailed);
        let state = apply(state, E::ErrorReset).unwrap();
        assert_eq!(state, S::Syncing);
        assert_eq!(apply(state, E::ReadyForQuery), Some(S::Ready));
    }

    #[test]
    fn test_extended_query_completions() {
        assert_eq!(apply(S::ParseInProgress, E::ParseComplete), Some(S::Ready));
        assert_eq!(apply(S::BindInProgress, E::BindComplete), Some(S::Ready));
        assert_eq!(
            apply(S::StatementDescribeInProgress, E::ParameterDescription),
            Some(S::StatementDescribeInProgress)
        );
        assert_eq!(
            apply(S::StatementDescribeInProgress, E::RowDescription),
            Some(S::Ready)
        );
        assert_eq!(
            apply(S::PortalDescribeInProgress, E::NoData),
            Some(S::Ready)
        );
        assert_eq!(
            apply(S::ExecuteInProgress, E::CommandComplete),
            Some(S::Ready)
        );
        assert_eq!(
            apply(S::ExecuteInProgress, E::PortalSuspended),
            Some(S::Ready)
        );
    }

    #[test]
    fn test_notice_is_ignored_everywhere() {
        for state in [S::Startup, S::Ready, S::QueryInProgress, S::Syncing] {
            assert_eq!(apply(state, E::NoticeResponse), Some(state));
        }
    }

    #[test]
    fn test_unlisted_events_ignored() {
        assert_eq!(apply(S::Ready, E::CommandComplete), None);
        assert_eq!(apply(S::Startup, E::QuerySent), None);
        assert_eq!(apply(S::ConnectionFailed, E::ReadyForQuery), None);
    }
}
