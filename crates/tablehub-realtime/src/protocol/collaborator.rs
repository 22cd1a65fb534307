//! Services the protocol delegates to.
//!
//! Query, submit, and presence semantics live outside the messaging core.
//! The dispatcher only routes requests here and enqueues what comes back.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use tablehub_core::result::AppResult;

use crate::connection::handle::ConnectionId;
use crate::message::request::{CursorUpdate, PresenceUpdate, QueryRequest, SubmitRequest};
use crate::service::RealtimeService;

/// Who sent a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Originating connection.
    pub conn_id: ConnectionId,
    /// Authenticated user.
    pub user_id: String,
    /// Client session, if supplied at connect time.
    pub session_id: Option<String>,
}

/// Result of a query, sent back as `queryResponse.data`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    /// Opaque result set.
    pub data: Value,
}

/// Result of a submission, sent back as `submitResponse.data`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitResponse {
    /// Opaque acknowledgement payload.
    pub data: Value,
}

/// Handles document queries and operation submissions.
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Answers a query.
    async fn query(&self, ctx: &RequestContext, request: QueryRequest) -> AppResult<QueryResponse>;

    /// Applies a batch of operations.
    async fn submit(
        &self,
        ctx: &RequestContext,
        request: SubmitRequest,
    ) -> AppResult<SubmitResponse>;
}

/// Handles presence and cursor updates.
#[async_trait]
pub trait PresenceService: Send + Sync {
    /// Records a presence update and fans it out.
    async fn update(&self, ctx: &RequestContext, update: PresenceUpdate) -> AppResult<()>;

    /// Records or clears a cursor and fans it out.
    async fn update_cursor(&self, ctx: &RequestContext, update: CursorUpdate) -> AppResult<()>;

    /// Forgets everything the connection published and tells its peers.
    async fn disconnect(&self, ctx: &RequestContext) -> AppResult<()>;
}

/// Document service used when no document store is attached.
///
/// Queries return an empty result set. Submissions are acknowledged and
/// their operations relayed to the document's channels, so peers stay in
/// sync even though nothing is persisted here.
#[derive(Debug, Clone)]
pub struct DetachedDocumentService {
    service: RealtimeService,
}

impl DetachedDocumentService {
    /// Creates the service on top of the realtime facade.
    pub fn new(service: RealtimeService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl DocumentService for DetachedDocumentService {
    async fn query(&self, ctx: &RequestContext, request: QueryRequest) -> AppResult<QueryResponse> {
        debug!(
            conn_id = %ctx.conn_id,
            channel = %request.target,
            "Query answered without document store"
        );
        Ok(QueryResponse { data: json!([]) })
    }

    async fn submit(
        &self,
        ctx: &RequestContext,
        request: SubmitRequest,
    ) -> AppResult<SubmitResponse> {
        let source = request
            .source
            .clone()
            .unwrap_or_else(|| ctx.conn_id.to_string());
        let op_count = request.op.len();

        self.service
            .relay_document_op(
                &request.collection,
                Some(&request.document),
                Value::Array(request.op),
                &source,
                vec![ctx.conn_id],
            )
            .await?;

        Ok(SubmitResponse {
            data: json!({ "applied": op_count }),
        })
    }
}
