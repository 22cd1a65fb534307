//! Realtime admin handlers.
//!
//! Backend services call these to push changes to connected clients on
//! every node. Authentication happens in front of this service.

use axum::Json;
use axum::extract::{Path, State};
use uuid::Uuid;

use tablehub_core::error::AppError;
use tablehub_realtime::channel::{
    ChannelTarget, TABLE_META_DOCUMENT, field_collection, record_collection, table_collection,
    view_collection,
};
use tablehub_realtime::service::{BulkReport, RealtimeStats};

use crate::dto::request::{
    BulkOpsRequest, ChannelBroadcastRequest, DocumentOpRequest, FieldOpRequest, RecordOpRequest,
    SystemMessageRequest, TableMetaRequest, UserBroadcastRequest, ViewOpRequest,
};
use crate::dto::response::{
    ApiResponse, CursorsResponse, PresenceRemovedResponse, PresenceResponse, PublishResponse,
};
use crate::state::AppState;

type Published = Result<Json<ApiResponse<PublishResponse>>, AppError>;

fn published(targets: Vec<String>) -> Published {
    Ok(Json(ApiResponse::ok(PublishResponse { targets })))
}

fn require(value: &str, name: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{name} is required")));
    }
    Ok(())
}

fn document_targets(collection: &str, document: &str) -> Vec<String> {
    vec![collection.to_string(), format!("{collection}.{document}")]
}

/// GET /api/v1/ws/stats
pub async fn stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RealtimeStats>>, AppError> {
    let stats = state.realtime.stats().await?;
    Ok(Json(ApiResponse::ok(stats)))
}

/// POST /api/v1/ws/broadcast/channel
pub async fn broadcast_channel(
    State(state): State<AppState>,
    Json(req): Json<ChannelBroadcastRequest>,
) -> Published {
    if req.channel.trim().is_empty() {
        return Err(AppError::validation("channel is required"));
    }

    state
        .realtime
        .service
        .broadcast_to_channel(&req.channel, req.message, req.exclude)
        .await?;

    published(vec![req.channel])
}

/// POST /api/v1/ws/broadcast/user
pub async fn broadcast_user(
    State(state): State<AppState>,
    Json(req): Json<UserBroadcastRequest>,
) -> Published {
    if req.user_id.trim().is_empty() {
        return Err(AppError::validation("user_id is required"));
    }

    state
        .realtime
        .service
        .broadcast_to_user(&req.user_id, req.message)
        .await?;

    published(vec![req.user_id])
}

/// POST /api/v1/ws/broadcast/system
pub async fn broadcast_system(
    State(state): State<AppState>,
    Json(req): Json<SystemMessageRequest>,
) -> Published {
    if req.message.trim().is_empty() {
        return Err(AppError::validation("message is required"));
    }

    state
        .realtime
        .service
        .publish_system_message(&req.message, &req.level)
        .await?;

    published(vec!["*".to_string()])
}

/// POST /api/v1/ws/publish/document
pub async fn publish_document(
    State(state): State<AppState>,
    Json(req): Json<DocumentOpRequest>,
) -> Published {
    let target = ChannelTarget::new(&req.collection, req.document.as_deref())?;

    state
        .realtime
        .service
        .publish_document_op(&target.collection, target.document.as_deref(), req.operation)
        .await?;

    let mut targets = vec![target.collection.clone()];
    if target.document.is_some() {
        targets.push(target.channel_name());
    }
    published(targets)
}

/// POST /api/v1/ws/publish/record
pub async fn publish_record(
    State(state): State<AppState>,
    Json(req): Json<RecordOpRequest>,
) -> Published {
    require(&req.table_id, "table_id")?;
    require(&req.record_id, "record_id")?;

    state
        .realtime
        .service
        .publish_record_op(&req.table_id, &req.record_id, req.operation)
        .await?;

    published(document_targets(&record_collection(&req.table_id), &req.record_id))
}

/// POST /api/v1/ws/publish/view
pub async fn publish_view(
    State(state): State<AppState>,
    Json(req): Json<ViewOpRequest>,
) -> Published {
    require(&req.table_id, "table_id")?;
    require(&req.view_id, "view_id")?;

    state
        .realtime
        .service
        .publish_view_op(&req.table_id, &req.view_id, req.operation)
        .await?;

    published(document_targets(&view_collection(&req.table_id), &req.view_id))
}

/// POST /api/v1/ws/publish/field
pub async fn publish_field(
    State(state): State<AppState>,
    Json(req): Json<FieldOpRequest>,
) -> Published {
    require(&req.table_id, "table_id")?;
    require(&req.field_id, "field_id")?;

    state
        .realtime
        .service
        .publish_field_op(&req.table_id, &req.field_id, req.operation)
        .await?;

    published(document_targets(&field_collection(&req.table_id), &req.field_id))
}

/// POST /api/v1/ws/publish/bulk
pub async fn publish_bulk(
    State(state): State<AppState>,
    Json(req): Json<BulkOpsRequest>,
) -> Json<ApiResponse<BulkReport>> {
    let report = state
        .realtime
        .service
        .publish_bulk_ops(req.operations)
        .await;
    Json(ApiResponse::ok(report))
}

/// POST /api/v1/ws/publish/table-meta
pub async fn publish_table_meta(
    State(state): State<AppState>,
    Json(req): Json<TableMetaRequest>,
) -> Published {
    require(&req.table_id, "table_id")?;

    state
        .realtime
        .service
        .publish_table_meta_update(&req.table_id)
        .await?;

    published(document_targets(
        &table_collection(&req.table_id),
        TABLE_META_DOCUMENT,
    ))
}

/// GET /api/v1/ws/presence/{collection}
pub async fn presence(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Json<ApiResponse<PresenceResponse>> {
    let entries = state.realtime.presence.list(&collection);
    Json(ApiResponse::ok(PresenceResponse {
        collection,
        entries,
    }))
}

/// DELETE /api/v1/ws/presence/{collection}/{user_id}
pub async fn remove_presence(
    State(state): State<AppState>,
    Path((collection, user_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<PresenceRemovedResponse>>, AppError> {
    let removed = state.realtime.presence.leave(&collection, &user_id).await?;
    Ok(Json(ApiResponse::ok(PresenceRemovedResponse {
        collection,
        user_id,
        removed,
    })))
}

/// GET /api/v1/ws/cursors/{collection}
pub async fn cursors(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Json<ApiResponse<CursorsResponse>> {
    let cursors = state.realtime.presence.cursors(&collection);
    Json(ApiResponse::ok(CursorsResponse {
        collection,
        cursors,
    }))
}

/// DELETE /api/v1/ws/connections/{conn_id}
pub async fn disconnect(
    State(state): State<AppState>,
    Path(conn_id): Path<String>,
) -> Published {
    let id = Uuid::parse_str(&conn_id)
        .map_err(|_| AppError::validation(format!("invalid connection id: {conn_id}")))?;

    state.realtime.service.disconnect(id).await?;

    published(vec![id.to_string()])
}
