//! Client protocol handling: dispatch table and collaborator seams.

pub mod collaborator;
pub mod dispatcher;

pub use collaborator::{
    DetachedDocumentService, DocumentService, PresenceService, QueryResponse, RequestContext,
    SubmitResponse,
};
pub use dispatcher::Dispatcher;
