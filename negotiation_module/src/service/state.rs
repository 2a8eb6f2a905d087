use std::sync::Arc;

use crate::workflow::WorkflowEngine;

use super::config::ServiceConfig;
use super::inbound::InboundDispatcher;
use super::tools::ChatTools;

#[derive(Clone)]
pub(super) struct AppState {
    pub(super) config: Arc<ServiceConfig>,
    pub(super) engine: Arc<WorkflowEngine>,
    pub(super) dispatcher: Arc<InboundDispatcher>,
    pub(super) chat: Arc<ChatTools>,
}
