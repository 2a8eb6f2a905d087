//! Appointment negotiation service for a financial advisor.
//!
//! A negotiation is a multi-round email exchange: look the contact up in the
//! CRM, offer open calendar slots, interpret the reply, and either book the
//! chosen slot or offer replacements when it was taken in the meantime. The
//! state machine lives in [`workflow`]; the HTTP surface, connectors, and
//! background sweeper live in [`service`].

pub mod service;
pub mod workflow;

pub use service::{run_server, ServiceConfig};
pub use workflow::{
    CreateWorkflowRequest, NegotiationWorkflow, WorkflowEngine, WorkflowError, WorkflowStatus,
    WorkflowStore,
};
