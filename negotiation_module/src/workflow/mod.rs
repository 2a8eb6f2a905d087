//! The appointment-negotiation core: types, persistence, the pure
//! calculators, and the state-machine engine that ties them to the external
//! collaborators.

pub mod availability;
pub mod collaborators;
pub mod compose;
pub mod contact_match;
pub mod engine;
pub mod interpret;
pub mod store;
pub mod types;


pub use collaborators::{
    BusyInterval, CalendarService, ChatMessage, ConnectorError, ContactCandidate, CrmService,
    EmailService, FunctionCall, LlmService, ToolCall,
};
pub use engine::{CreateWorkflowRequest, WorkflowEngine};
pub use store::WorkflowStore;
pub use types::{
    HistoryRecord, NegotiationWorkflow, Slot, WorkflowError, WorkflowStatus,
};
