//! GPU-gated assistant gateway: readiness probing, the tool-calling
//! loop backing `ask_context`, and rate/budget accounting for external
//! metadata lookups (spec §4.9).

pub mod apiguard;
pub mod gate;
pub mod gpu;
pub mod session;

pub use apiguard::{ApiGuard, ProviderLimits};
pub use gate::{AssistantGate, GateStatus};
pub use gpu::GpuInfo;
pub use session::{
    AskResponse, AskStatus, AssistantSession, AssistantSessions, ChatMessage, ChatRuntime, ModelTurn, NullRuntime,
    ToolCall, ToolDispatcher, ToolLogEntry,
};
