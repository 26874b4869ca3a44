//! 核心编排层：错误与恢复、阶段状态、体征、步数调节、会话与注册表、快照

pub mod error;
pub mod governor;
pub mod recovery;
pub mod registry;
pub mod results;
pub mod session;
pub mod session_supervisor;
pub mod snapshot;
pub mod state;
pub mod vitals;

pub use error::{AgentError, CapabilityError, RecoveryAction};
pub use governor::{
    Governor, GovernorInput, GovernorVerdict, Intervention, InterventionAction,
    InterventionPriority, IterationBudget,
};
pub use recovery::RecoveryEngine;
pub use registry::{RegistryStats, SessionRegistry};
pub use results::{
    ApprovalStatus, CompletionStatus, Complexity, EvalResult, ExecResult, FetchedResource,
    GatherResult, NextAction, PhaseResult, PlanResult, RespondResult, ToolOutcome,
};
pub use session::{PhaseContext, Session, TaskItem, TaskList, TaskStatus};
pub use session_supervisor::SessionSupervisor;
pub use snapshot::SessionSnapshot;
pub use state::{Phase, SessionStatus, TerminalReason};
pub use vitals::{VitalSignal, Vitals};
