//! Agent orchestration engine: a retrying decision-service client, a two-phase
//! decision protocol, and a mission engine that runs approved plans in an
//! isolated browsing session.

pub mod brain;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod mission;
pub mod plan;
pub mod prompts;
pub mod protocol;
pub mod session;
pub mod template;
pub mod types;
pub mod wait;

pub use brain::{DecisionService, GeminiClient, RetryPolicy};
pub use config::Settings;
pub use diagnostics::{Diagnostic, DiagnosticLog};
pub use error::{MissionError, ServiceError, StepError};
pub use mission::{MissionEngine, MissionHandle, MissionOutcome, Progress, ProgressSink};
pub use plan::{Command, Plan, Step};
pub use protocol::{ActionProtocol, Decision, Response};
pub use session::{
    ActionKind, ActionResult, PageContext, PageContextProvider, SessionHandle, SessionProvider,
};
pub use types::{ChatMessage, ContextValue, ExecutionContext, SecretEntry, SecretVault};
