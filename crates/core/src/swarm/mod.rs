//! # Swarm Orchestration
//!
//! Session plumbing shared by every agent.
//!
//! ## Session Flow
//!
//! ```text
//! Coordinator::start ─┬─ Session (id, cancellation scope)
//!                     ├─ EventBus ─ Emitter (cloned per unit) ──► EventStream
//!                     └─ agent skill ─ BoundedScheduler ─ units
//! ```

pub mod bus;
pub mod coordinator;
pub mod events;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod session;

pub use bus::{Emitter, EventBus, EventStream};
pub use coordinator::{AgentRequest, Coordinator, CoordinatorConfig};
pub use events::{AgentKind, AgentOutput, StreamEvent};
pub use pipeline::{ResolutionPipeline, ResolutionState, Verdict};
pub use progress::{EstimatedPhase, PhaseEstimator};
pub use scheduler::{BatchReport, BoundedScheduler, UnitError, UnitResult};
pub use session::{Session, SessionContext};
