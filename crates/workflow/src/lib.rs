//! Marketing automation workflows: timed multi-step customer journeys with
//! email, SMS, webhook and branching steps, driven by a periodic scheduler
//! tick that claims due members and runs them in isolation.

pub mod advancer;
pub mod demo;
pub mod engine;
pub mod enrollment;
pub mod evaluator;
pub mod executor;
pub mod goals;
pub mod memory;
pub mod performance;
pub mod scheduler;
pub mod state_machine;
pub mod store;
pub mod timing;
pub mod types;

pub use engine::AutomationEngine;
pub use executor::{Channels, StepExecutor, StepOutcome};
pub use memory::MemoryStore;
pub use scheduler::{MemberFailure, TickReport};
pub use store::WorkflowStore;
pub use timing::{Clock, ManualClock, SystemClock};
