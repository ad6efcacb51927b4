pub mod agent;
pub mod config;
pub mod error;
pub mod executor;
pub mod model;
pub mod overseer;
pub mod planner;
pub mod server;
pub mod session;
pub mod types;
pub mod world;

pub use agent::{Driver, run_command};
pub use config::Config;
pub use error::{AgentError, ExecutionError};
pub use types::{
    ActionOutcome, ActionProposal, CommandOutcome, History, IntentMap, Session, Termination,
    VerificationResult, WorldModel,
};
