//! Intent routing and command execution for Cirrus.
//!
//! A message reaches [`router::IntentRouter`], which reads the session state and
//! either constructs a configuration, edits the existing one, or answers
//! generically. Provider commands are generated and run by
//! [`executor::CommandEngine`], which records each one in a ledger.
//!
//! Natural-language generation sits behind [`llm::TextGenerator`] so every
//! component can be driven by a scripted generator in tests.

pub mod audit;
pub mod deploy;
pub mod executor;
pub mod intent;
pub mod llm;
pub mod orchestration;
pub mod process;
pub mod prompts;
pub mod refine;
pub mod router;
pub mod runtime;
pub mod tokenize;

pub use deploy::{CommandDeployer, DeployError, Deployer, DeploymentReport, DeploymentService};
pub use executor::{CommandEngine, EngineSettings, ExecutionError};
pub use llm::{GenerationError, GenerationRequest, TextGenerator};
pub use router::{IntentRouter, RouteError, RouteOutcome};
pub use runtime::{AgentRuntime, RuntimeError};
