pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod ledger;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::configuration::{Configuration, ResourceDeclaration};
pub use domain::credentials::Credentials;
pub use domain::session::{Session, SessionId, SessionState, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowTransitionError, SessionEvent, SessionFlow, TransitionOutcome};
pub use ledger::{CommandId, CommandLedger, CommandRecord, LedgerError};
