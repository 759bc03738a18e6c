pub mod admission_governor;
pub mod dependency_resolver;
pub mod emergent_monitor;
pub mod rolling_history;
pub mod strategies;
pub mod tier_validator;

pub use admission_governor::{
    ActiveTaskRegistry, AdmissionRejection, AdmissionRequest, AdmissionTicket, GovernorSignal,
    LongRunningOutcome, ShutdownReport, TerminalOutcome, TimeoutOutcome,
};
pub use dependency_resolver::DependencyResolver;
pub use emergent_monitor::{EmergentMonitor, PatternReport};
pub use rolling_history::{HistoryQuery, RollingHistory};
pub use strategies::{StrategyBackends, StrategyRegistry};
pub use tier_validator::{TierInputValidator, ValidationRejection};
