pub mod engine;
pub mod memory;
mod predicate;
pub mod simulate;

pub use engine::{EngineError, EventReport, ExecutionLog, LedgerOutcome, LedgerUpdate, RuleEngine, RuleRepository};
pub use simulate::{EventHistory, SimulationError, SimulationReport, SimulationTarget, Simulator};
