pub mod orchestrator;
pub mod record;
pub mod session;

pub use orchestrator::AnalysisOrchestrator;
pub use record::{RecordId, RecordIdentity, RecordPhase, ReviewRecord};
pub use session::{ReviewSession, SaveReport};
