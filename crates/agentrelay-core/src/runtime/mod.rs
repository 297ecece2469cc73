pub mod readiness;
pub mod supervisor;

pub use readiness::{LineBuffer, Readiness, StdoutDecoder, parse_readiness_line};
pub use supervisor::{
    ExitPhase, RuntimeEvent, RuntimeStatus, RuntimeSupervisor, StartOutcome, SupervisorError,
};
