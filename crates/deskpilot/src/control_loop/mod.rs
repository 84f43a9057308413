//! The control loop: one snapshot plus history in, exactly one action out,
//! per step, until the run is done, exhausted, fatal or cancelled.
//!
//! ```text
//! Init -> Perceiving -> Deciding -> Acting -> Evaluating -+-> Perceiving
//!                                                         +-> HumanWait -> Perceiving
//!                                                         +-> Done | Exhausted | Fatal
//! (any state) -> Cancelled, observed between steps
//! ```

pub mod policy;
pub mod run;
pub mod state;

pub use policy::{FailurePolicy, ParseVerdict};
pub use run::{Run, RunOptions, RunOutcome, SuspendedRun};
pub use state::{LoopState, RunReport, StepRecord, Termination};
