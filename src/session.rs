//! Session state: refresh coordination, the retry budget, and termination.

pub mod coordinator;
pub mod governor;
pub mod terminator;

mod metrics;

pub use coordinator::{
	Admission, FlightFailure, FlightStanding, RefreshFlight, ReplayBatch, SessionCoordinator,
	SessionPhase, Termination, Waiter, Wake,
};
pub use governor::{RetryGovernor, RetryResetPolicy};
pub use metrics::SessionMetrics;
pub use terminator::{SessionEnded, SessionObserver, SessionStatus, SessionTerminator};
