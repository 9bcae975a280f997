// self
use crate::{_prelude::*, error::TerminationReason, obs::FlowKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// A span builder used by session flows.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Creates a new span tagged with the provided flow kind + stage.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("session_guard.flow", flow = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a debug event for a coordinator phase change.
pub fn trace_phase(from: &'static str, to: &'static str) {
	#[cfg(feature = "tracing")]
	tracing::debug!(from, to, "session phase changed");

	#[cfg(not(feature = "tracing"))]
	let _ = (from, to);
}

/// Emits a debug event when a request parks behind an in-flight refresh.
pub fn trace_parked(queue_len: usize) {
	#[cfg(feature = "tracing")]
	tracing::debug!(queue_len, "request parked behind in-flight refresh");

	#[cfg(not(feature = "tracing"))]
	let _ = queue_len;
}

/// Emits a warning when a session is terminated.
pub fn trace_termination(reason: TerminationReason, rejected_waiters: usize) {
	#[cfg(feature = "tracing")]
	tracing::warn!(reason = reason.as_str(), rejected_waiters, "session terminated");

	#[cfg(not(feature = "tracing"))]
	let _ = (reason, rejected_waiters);
}

/// Emits a warning when a termination could not clear the stored credential.
pub fn trace_clear_failure(reason: TerminationReason, error: &Error) {
	#[cfg(feature = "tracing")]
	tracing::warn!(reason = reason.as_str(), %error, "stored credential was not cleared");

	#[cfg(not(feature = "tracing"))]
	let _ = (reason, error);
}
