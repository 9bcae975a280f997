//! Client-level error types shared across the session, transport, and store layers.

// self
use crate::_prelude::*;

/// Client-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical client error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// The session ended and must be re-established with a fresh login.
	#[error(transparent)]
	Session(#[from] SessionError),

	/// Backend answered with a non-success status that the refresh path does not handle.
	#[error("Request failed with HTTP status {status}.")]
	Status {
		/// HTTP status code returned by the backend.
		status: u16,
		/// Raw response body, kept for caller-side display.
		body: Vec<u8>,
	},
	/// A parked request gave up waiting for the in-flight refresh.
	#[error("Timed out after {waited} waiting for the credential refresh to settle.")]
	WaiterTimeout {
		/// How long the request stayed parked.
		waited: Duration,
	},
	/// Refresh or login response carried no usable token field.
	#[error("Response body has no string `{field}` field.")]
	MissingToken {
		/// JSON field that was expected.
		field: String,
	},
	/// Response body could not be decoded into the requested type.
	#[error("Response body could not be decoded.")]
	Decode {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
}
impl Error {
	/// Returns `true` when the error ends the session and the caller must re-authenticate.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Session(_))
	}

	/// Returns the HTTP status carried by [`Error::Status`], if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Status { status, .. } => Some(*status),
			_ => None,
		}
	}
}

impl From<crate::config::ConfigValidationError> for Error {
	fn from(e: crate::config::ConfigValidationError) -> Self {
		Self::Config(e.into())
	}
}
impl From<crate::credential::CredentialError> for Error {
	fn from(e: crate::credential::CredentialError) -> Self {
		Self::Config(e.into())
	}
}

/// Why a session was terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
	/// The refresh endpoint rejected the session or could not be reached.
	RefreshFailed,
	/// The retry budget was spent before another refresh could start.
	RetriesExhausted,
	/// The caller logged out explicitly.
	LoggedOut,
}
impl TerminationReason {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::RefreshFailed => "refresh_failed",
			Self::RetriesExhausted => "retries_exhausted",
			Self::LoggedOut => "logged_out",
		}
	}
}
impl Display for TerminationReason {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Terminal authentication failures; the session cannot recover without a new login.
#[derive(Debug, ThisError)]
pub enum SessionError {
	/// The session is already terminated, so the request was never dispatched.
	#[error("Session has ended; log in again.")]
	LoggedOut,
	/// The refresh budget ran out before another refresh could start.
	#[error("Maximum credential refresh retries ({max_retries}) reached.")]
	RetriesExhausted {
		/// Configured ceiling.
		max_retries: u32,
	},
	/// The refresh call itself failed.
	#[error("Credential refresh failed.")]
	RefreshFailed {
		/// Underlying refresh failure.
		#[source]
		source: Box<Error>,
	},
	/// The request was parked behind a refresh that ended the session.
	#[error("Session was terminated while the request waited for a refresh: {reason}.")]
	Terminated {
		/// Reason recorded by the terminating flow.
		reason: TerminationReason,
	},
}
impl SessionError {
	/// Wraps a refresh failure.
	pub fn refresh_failed(source: impl Into<Error>) -> Self {
		Self::RefreshFailed { source: Box::new(source.into()) }
	}
}

/// Configuration and validation failures raised by the client.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Client configuration failed validation.
	#[error(transparent)]
	Validation(#[from] crate::config::ConfigValidationError),
	/// Credential value is not usable as a bearer token.
	#[error(transparent)]
	Credential(#[from] crate::credential::CredentialError),
	/// Request target could not be resolved against the base URL.
	#[error("Request target `{target}` is not a valid URL.")]
	InvalidTarget {
		/// Target as supplied by the caller.
		target: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	Encode(#[from] serde_json::Error),
	/// The builder was finished without a transport.
	#[error("No HTTP transport was configured.")]
	MissingTransport,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the backend.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the backend.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
