//! Client configuration, its builder, and validation.

// self
use crate::{_prelude::*, http, session::RetryResetPolicy};

/// Errors raised while constructing or validating a [`ClientConfig`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum ConfigValidationError {
	/// The base URL must be an `http` or `https` URL that can carry a path.
	#[error("The base URL must be an http(s) URL that can carry a path: {url}.")]
	InvalidBaseUrl {
		/// Base URL that failed validation.
		url: String,
	},
	/// A required text field was empty.
	#[error("The `{field}` setting must not be empty.")]
	Empty {
		/// Name of the empty field.
		field: &'static str,
	},
	/// The retry ceiling must be positive.
	#[error("The `max_retries` setting must be greater than zero.")]
	ZeroRetries,
	/// A configured waiter timeout must be positive.
	#[error("The `waiter_timeout_ms` setting must be greater than zero when present.")]
	ZeroWaiterTimeout,
	/// The refresh path does not resolve against the base URL.
	#[error("The refresh path `{path}` does not resolve against the base URL.")]
	InvalidRefreshPath {
		/// Path that failed to resolve.
		path: String,
	},
}

/// Immutable settings consumed by [`SessionClient`](crate::client::SessionClient).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
	/// Base URL every relative request target is joined onto.
	pub base_url: Url,
	/// Path of the refresh endpoint, relative to the base URL.
	#[serde(default = "ClientConfig::default_refresh_path")]
	pub refresh_path: String,
	/// Ceiling on refresh attempts before the session is terminated.
	#[serde(default = "ClientConfig::default_max_retries")]
	pub max_retries: u32,
	/// Storage slot holding the access credential.
	#[serde(default = "ClientConfig::default_credential_slot")]
	pub credential_slot: String,
	/// JSON field carrying the token in refresh and login responses.
	#[serde(default = "ClientConfig::default_token_field")]
	pub token_field: String,
	/// Deadline for requests parked behind an in-flight refresh; `None` waits forever.
	#[serde(default = "ClientConfig::default_waiter_timeout_ms")]
	pub waiter_timeout_ms: Option<u64>,
	/// When the retry counter returns to zero.
	#[serde(default)]
	pub retry_reset: RetryResetPolicy,
}
impl ClientConfig {
	/// Default refresh path.
	pub const DEFAULT_REFRESH_PATH: &str = "refresh";
	/// Default retry ceiling.
	pub const DEFAULT_MAX_RETRIES: u32 = 3;
	/// Default credential slot name.
	pub const DEFAULT_CREDENTIAL_SLOT: &str = "access_token";
	/// Default JSON token field.
	pub const DEFAULT_TOKEN_FIELD: &str = "token";
	/// Default waiter deadline in milliseconds.
	pub const DEFAULT_WAITER_TIMEOUT_MS: u64 = 30_000;

	/// Creates a new builder for the provided base URL.
	pub fn builder(base_url: Url) -> ClientConfigBuilder {
		ClientConfigBuilder::new(base_url)
	}

	/// Parses a JSON document and validates the result.
	pub fn from_json(raw: &str) -> Result<Self> {
		let mut de = serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| Error::Decode { source })?;

		config.validate()?;

		Ok(config)
	}

	/// Absolute URL of the refresh endpoint.
	pub fn refresh_url(&self) -> Result<Url, ConfigValidationError> {
		http::resolve_target(&self.base_url, &self.refresh_path).map_err(|_| {
			ConfigValidationError::InvalidRefreshPath { path: self.refresh_path.clone() }
		})
	}

	/// Deadline for parked waiters, if any.
	pub fn waiter_timeout(&self) -> Option<Duration> {
		self.waiter_timeout_ms
			.map(|ms| Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX)))
	}

	/// Validates invariants for the configuration.
	pub fn validate(&self) -> Result<(), ConfigValidationError> {
		validate_base_url(&self.base_url)?;
		validate_non_empty("refresh_path", &self.refresh_path)?;
		validate_non_empty("credential_slot", &self.credential_slot)?;
		validate_non_empty("token_field", &self.token_field)?;

		if self.max_retries == 0 {
			return Err(ConfigValidationError::ZeroRetries);
		}
		if self.waiter_timeout_ms == Some(0) {
			return Err(ConfigValidationError::ZeroWaiterTimeout);
		}

		self.refresh_url()?;

		Ok(())
	}

	fn default_refresh_path() -> String {
		Self::DEFAULT_REFRESH_PATH.into()
	}

	fn default_max_retries() -> u32 {
		Self::DEFAULT_MAX_RETRIES
	}

	fn default_credential_slot() -> String {
		Self::DEFAULT_CREDENTIAL_SLOT.into()
	}

	fn default_token_field() -> String {
		Self::DEFAULT_TOKEN_FIELD.into()
	}

	fn default_waiter_timeout_ms() -> Option<u64> {
		Some(Self::DEFAULT_WAITER_TIMEOUT_MS)
	}
}

/// Builder for [`ClientConfig`] values.
#[derive(Debug)]
pub struct ClientConfigBuilder {
	config: ClientConfig,
}
impl ClientConfigBuilder {
	/// Creates a new builder seeded with defaults and the provided base URL.
	pub fn new(base_url: Url) -> Self {
		Self {
			config: ClientConfig {
				base_url,
				refresh_path: ClientConfig::default_refresh_path(),
				max_retries: ClientConfig::DEFAULT_MAX_RETRIES,
				credential_slot: ClientConfig::default_credential_slot(),
				token_field: ClientConfig::default_token_field(),
				waiter_timeout_ms: ClientConfig::default_waiter_timeout_ms(),
				retry_reset: RetryResetPolicy::default(),
			},
		}
	}

	/// Overrides the refresh endpoint path.
	pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
		self.config.refresh_path = path.into();

		self
	}

	/// Overrides the retry ceiling.
	pub fn max_retries(mut self, max_retries: u32) -> Self {
		self.config.max_retries = max_retries;

		self
	}

	/// Overrides the credential slot name.
	pub fn credential_slot(mut self, slot: impl Into<String>) -> Self {
		self.config.credential_slot = slot.into();

		self
	}

	/// Overrides the JSON token field.
	pub fn token_field(mut self, field: impl Into<String>) -> Self {
		self.config.token_field = field.into();

		self
	}

	/// Overrides the waiter deadline; `None` lets parked requests wait indefinitely.
	///
	/// The deadline is kept in whole milliseconds, rounded up.
	pub fn waiter_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.config.waiter_timeout_ms = timeout.map(|value| {
			let millis = value.whole_milliseconds()
				+ i128::from(value.subsec_nanoseconds() % 1_000_000 > 0);

			u64::try_from(millis.max(0)).unwrap_or(u64::MAX)
		});

		self
	}

	/// Overrides the retry reset policy.
	pub fn retry_reset(mut self, policy: RetryResetPolicy) -> Self {
		self.config.retry_reset = policy;

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<ClientConfig, ConfigValidationError> {
		self.config.validate()?;

		Ok(self.config)
	}
}

fn validate_base_url(url: &Url) -> Result<(), ConfigValidationError> {
	if matches!(url.scheme(), "http" | "https") && !url.cannot_be_a_base() {
		Ok(())
	} else {
		Err(ConfigValidationError::InvalidBaseUrl { url: url.to_string() })
	}
}

fn validate_non_empty(field: &'static str, value: &str) -> Result<(), ConfigValidationError> {
	if value.trim().is_empty() { Err(ConfigValidationError::Empty { field }) } else { Ok(()) }
}
