//! Bearer credential model and the attacher that stamps it onto outbound requests.

// crates.io
use ::http::{HeaderValue, header::AUTHORIZATION};
// self
use crate::{_prelude::*, http::PendingRequest};

const CREDENTIAL_MAX_LEN: usize = 8 * 1024;

/// Error returned when a credential value cannot be used as a bearer token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum CredentialError {
	/// The token was empty.
	#[error("Credential must not be empty.")]
	Empty,
	/// The token exceeds the supported length.
	#[error("Credential exceeds {max} bytes.")]
	TooLong {
		/// Maximum allowed length.
		max: usize,
	},
	/// The token contains bytes that are not valid in an HTTP header.
	#[error("Credential contains whitespace or non-visible characters.")]
	InvalidCharacters,
}

/// Opaque bearer token; redacted in every formatter.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Credential {
	token: String,
	header: HeaderValue,
}
impl Credential {
	/// Validates and wraps a bearer token.
	pub fn new(value: impl Into<String>) -> Result<Self, CredentialError> {
		let token = value.into();

		validate(&token)?;

		let mut header = HeaderValue::from_str(&format!("Bearer {token}"))
			.map_err(|_| CredentialError::InvalidCharacters)?;

		header.set_sensitive(true);

		Ok(Self { token, header })
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.token
	}

	/// Returns the precomputed `Bearer <token>` header value.
	pub fn authorization(&self) -> &HeaderValue {
		&self.header
	}
}
impl PartialEq for Credential {
	fn eq(&self, other: &Self) -> bool {
		self.token == other.token
	}
}
impl Eq for Credential {}
impl TryFrom<String> for Credential {
	type Error = CredentialError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl From<Credential> for String {
	fn from(value: Credential) -> Self {
		value.token
	}
}
impl FromStr for Credential {
	type Err = CredentialError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("Credential").field(&"<redacted>").finish()
	}
}
impl Display for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Returns `request` with `Authorization: Bearer <token>` set when a credential exists.
///
/// Without a credential the request is returned untouched, including any `Authorization`
/// header the caller set on purpose.
pub fn attach_credential(
	mut request: PendingRequest,
	credential: Option<&Credential>,
) -> PendingRequest {
	if let Some(credential) = credential {
		request.headers.insert(AUTHORIZATION, credential.authorization().clone());
	}

	request
}

fn validate(token: &str) -> Result<(), CredentialError> {
	if token.is_empty() {
		return Err(CredentialError::Empty);
	}
	if token.len() > CREDENTIAL_MAX_LEN {
		return Err(CredentialError::TooLong { max: CREDENTIAL_MAX_LEN });
	}
	if !token.bytes().all(|b| b.is_ascii_graphic()) {
		return Err(CredentialError::InvalidCharacters);
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn credential_formatters_redact() {
		let credential = Credential::new("super-secret").expect("Fixture token should be valid.");

		assert_eq!(format!("{credential:?}"), "Credential(\"<redacted>\")");
		assert_eq!(format!("{credential}"), "<redacted>");
		assert!(credential.authorization().is_sensitive());
	}

	#[test]
	fn rejects_unusable_tokens() {
		assert_eq!(Credential::new("").unwrap_err(), CredentialError::Empty);
		assert_eq!(Credential::new("two words").unwrap_err(), CredentialError::InvalidCharacters);
		assert_eq!(Credential::new("tab\there").unwrap_err(), CredentialError::InvalidCharacters);
		assert!(matches!(
			Credential::new("x".repeat(CREDENTIAL_MAX_LEN + 1)),
			Err(CredentialError::TooLong { .. })
		));
	}

	#[test]
	fn attaches_bearer_header_when_present() {
		let credential = Credential::new("abc.def").expect("Fixture token should be valid.");
		let request = attach_credential(PendingRequest::get("/items"), Some(&credential));

		assert_eq!(
			request.headers.get(AUTHORIZATION).map(|value| value.as_bytes()),
			Some(&b"Bearer abc.def"[..]),
		);
	}

	#[test]
	fn leaves_request_untouched_without_credential() {
		let request = PendingRequest::get("/items")
			.header(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
		let attached = attach_credential(request, None);

		assert_eq!(
			attached.headers.get(AUTHORIZATION).map(|value| value.as_bytes()),
			Some(&b"Basic Zm9vOmJhcg=="[..]),
		);
	}

	#[test]
	fn serde_round_trips_as_plain_string() {
		let credential: Credential =
			serde_json::from_str("\"token-1\"").expect("Token JSON should deserialize.");

		assert_eq!(credential.expose(), "token-1");
		assert!(serde_json::from_str::<Credential>("\"\"").is_err());
	}
}
