//! Transport primitives for authenticated backend calls.
//!
//! The module exposes [`HttpTransport`], the client's only dependency on an HTTP stack, along
//! with the request/response types that flow through it. [`PendingRequest`] is what callers
//! build; it carries a relative or absolute target plus the single-use `retried` marker the
//! refresh path consults. The client resolves it into a [`TransportRequest`] right before
//! dispatch, so replays always pick up the latest credential and base URL.

// crates.io
use ::http::{
	HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
	header::{CONTENT_TYPE, RETRY_AFTER},
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	credential::Credential,
	error::{ConfigError, TransportError},
};

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP stacks capable of executing a fully-formed request.
///
/// Implementations return every response that reached the wire as `Ok`, whatever its status.
/// Classification (success, unauthorized, other failure) belongs to the session client, so a
/// transport only fails for network or IO problems.
pub trait HttpTransport
where
	Self: Send + Sync,
{
	/// Sends `request` and resolves with the backend's response.
	fn send(&self, request: TransportRequest) -> TransportFuture<'_>;
}

/// Outbound request as captured by the caller, before credential attachment and URL resolution.
#[derive(Clone, Debug)]
pub struct PendingRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute URL or a path relative to the configured base URL.
	pub target: String,
	/// Request headers.
	pub headers: HeaderMap,
	/// Optional request body.
	pub body: Option<Vec<u8>>,
	/// Set once the request has gone through the refresh path.
	pub retried: bool,
}
impl PendingRequest {
	/// Creates a request for the provided method and target.
	pub fn new(method: Method, target: impl Into<String>) -> Self {
		Self {
			method,
			target: target.into(),
			headers: HeaderMap::new(),
			body: None,
			retried: false,
		}
	}

	/// Shorthand for a `GET` request.
	pub fn get(target: impl Into<String>) -> Self {
		Self::new(Method::GET, target)
	}

	/// Shorthand for a `POST` request.
	pub fn post(target: impl Into<String>) -> Self {
		Self::new(Method::POST, target)
	}

	/// Shorthand for a `PUT` request.
	pub fn put(target: impl Into<String>) -> Self {
		Self::new(Method::PUT, target)
	}

	/// Shorthand for a `PATCH` request.
	pub fn patch(target: impl Into<String>) -> Self {
		Self::new(Method::PATCH, target)
	}

	/// Shorthand for a `DELETE` request.
	pub fn delete(target: impl Into<String>) -> Self {
		Self::new(Method::DELETE, target)
	}

	/// Sets or replaces a header.
	pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}

	/// Sets a raw body.
	pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = Some(body.into());

		self
	}

	/// Serializes `payload` as the JSON body and sets `Content-Type: application/json`.
	pub fn json<T>(mut self, payload: &T) -> Result<Self, ConfigError>
	where
		T: ?Sized + Serialize,
	{
		self.body = Some(serde_json::to_vec(payload)?);
		self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

		Ok(self)
	}

	/// Attaches `credential` as a bearer token; see [`crate::credential::attach_credential`].
	pub fn with_credential(self, credential: Option<&Credential>) -> Self {
		crate::credential::attach_credential(self, credential)
	}

	/// Resolves the target against `base` and produces the wire-level request.
	pub fn resolve(&self, base: &Url) -> Result<TransportRequest, ConfigError> {
		Ok(TransportRequest {
			method: self.method.clone(),
			url: resolve_target(base, &self.target)?,
			headers: self.headers.clone(),
			body: self.body.clone(),
		})
	}
}

/// Fully-formed request handed to an [`HttpTransport`].
#[derive(Clone, Debug)]
pub struct TransportRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute request URL.
	pub url: Url,
	/// Request headers, including `Authorization` when a credential was attached.
	pub headers: HeaderMap,
	/// Optional request body.
	pub body: Option<Vec<u8>>,
}

/// Response returned by an [`HttpTransport`].
#[derive(Clone, Debug)]
pub struct HttpResponse {
	/// Status line code.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Fully buffered body.
	pub body: Vec<u8>,
}
impl HttpResponse {
	/// Returns a builder for assembling responses in custom transports and tests.
	pub fn builder(status: StatusCode) -> HttpResponseBuilder {
		HttpResponseBuilder { status, headers: HeaderMap::new(), body: Vec::new() }
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		self.status.is_success()
	}

	/// Returns `true` when the backend rejected the credential.
	pub fn is_unauthorized(&self) -> bool {
		self.status == StatusCode::UNAUTHORIZED
	}

	/// Returns the body as UTF-8 text, replacing invalid sequences.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}

	/// Decodes the body as JSON, reporting the failing path on error.
	pub fn json<T>(&self) -> Result<T>
	where
		T: for<'de> Deserialize<'de>,
	{
		let mut de = serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(&mut de).map_err(|source| Error::Decode { source })
	}

	/// Parses the `Retry-After` header as delta-seconds or an RFC 2822 date.
	pub fn retry_after(&self) -> Option<Duration> {
		parse_retry_after(&self.headers)
	}

	pub(crate) fn into_status_error(self) -> Error {
		Error::Status { status: self.status.as_u16(), body: self.body }
	}
}

/// Builder for [`HttpResponse`] values.
#[derive(Debug)]
pub struct HttpResponseBuilder {
	status: StatusCode,
	headers: HeaderMap,
	body: Vec<u8>,
}
impl HttpResponseBuilder {
	/// Sets a header; values that are not valid header text are skipped.
	pub fn header(mut self, name: HeaderName, value: impl AsRef<str>) -> Self {
		if let Ok(value) = HeaderValue::from_str(value.as_ref()) {
			self.headers.insert(name, value);
		}

		self
	}

	/// Sets the body.
	pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = body.into();

		self
	}

	/// Finishes the response.
	pub fn build(self) -> HttpResponse {
		HttpResponse { status: self.status, headers: self.headers, body: self.body }
	}
}

/// [`HttpTransport`] backed by [`ReqwestClient`].
///
/// The refresh endpoint authenticates through a session cookie, so the default client keeps a
/// cookie store. Redirects are not followed; the session client needs to see the original
/// status to classify authorization failures.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Builds a transport with a cookie store and redirects disabled.
	pub fn new() -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder()
			.cookie_store(true)
			.redirect(reqwest::redirect::Policy::none())
			.build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn send(&self, request: TransportRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let TransportRequest { method, url, headers, body } = request;
			let mut builder = self.0.request(method, url).headers(headers);

			if let Some(body) = body {
				builder = builder.body(body);
			}

			let response = builder.send().await?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let body = response.bytes().await?.to_vec();

			Ok(HttpResponse { status, headers, body })
		})
	}
}

/// Joins `target` onto `base` with exactly one `/` between them, unless `target` is already an
/// absolute `http(s)` URL.
pub(crate) fn resolve_target(base: &Url, target: &str) -> Result<Url, ConfigError> {
	if let Ok(url) = Url::parse(target) {
		if matches!(url.scheme(), "http" | "https") {
			return Ok(url);
		}
	}

	let joined =
		format!("{}/{}", base.as_str().trim_end_matches('/'), target.trim_start_matches('/'));

	Url::parse(&joined)
		.map_err(|source| ConfigError::InvalidTarget { target: target.to_owned(), source })
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn base(value: &str) -> Url {
		Url::parse(value).expect("Base URL fixture should parse.")
	}

	#[test]
	fn relative_targets_join_with_a_single_slash() {
		let with_path = base("http://127.0.0.1:5000/api/");

		assert_eq!(
			resolve_target(&with_path, "/items").expect("Target should resolve.").as_str(),
			"http://127.0.0.1:5000/api/items",
		);
		assert_eq!(
			resolve_target(&base("http://127.0.0.1:5000"), "refresh")
				.expect("Target should resolve.")
				.as_str(),
			"http://127.0.0.1:5000/refresh",
		);
	}

	#[test]
	fn absolute_targets_bypass_the_base() {
		let resolved = resolve_target(&base("http://a.example.com"), "https://b.example.com/x")
			.expect("Absolute target should be accepted.");

		assert_eq!(resolved.as_str(), "https://b.example.com/x");
	}

	#[test]
	fn json_body_sets_content_type() {
		let request = PendingRequest::post("/inspections")
			.json(&serde_json::json!({ "meter": 7 }))
			.expect("JSON payload should serialize.");

		assert_eq!(request.body.as_deref(), Some(&b"{\"meter\":7}"[..]));
		assert_eq!(
			request.headers.get(CONTENT_TYPE).map(|value| value.as_bytes()),
			Some(&b"application/json"[..]),
		);
		assert!(!request.retried);
	}

	#[test]
	fn response_helpers_decode_and_report_paths() {
		#[derive(Debug, Deserialize)]
		struct Payload {
			#[allow(dead_code)]
			token: String,
		}

		let response = HttpResponse::builder(StatusCode::OK).body("{\"token\":5}").build();
		let err = response.json::<Payload>().expect_err("Numeric token should fail to decode.");

		match err {
			Error::Decode { source } => assert_eq!(source.path().to_string(), "token"),
			other => panic!("Unexpected error variant: {other:?}."),
		}
	}

	#[test]
	fn retry_after_accepts_delta_seconds() {
		let response = HttpResponse::builder(StatusCode::TOO_MANY_REQUESTS)
			.header(RETRY_AFTER, "12")
			.build();

		assert_eq!(response.retry_after(), Some(Duration::seconds(12)));
		assert!(!response.is_success());
		assert!(!response.is_unauthorized());
	}
}
