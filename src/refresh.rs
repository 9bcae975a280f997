//! Credential refresh contract and the default endpoint-backed implementation.

// crates.io
use ::http::{HeaderValue, Method, header::CONTENT_TYPE};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	config::{ClientConfig, ConfigValidationError},
	credential::Credential,
	http::{HttpResponse, HttpTransport, TransportRequest},
};

/// Boxed future returned by [`Refresher::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<Credential>> + 'a + Send>>;

/// Obtains a new credential.
///
/// The coordinator guarantees at most one call is in flight per session. Any error is treated as
/// a refresh failure and ends the session.
pub trait Refresher
where
	Self: Send + Sync,
{
	/// Performs one refresh through `transport`.
	fn refresh<'a>(&'a self, transport: &'a dyn HttpTransport) -> RefreshFuture<'a>;
}

/// Calls a refresh endpoint that authenticates through ambient state (cookies) and answers
/// with a JSON object carrying the new token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointRefresher {
	url: Url,
	token_field: String,
}
impl EndpointRefresher {
	/// Creates a refresher for `url` reading the token from `token_field`.
	pub fn new(url: Url, token_field: impl Into<String>) -> Self {
		Self { url, token_field: token_field.into() }
	}

	/// Creates a refresher from the configured refresh path and token field.
	pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigValidationError> {
		Ok(Self::new(config.refresh_url()?, config.token_field.clone()))
	}

	/// Refresh endpoint URL.
	pub fn url(&self) -> &Url {
		&self.url
	}
}
impl Refresher for EndpointRefresher {
	fn refresh<'a>(&'a self, transport: &'a dyn HttpTransport) -> RefreshFuture<'a> {
		Box::pin(async move {
			let mut request = TransportRequest {
				method: Method::GET,
				url: self.url.clone(),
				headers: Default::default(),
				body: None,
			};

			request.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

			let response = transport.send(request).await?;

			if !response.is_success() {
				return Err(response.into_status_error());
			}

			extract_token(&response, &self.token_field)
		})
	}
}

/// Reads `field` from a JSON response body as a bearer credential.
pub(crate) fn extract_token(response: &HttpResponse, field: &str) -> Result<Credential> {
	let body: Value = response.json()?;
	let token = body
		.get(field)
		.and_then(Value::as_str)
		.ok_or_else(|| Error::MissingToken { field: field.to_owned() })?;

	Credential::new(token).map_err(Error::from)
}
