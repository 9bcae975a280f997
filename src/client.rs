//! High-level session client.
//!
//! [`SessionClient`] owns the transport and the credential store along with the session
//! coordinator. Cloning is cheap; every clone shares one session.

// self
use crate::{
	_prelude::*,
	config::ClientConfig,
	credential::Credential,
	error::{SessionError, TerminationReason},
	http::{HttpResponse, HttpTransport, PendingRequest},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	refresh::{self, EndpointRefresher, Refresher},
	session::{
		Admission, FlightFailure, FlightStanding, RefreshFlight, SessionCoordinator, SessionMetrics,
		SessionObserver, SessionPhase, SessionStatus, SessionTerminator, Termination, Waiter, Wake,
	},
	store::{CredentialStore, MemoryStore},
};

/// Authenticated HTTP client with single-flight credential refresh.
#[derive(Clone)]
pub struct SessionClient {
	config: Arc<ClientConfig>,
	transport: Arc<dyn HttpTransport>,
	store: Arc<dyn CredentialStore>,
	refresher: Arc<dyn Refresher>,
	coordinator: Arc<SessionCoordinator>,
	terminator: Arc<SessionTerminator>,
	metrics: Arc<SessionMetrics>,
	// Serializes every write to the credential slot: logins, refresh results, and clears.
	store_guard: Arc<AsyncMutex<()>>,
}
impl SessionClient {
	/// Starts a builder for `config`.
	pub fn builder(config: ClientConfig) -> SessionClientBuilder {
		SessionClientBuilder::new(config)
	}

	/// Builds a client with the default reqwest transport and an in-memory store.
	#[cfg(feature = "reqwest")]
	pub fn new(config: ClientConfig) -> Result<Self> {
		Self::builder(config).build()
	}

	/// Returns the configuration the client was built with.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Returns the session counters.
	pub fn metrics(&self) -> &SessionMetrics {
		&self.metrics
	}

	/// Returns the current coordinator phase.
	pub fn phase(&self) -> SessionPhase {
		self.coordinator.phase()
	}

	/// Returns the current session status.
	pub fn status(&self) -> SessionStatus {
		self.terminator.status()
	}

	/// Returns a receiver that observes every session status change.
	pub fn subscribe(&self) -> tokio::sync::watch::Receiver<SessionStatus> {
		self.terminator.subscribe()
	}

	/// Registers an observer notified whenever the session ends.
	pub fn add_observer(&self, observer: Arc<dyn SessionObserver>) {
		self.terminator.add_observer(observer);
	}

	/// Returns the credential currently stored for the session.
	pub async fn credential(&self) -> Result<Option<Credential>> {
		Ok(self.store.load(&self.config.credential_slot).await?)
	}

	/// Sends `request` with the current credential, refreshing it once on 401.
	///
	/// Non-2xx responses surface as [`Error::Status`]; terminal session failures surface as
	/// [`Error::Session`].
	pub async fn send(&self, request: PendingRequest) -> Result<HttpResponse> {
		const KIND: FlowKind = FlowKind::Request;

		let span = FlowSpan::new(KIND, "send");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.send_inner(request)).await;

		obs::record_flow_result(KIND, &result);

		result
	}

	/// Sends `request` and decodes a JSON response body.
	pub async fn send_json<T>(&self, request: PendingRequest) -> Result<T>
	where
		T: for<'de> Deserialize<'de>,
	{
		self.send(request).await?.json()
	}

	/// Sends a `GET` for `target`.
	pub async fn get(&self, target: impl Into<String>) -> Result<HttpResponse> {
		self.send(PendingRequest::get(target)).await
	}

	/// Sends a `DELETE` for `target`.
	pub async fn delete(&self, target: impl Into<String>) -> Result<HttpResponse> {
		self.send(PendingRequest::delete(target)).await
	}

	/// Sends a `POST` with a JSON body.
	pub async fn post_json<T>(&self, target: impl Into<String>, payload: &T) -> Result<HttpResponse>
	where
		T: ?Sized + Serialize,
	{
		self.send(PendingRequest::post(target).json(payload)?).await
	}

	/// Sends a `PUT` with a JSON body.
	pub async fn put_json<T>(&self, target: impl Into<String>, payload: &T) -> Result<HttpResponse>
	where
		T: ?Sized + Serialize,
	{
		self.send(PendingRequest::put(target).json(payload)?).await
	}

	/// Stores `credential` and (re)opens the session.
	///
	/// Clears a previous termination. Requests parked behind an in-flight refresh are released
	/// with the new credential.
	pub async fn login(&self, credential: Credential) -> Result<()> {
		const KIND: FlowKind = FlowKind::Login;

		let span = FlowSpan::new(KIND, "login");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.establish(credential)).await;

		obs::record_flow_result(KIND, &result);

		result
	}

	/// Sends an unauthenticated login request and opens the session with the token it returns.
	///
	/// The token is read from the configured `token_field`. The full response is returned so
	/// callers can read any profile data next to the token.
	pub async fn login_with(&self, request: PendingRequest) -> Result<HttpResponse> {
		const KIND: FlowKind = FlowKind::Login;

		let span = FlowSpan::new(KIND, "login_with");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let response = self.dispatch(&request, None).await?;

				if !response.is_success() {
					return Err(response.into_status_error());
				}

				let credential = refresh::extract_token(&response, &self.config.token_field)?;

				self.establish(credential).await?;

				Ok::<_, Error>(response)
			})
			.await;

		obs::record_flow_result(KIND, &result);

		result
	}

	/// Ends the session and clears the stored credential. Parked requests are rejected.
	///
	/// Returns `false` when the session had already ended.
	pub async fn logout(&self) -> Result<bool> {
		match self.coordinator.terminate(TerminationReason::LoggedOut) {
			Some(termination) => {
				self.end_session(termination).await?;

				Ok(true)
			},
			None => Ok(false),
		}
	}

	async fn establish(&self, credential: Credential) -> Result<()> {
		let _guard = self.store_guard.lock().await;

		self.store.save(&self.config.credential_slot, credential.clone()).await?;
		self.coordinator.establish(credential);
		self.terminator.activate();

		Ok(())
	}

	async fn send_inner(&self, request: PendingRequest) -> Result<HttpResponse> {
		if self.coordinator.terminated_reason().is_some() {
			return Err(SessionError::LoggedOut.into());
		}

		// Generation first: the credential loaded next is never older than it.
		let generation = self.coordinator.generation();
		let credential = self.store.load(&self.config.credential_slot).await?;
		let response = self.dispatch(&request, credential.as_ref()).await?;

		if !response.is_unauthorized() {
			if credential.is_some() {
				self.coordinator.accept(generation);
			}

			return accept_status(response);
		}
		if request.retried {
			return Err(response.into_status_error());
		}

		self.recover(request, generation).await
	}

	async fn recover(&self, mut request: PendingRequest, observed: u64) -> Result<HttpResponse> {
		request.retried = true;

		loop {
			match self.coordinator.admit(observed) {
				Admission::Lead(flight) => return self.lead(flight, request).await,
				Admission::Wait(waiter) => match self.park(waiter).await? {
					Some(Wake::Refreshed { credential, generation }) =>
						return self.replay(&request, Some(&credential), generation).await,
					Some(Wake::Terminated(reason)) =>
						return Err(SessionError::Terminated { reason }.into()),
					// The leader was cancelled; compete for the next flight.
					None => continue,
				},
				Admission::Replay { generation } =>
					return self.replay_current(&request, generation).await,
				Admission::Exhausted(termination) => {
					self.end_session_reporting(termination).await;

					return Err(
						SessionError::RetriesExhausted { max_retries: self.config.max_retries }.into()
					);
				},
				Admission::Rejected(reason) =>
					return Err(SessionError::Terminated { reason }.into()),
			}
		}
	}

	async fn lead(&self, flight: RefreshFlight<'_>, request: PendingRequest) -> Result<HttpResponse> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "lead");

		self.metrics.record_refresh_attempt();
		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let refreshed = span.instrument(self.refresher.refresh(&*self.transport)).await;

		obs::record_flow_result(KIND, &refreshed);

		let credential = match refreshed {
			Ok(credential) => credential,
			Err(e) => return self.settle_failure(flight, &request, e).await,
		};
		let guard = self.store_guard.lock().await;

		match flight.standing() {
			FlightStanding::Active => {},
			FlightStanding::Superseded => {
				drop(guard);
				drop(flight);

				let generation = self.coordinator.generation();

				return self.replay_current(&request, generation).await;
			},
			FlightStanding::Terminated(reason) =>
				return Err(SessionError::Terminated { reason }.into()),
		}

		if let Err(e) = self.store.save(&self.config.credential_slot, credential.clone()).await {
			drop(guard);

			return self.settle_failure(flight, &request, e.into()).await;
		}

		let batch = match flight.succeed(credential) {
			Ok(batch) => batch,
			Err(FlightStanding::Terminated(reason)) =>
				return Err(SessionError::Terminated { reason }.into()),
			// Superseded; replay with whatever credential is current.
			Err(_) => {
				drop(guard);

				let generation = self.coordinator.generation();

				return self.replay_current(&request, generation).await;
			},
		};

		drop(guard);
		self.metrics.record_refresh_success();

		// Parked requests replay only after the leader's replay settles.
		let result = self.replay(&request, Some(batch.credential()), batch.generation()).await;

		batch.release();

		result
	}

	async fn settle_failure(
		&self,
		flight: RefreshFlight<'_>,
		request: &PendingRequest,
		error: Error,
	) -> Result<HttpResponse> {
		self.metrics.record_refresh_failure();

		match flight.fail(TerminationReason::RefreshFailed) {
			FlightFailure::Terminated(termination) => {
				self.end_session_reporting(termination).await;

				Err(SessionError::refresh_failed(error).into())
			},
			FlightFailure::AlreadyTerminated(reason) =>
				Err(SessionError::Terminated { reason }.into()),
			FlightFailure::Superseded => {
				let generation = self.coordinator.generation();

				self.replay_current(request, generation).await
			},
		}
	}

	async fn park(&self, waiter: Waiter) -> Result<Option<Wake>> {
		let Some(limit) = self.config.waiter_timeout() else {
			return Ok(waiter.settled().await);
		};

		tokio::time::timeout(limit.unsigned_abs(), waiter.settled())
			.await
			.map_err(|_| Error::WaiterTimeout { waited: limit })
	}

	async fn replay_current(
		&self,
		request: &PendingRequest,
		generation: u64,
	) -> Result<HttpResponse> {
		let credential = self.store.load(&self.config.credential_slot).await?;

		self.replay(request, credential.as_ref(), generation).await
	}

	async fn replay(
		&self,
		request: &PendingRequest,
		credential: Option<&Credential>,
		generation: u64,
	) -> Result<HttpResponse> {
		self.metrics.record_replay();

		let response = self.dispatch(request, credential).await?;

		if response.is_unauthorized() {
			return Err(response.into_status_error());
		}

		self.coordinator.accept(generation);

		accept_status(response)
	}

	async fn dispatch(
		&self,
		request: &PendingRequest,
		credential: Option<&Credential>,
	) -> Result<HttpResponse> {
		let wire = request.clone().with_credential(credential).resolve(&self.config.base_url)?;

		Ok(self.transport.send(wire).await?)
	}

	async fn end_session(&self, termination: Termination) -> Result<()> {
		const KIND: FlowKind = FlowKind::Terminate;

		let span = FlowSpan::new(KIND, termination.reason().as_str());

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(self.terminator.finish(&self.coordinator, termination))
			.await
			.map(|_| ())
			.map_err(Error::from);

		obs::record_flow_result(KIND, &result);

		result
	}

	// The caller's own error wins; a failed clear is only reported.
	async fn end_session_reporting(&self, termination: Termination) {
		let reason = termination.reason();

		if let Err(e) = self.end_session(termination).await {
			obs::trace_clear_failure(reason, &e);
		}
	}
}
impl Debug for SessionClient {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("SessionClient")
			.field("config", &self.config)
			.field("phase", &self.coordinator.phase())
			.field("terminator", &self.terminator)
			.finish()
	}
}

/// Builder for [`SessionClient`].
pub struct SessionClientBuilder {
	config: ClientConfig,
	transport: Option<Arc<dyn HttpTransport>>,
	store: Option<Arc<dyn CredentialStore>>,
	refresher: Option<Arc<dyn Refresher>>,
	observers: Vec<Arc<dyn SessionObserver>>,
}
impl SessionClientBuilder {
	/// Creates a builder for `config` with default collaborators.
	pub fn new(config: ClientConfig) -> Self {
		Self { config, transport: None, store: None, refresher: None, observers: Vec::new() }
	}

	/// Overrides the HTTP transport.
	pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
		self.transport = Some(transport);

		self
	}

	/// Overrides the credential store; defaults to a [`MemoryStore`].
	pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
		self.store = Some(store);

		self
	}

	/// Overrides the refresher; defaults to an [`EndpointRefresher`] for the configured path.
	pub fn refresher(mut self, refresher: Arc<dyn Refresher>) -> Self {
		self.refresher = Some(refresher);

		self
	}

	/// Registers a session observer.
	pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
		self.observers.push(observer);

		self
	}

	/// Validates the configuration and assembles the client.
	pub fn build(self) -> Result<SessionClient> {
		let Self { config, transport, store, refresher, observers } = self;

		config.validate()?;

		let transport = match transport {
			Some(transport) => transport,
			None => default_transport()?,
		};
		let store = store.unwrap_or_else(|| Arc::new(MemoryStore::default()));
		let refresher = match refresher {
			Some(refresher) => refresher,
			None => Arc::new(EndpointRefresher::from_config(&config)?),
		};
		let metrics = Arc::new(SessionMetrics::default());
		let coordinator = Arc::new(SessionCoordinator::new(
			config.max_retries,
			config.retry_reset,
			metrics.clone(),
		));
		let store_guard = Arc::new(AsyncMutex::new(()));
		let terminator = Arc::new(SessionTerminator::new(
			store.clone(),
			config.credential_slot.clone(),
			store_guard.clone(),
		));

		for observer in observers {
			terminator.add_observer(observer);
		}

		Ok(SessionClient {
			config: Arc::new(config),
			transport,
			store,
			refresher,
			coordinator,
			terminator,
			metrics,
			store_guard,
		})
	}
}
impl Debug for SessionClientBuilder {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("SessionClientBuilder")
			.field("config", &self.config)
			.field("transport", &self.transport.is_some())
			.field("store", &self.store.is_some())
			.field("refresher", &self.refresher.is_some())
			.field("observers", &self.observers.len())
			.finish()
	}
}

#[cfg(feature = "reqwest")]
fn default_transport() -> Result<Arc<dyn HttpTransport>> {
	Ok(Arc::new(crate::http::ReqwestTransport::new()?))
}

#[cfg(not(feature = "reqwest"))]
fn default_transport() -> Result<Arc<dyn HttpTransport>> {
	Err(crate::error::ConfigError::MissingTransport.into())
}

fn accept_status(response: HttpResponse) -> Result<HttpResponse> {
	if response.is_success() { Ok(response) } else { Err(response.into_status_error()) }
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::Value;
	// self
	use super::*;
	use crate::_preludet::*;

	const BASE: &str = "http://127.0.0.1:5000";

	fn credential(token: &str) -> Credential {
		Credential::new(token).expect("Fixture token should be valid.")
	}

	fn authorization(request: &crate::http::TransportRequest) -> Option<&str> {
		request
			.headers
			.get(::http::header::AUTHORIZATION)
			.map(|value| value.to_str().expect("Authorization header should be ASCII."))
	}

	#[tokio::test]
	async fn missing_credential_sends_without_authorization() {
		let transport = Arc::new(ScriptedTransport::new([Ok(json_response(200, "{}"))]));
		let (client, _) = build_test_client(BASE, transport.clone());

		client.get("/profile").await.expect("Request should succeed.");

		let requests = transport.requests();

		assert_eq!(requests[0].url.as_str(), "http://127.0.0.1:5000/profile");
		assert_eq!(authorization(&requests[0]), None);
	}

	#[tokio::test]
	async fn unauthorized_response_refreshes_and_replays_once() {
		let transport = Arc::new(ScriptedTransport::new([
			Ok(json_response(401, "{}")),
			Ok(json_response(200, r#"{"token":"fresh"}"#)),
			Ok(json_response(200, r#"{"ok":true}"#)),
		]));
		let (client, store) = build_test_client(BASE, transport.clone());

		client.login(credential("stale")).await.expect("Login should succeed.");

		let body: Value = client
			.send_json(PendingRequest::get("data"))
			.await
			.expect("Replay should succeed.");
		let requests = transport.requests();

		assert_eq!(body["ok"], true);
		assert_eq!(requests.len(), 3);
		assert_eq!(authorization(&requests[0]), Some("Bearer stale"));
		assert_eq!(requests[1].url.as_str(), "http://127.0.0.1:5000/refresh");
		assert_eq!(authorization(&requests[2]), Some("Bearer fresh"));
		assert_eq!(
			store.load("access_token").await.expect("Load should succeed."),
			Some(credential("fresh"))
		);
		assert_eq!(client.metrics().refresh_successes(), 1);
		assert_eq!(client.metrics().replays(), 1);
	}

	#[tokio::test]
	async fn non_auth_failures_pass_through() {
		let transport = Arc::new(ScriptedTransport::new([Ok(json_response(500, "boom"))]));
		let (client, _) = build_test_client(BASE, transport.clone());
		let err = client.get("data").await.expect_err("Server errors should surface.");

		assert_eq!(err.status(), Some(500));
		assert_eq!(transport.requests().len(), 1);
		assert_eq!(client.metrics().refresh_attempts(), 0);
	}

	#[derive(Default)]
	struct StuckStore(MemoryStore);
	impl CredentialStore for StuckStore {
		fn load<'a>(
			&'a self,
			slot: &'a str,
		) -> crate::store::StoreFuture<'a, Option<Credential>> {
			self.0.load(slot)
		}

		fn save<'a>(
			&'a self,
			slot: &'a str,
			credential: Credential,
		) -> crate::store::StoreFuture<'a, ()> {
			self.0.save(slot, credential)
		}

		fn clear<'a>(&'a self, _: &'a str) -> crate::store::StoreFuture<'a, bool> {
			Box::pin(async {
				Err(crate::store::StoreError::Backend { message: "read-only volume".into() })
			})
		}
	}

	#[tokio::test]
	async fn failed_clear_keeps_the_refresh_error_and_still_ends_the_session() {
		let transport = Arc::new(ScriptedTransport::new([
			Ok(json_response(401, "{}")),
			Ok(json_response(401, r#"{"message":"expired"}"#)),
		]));
		let store = Arc::new(StuckStore::default());
		let client = SessionClient::builder(
			ClientConfig::builder(Url::parse(BASE).expect("Base URL fixture should parse."))
				.build()
				.expect("Default configuration should validate."),
		)
		.transport(transport)
		.store(store.clone())
		.build()
		.expect("Client should build.");

		client.login(credential("stale")).await.expect("Login should succeed.");

		let err = client.get("data").await.expect_err("Rejected refresh should be terminal.");

		assert!(matches!(err, Error::Session(SessionError::RefreshFailed { .. })));
		assert!(client.status().is_ended());
		assert_eq!(
			client.credential().await.expect("Load should succeed."),
			Some(credential("stale"))
		);
		assert!(matches!(client.logout().await, Ok(false)));
	}

	#[tokio::test]
	async fn json_verbs_carry_method_and_body() {
		let transport = Arc::new(ScriptedTransport::new([
			Ok(json_response(200, "{}")),
			Ok(json_response(204, "")),
		]));
		let (client, _) = build_test_client(BASE, transport.clone());

		client.login(credential("live")).await.expect("Login should succeed.");
		client
			.put_json("items/7", &serde_json::json!({ "name": "lamp" }))
			.await
			.expect("Put should succeed.");
		client.delete("items/7").await.expect("Delete should succeed.");

		let requests = transport.requests();

		assert_eq!(requests[0].method, ::http::Method::PUT);
		assert_eq!(requests[0].body.as_deref(), Some(&br#"{"name":"lamp"}"#[..]));
		assert_eq!(requests[1].method, ::http::Method::DELETE);
		assert_eq!(requests[1].url.as_str(), "http://127.0.0.1:5000/items/7");
		assert_eq!(authorization(&requests[1]), Some("Bearer live"));
		assert_eq!(client.phase(), SessionPhase::Idle);
	}

	#[tokio::test]
	async fn login_with_stores_returned_token() {
		let transport = Arc::new(ScriptedTransport::new([Ok(json_response(
			200,
			r#"{"token":"issued","user":{"name":"ada"}}"#,
		))]));
		let (client, store) = build_test_client(BASE, transport.clone());
		let response = client
			.login_with(
				PendingRequest::post("login")
					.json(&serde_json::json!({ "email": "ada@example.com" }))
					.expect("Login payload should serialize."),
			)
			.await
			.expect("Login should succeed.");

		assert_eq!(response.json::<Value>().expect("Body should decode.")["user"]["name"], "ada");
		assert_eq!(authorization(&transport.requests()[0]), None);
		assert_eq!(
			store.load("access_token").await.expect("Load should succeed."),
			Some(credential("issued"))
		);
	}

	#[tokio::test]
	async fn logout_rejects_later_requests_until_login() {
		let transport = Arc::new(ScriptedTransport::new([Ok(json_response(200, "{}"))]));
		let (client, store) = build_test_client(BASE, transport.clone());

		client.login(credential("live")).await.expect("Login should succeed.");

		assert!(client.logout().await.expect("Logout should succeed."));
		assert!(!client.logout().await.expect("Second logout should succeed."));
		assert!(client.status().is_ended());
		assert!(store.load("access_token").await.expect("Load should succeed.").is_none());
		assert!(matches!(
			client.get("data").await,
			Err(Error::Session(SessionError::LoggedOut))
		));
		assert!(transport.requests().is_empty());

		client.login(credential("again")).await.expect("Login should succeed.");
		client.get("data").await.expect("Request after a new login should succeed.");

		assert_eq!(client.status(), SessionStatus::Active);
	}
}
