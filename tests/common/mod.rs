#![allow(dead_code)]

// std
use std::{
	collections::{HashSet, VecDeque},
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
};
// crates.io
use http::{StatusCode, header::AUTHORIZATION};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
// self
use session_guard::{
	client::SessionClient,
	config::{ClientConfig, ClientConfigBuilder},
	credential::Credential,
	http::{HttpResponse, HttpTransport, TransportFuture, TransportRequest},
	session::{SessionEnded, SessionObserver},
	store::{CredentialStore, MemoryStore, StoreFuture},
	url::Url,
};

pub const BASE: &str = "http://backend.test/api";
pub const SLOT: &str = "access_token";

/// What the fake refresh endpoint does when called.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshMode {
	/// Issue `fresh-<n>` and start accepting it.
	Issue,
	/// Issue `fresh-<n>` but keep rejecting it on data endpoints.
	IssueRejected,
	/// Answer 401.
	Reject,
}

/// Wire events recorded by [`FakeBackend`] in the order they happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
	Sent { path: String, auth: Option<String> },
	Answered { path: String, auth: Option<String>, status: u16 },
}

/// In-process backend: data endpoints accept only known bearer tokens, `/refresh` issues new
/// ones, optionally behind a gate the test opens explicitly.
pub struct FakeBackend {
	accepted: Mutex<HashSet<String>>,
	mode: Mutex<RefreshMode>,
	issued: AtomicUsize,
	names: Mutex<VecDeque<String>>,
	refresh_calls: AtomicUsize,
	gate: Option<Semaphore>,
	events: Mutex<Vec<Event>>,
}
impl FakeBackend {
	pub fn new(mode: RefreshMode) -> Arc<Self> {
		Arc::new(Self::build(mode, None))
	}

	/// Refresh calls block until [`FakeBackend::open_gate`] grants a permit.
	pub fn gated(mode: RefreshMode) -> Arc<Self> {
		Arc::new(Self::build(mode, Some(Semaphore::new(0))))
	}

	fn build(mode: RefreshMode, gate: Option<Semaphore>) -> Self {
		Self {
			accepted: Default::default(),
			mode: Mutex::new(mode),
			issued: AtomicUsize::new(0),
			names: Default::default(),
			refresh_calls: AtomicUsize::new(0),
			gate,
			events: Default::default(),
		}
	}

	pub fn accept(&self, token: &str) {
		self.accepted.lock().insert(token.to_owned());
	}

	pub fn revoke(&self, token: &str) {
		self.accepted.lock().remove(token);
	}

	/// Names the next issued tokens; afterwards they fall back to `fresh-<n>`.
	pub fn queue_tokens<const N: usize>(&self, names: [&str; N]) {
		self.names.lock().extend(names.map(str::to_owned));
	}

	pub fn set_mode(&self, mode: RefreshMode) {
		*self.mode.lock() = mode;
	}

	pub fn open_gate(&self, permits: usize) {
		self.gate.as_ref().expect("Backend should be gated.").add_permits(permits);
	}

	pub fn refresh_calls(&self) -> usize {
		self.refresh_calls.load(Ordering::SeqCst)
	}

	pub fn events(&self) -> Vec<Event> {
		self.events.lock().clone()
	}

	/// Authorization headers of every request sent to `path`, in dispatch order.
	pub fn sent_to(&self, path: &str) -> Vec<Option<String>> {
		self.events
			.lock()
			.iter()
			.filter_map(|event| match event {
				Event::Sent { path: p, auth } if p == path => Some(auth.clone()),
				_ => None,
			})
			.collect()
	}

	async fn respond(&self, request: TransportRequest) -> HttpResponse {
		let path = request.url.path().to_owned();
		let auth = request
			.headers
			.get(AUTHORIZATION)
			.map(|value| value.to_str().expect("Authorization header should be ASCII.").to_owned());

		self.events.lock().push(Event::Sent { path: path.clone(), auth: auth.clone() });

		let response = if path.ends_with("/refresh") {
			self.refresh().await
		} else {
			self.data(&path, auth.as_deref()).await
		};

		self.events.lock().push(Event::Answered {
			path,
			auth,
			status: response.status.as_u16(),
		});

		response
	}

	async fn refresh(&self) -> HttpResponse {
		self.refresh_calls.fetch_add(1, Ordering::SeqCst);

		if let Some(gate) = &self.gate {
			gate.acquire().await.expect("Gate should stay open.").forget();
		}

		let mode = *self.mode.lock();

		if mode == RefreshMode::Reject {
			return json(401, r#"{"message":"session expired"}"#);
		}

		let issued = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
		let token = self.names.lock().pop_front().unwrap_or_else(|| format!("fresh-{issued}"));

		if mode == RefreshMode::Issue {
			self.accept(&token);
		}

		json(200, &format!(r#"{{"token":"{token}"}}"#))
	}

	async fn data(&self, path: &str, auth: Option<&str>) -> HttpResponse {
		let latency = if path.contains("slow") { 50 } else { 3 };

		// Let other tasks interleave while the response is in flight.
		for _ in 0..latency {
			tokio::task::yield_now().await;
		}

		let token = auth.and_then(|value| value.strip_prefix("Bearer "));

		match token {
			Some(token) if self.accepted.lock().contains(token) => json(200, r#"{"ok":true}"#),
			_ => json(401, r#"{"message":"unauthorized"}"#),
		}
	}
}

/// Transport handle over a shared [`FakeBackend`].
pub struct FakeTransport(pub Arc<FakeBackend>);
impl HttpTransport for FakeTransport {
	fn send(&self, request: TransportRequest) -> TransportFuture<'_> {
		Box::pin(async move { Ok(self.0.respond(request).await) })
	}
}

/// Store wrapper counting `clear` calls.
#[derive(Default)]
pub struct CountingStore {
	pub inner: MemoryStore,
	clears: AtomicUsize,
}
impl CountingStore {
	pub fn clears(&self) -> usize {
		self.clears.load(Ordering::SeqCst)
	}
}
impl CredentialStore for CountingStore {
	fn load<'a>(&'a self, slot: &'a str) -> StoreFuture<'a, Option<Credential>> {
		self.inner.load(slot)
	}

	fn save<'a>(&'a self, slot: &'a str, credential: Credential) -> StoreFuture<'a, ()> {
		self.inner.save(slot, credential)
	}

	fn clear<'a>(&'a self, slot: &'a str) -> StoreFuture<'a, bool> {
		self.clears.fetch_add(1, Ordering::SeqCst);

		self.inner.clear(slot)
	}
}

/// Observer recording every session end.
#[derive(Default)]
pub struct RecordingObserver(Mutex<Vec<SessionEnded>>);
impl RecordingObserver {
	pub fn ended(&self) -> Vec<SessionEnded> {
		self.0.lock().clone()
	}
}
impl SessionObserver for RecordingObserver {
	fn session_ended(&self, event: &SessionEnded) {
		self.0.lock().push(event.clone());
	}
}

pub struct Harness {
	pub client: SessionClient,
	pub backend: Arc<FakeBackend>,
	pub store: Arc<CountingStore>,
	pub observer: Arc<RecordingObserver>,
}
impl Harness {
	pub fn new(backend: Arc<FakeBackend>) -> Self {
		Self::with_config(backend, config())
	}

	pub fn with_config(backend: Arc<FakeBackend>, config: ClientConfigBuilder) -> Self {
		let store = Arc::new(CountingStore::default());
		let observer = Arc::new(RecordingObserver::default());
		let client = SessionClient::builder(config.build().expect("Test config should validate."))
			.transport(Arc::new(FakeTransport(backend.clone())))
			.store(store.clone())
			.observer(observer.clone())
			.build()
			.expect("Test client should build.");

		Self { client, backend, store, observer }
	}

	pub async fn stored(&self) -> Option<String> {
		self.store
			.load(SLOT)
			.await
			.expect("Store load should succeed.")
			.map(|credential| credential.expose().to_owned())
	}
}

pub fn config() -> ClientConfigBuilder {
	ClientConfig::builder(Url::parse(BASE).expect("Base URL fixture should parse."))
}

pub fn credential(token: &str) -> Credential {
	Credential::new(token).expect("Fixture token should be valid.")
}

/// Yields until `condition` holds, failing the test if it never does.
pub async fn settle(mut condition: impl FnMut() -> bool) {
	for _ in 0..1_000 {
		if condition() {
			return;
		}

		tokio::task::yield_now().await;
	}

	panic!("Condition was not reached while yielding.");
}

fn json(status: u16, body: &str) -> HttpResponse {
	HttpResponse::builder(StatusCode::from_u16(status).expect("Fixture status should be valid."))
		.header(http::header::CONTENT_TYPE, "application/json")
		.body(body)
		.build()
}
