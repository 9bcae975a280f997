//! Authenticated HTTP session client that keeps a bearer credential alive across concurrent
//! requests with a single in-flight refresh and a bounded retry budget.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod http;
pub mod obs;
pub mod refresh;
pub mod session;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and fakes for tests; enabled via `cfg(test)` or the `test` crate
	//! feature.

	pub use crate::_prelude::*;

	// std
	use std::collections::VecDeque;
	// self
	use crate::{
		client::SessionClient,
		config::ClientConfig,
		error::TransportError,
		http::{HttpResponse, HttpTransport, TransportFuture, TransportRequest},
		store::{CredentialStore, MemoryStore},
	};

	/// Transport that replays a fixed script of responses and records every request it saw.
	#[derive(Debug, Default)]
	pub struct ScriptedTransport {
		responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
		seen: Mutex<Vec<TransportRequest>>,
	}
	impl ScriptedTransport {
		/// Creates a transport that answers requests in the order of `responses`.
		pub fn new<I>(responses: I) -> Self
		where
			I: IntoIterator<Item = Result<HttpResponse, TransportError>>,
		{
			Self { responses: Mutex::new(responses.into_iter().collect()), seen: Default::default() }
		}

		/// Returns a snapshot of every request dispatched so far.
		pub fn requests(&self) -> Vec<TransportRequest> {
			self.seen.lock().clone()
		}
	}
	impl HttpTransport for ScriptedTransport {
		fn send(&self, request: TransportRequest) -> TransportFuture<'_> {
			Box::pin(async move {
				self.seen.lock().push(request);

				self.responses.lock().pop_front().unwrap_or_else(|| {
					Err(TransportError::network(std::io::Error::other("script exhausted")))
				})
			})
		}
	}

	/// Builds a JSON response with the provided status.
	pub fn json_response(status: u16, body: &str) -> HttpResponse {
		let status = ::http::StatusCode::from_u16(status)
			.expect("Scripted response status should be a valid HTTP status.");

		HttpResponse::builder(status)
			.header(::http::header::CONTENT_TYPE, "application/json")
			.body(body)
			.build()
	}

	/// Builds a [`SessionClient`] over `transport` backed by a fresh in-memory store.
	pub fn build_test_client(
		base_url: &str,
		transport: Arc<dyn HttpTransport>,
	) -> (SessionClient, Arc<MemoryStore>) {
		let config = ClientConfig::builder(
			Url::parse(base_url).expect("Test base URL should parse successfully."),
		)
		.build()
		.expect("Default test configuration should validate.");
		let store = Arc::new(MemoryStore::default());
		let client = SessionClient::builder(config)
			.transport(transport)
			.store(store.clone() as Arc<dyn CredentialStore>)
			.build()
			.expect("Test session client should build.");

		(client, store)
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use ::http as http_types;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use httpmock as _;
