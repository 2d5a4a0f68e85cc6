//! WebDAV-backed [`ObjectStore`] (spec §6, feature `webdav`).
//!
//! Built on a plain `reqwest::Client`, the same ecosystem crate the teacher
//! reaches for when it talks HTTP to a remote service (e.g. the Slack/Zendesk
//! alert targets under `actions/tamanu/alerts/targets`). There is no WebDAV
//! crate in the pack, so this speaks the handful of verbs (PUT/GET/DELETE/
//! PROPFIND) directly.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::store::ObjectStore;

pub struct WebDavConfig {
	pub base_url: String,
	pub username: Option<String>,
	pub password: Option<String>,
}

pub struct WebDavStore {
	client: Client,
	base_url: String,
	username: Option<String>,
	password: Option<String>,
}

impl WebDavStore {
	pub fn new(config: WebDavConfig) -> Self {
		Self {
			client: Client::new(),
			base_url: config.base_url.trim_end_matches('/').to_owned(),
			username: config.username,
			password: config.password,
		}
	}

	fn url_for(&self, key: &str) -> String {
		format!("{}/{}", self.base_url, key.trim_start_matches('/'))
	}

	fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		match (&self.username, &self.password) {
			(Some(user), pass) => builder.basic_auth(user, pass.clone()),
			_ => builder,
		}
	}
}

/// Classifies a non-2xx response per spec §7: 4xx other than throttling
/// (429) is `StoreFatal` and not worth retrying; 5xx is `StoreTransient`.
fn status_error(operation: &str, key: &str, status: StatusCode) -> Error {
	if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
		Error::StoreFatal(format!("webdav {operation} {key} returned {status}"))
	} else {
		Error::StoreTransient(format!("webdav {operation} {key} returned {status}"))
	}
}

#[async_trait]
impl ObjectStore for WebDavStore {
	#[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
	async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
		debug!(key, "PUT to webdav");
		let request = self.authed(self.client.put(self.url_for(key)).body(bytes));
		let response = request
			.send()
			.await
			.map_err(|e| Error::StoreTransient(e.to_string()))?;

		if response.status().is_success() {
			Ok(())
		} else {
			Err(status_error("PUT", key, response.status()))
		}
	}

	#[instrument(skip(self))]
	async fn get(&self, key: &str) -> Result<Vec<u8>> {
		let request = self.authed(self.client.get(self.url_for(key)));
		let response = request
			.send()
			.await
			.map_err(|e| Error::StoreTransient(e.to_string()))?;

		if response.status() == StatusCode::NOT_FOUND {
			return Err(Error::NotFound(key.to_owned()));
		}
		if !response.status().is_success() {
			return Err(status_error("GET", key, response.status()));
		}

		Ok(response
			.bytes()
			.await
			.map_err(|e| Error::StoreTransient(e.to_string()))?
			.to_vec())
	}

	#[instrument(skip(self))]
	async fn delete(&self, key: &str) -> Result<()> {
		let request = self.authed(self.client.delete(self.url_for(key)));
		let response = request
			.send()
			.await
			.map_err(|e| Error::StoreTransient(e.to_string()))?;

		if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
			Ok(())
		} else {
			Err(status_error("DELETE", key, response.status()))
		}
	}

	#[instrument(skip(self))]
	async fn list(&self, prefix: &str) -> Result<Vec<String>> {
		// A depth-1 PROPFIND against the prefix "directory"; response parsing
		// is a placeholder until the remote server's XML dialect is pinned
		// down against a real WebDAV target, so this collects only the
		// top-level displayed hrefs.
		let request = self
			.authed(
				self.client
					.request(reqwest::Method::from_bytes(b"PROPFIND").unwrap(), self.url_for(prefix)),
			)
			.header("Depth", "1");
		let response = request
			.send()
			.await
			.map_err(|e| Error::StoreTransient(e.to_string()))?;

		if !response.status().is_success() && response.status() != StatusCode::MULTI_STATUS {
			return Err(status_error("PROPFIND", prefix, response.status()));
		}

		let body = response
			.text()
			.await
			.map_err(|e| Error::StoreTransient(e.to_string()))?;

		Ok(parse_hrefs(&body, prefix))
	}

	#[instrument(skip(self))]
	async fn test_connectivity(&self) -> Result<()> {
		let probe_key = ".coldvault-connectivity-probe";
		self.put(probe_key, b"ok".to_vec()).await?;
		self.delete(probe_key).await
	}
}

fn parse_hrefs(body: &str, prefix: &str) -> Vec<String> {
	let mut hrefs = Vec::new();
	for segment in body.split("<d:href>").skip(1) {
		if let Some(end) = segment.find("</d:href>") {
			let href = &segment[..end];
			if href.contains(prefix) {
				hrefs.push(href.trim_start_matches('/').to_owned());
			}
		}
	}
	hrefs
}
