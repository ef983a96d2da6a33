//! Remote object-storage state backend.
//!
//! Talks plain HTTP to a single object URL: GET to load, PUT to save, DELETE
//! to reset. A 404 on load is the first-run condition and yields fresh state;
//! a 404 on reset means there was nothing to delete. Authentication is a
//! bearer token taken from the environment, never from the manifest.

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use tracing::debug;

use crate::state::store::{StateError, StateStore, decode_state, encode_state};
use crate::state::types::DeploymentState;

#[derive(Debug, Clone)]
pub struct RemoteStateStore {
  client: Client,
  url: String,
  token: Option<String>,
}

impl RemoteStateStore {
  pub fn new(url: String, token: Option<String>) -> Self {
    Self {
      client: Client::new(),
      url,
      token,
    }
  }

  fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  fn http_error(&self, source: reqwest::Error) -> StateError {
    StateError::Http {
      url: self.url.clone(),
      source: Box::new(source),
    }
  }

  fn status_error(&self, status: StatusCode) -> StateError {
    StateError::RemoteStatus {
      url: self.url.clone(),
      status: status.as_u16(),
    }
  }
}

impl StateStore for RemoteStateStore {
  fn load(&self) -> Result<DeploymentState, StateError> {
    let response = self
      .authorize(self.client.get(&self.url))
      .send()
      .map_err(|e| self.http_error(e))?;

    if response.status() == StatusCode::NOT_FOUND {
      debug!(url = %self.url, "no remote state object, starting fresh");
      return Ok(DeploymentState::new());
    }
    if !response.status().is_success() {
      return Err(self.status_error(response.status()));
    }

    let bytes = response.bytes().map_err(|e| self.http_error(e))?;
    decode_state(&bytes)
  }

  fn save(&self, state: &DeploymentState) -> Result<(), StateError> {
    let bytes = encode_state(state)?;

    let response = self
      .authorize(self.client.put(&self.url))
      .header("content-type", "application/json")
      .body(bytes)
      .send()
      .map_err(|e| self.http_error(e))?;

    if !response.status().is_success() {
      return Err(self.status_error(response.status()));
    }

    debug!(url = %self.url, "state saved");
    Ok(())
  }

  fn reset(&self) -> Result<(), StateError> {
    let response = self
      .authorize(self.client.delete(&self.url))
      .send()
      .map_err(|e| self.http_error(e))?;

    if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
      return Ok(());
    }
    Err(self.status_error(response.status()))
  }

  fn target(&self) -> String {
    self.url.clone()
  }
}
