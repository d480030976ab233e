//! One-shot negotiation with the `rtm.start` endpoint.
//!
//! Posts the credential token as a form and decodes the reply into a
//! [`Handshake`]: the streaming URL plus the initial identity, users and
//! channels. The [`Negotiator`] trait is the seam the reconnection
//! supervisor calls through, so tests can substitute a scripted one.

use async_trait::async_trait;
use reqwest::Client;

use crate::constants;
use crate::error::{self, NegotiationError, TransportError};
use crate::model::Handshake;

/// Something that can obtain a fresh [`Handshake`].
#[async_trait]
pub trait Negotiator: Send + Sync {
    /// Perform one negotiation request.
    async fn negotiate(&self) -> Result<Handshake, NegotiationError>;
}

/// Negotiates over HTTP with a bearer of the API token.
#[derive(Clone)]
pub struct HttpNegotiator {
    client: Client,
    api_url: String,
    token: String,
}

impl std::fmt::Debug for HttpNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpNegotiator")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl HttpNegotiator {
    /// Creates a negotiator with the default request timeout.
    ///
    /// # Arguments
    ///
    /// * `api_url` - Full URL of the `rtm.start` endpoint
    /// * `token` - API token sent as the `token` form field
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeout(api_url, token, constants::HTTP_REQUEST_TIMEOUT)
    }

    /// Creates a negotiator with a custom request timeout.
    pub fn with_timeout(
        api_url: impl Into<String>,
        token: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url, token))
    }

    /// Creates a negotiator with a pre-configured HTTP client.
    pub fn with_client(client: Client, api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            token: token.into(),
        }
    }

    /// Returns the negotiation endpoint.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

#[async_trait]
impl Negotiator for HttpNegotiator {
    async fn negotiate(&self) -> Result<Handshake, NegotiationError> {
        log::debug!("[Handshake] POST {}", self.api_url);

        let response = self
            .client
            .post(&self.api_url)
            .form(&[("token", self.token.as_str())])
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        let body = response.bytes().await.map_err(TransportError::from)?;

        parse_response(status.as_u16(), &body)
    }
}

/// Interpret a negotiation response.
///
/// Split out from the HTTP call so the decision table is testable on its own.
pub fn parse_response(status: u16, body: &[u8]) -> Result<Handshake, NegotiationError> {
    let body_text = || String::from_utf8_lossy(body).into_owned();

    if !(200..300).contains(&status) {
        return Err(NegotiationError::Status {
            status,
            body: body_text(),
        });
    }

    let handshake: Handshake = match error::decode(body) {
        Ok(handshake) => handshake,
        Err(source) => {
            log::warn!(
                "[Handshake] Undecodable response at byte {}: {:?}",
                source.offset(),
                source.excerpt()
            );
            return Err(NegotiationError::Decode {
                source,
                body: body_text(),
            });
        }
    };

    if !handshake.ok {
        return Err(NegotiationError::Rejected {
            reason: handshake.error.unwrap_or_else(|| "unknown".to_string()),
            body: body_text(),
        });
    }

    log::info!(
        "[Handshake] Negotiated as {} ({}): {} users, {} channels",
        handshake.self_user.name,
        handshake.self_user.id,
        handshake.users.len(),
        handshake.channels.len()
    );

    Ok(handshake)
}
