//! HTTP clients for collaborator services.
//!
//! The engine consumes two read-only collaborators: the identity service
//! (marketing consent + recipient address) and the product catalog (current
//! unit prices, used at merge-time recompute). Both are plain JSON APIs
//! authenticated with a bearer key.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use thiserror::Error;

use winback_core::{Email, OwnerId, ProductRef, VariantRef};

use crate::config::CollaboratorConfig;

/// Errors that can occur when calling a collaborator API.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse a response.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Resolves whether an identity currently grants reminder consent.
#[async_trait]
pub trait ConsentProvider: Send + Sync {
    /// The recipient address for an identity, or `None` when consent is
    /// absent, withdrawn, or the identity is unknown. `None` is a normal
    /// skip, never an error.
    async fn reminder_recipient(&self, owner_id: &OwnerId)
    -> Result<Option<Email>, ProviderError>;
}

/// Resolves current catalog prices.
#[async_trait]
pub trait PricingProvider: Send + Sync {
    /// Current unit price for a product/variant.
    async fn unit_price(
        &self,
        product: &ProductRef,
        variant: Option<&VariantRef>,
    ) -> Result<Decimal, ProviderError>;
}

fn build_client(config: &CollaboratorConfig) -> Result<reqwest::Client, ProviderError> {
    let mut headers = HeaderMap::new();

    let auth_value = format!("Bearer {}", config.api_key.expose_secret());
    headers.insert(
        "Authorization",
        HeaderValue::from_str(&auth_value)
            .map_err(|e| ProviderError::Parse(format!("invalid API key format: {e}")))?,
    );
    headers.insert("Accept", HeaderValue::from_static("application/json"));

    Ok(reqwest::Client::builder().default_headers(headers).build()?)
}

/// Identity-service consent client.
#[derive(Clone)]
pub struct HttpConsentProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ConsentResponse {
    consent: bool,
    email: Option<Email>,
}

impl HttpConsentProvider {
    /// Create a new consent client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &CollaboratorConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl ConsentProvider for HttpConsentProvider {
    async fn reminder_recipient(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Option<Email>, ProviderError> {
        let url = format!(
            "{}/identities/{}/marketing-consent",
            self.base_url, owner_id
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        // Unknown identity reads as consent-absent, not as a failure
        if status.as_u16() == 404 {
            return Ok(None);
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ConsentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if body.consent {
            Ok(body.email)
        } else {
            Ok(None)
        }
    }
}

/// Catalog pricing client.
#[derive(Clone)]
pub struct HttpPricingProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    unit_price: Decimal,
}

impl HttpPricingProvider {
    /// Create a new pricing client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &CollaboratorConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl PricingProvider for HttpPricingProvider {
    async fn unit_price(
        &self,
        product: &ProductRef,
        variant: Option<&VariantRef>,
    ) -> Result<Decimal, ProviderError> {
        let mut url = format!("{}/products/{}/price", self.base_url, product);
        if let Some(variant) = variant {
            url.push_str(&format!("?variant={variant}"));
        }

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: PriceResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(body.unit_price)
    }
}
