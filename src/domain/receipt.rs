use crate::error::{PurchaseError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const GOOGLE_PLAY: &str = "GooglePlay";
pub const APPLE_APP_STORE: &str = "AppleAppStore";
pub const MAC_APP_STORE: &str = "MacAppStore";

/// Proof of purchase as reported by the provider, normalized to store + payload.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Receipt {
    pub store: String,
    #[serde(rename = "TransactionID", default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub payload: String,
}

impl Receipt {
    pub fn new(store: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            transaction_id: None,
            payload: payload.into(),
        }
    }

    /// Parses the provider's unified receipt (`{"Store", "TransactionID", "Payload"}`).
    pub fn from_unified_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| PurchaseError::MalformedReceipt(e.to_string()))
    }
}

/// Opaque string handed to a backend for server-side purchase verification.
///
/// The empty token is the invalid token.
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Default, Hash)]
#[serde(transparent)]
pub struct ValidationToken(String);

impl ValidationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn invalid() -> Self {
        Self(String::new())
    }

    /// A fresh token for sandbox stores.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the token the verification backend expects from `receipt`.
    ///
    /// Fails only when the receipt belongs to a recognized store and its payload
    /// cannot be decoded.
    pub fn try_extract(receipt: Option<&Receipt>) -> Result<Self> {
        let Some(receipt) = receipt else {
            return Ok(Self::invalid());
        };

        match receipt.store.as_str() {
            GOOGLE_PLAY => {
                let envelope: GooglePlayPayload = serde_json::from_str(&receipt.payload)
                    .map_err(|e| PurchaseError::MalformedReceipt(format!("GooglePlay payload: {e}")))?;
                let purchase: GooglePlayPurchase = serde_json::from_str(&envelope.json)
                    .map_err(|e| PurchaseError::MalformedReceipt(format!("GooglePlay purchase data: {e}")))?;
                Ok(Self(purchase.purchase_token.unwrap_or_default()))
            }
            APPLE_APP_STORE | MAC_APP_STORE => Ok(Self(receipt.payload.clone())),
            store if store.to_lowercase().contains("fake") => Ok(Self::random()),
            _ => Ok(Self::invalid()),
        }
    }

    /// Like [`ValidationToken::try_extract`], falling back to the invalid token when
    /// a recognized store's payload is malformed.
    pub fn extract(receipt: Option<&Receipt>) -> Self {
        Self::try_extract(receipt).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not extract validation token, using invalid token");
            Self::invalid()
        })
    }
}

impl fmt::Display for ValidationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize)]
struct GooglePlayPayload {
    json: String,
}

// INAPP_PURCHASE_DATA
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GooglePlayPurchase {
    #[serde(default)]
    purchase_token: Option<String>,
}
