use super::transaction::Transaction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    #[default]
    Consumable,
    NonConsumable,
    Subscription,
}

/// Store-provided presentation data for a product.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct ProductMetadata {
    pub title: String,
    pub description: String,
    pub price: Decimal,
    pub currency: String,
    /// Price formatted for the user's locale by the store.
    pub localized_price: String,
}

/// A product as known to the store gateway.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Product {
    pub id: String,
    pub product_type: ProductType,
    /// Whether the store currently allows buying this product.
    pub purchasable: bool,
    pub metadata: Option<ProductMetadata>,
}

impl Product {
    pub fn new(id: impl Into<String>, product_type: ProductType) -> Self {
        Self {
            id: id.into(),
            product_type,
            purchasable: true,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ProductMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn unpurchasable(mut self) -> Self {
        self.purchasable = false;
        self
    }
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseUnavailableReason {
    HasPendingPurchase,
    ProductUnavailable,
    UnknownProduct,
    Uninitialized,
}

/// Whether a product can be bought right now. Derived on every query, never stored.
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseAvailability {
    Available,
    Unavailable(PurchaseUnavailableReason),
}

impl PurchaseAvailability {
    pub fn is_available(&self) -> bool {
        matches!(self, PurchaseAvailability::Available)
    }

    pub fn unavailable_reason(&self) -> Option<PurchaseUnavailableReason> {
        match self {
            PurchaseAvailability::Available => None,
            PurchaseAvailability::Unavailable(reason) => Some(*reason),
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct ProductDetails {
    pub id: String,
    pub availability: PurchaseAvailability,
    pub active_transaction: Option<Transaction>,
    pub product: Option<Product>,
}

impl ProductDetails {
    pub fn metadata(&self) -> Option<&ProductMetadata> {
        self.product.as_ref().and_then(|p| p.metadata.as_ref())
    }

    /// Display price, or `"N/A"` when the product cannot be bought.
    pub fn cost_string(&self) -> String {
        if !self.availability.is_available() {
            return "N/A".to_string();
        }
        self.metadata()
            .map(|m| m.localized_price.clone())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "N/A".to_string())
    }
}
