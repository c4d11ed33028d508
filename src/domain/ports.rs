use super::product::{Product, ProductType};
use super::transaction::FailureReason;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by a store gateway or backend service call.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct GatewayError(pub String);

impl GatewayError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializeFailureReason {
    PurchasingUnavailable,
    NoProductsAvailable,
    AppNotKnown,
    Unknown,
}

/// Asynchronous initialization failure reported by the provider.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason:?}: {message}")]
pub struct StoreInitError {
    pub reason: InitializeFailureReason,
    pub message: String,
}

impl StoreInitError {
    pub fn new(reason: InitializeFailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Failure reasons in the provider's own vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFailureReason {
    PurchasingUnavailable,
    ExistingPurchasePending,
    ProductUnavailable,
    SignatureInvalid,
    UserCancelled,
    PaymentDeclined,
    DuplicateTransaction,
    Unknown,
    /// Anything the provider reports that this crate does not know yet.
    Other(String),
}

impl From<StoreFailureReason> for FailureReason {
    fn from(reason: StoreFailureReason) -> Self {
        match reason {
            StoreFailureReason::PurchasingUnavailable => FailureReason::PurchasingUnavailable,
            StoreFailureReason::ExistingPurchasePending => FailureReason::ExistingPurchasePending,
            StoreFailureReason::ProductUnavailable => FailureReason::ProductUnavailable,
            StoreFailureReason::SignatureInvalid => FailureReason::SignatureInvalid,
            StoreFailureReason::UserCancelled => FailureReason::UserCancelled,
            StoreFailureReason::PaymentDeclined => FailureReason::PaymentDeclined,
            StoreFailureReason::DuplicateTransaction => FailureReason::DuplicateTransaction,
            StoreFailureReason::Unknown | StoreFailureReason::Other(_) => FailureReason::Unknown,
        }
    }
}

/// A product reported as purchased by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchasedProduct {
    pub product_id: String,
    pub transaction_id: Option<String>,
    /// Unified receipt JSON as produced by the provider.
    pub receipt: Option<String>,
}

/// Returned to the provider from a purchase callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingResult {
    /// The purchase stays open until the client completes the transaction.
    Pending,
}

/// Callback payloads delivered by the provider, possibly from another thread.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    PurchaseUpdated {
        product: PurchasedProduct,
        deferred: bool,
    },
    PurchaseFailed {
        product_id: String,
        reason: StoreFailureReason,
        message: String,
    },
}

/// Callback channel handed to the gateway at initialization.
///
/// Every callback is forwarded to the service's deferred queue; nothing is applied
/// on the caller's stack.
#[derive(Clone)]
pub struct StoreListener {
    sink: Arc<dyn Fn(StoreEvent) + Send + Sync>,
}

impl StoreListener {
    pub fn new(sink: impl Fn(StoreEvent) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn purchase_updated(&self, product: PurchasedProduct, deferred: bool) -> ProcessingResult {
        tracing::info!(product_id = %product.product_id, deferred, "Processing purchase");
        (self.sink)(StoreEvent::PurchaseUpdated { product, deferred });
        ProcessingResult::Pending
    }

    pub fn purchase_failed(
        &self,
        product_id: impl Into<String>,
        reason: StoreFailureReason,
        message: impl Into<String>,
    ) {
        let product_id = product_id.into();
        let message = message.into();
        tracing::error!(%product_id, ?reason, %message, "Purchase failed");
        (self.sink)(StoreEvent::PurchaseFailed {
            product_id,
            reason,
            message,
        });
    }
}

impl fmt::Debug for StoreListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreListener").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductDefinition {
    pub id: String,
    pub product_type: ProductType,
}

/// Configuration handed to the gateway when it is initialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfiguration {
    pub products: Vec<ProductDefinition>,
    pub use_catalog_provider: bool,
    /// Ask the provider to report deferred purchases instead of hiding them.
    pub fetch_deferred_purchases: bool,
}

#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    products: Vec<ProductDefinition>,
    use_catalog_provider: bool,
    fetch_deferred_purchases: bool,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self {
            products: Vec::new(),
            use_catalog_provider: true,
            fetch_deferred_purchases: true,
        }
    }
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_product(&mut self, id: impl Into<String>, product_type: ProductType) -> &mut Self {
        let id = id.into();
        if !self.products.iter().any(|p| p.id == id) {
            self.products.push(ProductDefinition { id, product_type });
        }
        self
    }

    pub fn use_catalog_provider(&mut self, enabled: bool) -> &mut Self {
        self.use_catalog_provider = enabled;
        self
    }

    pub fn fetch_deferred_purchases(&mut self, enabled: bool) -> &mut Self {
        self.fetch_deferred_purchases = enabled;
        self
    }

    pub fn products(&self) -> &[ProductDefinition] {
        &self.products
    }

    pub fn build(self) -> StoreConfiguration {
        StoreConfiguration {
            products: self.products,
            use_catalog_provider: self.use_catalog_provider,
            fetch_deferred_purchases: self.fetch_deferred_purchases,
        }
    }
}

/// The platform purchasing provider.
///
/// Once `initialize` has succeeded the gateway also acts as the store controller.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn initialize(
        &self,
        config: StoreConfiguration,
        listener: StoreListener,
    ) -> Result<(), StoreInitError>;
    fn initiate_purchase(&self, product_id: &str) -> Result<(), GatewayError>;
    fn confirm_pending_purchase(&self, product_id: &str) -> Result<(), GatewayError>;
    fn lookup_product(&self, product_id: &str) -> Option<Product>;
    fn products(&self) -> Vec<Product>;
}

pub type StoreGatewayRef = Arc<dyn StoreGateway>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicesState {
    Uninitialized,
    Initializing,
    Initialized,
}

/// Backend services that must be ready before the store can be initialized.
#[async_trait]
pub trait BackendServices: Send + Sync {
    fn state(&self) -> ServicesState;
    async fn initialize(&self) -> Result<(), GatewayError>;
}

pub type BackendServicesRef = Arc<dyn BackendServices>;
