use crate::domain::ports::{
    GatewayError, PurchasedProduct, StoreConfiguration, StoreFailureReason, StoreGateway,
    StoreInitError, StoreListener,
};
use crate::domain::product::Product;
use crate::domain::receipt::Receipt;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const FAKE_STORE_NAME: &str = "FakeStore";

/// What the fake store reports after `initiate_purchase`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FakeOutcome {
    #[default]
    Approve,
    Defer,
    Fail(StoreFailureReason),
    /// No callback at all; the user never finishes the purchase.
    Silent,
}

#[derive(Default)]
struct FakeStoreState {
    listener: Option<StoreListener>,
    configuration: Option<StoreConfiguration>,
    initiated: Vec<String>,
    confirmed: Vec<String>,
    next_transaction: u64,
}

/// In-process store gateway with scripted behaviour.
///
/// Purchase callbacks are delivered synchronously from inside `initiate_purchase`,
/// the way real providers sometimes do.
#[derive(Default)]
pub struct FakeStore {
    products: Vec<Product>,
    outcomes: HashMap<String, FakeOutcome>,
    receipts: HashMap<String, Receipt>,
    failing_confirmations: HashSet<String>,
    refused_purchases: HashSet<String>,
    initialization_failure: Option<StoreInitError>,
    initialization_delay: Option<Duration>,
    initialize_calls: AtomicUsize,
    state: Mutex<FakeStoreState>,
}

impl FakeStore {
    pub fn new(products: Vec<Product>) -> Self {
        Self {
            products,
            ..Self::default()
        }
    }

    pub fn with_outcome(mut self, product_id: impl Into<String>, outcome: FakeOutcome) -> Self {
        self.outcomes.insert(product_id.into(), outcome);
        self
    }

    /// Reports `receipt` instead of a generated fake-store receipt for `product_id`.
    pub fn with_receipt(mut self, product_id: impl Into<String>, receipt: Receipt) -> Self {
        self.receipts.insert(product_id.into(), receipt);
        self
    }

    pub fn failing_confirmation(mut self, product_id: impl Into<String>) -> Self {
        self.failing_confirmations.insert(product_id.into());
        self
    }

    pub fn refusing_purchase(mut self, product_id: impl Into<String>) -> Self {
        self.refused_purchases.insert(product_id.into());
        self
    }

    pub fn failing_initialization(mut self, error: StoreInitError) -> Self {
        self.initialization_failure = Some(error);
        self
    }

    pub fn with_initialization_delay(mut self, delay: Duration) -> Self {
        self.initialization_delay = Some(delay);
        self
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn configuration(&self) -> Option<StoreConfiguration> {
        self.lock().configuration.clone()
    }

    pub fn initiated(&self) -> Vec<String> {
        self.lock().initiated.clone()
    }

    pub fn confirmed(&self) -> Vec<String> {
        self.lock().confirmed.clone()
    }

    /// Reports a purchase that was not initiated through this gateway, such as a
    /// restored purchase or a deferred purchase approved later.
    pub fn report_purchase(&self, product_id: &str, deferred: bool) -> bool {
        let Some((listener, product)) = self.purchased(product_id) else {
            return false;
        };
        listener.purchase_updated(product, deferred);
        true
    }

    pub fn report_failure(&self, product_id: &str, reason: StoreFailureReason) -> bool {
        let Some(listener) = self.lock().listener.clone() else {
            return false;
        };
        listener.purchase_failed(product_id, reason, "reported by fake store");
        true
    }

    fn purchased(&self, product_id: &str) -> Option<(StoreListener, PurchasedProduct)> {
        let mut state = self.lock();
        let listener = state.listener.clone()?;
        state.next_transaction += 1;
        let transaction_id = format!("fake-{}", state.next_transaction);
        drop(state);

        let receipt = self.receipts.get(product_id).cloned().unwrap_or_else(|| Receipt {
            store: FAKE_STORE_NAME.to_string(),
            transaction_id: Some(transaction_id.clone()),
            payload: format!("{{\"productId\":\"{product_id}\"}}"),
        });
        let receipt = serde_json::to_string(&receipt).ok();

        Some((
            listener,
            PurchasedProduct {
                product_id: product_id.to_string(),
                transaction_id: Some(transaction_id),
                receipt,
            },
        ))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeStoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StoreGateway for FakeStore {
    async fn initialize(
        &self,
        config: StoreConfiguration,
        listener: StoreListener,
    ) -> Result<(), StoreInitError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.initialization_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.initialization_failure {
            return Err(error.clone());
        }

        let mut state = self.lock();
        state.configuration = Some(config);
        state.listener = Some(listener);
        Ok(())
    }

    fn initiate_purchase(&self, product_id: &str) -> Result<(), GatewayError> {
        if self.refused_purchases.contains(product_id) {
            return Err(GatewayError::new(format!(
                "fake store refused to start a purchase of '{product_id}'"
            )));
        }
        self.lock().initiated.push(product_id.to_string());

        if self
            .lookup_product(product_id)
            .is_some_and(|product| !product.purchasable)
        {
            self.report_failure(product_id, StoreFailureReason::ProductUnavailable);
            return Ok(());
        }

        match self.outcomes.get(product_id).cloned().unwrap_or_default() {
            FakeOutcome::Approve => {
                self.report_purchase(product_id, false);
            }
            FakeOutcome::Defer => {
                self.report_purchase(product_id, true);
            }
            FakeOutcome::Fail(reason) => {
                self.report_failure(product_id, reason);
            }
            FakeOutcome::Silent => {}
        }
        Ok(())
    }

    fn confirm_pending_purchase(&self, product_id: &str) -> Result<(), GatewayError> {
        if self.failing_confirmations.contains(product_id) {
            return Err(GatewayError::new(format!(
                "fake store could not confirm '{product_id}'"
            )));
        }
        self.lock().confirmed.push(product_id.to_string());
        Ok(())
    }

    fn lookup_product(&self, product_id: &str) -> Option<Product> {
        self.products.iter().find(|p| p.id == product_id).cloned()
    }

    fn products(&self) -> Vec<Product> {
        self.products.clone()
    }
}
