use super::callback_queue::DeferredCallbackQueue;
use super::initialization::{
    InitializationCoordinator, InitializeOptions, InitializeResult, InitializeState,
};
use super::registry::{SubscriptionId, TransactionRegistry};
use crate::domain::ports::{StoreEvent, StoreGatewayRef, StoreListener};
use crate::domain::product::{ProductDetails, PurchaseAvailability, PurchaseUnavailableReason};
use crate::domain::receipt::{Receipt, ValidationToken};
use crate::domain::transaction::{
    FailureReason, Transaction, TransactionChange, TransactionState, TransactionUpdate,
};
use crate::error::{InitializationFailure, PurchaseError, Result};
use std::future::Future;

/// The in-app purchasing service.
///
/// Owns the initialization gate, the live transactions and the queue through which
/// store callbacks reach them. All state lives on the thread that owns this value;
/// store callbacks from other threads only enqueue, and take effect on the next
/// [`InAppPurchasing::tick`].
#[derive(Default)]
pub struct InAppPurchasing {
    coordinator: InitializationCoordinator,
    registry: TransactionRegistry,
    callbacks: DeferredCallbackQueue<StoreEvent>,
}

impl InAppPurchasing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes purchasing once; concurrent and later callers share the outcome.
    pub async fn initialize(&self, options: InitializeOptions) -> InitializeResult {
        self.coordinator.initialize(options, self.listener()).await
    }

    /// Stops waiting when `cancel` resolves; initialization itself carries on.
    pub async fn initialize_with_cancel(
        &self,
        options: InitializeOptions,
        cancel: impl Future<Output = ()>,
    ) -> InitializeResult {
        self.coordinator
            .initialize_with_cancel(options, self.listener(), cancel)
            .await
    }

    /// Current initialization state.
    pub fn state(&self) -> InitializeState {
        self.coordinator.state()
    }

    /// Whether purchases can be made.
    pub fn available(&self) -> bool {
        self.state() == InitializeState::Initialized
    }

    /// Why initialization failed, if it did.
    pub fn initialization_failure(&self) -> Option<InitializationFailure> {
        self.coordinator.failure()
    }

    /// Applies every store callback received since the last tick.
    pub fn tick(&self) -> usize {
        self.coordinator.state();
        self.callbacks.drain(|event| self.apply_store_event(event))
    }

    /// Waits for the next store callback, then ticks.
    pub async fn pump(&self) -> usize {
        self.callbacks.wait().await;
        self.tick()
    }

    /// Starts a purchase of `product_id`.
    ///
    /// The returned transaction may already be `Failed` (and removed) when the store
    /// could not dispatch the purchase.
    ///
    /// # Arguments
    ///
    /// * `product_id` - A product known to the store gateway.
    /// * `force_complete_existing` - Complete an unresolved transaction for the same
    ///   product first, instead of failing with `DuplicateTransaction`.
    pub fn initiate_transaction(
        &self,
        product_id: &str,
        force_complete_existing: bool,
    ) -> Result<Transaction> {
        let gateway = self.gateway()?;
        let product =
            gateway
                .lookup_product(product_id)
                .ok_or_else(|| PurchaseError::UnknownProduct {
                    product_id: product_id.to_string(),
                })?;

        if let Some(existing) = self.registry.get(&product.id) {
            if !force_complete_existing {
                return Err(PurchaseError::DuplicateTransaction {
                    product_id: product.id,
                });
            }
            tracing::warn!(%product_id, "Force-completing existing transaction to start a new one");
            self.complete_transaction(&existing, false)?;
        }

        let transaction = self.registry.create(&product.id)?;

        tracing::info!(%product_id, "Initiating purchase");
        if let Err(e) = gateway.initiate_purchase(&product.id) {
            tracing::error!(%product_id, error = %e, "Store could not initiate the purchase");
            return Ok(self.finish(
                &transaction,
                TransactionUpdate::failed(FailureReason::PurchasingUnavailable),
            ));
        }
        Ok(self.live(&transaction).unwrap_or(transaction))
    }

    /// Completes a collectable transaction and removes it.
    ///
    /// Unless `already_consumed_remotely`, the purchase is confirmed with the store
    /// first; if that fails the transaction ends `Failed` instead. Either way the
    /// returned snapshot is terminal and the transaction is gone from the registry.
    pub fn complete_transaction(
        &self,
        transaction: &Transaction,
        already_consumed_remotely: bool,
    ) -> Result<Transaction> {
        let gateway = self.gateway()?;
        let live = self
            .live(transaction)
            .ok_or_else(|| PurchaseError::TransactionNotActive {
                product_id: transaction.product_id.clone(),
            })?;

        if !live.state.is_collectable() {
            return Err(PurchaseError::CompletionState {
                product_id: live.product_id,
                state: live.state,
            });
        }

        if already_consumed_remotely {
            tracing::info!(
                product_id = %live.product_id,
                "Completing transaction (consumed and acknowledged remotely)"
            );
        } else {
            tracing::info!(product_id = %live.product_id, "Completing transaction");
            if let Err(e) = gateway.confirm_pending_purchase(&live.product_id) {
                tracing::error!(
                    product_id = %live.product_id,
                    error = %e,
                    "Failed to confirm pending purchase"
                );
                return Ok(self.finish(&live, TransactionUpdate::failed(FailureReason::Unknown)));
            }
        }

        Ok(self.finish(&live, TransactionUpdate::state(TransactionState::Completed)))
    }

    /// The unresolved transaction for `product_id`, if any.
    pub fn get_transaction(&self, product_id: &str) -> Option<Transaction> {
        self.registry.get(product_id)
    }

    /// All unresolved transactions, ordered by product id.
    pub fn active_transactions(&self) -> Vec<Transaction> {
        self.registry.active()
    }

    /// Availability, store metadata and active transaction of a product.
    ///
    /// Availability is derived on every call from the initialization state, the
    /// store's catalog and the registry.
    pub fn get_product_details(&self, product_id: &str) -> ProductDetails {
        let Some(gateway) = self.coordinator.gateway() else {
            return ProductDetails {
                id: product_id.to_string(),
                availability: PurchaseAvailability::Unavailable(
                    PurchaseUnavailableReason::Uninitialized,
                ),
                active_transaction: None,
                product: None,
            };
        };

        let product = gateway.lookup_product(product_id);
        let active_transaction = self.registry.get(product_id);
        let availability = match &product {
            None => PurchaseAvailability::Unavailable(PurchaseUnavailableReason::UnknownProduct),
            Some(p) if !p.purchasable => {
                PurchaseAvailability::Unavailable(PurchaseUnavailableReason::ProductUnavailable)
            }
            Some(_)
                if active_transaction
                    .as_ref()
                    .is_some_and(|t| !t.state.is_terminal()) =>
            {
                PurchaseAvailability::Unavailable(PurchaseUnavailableReason::HasPendingPurchase)
            }
            Some(_) => PurchaseAvailability::Available,
        };

        ProductDetails {
            id: product_id.to_string(),
            availability,
            active_transaction,
            product,
        }
    }

    /// Details of every product the store knows; empty before initialization.
    pub fn all_product_details(&self) -> Vec<ProductDetails> {
        self.coordinator
            .gateway()
            .map(|gateway| {
                gateway
                    .products()
                    .iter()
                    .map(|p| self.get_product_details(&p.id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Subscribes to new transactions. Listeners run inline.
    pub fn on_transaction_added(&self, listener: impl Fn(&Transaction) + 'static) -> SubscriptionId {
        self.registry.on_added(listener)
    }

    /// Subscribes to transaction updates; the change lists exactly the fields that moved.
    pub fn on_transaction_changed(
        &self,
        listener: impl Fn(&Transaction, &TransactionChange) + 'static,
    ) -> SubscriptionId {
        self.registry.on_changed(listener)
    }

    /// Subscribes to transactions reaching a terminal state and leaving the registry.
    pub fn on_transaction_removed(
        &self,
        listener: impl Fn(&Transaction) + 'static,
    ) -> SubscriptionId {
        self.registry.on_removed(listener)
    }

    /// Removes a listener. Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// Applies any callbacks still queued and tears the service down, returning the
    /// transactions that never reached a terminal state.
    pub fn shutdown(self) -> Vec<Transaction> {
        self.tick();
        let unresolved = self.registry.active();
        for transaction in &unresolved {
            tracing::warn!(
                product_id = %transaction.product_id,
                state = %transaction.state,
                "Unresolved transaction at shutdown"
            );
        }
        unresolved
    }

    fn listener(&self) -> StoreListener {
        let sender = self.callbacks.sender();
        StoreListener::new(move |event| {
            sender.enqueue(event);
        })
    }

    fn gateway(&self) -> Result<StoreGatewayRef> {
        self.coordinator.gateway().ok_or_else(|| {
            PurchaseError::InvalidOperation(
                "call initialize first, otherwise check the logs for initialization errors"
                    .to_string(),
            )
        })
    }

    fn live(&self, transaction: &Transaction) -> Option<Transaction> {
        self.registry
            .get(&transaction.product_id)
            .filter(|live| live.attempt_id == transaction.attempt_id)
    }

    /// Moves `transaction` to a terminal state and removes it.
    fn finish(&self, transaction: &Transaction, update: TransactionUpdate) -> Transaction {
        let finished = match self.registry.update(&transaction.product_id, update) {
            Ok(finished) => finished,
            Err(e) => {
                tracing::error!(product_id = %transaction.product_id, error = %e, "Could not finish transaction");
                transaction.clone()
            }
        };
        self.registry.remove(&finished).unwrap_or(finished)
    }

    fn apply_store_event(&self, event: StoreEvent) -> Result<()> {
        match event {
            StoreEvent::PurchaseUpdated { product, deferred } => {
                self.registry.get_or_create(&product.product_id)?;

                let receipt = product.receipt.as_deref().and_then(|raw| {
                    Receipt::from_unified_json(raw)
                        .inspect_err(|e| {
                            tracing::warn!(product_id = %product.product_id, error = %e, "Ignoring unreadable receipt");
                        })
                        .ok()
                });
                let token = ValidationToken::extract(receipt.as_ref());
                let transaction_id = product
                    .transaction_id
                    .or_else(|| receipt.as_ref().and_then(|r| r.transaction_id.clone()));
                let state = if deferred {
                    TransactionState::Deferred
                } else {
                    TransactionState::ReadyToCollect
                };

                self.registry.update(
                    &product.product_id,
                    TransactionUpdate::state(state)
                        .with_receipt(receipt)
                        .with_transaction_id(transaction_id)
                        .with_token(token),
                )?;
            }
            StoreEvent::PurchaseFailed {
                product_id,
                reason,
                message,
            } => {
                self.registry.get_or_create(&product_id)?;
                tracing::debug!(%product_id, ?reason, %message, "Applying purchase failure");
                let failed = self
                    .registry
                    .update(&product_id, TransactionUpdate::failed(reason.into()))?;
                self.registry.remove(&failed);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::StoreFailureReason;
    use crate::domain::product::{Product, ProductType};
    use crate::infrastructure::fake_store::{FakeOutcome, FakeStore};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    async fn initialized(store: FakeStore) -> (InAppPurchasing, Arc<FakeStore>) {
        let store = Arc::new(store);
        let purchasing = InAppPurchasing::new();
        let result = purchasing
            .initialize(InitializeOptions::with_gateway(store.clone()))
            .await;
        assert_eq!(result, InitializeResult::Success);
        (purchasing, store)
    }

    fn catalog() -> Vec<Product> {
        vec![
            Product::new("gems_100", ProductType::Consumable),
            Product::new("no_ads", ProductType::NonConsumable),
        ]
    }

    #[tokio::test]
    async fn test_callbacks_wait_for_tick() {
        let (purchasing, _store) = initialized(FakeStore::new(catalog())).await;

        let tx = purchasing.initiate_transaction("gems_100", false).unwrap();
        assert_eq!(tx.state, TransactionState::UserPerformingPurchase);
        assert_eq!(
            purchasing.get_transaction("gems_100").unwrap().state,
            TransactionState::UserPerformingPurchase
        );

        assert_eq!(purchasing.tick(), 1);
        let live = purchasing.get_transaction("gems_100").unwrap();
        assert_eq!(live.state, TransactionState::ReadyToCollect);
        assert_eq!(live.transaction_id.as_deref(), Some("fake-1"));
        assert!(live.token.is_valid());
    }

    #[tokio::test]
    async fn test_failure_callback_removes_transaction() {
        let (purchasing, _store) = initialized(
            FakeStore::new(catalog())
                .with_outcome("gems_100", FakeOutcome::Fail(StoreFailureReason::UserCancelled)),
        )
        .await;

        let removed = Rc::new(RefCell::new(None));
        let r = removed.clone();
        purchasing.on_transaction_removed(move |tx| *r.borrow_mut() = Some(tx.clone()));

        purchasing.initiate_transaction("gems_100", false).unwrap();
        purchasing.tick();

        let removed = removed.borrow().clone().expect("transaction removed");
        assert_eq!(removed.state, TransactionState::Failed);
        assert_eq!(removed.failure_reason, FailureReason::UserCancelled);
        assert!(purchasing.get_transaction("gems_100").is_none());
    }

    #[tokio::test]
    async fn test_operations_before_initialize() {
        let purchasing = InAppPurchasing::new();
        assert!(!purchasing.available());
        assert!(matches!(
            purchasing.initiate_transaction("gems_100", false),
            Err(PurchaseError::InvalidOperation(_))
        ));
        let tx = Transaction::new(1, "gems_100");
        assert!(matches!(
            purchasing.complete_transaction(&tx, false),
            Err(PurchaseError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_pump_waits_for_callbacks() {
        let (purchasing, store) = initialized(FakeStore::new(catalog())).await;

        let reporter = store.clone();
        std::thread::spawn(move || reporter.report_purchase("no_ads", false))
            .join()
            .unwrap();

        assert_eq!(purchasing.pump().await, 1);
        assert_eq!(
            purchasing.get_transaction("no_ads").unwrap().state,
            TransactionState::ReadyToCollect
        );
    }

    #[tokio::test]
    async fn test_shutdown_reports_unresolved() {
        let (purchasing, _store) = initialized(
            FakeStore::new(catalog()).with_outcome("gems_100", FakeOutcome::Defer),
        )
        .await;
        purchasing.initiate_transaction("gems_100", false).unwrap();

        let unresolved = purchasing.shutdown();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].state, TransactionState::Deferred);
    }
}
