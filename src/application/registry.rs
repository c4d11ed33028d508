use super::callback_queue::panic_message;
use crate::domain::transaction::{Transaction, TransactionChange, TransactionUpdate};
use crate::error::{PurchaseError, Result};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

pub type TransactionListener = dyn Fn(&Transaction);
pub type TransactionChangeListener = dyn Fn(&Transaction, &TransactionChange);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Listeners<F: ?Sized> {
    entries: RefCell<Vec<(SubscriptionId, Rc<F>)>>,
}

impl<F: ?Sized> Listeners<F> {
    fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    fn add(&self, id: SubscriptionId, listener: Rc<F>) {
        self.entries.borrow_mut().push((id, listener));
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Calls every listener inline. A panicking listener is logged and skipped.
    fn notify(&self, event: &'static str, mut call: impl FnMut(&F)) {
        let snapshot: Vec<Rc<F>> = self
            .entries
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| call(&listener))) {
                tracing::error!(
                    event,
                    panic = panic_message(panic.as_ref()),
                    "Transaction listener panicked"
                );
            }
        }
    }
}

/// The live transactions, at most one per product.
///
/// Mutations announce themselves synchronously through the added, changed and
/// removed listeners. Listeners run after the registry has released its own
/// state, so they may query the registry again.
pub struct TransactionRegistry {
    entries: RefCell<BTreeMap<String, Transaction>>,
    next_attempt: Cell<u64>,
    next_subscription: Cell<u64>,
    added: Listeners<TransactionListener>,
    changed: Listeners<TransactionChangeListener>,
    removed: Listeners<TransactionListener>,
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self {
            entries: RefCell::new(BTreeMap::new()),
            next_attempt: Cell::new(1),
            next_subscription: Cell::new(1),
            added: Listeners::new(),
            changed: Listeners::new(),
            removed: Listeners::new(),
        }
    }
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh transaction for `product_id` and announces it.
    ///
    /// Fails with `DuplicateTransaction` if the product already has one.
    pub fn create(&self, product_id: &str) -> Result<Transaction> {
        let transaction = {
            let mut entries = self.entries.borrow_mut();
            if entries.contains_key(product_id) {
                return Err(PurchaseError::DuplicateTransaction {
                    product_id: product_id.to_string(),
                });
            }
            let attempt_id = self.next_attempt.get();
            self.next_attempt.set(attempt_id + 1);
            let transaction = Transaction::new(attempt_id, product_id);
            entries.insert(product_id.to_string(), transaction.clone());
            transaction
        };

        tracing::debug!(%product_id, attempt_id = transaction.attempt_id, "Transaction was added");
        self.added.notify("added", |listener| listener(&transaction));
        Ok(transaction)
    }

    /// Returns the live transaction for `product_id`, creating one for callbacks that
    /// arrive without a prior `create`.
    pub fn get_or_create(&self, product_id: &str) -> Result<Transaction> {
        if let Some(existing) = self.get(product_id) {
            return Ok(existing);
        }
        tracing::debug!(%product_id, "No transaction for store callback, recovering one");
        self.create(product_id)
    }

    /// Snapshot of the live transaction for `product_id`.
    pub fn get(&self, product_id: &str) -> Option<Transaction> {
        self.entries.borrow().get(product_id).cloned()
    }

    /// Applies `update` to the live transaction and fires a single changed
    /// notification if any field actually changed.
    pub fn update(&self, product_id: &str, update: TransactionUpdate) -> Result<Transaction> {
        let (transaction, change) = {
            let mut entries = self.entries.borrow_mut();
            let entry =
                entries
                    .get_mut(product_id)
                    .ok_or_else(|| PurchaseError::TransactionNotActive {
                        product_id: product_id.to_string(),
                    })?;
            let change = entry.apply(update)?;
            (entry.clone(), change)
        };

        if let Some(change) = change {
            tracing::debug!(%product_id, %change, "Transaction updated");
            self.changed
                .notify("changed", |listener| listener(&transaction, &change));
        }
        Ok(transaction)
    }

    /// Removes the live entry for `transaction`'s attempt.
    ///
    /// Returns `None`, without notifying, when that attempt is no longer registered.
    pub fn remove(&self, transaction: &Transaction) -> Option<Transaction> {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            let is_live = entries
                .get(&transaction.product_id)
                .is_some_and(|live| live.attempt_id == transaction.attempt_id);
            if is_live {
                entries.remove(&transaction.product_id)
            } else {
                None
            }
        }?;

        tracing::debug!(product_id = %removed.product_id, state = %removed.state, "Transaction was removed");
        self.removed.notify("removed", |listener| listener(&removed));
        Some(removed)
    }

    /// Snapshots of every live transaction, ordered by product id.
    pub fn active(&self) -> Vec<Transaction> {
        self.entries.borrow().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Calls `listener` after every `create`.
    pub fn on_added(&self, listener: impl Fn(&Transaction) + 'static) -> SubscriptionId {
        let id = self.next_subscription_id();
        self.added.add(id, Rc::new(listener));
        id
    }

    /// Calls `listener` after every update that changed at least one field.
    pub fn on_changed(
        &self,
        listener: impl Fn(&Transaction, &TransactionChange) + 'static,
    ) -> SubscriptionId {
        let id = self.next_subscription_id();
        self.changed.add(id, Rc::new(listener));
        id
    }

    /// Calls `listener` after every successful `remove`.
    pub fn on_removed(&self, listener: impl Fn(&Transaction) + 'static) -> SubscriptionId {
        let id = self.next_subscription_id();
        self.removed.add(id, Rc::new(listener));
        id
    }

    /// Removes a listener of any kind. Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.added.remove(id) || self.changed.remove(id) || self.removed.remove(id)
    }

    fn next_subscription_id(&self) -> SubscriptionId {
        let id = self.next_subscription.get();
        self.next_subscription.set(id + 1);
        SubscriptionId(id)
    }
}
