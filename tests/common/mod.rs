#![allow(dead_code)]

use iapflow::domain::product::{Product, ProductMetadata, ProductType};
use iapflow::infrastructure::fake_store::FakeStore;
use iapflow::{InAppPurchasing, InitializeOptions, InitializeResult};
use rust_decimal_macros::dec;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

pub fn catalog() -> Vec<Product> {
    vec![
        Product::new("gems_100", ProductType::Consumable).with_metadata(ProductMetadata {
            title: "100 Gems".to_string(),
            description: String::new(),
            price: dec!(0.99),
            currency: "USD".to_string(),
            localized_price: "$0.99".to_string(),
        }),
        Product::new("no_ads", ProductType::NonConsumable),
        Product::new("vip", ProductType::Subscription).unpurchasable(),
    ]
}

pub async fn initialized(store: FakeStore) -> (InAppPurchasing, Arc<FakeStore>) {
    let store = Arc::new(store);
    let purchasing = InAppPurchasing::new();
    let result = purchasing
        .initialize(InitializeOptions::with_gateway(store.clone()))
        .await;
    assert_eq!(result, InitializeResult::Success);
    (purchasing, store)
}

/// Collects every transaction notification as a line of text.
pub fn record_events(purchasing: &InAppPurchasing) -> Rc<RefCell<Vec<String>>> {
    let events = Rc::new(RefCell::new(Vec::new()));

    let e = events.clone();
    purchasing.on_transaction_added(move |tx| {
        e.borrow_mut().push(format!("added {}", tx.product_id))
    });
    let e = events.clone();
    purchasing.on_transaction_changed(move |tx, change| {
        e.borrow_mut()
            .push(format!("changed {} [{}]", tx.product_id, change))
    });
    let e = events.clone();
    purchasing.on_transaction_removed(move |tx| {
        e.borrow_mut()
            .push(format!("removed {} {}", tx.product_id, tx.state))
    });

    events
}
