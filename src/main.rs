use clap::Parser;
use iapflow::domain::ports::StoreFailureReason;
use iapflow::domain::product::Product;
use iapflow::infrastructure::fake_store::{FakeOutcome, FakeStore};
use iapflow::interfaces::csv::catalog_reader::CatalogReader;
use iapflow::interfaces::csv::event_writer::{
    TransactionEvent, TransactionEventWriter, TransactionRecord,
};
use iapflow::logging::{self, LogLevel};
use iapflow::{InAppPurchasing, InitializeOptions, InitializeResult, TransactionState};
use miette::{IntoDiagnostic, Result, miette};
use std::cell::RefCell;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

/// Runs purchases against an in-process fake store and prints every transaction
/// event as CSV.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Store catalog CSV file (id, type, price, currency, title, available)
    catalog: PathBuf,

    /// Product to purchase; may be repeated
    #[arg(long = "purchase", value_name = "PRODUCT")]
    purchases: Vec<String>,

    /// Products whose purchase the user cancels
    #[arg(long, value_name = "PRODUCT")]
    decline: Vec<String>,

    /// Products whose purchase is deferred, e.g. awaiting parental approval
    #[arg(long, value_name = "PRODUCT")]
    defer: Vec<String>,

    /// Approve deferred purchases of these products after all purchases ran
    #[arg(long, value_name = "PRODUCT")]
    approve_deferred: Vec<String>,

    /// Products the store fails to confirm
    #[arg(long, value_name = "PRODUCT")]
    fail_confirm: Vec<String>,

    /// Products the store refuses to start a purchase for
    #[arg(long, value_name = "PRODUCT")]
    refuse: Vec<String>,

    /// Complete without confirming, as if a backend already consumed the purchase
    #[arg(long)]
    consumed_remotely: bool,

    /// Force-complete an existing transaction instead of rejecting a duplicate purchase
    #[arg(long)]
    force: bool,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level);

    let mut catalog: Vec<Product> = Vec::new();
    let file = File::open(&cli.catalog).into_diagnostic()?;
    for product in CatalogReader::new(file).products() {
        match product {
            Ok(product) => catalog.push(product),
            Err(e) => eprintln!("Error reading product: {}", e),
        }
    }

    let store = Arc::new(build_store(&cli, catalog.clone()));
    let purchasing = InAppPurchasing::new();

    let records = Rc::new(RefCell::new(Vec::new()));
    let r = records.clone();
    purchasing.on_transaction_added(move |tx| {
        r.borrow_mut()
            .push(TransactionRecord::new(TransactionEvent::Added, tx))
    });
    let r = records.clone();
    purchasing.on_transaction_changed(move |tx, _| {
        r.borrow_mut()
            .push(TransactionRecord::new(TransactionEvent::Changed, tx))
    });
    let r = records.clone();
    purchasing.on_transaction_removed(move |tx| {
        r.borrow_mut()
            .push(TransactionRecord::new(TransactionEvent::Removed, tx))
    });

    let options = InitializeOptions::with_gateway(store.clone()).configure(move |builder| {
        for product in &catalog {
            builder.add_product(product.id.clone(), product.product_type);
        }
        Ok(())
    });
    if purchasing.initialize(options).await != InitializeResult::Success {
        let reason = purchasing
            .initialization_failure()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        return Err(miette!("Purchasing initialization failed: {}", reason));
    }

    for product_id in &cli.purchases {
        if let Err(e) = purchasing.initiate_transaction(product_id, cli.force) {
            eprintln!("Error initiating purchase: {}", e);
            continue;
        }
        purchasing.tick();
        collect(&purchasing, product_id, cli.consumed_remotely);
    }

    for product_id in &cli.approve_deferred {
        if store.report_purchase(product_id, false) {
            purchasing.tick();
            collect(&purchasing, product_id, cli.consumed_remotely);
        }
    }

    let unresolved = purchasing.shutdown();
    if !unresolved.is_empty() {
        eprintln!("{} transaction(s) left unresolved", unresolved.len());
    }

    let records = records.take();
    let stdout = io::stdout();
    let mut writer = TransactionEventWriter::new(stdout.lock());
    writer.write_records(records).into_diagnostic()?;

    Ok(())
}

fn build_store(cli: &Cli, catalog: Vec<Product>) -> FakeStore {
    let mut store = FakeStore::new(catalog);
    for id in &cli.decline {
        store = store.with_outcome(id, FakeOutcome::Fail(StoreFailureReason::UserCancelled));
    }
    for id in &cli.defer {
        store = store.with_outcome(id, FakeOutcome::Defer);
    }
    for id in &cli.fail_confirm {
        store = store.failing_confirmation(id);
    }
    for id in &cli.refuse {
        store = store.refusing_purchase(id);
    }
    store
}

fn collect(purchasing: &InAppPurchasing, product_id: &str, consumed_remotely: bool) {
    let Some(transaction) = purchasing.get_transaction(product_id) else {
        return;
    };
    if transaction.state != TransactionState::ReadyToCollect {
        return;
    }
    if let Err(e) = purchasing.complete_transaction(&transaction, consumed_remotely) {
        eprintln!("Error completing transaction: {}", e);
    }
}
