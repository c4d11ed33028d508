use crate::domain::ports::{
    BackendServicesRef, ConfigurationBuilder, GatewayError, ServicesState, StoreGatewayRef,
    StoreListener,
};
use crate::error::InitializationFailure;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot::{self, error::TryRecvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitializeState {
    #[default]
    NotInitialized,
    Initializing,
    Initialized,
    InitializeFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializeResult {
    Success,
    Failed,
    /// The caller stopped waiting; the attempt itself keeps running.
    Cancelled,
}

pub type GatewayFactory = Box<dyn FnOnce() -> Result<StoreGatewayRef, GatewayError> + Send>;
pub type ConfigurationModifier =
    Box<dyn FnOnce(&mut ConfigurationBuilder) -> Result<(), GatewayError> + Send>;

/// Inputs of an initialization attempt.
///
/// Only the first caller's options are used; later callers' options are ignored.
pub struct InitializeOptions {
    gateway_factory: GatewayFactory,
    configure: Option<ConfigurationModifier>,
    services: Option<BackendServicesRef>,
    initialize_services: bool,
}

impl InitializeOptions {
    pub fn new(
        gateway_factory: impl FnOnce() -> Result<StoreGatewayRef, GatewayError> + Send + 'static,
    ) -> Self {
        Self {
            gateway_factory: Box::new(gateway_factory),
            configure: None,
            services: None,
            initialize_services: true,
        }
    }

    pub fn with_gateway(gateway: StoreGatewayRef) -> Self {
        Self::new(move || Ok(gateway))
    }

    pub fn configure(
        mut self,
        modifier: impl FnOnce(&mut ConfigurationBuilder) -> Result<(), GatewayError> + Send + 'static,
    ) -> Self {
        self.configure = Some(Box::new(modifier));
        self
    }

    pub fn with_services(mut self, services: BackendServicesRef) -> Self {
        self.services = Some(services);
        self
    }

    /// Whether uninitialized backend services may be initialized on the caller's behalf.
    pub fn initialize_services(mut self, enabled: bool) -> Self {
        self.initialize_services = enabled;
        self
    }
}

type Outcome = Result<StoreGatewayRef, InitializationFailure>;

/// How often waiting callers recheck an in-flight attempt.
const RECHECK_INTERVAL: Duration = Duration::from_millis(5);

/// One-shot gate around store setup.
///
/// The first `initialize` call starts the only attempt this coordinator will ever
/// make. The attempt runs as its own task; every caller, including the first,
/// waits by sleeping briefly and re-checking the shared state, so abandoning a
/// wait never abandons the attempt.
#[derive(Default)]
pub struct InitializationCoordinator {
    state: Cell<InitializeState>,
    attempt: RefCell<Option<oneshot::Receiver<Outcome>>>,
    gateway: RefCell<Option<StoreGatewayRef>>,
    failure: RefCell<Option<InitializationFailure>>,
    attempts_started: Cell<usize>,
}

impl InitializationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes once and reports the attempt's outcome.
    ///
    /// Once initialized, returns `Success` without looking at `options`. Once failed,
    /// returns `Failed`; there is no retry. Must be called within a tokio runtime.
    pub async fn initialize(
        &self,
        options: InitializeOptions,
        listener: StoreListener,
    ) -> InitializeResult {
        match self.state() {
            InitializeState::Initialized => {
                tracing::warn!(
                    "Already initialized. Skipping initialization; the new gateway factory and configuration are ignored"
                );
                return InitializeResult::Success;
            }
            InitializeState::InitializeFailed => {
                tracing::warn!(
                    "Purchasing initialization was attempted before and failed. Skipping initialization"
                );
                return InitializeResult::Failed;
            }
            InitializeState::Initializing => {
                tracing::warn!("Already initializing. Waiting for completion...");
            }
            InitializeState::NotInitialized => self.start(options, listener),
        }
        self.wait().await
    }

    /// Like [`InitializationCoordinator::initialize`], but stops waiting when `cancel`
    /// resolves first.
    pub async fn initialize_with_cancel(
        &self,
        options: InitializeOptions,
        listener: StoreListener,
        cancel: impl Future<Output = ()>,
    ) -> InitializeResult {
        tokio::select! {
            biased;
            result = self.initialize(options, listener) => result,
            () = cancel => {
                tracing::warn!("Stopped waiting for initialization; the attempt keeps running");
                InitializeResult::Cancelled
            }
        }
    }

    /// Current state, after taking in the outcome of a finished attempt.
    pub fn state(&self) -> InitializeState {
        self.poll_attempt();
        self.state.get()
    }

    /// The gateway, once initialized.
    pub fn gateway(&self) -> Option<StoreGatewayRef> {
        if self.state() != InitializeState::Initialized {
            return None;
        }
        self.gateway.borrow().clone()
    }

    pub fn failure(&self) -> Option<InitializationFailure> {
        self.failure.borrow().clone()
    }

    pub fn attempts_started(&self) -> usize {
        self.attempts_started.get()
    }

    fn start(&self, options: InitializeOptions, listener: StoreListener) {
        tracing::debug!("Initializing purchasing...");
        self.state.set(InitializeState::Initializing);
        self.attempts_started.set(self.attempts_started.get() + 1);

        let (sender, receiver) = oneshot::channel();
        *self.attempt.borrow_mut() = Some(receiver);
        tokio::spawn(async move {
            let outcome = run_attempt(options, listener).await;
            // The receiver only goes away with the coordinator.
            let _ = sender.send(outcome);
        });
    }

    /// Sleeps between rechecks so a long store handshake does not spin the runtime.
    async fn wait(&self) -> InitializeResult {
        loop {
            match self.state() {
                InitializeState::Initializing => tokio::time::sleep(RECHECK_INTERVAL).await,
                InitializeState::Initialized => return InitializeResult::Success,
                InitializeState::NotInitialized | InitializeState::InitializeFailed => {
                    return InitializeResult::Failed;
                }
            }
        }
    }

    fn poll_attempt(&self) {
        if self.state.get() != InitializeState::Initializing {
            return;
        }

        let outcome = {
            let mut attempt = self.attempt.borrow_mut();
            let outcome = match attempt.as_mut() {
                Some(receiver) => match receiver.try_recv() {
                    Ok(outcome) => outcome,
                    Err(TryRecvError::Empty) => return,
                    // The attempt task panicked or was torn down with the runtime.
                    Err(TryRecvError::Closed) => Err(InitializationFailure::Aborted),
                },
                None => Err(InitializationFailure::Aborted),
            };
            attempt.take();
            outcome
        };

        match outcome {
            Ok(gateway) => {
                tracing::info!("Purchasing initialized successfully!");
                *self.gateway.borrow_mut() = Some(gateway);
                self.state.set(InitializeState::Initialized);
            }
            Err(failure) => {
                tracing::error!(error = %failure, "Purchasing initialization failed");
                *self.failure.borrow_mut() = Some(failure);
                self.state.set(InitializeState::InitializeFailed);
            }
        }
        tracing::debug!("Purchasing initialization completed");
    }
}

async fn run_attempt(options: InitializeOptions, listener: StoreListener) -> Outcome {
    let InitializeOptions {
        gateway_factory,
        configure,
        services,
        initialize_services,
    } = options;

    ensure_services_ready(services, initialize_services).await?;

    let gateway = gateway_factory()
        .map_err(|e| InitializationFailure::ModuleConstruction(e.to_string()))?;
    tracing::debug!("Purchasing module created successfully");

    let mut builder = ConfigurationBuilder::new();
    if let Some(configure) = configure {
        configure(&mut builder).map_err(|e| InitializationFailure::Configuration(e.to_string()))?;
        tracing::debug!("Configuration builder modified successfully");
    }
    tracing::debug!(
        products = ?builder.products().iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
        "Products list"
    );

    tracing::info!("Initializing store...");
    gateway
        .initialize(builder.build(), listener)
        .await
        .map_err(|e| InitializationFailure::Provider {
            reason: e.reason,
            message: e.message,
        })?;

    Ok(gateway)
}

async fn ensure_services_ready(
    services: Option<BackendServicesRef>,
    initialize_services: bool,
) -> Result<(), InitializationFailure> {
    let Some(services) = services else {
        return Ok(());
    };

    tracing::debug!("Ensuring backend services are initialized");
    match services.state() {
        ServicesState::Uninitialized if initialize_services => {
            tracing::info!("Backend services are not initialized yet. Initializing and waiting for completion");
            services
                .initialize()
                .await
                .map_err(|e| InitializationFailure::ServicesFailed(e.to_string()))?;
        }
        ServicesState::Uninitialized => return Err(InitializationFailure::ServicesNotInitialized),
        ServicesState::Initializing => {
            tracing::info!("Backend services are initializing. Waiting for completion...");
            while services.state() == ServicesState::Initializing {
                tokio::time::sleep(RECHECK_INTERVAL).await;
            }
        }
        ServicesState::Initialized => {}
    }

    if services.state() != ServicesState::Initialized {
        return Err(InitializationFailure::ServicesFailed(
            "backend services did not reach the initialized state".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{BackendServices, InitializeFailureReason, StoreInitError};
    use crate::domain::product::{Product, ProductType};
    use crate::infrastructure::fake_store::FakeStore;
    use crate::infrastructure::services::LocalServices;
    use std::sync::Arc;
    use std::time::Duration;

    fn listener() -> StoreListener {
        StoreListener::new(|_| {})
    }

    fn store() -> Arc<FakeStore> {
        Arc::new(FakeStore::new(vec![Product::new(
            "gems_100",
            ProductType::Consumable,
        )]))
    }

    fn options(store: &Arc<FakeStore>) -> InitializeOptions {
        InitializeOptions::with_gateway(store.clone())
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_attempt() {
        let store = Arc::new(
            FakeStore::new(vec![Product::new("gems_100", ProductType::Consumable)])
                .with_initialization_delay(Duration::from_millis(20)),
        );
        let coordinator = InitializationCoordinator::new();

        let (a, b, c) = tokio::join!(
            coordinator.initialize(options(&store), listener()),
            coordinator.initialize(options(&store), listener()),
            coordinator.initialize(options(&store), listener()),
        );

        assert_eq!([a, b, c], [InitializeResult::Success; 3]);
        assert_eq!(coordinator.attempts_started(), 1);
        assert_eq!(store.initialize_calls(), 1);
        assert_eq!(coordinator.state(), InitializeState::Initialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_sleep_through_long_initialization() {
        let store = Arc::new(
            FakeStore::new(vec![Product::new("gems_100", ProductType::Consumable)])
                .with_initialization_delay(Duration::from_secs(30)),
        );
        let coordinator = InitializationCoordinator::new();

        // The paused clock only advances while every task is idle.
        let (a, b) = tokio::join!(
            coordinator.initialize(options(&store), listener()),
            coordinator.initialize(options(&store), listener()),
        );

        assert_eq!((a, b), (InitializeResult::Success, InitializeResult::Success));
        assert_eq!(store.initialize_calls(), 1);
    }

    #[tokio::test]
    async fn test_initialized_ignores_new_options() {
        let store = store();
        let coordinator = InitializationCoordinator::new();
        assert_eq!(
            coordinator.initialize(options(&store), listener()).await,
            InitializeResult::Success
        );

        let other = InitializeOptions::new(|| Err(GatewayError::new("never called")));
        assert_eq!(
            coordinator.initialize(other, listener()).await,
            InitializeResult::Success
        );
        assert_eq!(coordinator.attempts_started(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_sticky() {
        let failing = Arc::new(
            FakeStore::new(Vec::new()).failing_initialization(StoreInitError::new(
                InitializeFailureReason::NoProductsAvailable,
                "empty catalog",
            )),
        );
        let coordinator = InitializationCoordinator::new();
        assert_eq!(
            coordinator.initialize(options(&failing), listener()).await,
            InitializeResult::Failed
        );
        assert!(matches!(
            coordinator.failure(),
            Some(InitializationFailure::Provider {
                reason: InitializeFailureReason::NoProductsAvailable,
                ..
            })
        ));

        let healthy = store();
        assert_eq!(
            coordinator.initialize(options(&healthy), listener()).await,
            InitializeResult::Failed
        );
        assert_eq!(healthy.initialize_calls(), 0);
        assert!(coordinator.gateway().is_none());
    }

    #[tokio::test]
    async fn test_cancel_only_stops_the_wait() {
        let store = Arc::new(
            FakeStore::new(vec![Product::new("gems_100", ProductType::Consumable)])
                .with_initialization_delay(Duration::from_millis(50)),
        );
        let coordinator = InitializationCoordinator::new();

        let cancelled = coordinator
            .initialize_with_cancel(options(&store), listener(), async {})
            .await;
        assert_eq!(cancelled, InitializeResult::Cancelled);
        assert_eq!(coordinator.state(), InitializeState::Initializing);

        let result = coordinator
            .initialize(InitializeOptions::new(|| Err(GatewayError::new("ignored"))), listener())
            .await;
        assert_eq!(result, InitializeResult::Success);
        assert_eq!(store.initialize_calls(), 1);
    }

    #[tokio::test]
    async fn test_factory_error_fails_initialization() {
        let coordinator = InitializationCoordinator::new();
        let result = coordinator
            .initialize(
                InitializeOptions::new(|| Err(GatewayError::new("no module"))),
                listener(),
            )
            .await;
        assert_eq!(result, InitializeResult::Failed);
        assert!(matches!(
            coordinator.failure(),
            Some(InitializationFailure::ModuleConstruction(_))
        ));
    }

    #[tokio::test]
    async fn test_panicking_attempt_still_leaves_initializing() {
        let coordinator = InitializationCoordinator::new();
        let result = coordinator
            .initialize(
                InitializeOptions::new(|| panic!("module constructor panicked")),
                listener(),
            )
            .await;
        assert_eq!(result, InitializeResult::Failed);
        assert_eq!(coordinator.state(), InitializeState::InitializeFailed);
        assert_eq!(coordinator.failure(), Some(InitializationFailure::Aborted));
    }

    #[tokio::test]
    async fn test_configuration_error_fails_initialization() {
        let store = store();
        let coordinator = InitializationCoordinator::new();
        let result = coordinator
            .initialize(
                options(&store).configure(|_| Err(GatewayError::new("bad product list"))),
                listener(),
            )
            .await;
        assert_eq!(result, InitializeResult::Failed);
        assert_eq!(store.initialize_calls(), 0);
        assert!(matches!(
            coordinator.failure(),
            Some(InitializationFailure::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_configuration_reaches_gateway() {
        let store = store();
        let coordinator = InitializationCoordinator::new();
        coordinator
            .initialize(
                options(&store).configure(|builder| {
                    builder
                        .add_product("gems_100", ProductType::Consumable)
                        .use_catalog_provider(false);
                    Ok(())
                }),
                listener(),
            )
            .await;
        let config = store.configuration().expect("gateway was initialized");
        assert_eq!(config.products.len(), 1);
        assert!(!config.use_catalog_provider);
    }

    #[tokio::test]
    async fn test_uninitialized_services_without_auto_init() {
        let store = store();
        let coordinator = InitializationCoordinator::new();
        let result = coordinator
            .initialize(
                options(&store)
                    .with_services(Arc::new(LocalServices::uninitialized()))
                    .initialize_services(false),
                listener(),
            )
            .await;
        assert_eq!(result, InitializeResult::Failed);
        assert_eq!(
            coordinator.failure(),
            Some(InitializationFailure::ServicesNotInitialized)
        );
    }

    #[tokio::test]
    async fn test_services_are_initialized_on_demand() {
        let store = store();
        let services = Arc::new(LocalServices::uninitialized());
        let coordinator = InitializationCoordinator::new();
        let result = coordinator
            .initialize(options(&store).with_services(services.clone()), listener())
            .await;
        assert_eq!(result, InitializeResult::Success);
        assert_eq!(services.state(), ServicesState::Initialized);
    }

    #[tokio::test]
    async fn test_failing_services() {
        let store = store();
        let coordinator = InitializationCoordinator::new();
        let result = coordinator
            .initialize(
                options(&store).with_services(Arc::new(LocalServices::failing())),
                listener(),
            )
            .await;
        assert_eq!(result, InitializeResult::Failed);
        assert!(matches!(
            coordinator.failure(),
            Some(InitializationFailure::ServicesFailed(_))
        ));
        assert_eq!(store.initialize_calls(), 0);
    }
}
