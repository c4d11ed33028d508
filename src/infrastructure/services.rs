use crate::domain::ports::{BackendServices, GatewayError, ServicesState};
use async_trait::async_trait;
use std::sync::Mutex;

/// In-process backend services.
pub struct LocalServices {
    state: Mutex<ServicesState>,
    fail: bool,
}

impl LocalServices {
    pub fn ready() -> Self {
        Self {
            state: Mutex::new(ServicesState::Initialized),
            fail: false,
        }
    }

    pub fn uninitialized() -> Self {
        Self {
            state: Mutex::new(ServicesState::Uninitialized),
            fail: false,
        }
    }

    /// Uninitialized services whose initialization always fails.
    pub fn failing() -> Self {
        Self {
            state: Mutex::new(ServicesState::Uninitialized),
            fail: true,
        }
    }

    fn set_state(&self, state: ServicesState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }
}

#[async_trait]
impl BackendServices for LocalServices {
    fn state(&self) -> ServicesState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn initialize(&self) -> Result<(), GatewayError> {
        self.set_state(ServicesState::Initializing);
        tokio::task::yield_now().await;
        if self.fail {
            self.set_state(ServicesState::Uninitialized);
            return Err(GatewayError::new("backend services unreachable"));
        }
        self.set_state(ServicesState::Initialized);
        Ok(())
    }
}
