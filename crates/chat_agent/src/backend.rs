use std::sync::Arc;

use backend_mock::MockBackend;
use chat_contract::{
    AgentStore, BindingStore, CapabilityRegistry, ChatError, SessionStore, TurnTransport,
};
use stock_api::{ApiConfig, HttpBackend};
use stockpilot::config::{AppConfig, BackendKind};

/// Handles to every external collaborator the chat core talks to.
///
/// Each contract is held separately so tests can swap a single one, e.g. a
/// scripted turn transport in front of an in-memory store.
#[derive(Clone)]
pub struct Backend {
    pub turns: Arc<dyn TurnTransport>,
    pub registry: Arc<dyn CapabilityRegistry>,
    pub agents: Arc<dyn AgentStore>,
    pub bindings: Arc<dyn BindingStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Backend {
    /// Uses one implementation for every contract.
    pub fn from_shared<T>(shared: Arc<T>) -> Self
    where
        T: TurnTransport + CapabilityRegistry + AgentStore + BindingStore + SessionStore + 'static,
    {
        Self {
            turns: shared.clone(),
            registry: shared.clone(),
            agents: shared.clone(),
            bindings: shared.clone(),
            sessions: shared,
        }
    }

    #[must_use]
    pub fn demo() -> Self {
        Self::from_shared(Arc::new(MockBackend::demo()))
    }

    pub fn http(config: ApiConfig) -> Result<Self, ChatError> {
        Ok(Self::from_shared(Arc::new(HttpBackend::new(config)?)))
    }
}

pub fn backend_from_config(config: &AppConfig) -> Result<Backend, ChatError> {
    match config.backend {
        BackendKind::Mock => Ok(Backend::demo()),
        BackendKind::Http => {
            let base_url = config.api_url.as_deref().ok_or_else(|| {
                ChatError::validation("an API URL is required for the http backend")
            })?;
            let mut api = ApiConfig::new(base_url);
            if let Some(token) = &config.api_token {
                api = api.with_token(token);
            }
            if let Some(timeout) = config.timeout {
                api = api.with_timeout(timeout);
            }
            Backend::http(api)
        }
    }
}
