use std::sync::Arc;

use call_tokens::CallTokenConfig;

use crate::{calls::CallRelay, config::Settings, directory::InMemoryDirectory, router::EventRouter};

#[derive(Clone)]
pub struct AppState {
    pub router: EventRouter,
    pub directory: Arc<InMemoryDirectory>,
    pub calls: Arc<CallRelay>,
    pub auth_secret: String,
    pub publish_key: Option<String>,
    pub session_queue_capacity: usize,
}

impl AppState {
    pub fn from_settings(settings: &Settings) -> Self {
        let directory = Arc::new(InMemoryDirectory::new());
        let router = EventRouter::new(directory.clone());
        let calls = Arc::new(CallRelay::new(
            router.clone(),
            CallTokenConfig {
                api_key: settings.call_token_api_key.clone(),
                api_secret: settings.call_token_api_secret.clone(),
                ttl_seconds: settings.call_token_ttl_seconds,
            },
        ));
        Self {
            router,
            directory,
            calls,
            auth_secret: settings.auth_secret.clone(),
            publish_key: settings.publish_key.clone(),
            session_queue_capacity: settings.session_queue_capacity,
        }
    }
}
