//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use edubridge_mailer::{HttpMailer, HttpMailerConfig, LogMailer, Mailer, MemoryMailer};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::auth::TokenService;
use crate::config::{Config, MailProvider, MailerConfig};
use crate::error::{EduError, Result};
use crate::events::EventBroadcaster;
use crate::store::Store;

/// State shared by every handler.
///
/// Cloning is cheap: the store, mailer and broadcaster are shared handles.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// All persisted records.
    pub store: Arc<Mutex<Store>>,
    /// Email delivery back-end.
    pub mailer: Arc<dyn Mailer>,
    /// Issues and checks bearer tokens.
    pub tokens: TokenService,
    /// Live event feed for tutors and admins.
    pub events: EventBroadcaster,
}

impl AppState {
    /// Creates state with an empty store.
    #[must_use]
    pub fn new(config: Config, mailer: Arc<dyn Mailer>) -> Self {
        Self::with_store(config, Store::new(), mailer)
    }

    /// Creates state around an existing store, e.g. one loaded from disk.
    #[must_use]
    pub fn with_store(config: Config, store: Store, mailer: Arc<dyn Mailer>) -> Self {
        let tokens = TokenService::from_config(&config.auth);
        Self {
            config,
            store: Arc::new(Mutex::new(store)),
            mailer,
            tokens,
            events: EventBroadcaster::default(),
        }
    }

    /// Link a student follows to answer the invitation `booking_id`.
    #[must_use]
    pub fn respond_url(&self, booking_id: Uuid) -> String {
        format!(
            "{}/invitations/{booking_id}",
            self.config.public_url.trim_end_matches('/')
        )
    }
}

/// Builds the mailer selected by `config.provider`.
pub fn mailer_from_config(config: &MailerConfig) -> Result<Arc<dyn Mailer>> {
    let mailer: Arc<dyn Mailer> = match config.provider {
        MailProvider::Log => Arc::new(LogMailer),
        MailProvider::Memory => Arc::new(MemoryMailer::new()),
        MailProvider::Http => {
            let http = HttpMailer::new(HttpMailerConfig {
                endpoint: config.endpoint.clone().unwrap_or_default(),
                api_key: config.api_key.clone().unwrap_or_default(),
                from_address: config.from_address.clone(),
                from_name: config.from_name.clone(),
                timeout: Duration::from_secs(u64::from(config.timeout_seconds)),
            })
            .map_err(|e| {
                EduError::config_validation(
                    e.to_string(),
                    "Set mailer.endpoint and mailer.apiKey",
                )
            })?;
            Arc::new(http)
        }
    };
    info!(mailer = mailer.name(), "Mailer configured");
    Ok(mailer)
}
