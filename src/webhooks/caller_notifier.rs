use crate::{config::NotifierConfig, errors::ServiceError};
use std::time::Duration;
use tracing::{error, info, instrument, warn, Instrument};

/// Tells the original caller that their invoice has been paid.
///
/// `notify` must return immediately; delivery happens in the background and
/// its outcome never reaches the code that triggered it.
pub trait CallerNotifier: Send + Sync {
    fn notify(&self, callback_url: String);
}

/// Delivers caller notifications as plain `GET` requests with retries.
#[derive(Clone)]
pub struct HttpCallerNotifier {
    client: reqwest::Client,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl HttpCallerNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Calls `callback_url` until it answers 2xx or attempts run out.
    #[instrument(skip(self))]
    pub async fn deliver(&self, callback_url: &str) -> Result<(), ServiceError> {
        for attempt in 1..=self.max_attempts {
            match self.client.get(callback_url).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(attempt, "Caller notified");
                    return Ok(());
                }
                Ok(response) => {
                    warn!(
                        "Caller notification failed with status: {} (attempt {}/{})",
                        response.status(),
                        attempt,
                        self.max_attempts
                    );
                }
                Err(e) => {
                    warn!(
                        "Caller notification error: {} (attempt {}/{})",
                        e, attempt, self.max_attempts
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        Err(ServiceError::ProviderError(format!(
            "caller callback not delivered after {} attempts",
            self.max_attempts
        )))
    }
}

impl CallerNotifier for HttpCallerNotifier {
    fn notify(&self, callback_url: String) {
        let notifier = self.clone();
        let span = tracing::info_span!("caller_notification", url = %callback_url);

        tokio::spawn(
            async move {
                if let Err(e) = notifier.deliver(&callback_url).await {
                    error!("Caller notification abandoned: {}", e);
                }
            }
            .instrument(span),
        );
    }
}
