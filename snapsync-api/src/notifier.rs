use reqwest::Client;
use snapsync::notifier::{CompletionNotifier, CompletionReport, LogNotifier};
use snapsync::pipeline::SyncSummary;
use std::time::Duration;
use tracing::{error, info};

/// Path appended to the callback base url.
pub const CALLBACK_PATH: &str = "/api/sync-callback";

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Logs every finished run and, when a callback url is configured, posts its report there.
///
/// Callback failures are logged and otherwise ignored.
#[derive(Debug, Clone)]
pub struct CallbackNotifier {
    client: Client,
    endpoint: Option<String>,
}

impl CallbackNotifier {
    pub fn new(callback_url: Option<&str>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(CALLBACK_TIMEOUT).build()?;
        let endpoint = callback_url
            .map(|url| format!("{}{CALLBACK_PATH}", url.trim_end_matches('/')));

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

impl CompletionNotifier for CallbackNotifier {
    async fn notify(&self, summary: &SyncSummary) {
        LogNotifier.notify(summary).await;

        let Some(endpoint) = &self.endpoint else {
            return;
        };

        let report = CompletionReport::from(summary);
        match self.client.post(endpoint).json(&report).send().await {
            Ok(response) if response.status().is_success() => {
                info!(run_id = report.run_id, endpoint, "completion callback delivered");
            }
            Ok(response) => {
                error!(
                    run_id = report.run_id,
                    endpoint,
                    status = response.status().as_u16(),
                    "completion callback rejected"
                );
            }
            Err(err) => {
                error!(
                    run_id = report.run_id,
                    endpoint,
                    error = %err,
                    "completion callback failed"
                );
            }
        }
    }
}
