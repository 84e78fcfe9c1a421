use std::sync::Arc;

use tracing::info;

/// The `logger` construction option: receives the rendered output of every `log`
/// action. Defaults to forwarding through `tracing::info!` rather than `console`,
/// matching this workspace's convention of never printing directly.
pub type Logger = Arc<dyn Fn(&str) + Send + Sync>;

#[must_use]
pub fn default_logger() -> Logger {
	Arc::new(|message: &str| info!(target: "statechart::log", "{message}"))
}
