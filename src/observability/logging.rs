//! Structured logging.
//!
//! # Design Decisions
//! - Uses the tracing crate for structured logging
//! - Installed before configuration is read, so loader warnings are visible
//! - The filter sits behind a reload layer and switches to the configured level once known
//! - `RUST_LOG` wins over the configured level when set
//! - Safe to call more than once (tests, embedded use)

use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

/// Level used until the configuration has been loaded.
pub const BOOTSTRAP_LEVEL: &str = "info";

/// Filter directives used when `RUST_LOG` is not set.
pub fn default_directives(level: &str) -> String {
    format!("request_governance={level},tower_http={level}")
}

/// Handle for switching the installed filter to the configured level.
pub struct LogLevelHandle {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
}

impl LogLevelHandle {
    /// Apply the configured level.
    ///
    /// No-op when `RUST_LOG` controls filtering or another subscriber was already installed.
    pub fn set_level(&self, level: &str) {
        let Some(handle) = &self.handle else {
            return;
        };
        match handle.reload(EnvFilter::new(default_directives(level))) {
            Ok(()) => tracing::debug!(level, "Log level applied"),
            Err(e) => tracing::warn!(level, error = %e, "Failed to apply log level"),
        }
    }

    pub fn is_adjustable(&self) -> bool {
        self.handle.is_some()
    }
}

/// Install the global subscriber at `level`.
pub fn init_logging(level: &str) -> LogLevelHandle {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(default_directives(level)), false),
    };
    let (filter, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
        return LogLevelHandle { handle: None };
    }

    LogLevelHandle {
        handle: (!from_env).then_some(handle),
    }
}

/// Run `op` under a scoped subscriber that counts WARN and ERROR events.
#[cfg(test)]
pub(crate) fn count_warnings<T>(op: impl FnOnce() -> T) -> (T, usize) {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_subscriber::layer::{Context, Layer};

    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() <= tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    let warnings = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
    let output = tracing::subscriber::with_default(subscriber, op);
    (output, warnings.load(Ordering::SeqCst))
}
