//! Process-level setup: tracing and shutdown signals.

use tracing_subscriber::fmt::format;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Longest `message` field written to the terminal before truncation.
const MAX_MESSAGE_CHARS: usize = 280;
/// Fields that may carry whole posts; logged as lengths only.
const TEXT_FIELDS: &[&str] = &["original_text", "edited_text", "sample"];

fn truncate_for_log(message: &str, max_chars: usize) -> (&str, bool) {
    match message.char_indices().nth(max_chars) {
        Some((byte_index, _)) => (&message[..byte_index], true),
        None => (message, false),
    }
}

/// Initialize tracing for the foreground process.
///
/// `RUST_LOG` wins over the `--debug` flag when set.
pub fn init_tracing(debug: bool) {
    let field_formatter = format::debug_fn(|writer, field, value| {
        let field_name = field.name();

        if TEXT_FIELDS.contains(&field_name) {
            let formatted = format!("{value:?}");
            write!(writer, "{field_name}=<{} chars>", formatted.chars().count())
        } else if field_name == "message" {
            let formatted = format!("{value:?}");
            let (truncated, was_truncated) = truncate_for_log(&formatted, MAX_MESSAGE_CHARS);
            if was_truncated {
                write!(writer, "{field_name}={truncated}...")
            } else {
                write!(writer, "{field_name}={formatted}")
            }
        } else {
            write!(writer, "{field_name}={value:?}")
        }
    });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .fmt_fields(field_formatter)
        .compact();

    tracing_subscriber::registry()
        .with(build_env_filter(debug))
        .with(fmt_layer)
        .init();
}

fn build_env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    if let Ok(filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        return filter;
    }
    if debug {
        tracing_subscriber::EnvFilter::new("voiceprint=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("info")
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
