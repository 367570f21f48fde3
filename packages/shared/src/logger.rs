//! Logging setup shared by the PairChat binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber with the specified default log level.
///
/// The filter covers the PairChat library crates and the calling binary. It can
/// be overridden with the `RUST_LOG` environment variable.
///
/// # Arguments
///
/// * `binary_name` - The name of the binary (e.g., "pairchat-server")
/// * `default_log_level` - The default log level (e.g., "debug", "info", "warn")
///
/// # Examples
///
/// ```no_run
/// use pairchat_shared::logger::setup_logger;
///
/// setup_logger("pairchat-server", "debug");
/// ```
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(binary_name, default_log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the default filter directive string used when `RUST_LOG` is unset.
fn default_filter(binary_name: &str, default_log_level: &str) -> String {
    let mut targets = vec!["pairchat_shared", "pairchat_server", "pairchat_client"]
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let binary_target = binary_name.replace('-', "_");
    if !targets.contains(&binary_target) {
        targets.push(binary_target);
    }

    targets
        .iter()
        .map(|target| format!("{}={}", target, default_log_level))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_adds_unknown_binary() {
        // テスト項目: ライブラリ以外のバイナリ名がフィルタに追加される
        // given (前提条件):
        let binary_name = "soak-test";

        // when (操作):
        let filter = default_filter(binary_name, "debug");

        // then (期待する結果):
        assert_eq!(
            filter,
            "pairchat_shared=debug,pairchat_server=debug,pairchat_client=debug,soak_test=debug"
        );
    }

    #[test]
    fn test_default_filter_does_not_repeat_library_binary() {
        // テスト項目: クレート名と同じバイナリ名は重複しない
        // given (前提条件):
        let binary_name = "pairchat-client";

        // when (操作):
        let filter = default_filter(binary_name, "info");

        // then (期待する結果):
        assert_eq!(
            filter,
            "pairchat_shared=info,pairchat_server=info,pairchat_client=info"
        );
    }
}
