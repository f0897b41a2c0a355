//! Command-line interface for rpc-prometheus
//!
//! Provides argument parsing and subcommand handling for the rpc-prometheus
//! binary.

use clap::{Parser, Subcommand};

/// Prometheus instrumentation for RPC calls
#[derive(Parser)]
#[command(name = "rpc-prometheus")]
#[command(version)]
#[command(about = "Prometheus instrumentation for RPC calls of every shape")]
#[command(
    long_about = "rpc-prometheus records request counts, errors, in-flight calls and latency \
    for unary, client-streaming, server-streaming and bidirectional RPC calls. The binary \
    generates configuration templates and drives a synthetic workload to show the metrics \
    it produces."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Drive synthetic calls of every shape and print the resulting metrics
    Simulate {
        /// Number of calls per shape and role
        #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=10_000))]
        calls: u32,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# rpc-prometheus Configuration
# ============================
#
# Each role (server, client) gets its own set of call metrics:
#
#   {prefix}_requests_total                          completed calls
#   {prefix}_requests_error_total                    failed calls, by error_code
#   {prefix}_requests_in_progress                    calls in flight
#   {prefix}_requests_duration_histogram_seconds     latency histogram
#   {prefix}_requests_duration_summary_seconds       latency quantiles (windowed)

# ─────────────────────────────────────────────────────────────────────────────
# SERVER INSTRUMENTATION
# ─────────────────────────────────────────────────────────────────────────────

[server]
# Metric name prefix (defaults to "server")
prefix = "server"

# Label schema:
#   - "service_method": labels {service, method}
#   - "method": label {method} only; merges same-named methods across services
# Changing this changes every series name, so dashboards must follow.
label_granularity = "service_method"

# Metrics to maintain: "total", "error", "in_progress", "histogram", "summary"
enabled_metrics = ["total", "error", "in_progress", "histogram"]

# Histogram buckets in seconds:
#   - "fine": 5ms .. 10s, for sub-second calls
#   - "coarse": 100ms .. 120s, for slow or long-running calls
#   - an explicit, strictly increasing list, e.g. [0.01, 0.1, 1.0]
buckets = "fine"

# Count failures the error classifier cannot map to a status code under this
# error_code. Unset means such failures are not recorded in the error counter.
# unclassified_error_label = "Unknown"

# Sliding window for the summary (only used when "summary" is enabled)
[server.summary]
quantiles = [0.5, 0.9, 0.99]
max_age_seconds = 600
age_buckets = 5

# ─────────────────────────────────────────────────────────────────────────────
# CLIENT INSTRUMENTATION
# ─────────────────────────────────────────────────────────────────────────────

[client]
prefix = "client"
label_granularity = "service_method"
enabled_metrics = ["total", "error", "in_progress", "histogram"]
buckets = "fine"

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        // Clap's built-in verification for the CLI structure
        Cli::command().debug_assert();
    }

    #[test]
    fn default_config_path() {
        let cli = Cli::parse_from(["rpc-prometheus"]);
        assert_eq!(cli.config, "config.toml");
        assert!(cli.command.is_none());
    }

    #[test]
    fn custom_config_path() {
        let cli = Cli::parse_from(["rpc-prometheus", "--config", "custom.toml"]);
        assert_eq!(cli.config, "custom.toml");
    }

    #[test]
    fn config_subcommand_with_output() {
        let cli = Cli::parse_from(["rpc-prometheus", "config", "-o", "my-config.toml"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config { output: Some(ref path) }) if path == "my-config.toml"
        ));
    }

    #[test]
    fn simulate_defaults_to_twenty_calls() {
        let cli = Cli::parse_from(["rpc-prometheus", "simulate"]);
        assert!(matches!(cli.command, Some(Command::Simulate { calls: 20 })));
    }

    #[test]
    fn simulate_rejects_zero_calls() {
        let result = Cli::try_parse_from(["rpc-prometheus", "simulate", "--calls", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn simulate_accepts_global_config_after_subcommand() {
        let cli = Cli::parse_from(["rpc-prometheus", "simulate", "-c", "other.toml"]);
        assert_eq!(cli.config, "other.toml");
    }

    #[test]
    fn template_is_valid_toml() {
        let template = generate_config_template();
        let result: Result<toml::Value, _> = toml::from_str(template);
        assert!(
            result.is_ok(),
            "Template should be valid TOML: {:?}",
            result.err()
        );
    }

    #[test]
    fn template_has_all_sections() {
        let template = generate_config_template();
        assert!(template.contains("[server]"));
        assert!(template.contains("[server.summary]"));
        assert!(template.contains("[client]"));
        assert!(template.contains("[observability]"));
    }
}
