//! Settings → INI serialization.

use super::settings::ConfigFile;

/// Renders the configuration as INI text, sections in a stable order.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let mut out = String::new();

    out.push_str("[store]\n");
    out.push_str(&format!("path = {}\n\n", config.store.path.display()));

    let d = &config.dispatcher;
    out.push_str("[dispatcher]\n");
    out.push_str(&format!("port = {}\n", d.port));
    out.push_str(&format!("cooldown_seconds = {}\n", d.cooldown_seconds));
    out.push_str(&format!("max_retries = {}\n", d.max_retries));
    out.push_str(&format!("inflight_ttl_seconds = {}\n", d.inflight_ttl_seconds));
    out.push_str(&format!(
        "sweep_interval_seconds = {}\n",
        d.sweep_interval_seconds
    ));
    out.push_str(&format!(
        "log_scan_interval_seconds = {}\n",
        d.log_scan_interval_seconds
    ));
    out.push_str(&format!(
        "host_timeout_block_streak = {}\n",
        d.host_timeout_block_streak
    ));
    out.push_str(&format!(
        "abc_priority_extension = {}\n",
        d.abc_priority_extension
    ));
    out.push_str(&format!("idle_backoff_ms = {}\n\n", d.idle_backoff_ms));

    out.push_str("[fetcher]\n");
    out.push_str(&format!("timeout_seconds = {}\n", config.fetcher.timeout_seconds));
    out.push_str(&format!("user_agent = {}\n\n", config.fetcher.user_agent));

    out.push_str("[purger]\n");
    out.push_str(&format!(
        "interval_seconds = {}\n",
        config.purger.interval_seconds
    ));
    out.push_str(&format!(
        "host_reenable_hours = {}\n\n",
        config.purger.host_reenable_hours
    ));

    out.push_str("[logging]\n");
    out.push_str(&format!("directory = {}\n", config.logging.directory.display()));

    out
}
