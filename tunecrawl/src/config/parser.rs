//! INI → settings parsing.

use std::path::PathBuf;
use std::str::FromStr;

use ini::Ini;

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parses a loaded INI document into a [`ConfigFile`], starting from
/// defaults so missing sections and keys keep their default values.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    if let Some(section) = ini.section(Some("store")) {
        if let Some(path) = section.get("path") {
            config.store.path = PathBuf::from(path);
        }
    }

    if let Some(section) = ini.section(Some("dispatcher")) {
        let d = &mut config.dispatcher;
        parse_key(section, "dispatcher", "port", &mut d.port)?;
        parse_key(section, "dispatcher", "cooldown_seconds", &mut d.cooldown_seconds)?;
        parse_key(section, "dispatcher", "max_retries", &mut d.max_retries)?;
        parse_key(
            section,
            "dispatcher",
            "inflight_ttl_seconds",
            &mut d.inflight_ttl_seconds,
        )?;
        parse_key(
            section,
            "dispatcher",
            "sweep_interval_seconds",
            &mut d.sweep_interval_seconds,
        )?;
        parse_key(
            section,
            "dispatcher",
            "log_scan_interval_seconds",
            &mut d.log_scan_interval_seconds,
        )?;
        parse_key(
            section,
            "dispatcher",
            "host_timeout_block_streak",
            &mut d.host_timeout_block_streak,
        )?;
        if let Some(extension) = section.get("abc_priority_extension") {
            d.abc_priority_extension = extension.to_string();
        }
        parse_key(section, "dispatcher", "idle_backoff_ms", &mut d.idle_backoff_ms)?;
    }

    if let Some(section) = ini.section(Some("fetcher")) {
        parse_key(
            section,
            "fetcher",
            "timeout_seconds",
            &mut config.fetcher.timeout_seconds,
        )?;
        if let Some(agent) = section.get("user_agent") {
            config.fetcher.user_agent = agent.to_string();
        }
    }

    if let Some(section) = ini.section(Some("purger")) {
        parse_key(
            section,
            "purger",
            "interval_seconds",
            &mut config.purger.interval_seconds,
        )?;
        parse_key(
            section,
            "purger",
            "host_reenable_hours",
            &mut config.purger.host_reenable_hours,
        )?;
    }

    if let Some(section) = ini.section(Some("logging")) {
        if let Some(directory) = section.get("directory") {
            config.logging.directory = PathBuf::from(directory);
        }
    }

    Ok(config)
}

/// Parses one key into `target` when present; a present-but-invalid value
/// is an error, not a silent default.
fn parse_key<T: FromStr>(
    section: &ini::Properties,
    section_name: &str,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigFileError> {
    if let Some(raw) = section.get(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ConfigFileError::InvalidValue {
                section: section_name.to_string(),
                key: key.to_string(),
                value: raw.to_string(),
                reason: format!("expected a {}", std::any::type_name::<T>()),
            })?;
    }
    Ok(())
}
