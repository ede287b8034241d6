//! Typed field registry for the editable configuration and setting keys.
//!
//! Every key the user can touch through `:set`/`:get` is declared here with
//! its parse rule, so a bad key or a bad value is rejected before any state
//! changes. Config edits produce a validated candidate `Config` that the
//! session routes through a reconfigure; setting edits apply immediately.

use thiserror::Error;

use crate::config::{
    format_duration, parse_duration, Config, Mode, Parity, Settings, StopBits,
};

/// Keys that name connection parameters. Editing one goes through a full
/// reconfigure of the stream.
pub const CONFIG_KEYS: &[&str] = &["path", "baud", "data-bits", "parity", "stop-bits", "timeout"];

/// Keys that name display settings. Editing one takes effect on the next
/// write or read.
pub const SETTING_KEYS: &[&str] = &["mode", "eol", "eol-code", "verbose", "quiet"];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FieldError {
    #[error("'{0}' is not a settable field (read only or unknown)")]
    InvalidField(String),

    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> FieldError {
    FieldError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

pub fn is_config_key(key: &str) -> bool {
    CONFIG_KEYS.contains(&key)
}

pub fn is_setting_key(key: &str) -> bool {
    SETTING_KEYS.contains(&key)
}

/// Validate a config edit and return the candidate `Config`.
///
/// The candidate is not applied here; the caller passes it to the session's
/// reconfigure so that a failed open can roll back cleanly.
pub fn set_config_field(current: &Config, key: &str, value: &str) -> Result<Config, FieldError> {
    let mut candidate = current.clone();
    match key {
        "path" => {
            if value.is_empty() {
                return Err(invalid(key, value, "device path can not be empty"));
            }
            candidate.path = value.to_string();
        }
        "baud" => {
            let baud: u32 = value
                .parse()
                .map_err(|_| invalid(key, value, "expected a positive integer"))?;
            if baud == 0 {
                return Err(invalid(key, value, "expected a positive integer"));
            }
            candidate.baud = baud;
        }
        "data-bits" => {
            let bits: u8 = value
                .parse()
                .map_err(|_| invalid(key, value, "expected 5, 6, 7 or 8"))?;
            if !(5..=8).contains(&bits) {
                return Err(invalid(key, value, "expected 5, 6, 7 or 8"));
            }
            candidate.data_bits = bits;
        }
        "parity" => {
            candidate.parity = Parity::parse(value).map_err(|reason| invalid(key, value, reason))?;
        }
        "stop-bits" => {
            candidate.stop_bits =
                StopBits::parse(value).map_err(|reason| invalid(key, value, reason))?;
        }
        "timeout" => {
            candidate.timeout = Some(
                parse_duration(value)
                    .ok_or_else(|| invalid(key, value, "expected a duration like 500ms or 1s"))?,
            );
        }
        _ => return Err(FieldError::InvalidField(key.to_string())),
    }
    Ok(candidate)
}

/// Apply a setting edit in place and return the value as applied (useful
/// for echoing toggles).
///
/// An empty value toggles `mode` between text and byte, and flips the
/// boolean settings.
pub fn set_setting_field(
    settings: &mut Settings,
    key: &str,
    value: &str,
) -> Result<String, FieldError> {
    match key {
        "mode" => {
            let mode = if value.is_empty() {
                settings.mode.toggled()
            } else {
                Mode::parse(value).map_err(|reason| invalid(key, value, reason))?
            };
            settings.mode = mode;
            Ok(mode.as_str().to_string())
        }
        "eol" => {
            settings.eol_enable = parse_bool_or_toggle(key, value, settings.eol_enable)?;
            Ok(settings.eol_enable.to_string())
        }
        "eol-code" => {
            let hex = value.strip_prefix("0x").unwrap_or(value);
            let code = u32::from_str_radix(hex, 16)
                .map_err(|_| invalid(key, value, "expected a hex code like 0x0a or 0x0a0d"))?;
            settings.eol_code = code;
            Ok(format!("0x{:x}", code))
        }
        "verbose" => {
            settings.verbose = parse_bool_or_toggle(key, value, settings.verbose)?;
            Ok(settings.verbose.to_string())
        }
        "quiet" => {
            settings.quiet = parse_bool_or_toggle(key, value, settings.quiet)?;
            Ok(settings.quiet.to_string())
        }
        _ => Err(FieldError::InvalidField(key.to_string())),
    }
}

fn parse_bool_or_toggle(key: &str, value: &str, current: bool) -> Result<bool, FieldError> {
    match value {
        "" => Ok(!current),
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid(key, value, "expected 'true' or 'false'")),
    }
}

/// Read one config field by key.
pub fn get_config_field(config: &Config, key: &str) -> Result<String, FieldError> {
    match key {
        "path" => Ok(config.path.clone()),
        "baud" => Ok(config.baud.to_string()),
        "data-bits" => Ok(config.data_bits.to_string()),
        "parity" => Ok(config.parity.as_str().to_string()),
        "stop-bits" => Ok(config.stop_bits.as_str().to_string()),
        "timeout" => Ok(config
            .timeout
            .map(format_duration)
            .unwrap_or_else(|| "none".to_string())),
        _ => Err(FieldError::InvalidField(key.to_string())),
    }
}

/// All config key/value pairs, in declaration order (for `:info`).
pub fn config_entries(config: &Config) -> Vec<(&'static str, String)> {
    CONFIG_KEYS
        .iter()
        .filter_map(|&key| get_config_field(config, key).ok().map(|value| (key, value)))
        .collect()
}

/// All setting key/value pairs, in declaration order (for `:info`).
pub fn settings_entries(settings: &Settings) -> Vec<(&'static str, String)> {
    vec![
        ("mode", settings.mode.as_str().to_string()),
        ("eol", settings.eol_enable.to_string()),
        ("eol-code", format!("0x{:x}", settings.eol_code)),
        ("verbose", settings.verbose.to_string()),
        ("quiet", settings.quiet.to_string()),
    ]
}
