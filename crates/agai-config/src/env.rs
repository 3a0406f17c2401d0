//! Environment variable overrides.
//!
//! Applied after the config files and before CLI flags:
//!
//! | Variable             | Field                        |
//! |----------------------|------------------------------|
//! | `SERVER_HOST`        | `server.host`                |
//! | `SERVER_PORT`        | `server.port`                |
//! | `SERVER_HTTPS`       | `server.https`               |
//! | `MAX_SESSION_COUNT`  | `session.max_session_count`  |
//! | `SESSION_STORE_TYPE` | `session.store_type`         |
//! | `SESSION_STORE_PATH` | `session.store_path`         |

use std::path::PathBuf;
use std::str::FromStr;

use crate::types::AgaiConfig;

/// Recognized variables and the config field each one sets.
pub const ENV_VARS: &[(&str, &str)] = &[
    ("SERVER_HOST", "server.host"),
    ("SERVER_PORT", "server.port"),
    ("SERVER_HTTPS", "server.https"),
    ("MAX_SESSION_COUNT", "session.max_session_count"),
    ("SESSION_STORE_TYPE", "session.store_type"),
    ("SESSION_STORE_PATH", "session.store_path"),
];

/// The variable that overrides `field`, if any.
pub fn env_var_for(field: &str) -> Option<&'static str> {
    ENV_VARS
        .iter()
        .find(|(_, f)| *f == field)
        .map(|(var, _)| *var)
}

/// What an environment pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvReport {
    /// Fields that took their value from a variable, in [`ENV_VARS`] order.
    pub applied: Vec<&'static str>,
    /// Variables that were set but could not be parsed.
    pub warnings: Vec<String>,
}

/// Apply overrides from the process environment.
pub fn apply_process_env(config: &mut AgaiConfig) -> EnvReport {
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

/// Apply overrides using `lookup` to read variables. Blank values count as
/// unset.
pub fn apply_env_overrides<F>(config: &mut AgaiConfig, lookup: F) -> EnvReport
where
    F: Fn(&str) -> Option<String>,
{
    let mut report = EnvReport::default();

    for &(var, field) in ENV_VARS {
        let Some(raw) = lookup(var).filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        let value = raw.trim();
        let applied = match field {
            "server.host" => {
                config.server_mut().host = value.to_string();
                true
            }
            "server.port" => parse(var, value, &mut report)
                .map(|port| config.server_mut().port = port)
                .is_some(),
            "server.https" => match parse_bool(value) {
                Some(https) => {
                    config.server_mut().https = https;
                    true
                }
                None => {
                    report
                        .warnings
                        .push(format!("ignoring {var}='{raw}': expected a boolean"));
                    false
                }
            },
            "session.max_session_count" => parse(var, value, &mut report)
                .map(|count| config.session_mut().max_session_count = count)
                .is_some(),
            "session.store_type" => {
                config.session_mut().store_type = value.to_ascii_lowercase();
                true
            }
            "session.store_path" => {
                config.session_mut().store_path = PathBuf::from(value);
                true
            }
            _ => false,
        };
        if applied {
            report.applied.push(field);
        }
    }

    report
}

fn parse<T: FromStr>(var: &str, value: &str, report: &mut EnvReport) -> Option<T> {
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            report
                .warnings
                .push(format!("ignoring {var}='{value}': not a valid number"));
            None
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
