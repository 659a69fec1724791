// Adapter Options
// Tunables shared by both adapters, readable and writable by key

use crate::db::error::DbalError;
use crate::db::result::ResultPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const OPT_MAX_RECONNECT_ATTEMPTS: &str = "max_reconnect_attempts";
pub const OPT_USLEEP_AFTER_FIRST_ATTEMPT: &str = "usleep_after_first_attempt";
pub const OPT_RESOLVE_NAMED_PARAMS: &str = "resolve_named_params";
pub const OPT_EMULATE_PREPARED_STATEMENTS: &str = "emulate_prepared_statements";
pub const OPT_ENABLE_PARALLEL_QUERIES: &str = "enable_parallel_queries";
pub const OPT_CHARSET: &str = "charset";
pub const OPT_RESULT_POLICY: &str = "result_policy";
pub const OPT_POLL_INTERVAL_US: &str = "poll_interval_us";

const KNOWN_KEYS: [&str; 8] = [
    OPT_MAX_RECONNECT_ATTEMPTS,
    OPT_USLEEP_AFTER_FIRST_ATTEMPT,
    OPT_RESOLVE_NAMED_PARAMS,
    OPT_EMULATE_PREPARED_STATEMENTS,
    OPT_ENABLE_PARALLEL_QUERIES,
    OPT_CHARSET,
    OPT_RESULT_POLICY,
    OPT_POLL_INTERVAL_US,
];

/// Adapter configuration. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdapterOptions {
    /// Reconnection budget; 0 disables reconnection
    pub max_reconnect_attempts: u32,
    /// Pause before every reconnection attempt after the first, in microseconds
    pub usleep_after_first_attempt: u64,
    /// Rewrite `:name` placeholders into the driver's positional form
    pub resolve_named_params: bool,
    /// Inline values into the query text instead of preparing on the server
    pub emulate_prepared_statements: bool,
    /// Run `execute_async` queries on side connections through the scheduler
    pub enable_parallel_queries: bool,
    pub charset: Option<String>,
    pub result_policy: ResultPolicy,
    /// Scheduler poll granularity, in microseconds
    pub poll_interval_us: u64,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 0,
            usleep_after_first_attempt: 50_000,
            resolve_named_params: false,
            emulate_prepared_statements: false,
            enable_parallel_queries: false,
            charset: None,
            result_policy: ResultPolicy::default(),
            poll_interval_us: 50_000,
        }
    }
}

fn check_key(key: &str) -> Result<(), DbalError> {
    if KNOWN_KEYS.contains(&key) {
        Ok(())
    } else {
        Err(DbalError::InvalidOption {
            key: key.to_string(),
            reason: "unknown option".to_string(),
        })
    }
}

impl AdapterOptions {
    /// Load options from a JSON object
    pub fn from_json(value: serde_json::Value) -> Result<Self, DbalError> {
        match &value {
            serde_json::Value::Object(map) => {
                for key in map.keys() {
                    check_key(key)?;
                }
            }
            serde_json::Value::Null => return Ok(Self::default()),
            other => {
                return Err(DbalError::InvalidOption {
                    key: String::new(),
                    reason: format!("expected an object, got {}", other),
                })
            }
        }

        serde_json::from_value(value).map_err(|e| DbalError::InvalidOption {
            key: String::new(),
            reason: e.to_string(),
        })
    }

    /// Load options from key/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, DbalError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        let mut options = Self::default();
        for (key, value) in pairs {
            options.set(&key.into(), value)?;
        }
        Ok(options)
    }

    fn to_map(&self) -> Result<serde_json::Map<String, serde_json::Value>, DbalError> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(DbalError::InvalidOption {
                key: String::new(),
                reason: "options did not serialize to an object".to_string(),
            }),
            Err(e) => Err(DbalError::InvalidOption {
                key: String::new(),
                reason: e.to_string(),
            }),
        }
    }

    /// Current value of an option
    pub fn get(&self, key: &str) -> Result<serde_json::Value, DbalError> {
        check_key(key)?;
        Ok(self
            .to_map()?
            .remove(key)
            .unwrap_or(serde_json::Value::Null))
    }

    /// Whether an option is known and holds a value
    pub fn has(&self, key: &str) -> bool {
        matches!(self.get(key), Ok(value) if !value.is_null())
    }

    /// Change one option; the value must have the option's type
    pub fn set(&mut self, key: &str, value: impl Into<serde_json::Value>) -> Result<(), DbalError> {
        check_key(key)?;
        let mut map = self.to_map()?;
        map.insert(key.to_string(), value.into());
        *self = serde_json::from_value(serde_json::Value::Object(map)).map_err(|e| {
            DbalError::InvalidOption {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(())
    }

    /// Restore the default value of an option
    pub fn unset(&mut self, key: &str) -> Result<(), DbalError> {
        let default = Self::default().get(key)?;
        self.set(key, default)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_micros(self.usleep_after_first_attempt)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.usleep_after_first_attempt = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_resolve_named_params(mut self, enabled: bool) -> Self {
        self.resolve_named_params = enabled;
        self
    }

    pub fn with_emulated_statements(mut self, enabled: bool) -> Self {
        self.emulate_prepared_statements = enabled;
        self
    }

    pub fn with_parallel_queries(mut self, enabled: bool) -> Self {
        self.enable_parallel_queries = enabled;
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn with_result_policy(mut self, policy: ResultPolicy) -> Self {
        self.result_policy = policy;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_us = u64::try_from(interval.as_micros()).unwrap_or(u64::MAX);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = AdapterOptions::default();
        assert_eq!(options.max_reconnect_attempts, 0);
        assert_eq!(options.reconnect_delay(), Duration::from_millis(50));
        assert_eq!(options.poll_interval(), Duration::from_millis(50));
        assert_eq!(options.result_policy, ResultPolicy::Freeze);
        assert!(!options.has(OPT_CHARSET));
    }

    #[test]
    fn test_from_json_partial() {
        let options = AdapterOptions::from_json(json!({
            "max_reconnect_attempts": 3,
            "charset": "UTF8",
            "result_policy": "cache"
        }))
        .unwrap();

        assert_eq!(options.max_reconnect_attempts, 3);
        assert_eq!(options.charset.as_deref(), Some("UTF8"));
        assert_eq!(options.result_policy, ResultPolicy::Cache);
        assert_eq!(options.usleep_after_first_attempt, 50_000);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = AdapterOptions::from_json(json!({ "max_attempts": 3 })).unwrap_err();
        assert!(matches!(err, DbalError::InvalidOption { ref key, .. } if key == "max_attempts"));

        let mut options = AdapterOptions::default();
        assert!(options.set("nope", 1).is_err());
        assert!(!options.has("nope"));
    }

    #[test]
    fn test_ill_typed_value_rejected() {
        let mut options = AdapterOptions::default();
        let err = options.set(OPT_MAX_RECONNECT_ATTEMPTS, "three").unwrap_err();
        assert!(matches!(err, DbalError::InvalidOption { ref key, .. } if key == OPT_MAX_RECONNECT_ATTEMPTS));
        assert_eq!(options.max_reconnect_attempts, 0);
    }

    #[test]
    fn test_get_set_unset() {
        let mut options = AdapterOptions::default();
        options.set(OPT_MAX_RECONNECT_ATTEMPTS, 5).unwrap();
        options.set(OPT_CHARSET, "latin1").unwrap();

        assert_eq!(options.get(OPT_MAX_RECONNECT_ATTEMPTS).unwrap(), json!(5));
        assert!(options.has(OPT_CHARSET));

        options.unset(OPT_MAX_RECONNECT_ATTEMPTS).unwrap();
        options.unset(OPT_CHARSET).unwrap();
        assert_eq!(options, AdapterOptions::default());
    }

    #[test]
    fn test_from_pairs() {
        let options = AdapterOptions::from_pairs([
            (OPT_RESOLVE_NAMED_PARAMS, json!(true)),
            (OPT_POLL_INTERVAL_US, json!(1000)),
        ])
        .unwrap();
        assert!(options.resolve_named_params);
        assert_eq!(options.poll_interval(), Duration::from_millis(1));
    }
}
