//! Downstream topic derivation
//!
//! Every republished message goes to `{prefix}/{app_id}_{dev_id}/{suffix}`.
//! The identifiers come from the uplink body, so they are checked before
//! they become topic levels:
//! - Must not be empty
//! - Must not contain the level separator (`/`)
//! - Must not contain wildcards (`+` or `#`) or the null character

use std::fmt;

use crate::config::DownstreamBrokerConfig;

/// Topic level separator
pub const TOPIC_SEPARATOR: char = '/';

/// Joins application and device ID in the device scope level
pub const SCOPE_SEPARATOR: char = '_';

/// Maximum encoded length of an MQTT topic name
const MAX_TOPIC_LEN: usize = 65535;

/// Error produced when an identifier cannot become a topic level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// Identifier is empty
    EmptyIdentifier(&'static str),
    /// Identifier contains a separator, wildcard or null character
    InvalidIdentifier { field: &'static str, value: String },
    /// Resulting topic exceeds the MQTT limit
    TooLong(usize),
}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicError::EmptyIdentifier(field) => write!(f, "{} is empty", field),
            TopicError::InvalidIdentifier { field, value } => {
                write!(f, "{} {:?} cannot be used as a topic level", field, value)
            }
            TopicError::TooLong(len) => {
                write!(f, "topic is {} bytes, limit is {}", len, MAX_TOPIC_LEN)
            }
        }
    }
}

impl std::error::Error for TopicError {}

fn check_identifier(field: &'static str, value: &str) -> Result<(), TopicError> {
    if value.is_empty() {
        return Err(TopicError::EmptyIdentifier(field));
    }
    if value.contains([TOPIC_SEPARATOR, '+', '#', '\0']) {
        return Err(TopicError::InvalidIdentifier {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Device scope level: `{app_id}_{dev_id}`
pub fn device_scope(app_id: &str, dev_id: &str) -> String {
    format!("{}{}{}", app_id, SCOPE_SEPARATOR, dev_id)
}

/// Builds downstream topics from the configured prefix and suffix
#[derive(Debug, Clone)]
pub struct TopicResolver {
    prefix: String,
    suffix: String,
}

impl TopicResolver {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn from_config(config: &DownstreamBrokerConfig) -> Self {
        Self::new(config.topic_prefix.clone(), config.topic_suffix.clone())
    }

    /// Resolve the topic for one device
    pub fn resolve(&self, app_id: &str, dev_id: &str) -> Result<String, TopicError> {
        check_identifier("app_id", app_id)?;
        check_identifier("dev_id", dev_id)?;

        let topic = format!(
            "{}{sep}{}{sep}{}",
            self.prefix,
            device_scope(app_id, dev_id),
            self.suffix,
            sep = TOPIC_SEPARATOR
        );

        if topic.len() > MAX_TOPIC_LEN {
            return Err(TopicError::TooLong(topic.len()));
        }

        Ok(topic)
    }
}
