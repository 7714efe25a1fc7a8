use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::node::{CHILD_REF_SIZE, HEADER_SIZE};

/// Smallest node limit that still leaves room for a header, a content type
///  length and a couple of child references.
pub const MIN_NODE_LIMIT: usize = 256;

/// Tunables for the CAS core. Every field has a default so an empty
///  `[cas]` table in a config file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CasConfig {
    /// Maximum encoded size of any single node, header included
    pub node_limit: usize,
    /// Maximum number of entries in one collection
    pub max_children: usize,
    /// Maximum UTF-8 byte length of a collection entry name
    pub max_name_bytes: usize,
    /// Maximum UTF-8 byte length of a declared content type
    pub max_content_type_bytes: usize,
    /// Default page size for tree enumeration
    pub tree_page_size: usize,
    /// Ticket lifetime used when the issuer does not ask for one
    pub default_ticket_ttl_secs: u64,
    /// Upper bound on any requested ticket lifetime
    pub max_ticket_ttl_secs: u64,
    /// Optional size cap applied to writes made by unscoped identities
    pub unscoped_write_quota: Option<u64>,
    /// Local retry policy for transient storage failures
    pub retry: RetryConfig,
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            node_limit: 1024 * 1024,
            max_children: 10_000,
            max_name_bytes: 255,
            max_content_type_bytes: 255,
            tree_page_size: 1_000,
            default_ticket_ttl_secs: 3_600,
            max_ticket_ttl_secs: 86_400,
            unscoped_write_quota: None,
            retry: RetryConfig::default(),
        }
    }
}

impl CasConfig {
    /// Config with a different node limit, everything else default.
    pub fn with_node_limit(node_limit: usize) -> Self {
        Self {
            node_limit,
            ..Self::default()
        }
    }

    /// Largest chunk payload that fits in one node; zero when the limit
    ///  cannot even hold a header.
    pub fn chunk_capacity(&self) -> usize {
        self.node_limit.saturating_sub(HEADER_SIZE)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_limit < MIN_NODE_LIMIT {
            return Err(ConfigError::NodeLimitTooSmall(self.node_limit));
        }
        if self.node_limit > u32::MAX as usize {
            return Err(ConfigError::NodeLimitTooLarge(self.node_limit));
        }
        // a root file node must be able to hold at least two references
        //  next to the longest allowed content type
        let root_room = HEADER_SIZE + 2 + self.max_content_type_bytes + 2 * CHILD_REF_SIZE;
        if root_room > self.node_limit {
            return Err(ConfigError::ContentTypeTooLong(self.max_content_type_bytes));
        }
        if self.max_name_bytes == 0 || self.max_name_bytes > u16::MAX as usize {
            return Err(ConfigError::InvalidNameLimit(self.max_name_bytes));
        }
        if self.max_children == 0 || self.tree_page_size == 0 {
            return Err(ConfigError::ZeroLimit);
        }
        if self.default_ticket_ttl_secs > self.max_ticket_ttl_secs {
            return Err(ConfigError::TicketTtl {
                default: self.default_ticket_ttl_secs,
                max: self.max_ticket_ttl_secs,
            });
        }
        Ok(())
    }
}

/// Capped exponential backoff for transient backend failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 4,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("node limit {0} is below the minimum of {MIN_NODE_LIMIT} bytes")]
    NodeLimitTooSmall(usize),
    #[error("node limit {0} does not fit the node header")]
    NodeLimitTooLarge(usize),
    #[error("content types of {0} bytes leave no room for child references")]
    ContentTypeTooLong(usize),
    #[error("invalid name length limit: {0}")]
    InvalidNameLimit(usize),
    #[error("limits must be non-zero")]
    ZeroLimit,
    #[error("default ticket ttl {default}s exceeds max ttl {max}s")]
    TicketTtl { default: u64, max: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        CasConfig::default().validate().unwrap();
        assert_eq!(CasConfig::default().chunk_capacity(), 1024 * 1024 - HEADER_SIZE);
    }

    #[test]
    fn test_rejects_tiny_limit() {
        let config = CasConfig::with_node_limit(64);
        assert_eq!(config.validate(), Err(ConfigError::NodeLimitTooSmall(64)));

        for limit in [0, HEADER_SIZE - 1, HEADER_SIZE] {
            assert_eq!(CasConfig::with_node_limit(limit).chunk_capacity(), 0);
        }
    }

    #[test]
    fn test_minimum_limit_needs_short_content_types() {
        let mut config = CasConfig::with_node_limit(MIN_NODE_LIMIT);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ContentTypeTooLong(255))
        ));
        config.max_content_type_bytes = 64;
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: CasConfig = serde_json::from_str(r#"{"node_limit": 4096}"#).unwrap();
        assert_eq!(config.node_limit, 4096);
        assert_eq!(config.max_children, 10_000);
        assert_eq!(config.retry.attempts, 4);
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let retry = RetryConfig {
            attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 500,
        };
        assert_eq!(retry.delay(1), Duration::from_millis(100));
        assert_eq!(retry.delay(2), Duration::from_millis(200));
        assert_eq!(retry.delay(3), Duration::from_millis(400));
        assert_eq!(retry.delay(4), Duration::from_millis(500));
        assert_eq!(retry.delay(40), Duration::from_millis(500));
    }
}
