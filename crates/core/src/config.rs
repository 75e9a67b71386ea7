//! Configuration types for frame transforms

use crate::transform::HeaderPolicy;
use serde::{Deserialize, Serialize};

/// Configuration for the payload shift transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Additive shift applied to every byte past the header (default: 1)
    pub shift: u8,

    /// Untransformed header lengths per frame type (default: 10/3/1)
    pub header_policy: HeaderPolicy,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            shift: 1,
            header_policy: HeaderPolicy::default(),
        }
    }
}

impl TransformConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `shift` is 0 (the transform would be the identity)
    /// - the header policy is invalid
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.shift == 0 {
            return Err(Error::ConfigError(
                "shift must be non-zero, a zero shift leaves payloads unchanged".to_string(),
            ));
        }

        self.header_policy.validate()
    }
}
