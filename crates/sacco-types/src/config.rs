use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Process-wide engine configuration.
///
/// Loaded once at startup and passed into the engine explicitly; there is
/// no global configuration row in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// A member may borrow up to this multiple of their share value.
    pub loan_to_share_multiplier: Decimal,
    /// Days from application to the (informational) approval deadline.
    pub approval_window_days: i64,
    /// Unit price assigned to newly created share accounts.
    pub default_unit_price: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            loan_to_share_multiplier: dec!(3),
            approval_window_days: 7,
            default_unit_price: dec!(100.00),
        }
    }
}

impl EngineConfig {
    /// Read overrides from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            loan_to_share_multiplier: env_decimal(
                "SACCO_LOAN_TO_SHARE_MULTIPLIER",
                defaults.loan_to_share_multiplier,
            ),
            approval_window_days: std::env::var("SACCO_APPROVAL_WINDOW_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.approval_window_days),
            default_unit_price: env_decimal("SACCO_SHARE_UNIT_PRICE", defaults.default_unit_price),
        }
    }
}

fn env_decimal(key: &str, fallback: Decimal) -> Decimal {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.loan_to_share_multiplier, dec!(3));
        assert_eq!(config.approval_window_days, 7);
    }
}
