use serde::Deserialize;
use serde::Serialize;

/// Caller class for admission limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Default,
    Verified,
    Premium,
    /// Never rate limited; the store is not consulted.
    Exempt,
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Tier::Default),
            "verified" => Ok(Tier::Verified),
            "premium" => Ok(Tier::Premium),
            "exempt" => Ok(Tier::Exempt),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Tier::Default => "default",
            Tier::Verified => "verified",
            Tier::Premium => "premium",
            Tier::Exempt => "exempt",
        };
        f.write_str(name)
    }
}

/// Burst capacity and refill rate for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierLimits {
    pub capacity: u64,
    /// Tokens per second.
    pub refill_rate: f64,
}

impl TierLimits {
    pub const fn new(capacity: u64, refill_rate: f64) -> Self {
        Self { capacity, refill_rate }
    }
}

/// Limits for every non-exempt tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierTable {
    pub default: TierLimits,
    pub verified: TierLimits,
    pub premium: TierLimits,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            // 20 burst, 12/min sustained
            default: TierLimits::new(20, 0.2),
            verified: TierLimits::new(60, 1.0),
            premium: TierLimits::new(200, 5.0),
        }
    }
}

impl TierTable {
    /// Limits for `tier`, `None` for exempt callers.
    pub fn limits(&self, tier: Tier) -> Option<TierLimits> {
        match tier {
            Tier::Default => Some(self.default),
            Tier::Verified => Some(self.verified),
            Tier::Premium => Some(self.premium),
            Tier::Exempt => None,
        }
    }
}
