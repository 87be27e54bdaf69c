//! Rate limit window specs
//!
//! Parses the `RATE_LIMIT` variable format `<count>/<unit>`, e.g.
//! `200/minute` or `10/second`.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// A request count over a sliding window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSpec {
    /// Maximum requests within the window
    pub limit: u32,
    /// Window length
    pub window: Duration,
}

impl Default for RateLimitSpec {
    fn default() -> Self {
        Self {
            limit: 200,
            window: Duration::from_secs(60),
        }
    }
}

impl FromStr for RateLimitSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidRateLimit { spec: s.to_string() };

        let (count, unit) = s.trim().split_once('/').ok_or_else(invalid)?;
        let limit: u32 = count.trim().parse().map_err(|_| invalid())?;
        if limit == 0 {
            return Err(invalid());
        }

        let window = match unit.trim().to_lowercase().as_str() {
            "second" | "sec" | "s" => Duration::from_secs(1),
            "minute" | "min" | "m" => Duration::from_secs(60),
            "hour" | "h" => Duration::from_secs(3600),
            _ => return Err(invalid()),
        };

        Ok(Self { limit, window })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        let spec: RateLimitSpec = "200/minute".parse().unwrap();
        assert_eq!(spec.limit, 200);
        assert_eq!(spec.window, Duration::from_secs(60));

        let spec: RateLimitSpec = "10/second".parse().unwrap();
        assert_eq!(spec.window, Duration::from_secs(1));

        let spec: RateLimitSpec = "500/hour".parse().unwrap();
        assert_eq!(spec.window, Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<RateLimitSpec>().is_err());
        assert!("minute".parse::<RateLimitSpec>().is_err());
        assert!("0/minute".parse::<RateLimitSpec>().is_err());
        assert!("ten/minute".parse::<RateLimitSpec>().is_err());
        assert!("10/fortnight".parse::<RateLimitSpec>().is_err());
    }
}
