//! Backpressure strategy enumeration (§3, §4.8, §4.9).

/// How a producer reconciles with a full buffer (cold-stream `buffer`
/// operator, `SharedFlow`, `StateFlow`). Serializes to the spec's
/// recommended lowercase-snake strings (§6).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BackpressureStrategy {
    Suspend,
    DropOldest,
    DropLatest,
    Error,
}

impl BackpressureStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            BackpressureStrategy::Suspend => "suspend",
            BackpressureStrategy::DropOldest => "drop_oldest",
            BackpressureStrategy::DropLatest => "drop_latest",
            BackpressureStrategy::Error => "error",
        }
    }
}

impl std::fmt::Display for BackpressureStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_forms_match_spec() {
        assert_eq!(BackpressureStrategy::Suspend.as_str(), "suspend");
        assert_eq!(BackpressureStrategy::DropOldest.as_str(), "drop_oldest");
        assert_eq!(BackpressureStrategy::DropLatest.as_str(), "drop_latest");
        assert_eq!(BackpressureStrategy::Error.as_str(), "error");
    }
}
