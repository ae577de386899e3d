//! Per-request forwarding decision.

/// Whether a request executes locally or is proxied to the peer.
///
/// Explicit per-request signals (the request flag first, then the header
/// flag) always override the static auto-forward setting, in both
/// directions: an explicit `false` suppresses auto-forwarding and an
/// explicit `true` forces forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingDecision {
    /// Execute against the local dispatcher.
    LocalOnly,
    /// The caller explicitly requested forwarding.
    ForwardRequested,
    /// The static auto-forward configuration applies.
    ForwardAuto,
}

impl ForwardingDecision {
    /// Computes the decision from the explicit flags and the static
    /// configuration.
    #[must_use]
    pub fn decide(
        request_flag: Option<bool>,
        header_flag: Option<bool>,
        auto_forward: bool,
    ) -> Self {
        match request_flag.or(header_flag) {
            Some(true) => Self::ForwardRequested,
            Some(false) => Self::LocalOnly,
            None if auto_forward => Self::ForwardAuto,
            None => Self::LocalOnly,
        }
    }

    /// Returns `true` when the request goes upstream.
    #[must_use]
    pub fn is_forwarded(self) -> bool {
        !matches!(self, Self::LocalOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_flag_overrides_auto_forward() {
        // Explicit false suppresses auto-forward.
        assert_eq!(
            ForwardingDecision::decide(Some(false), None, true),
            ForwardingDecision::LocalOnly
        );
        // Explicit true forces forwarding without auto-forward.
        assert_eq!(
            ForwardingDecision::decide(Some(true), None, false),
            ForwardingDecision::ForwardRequested
        );
    }

    #[test]
    fn test_header_flag_applies_when_request_flag_absent() {
        assert_eq!(
            ForwardingDecision::decide(None, Some(true), false),
            ForwardingDecision::ForwardRequested
        );
        assert_eq!(
            ForwardingDecision::decide(None, Some(false), true),
            ForwardingDecision::LocalOnly
        );
    }

    #[test]
    fn test_request_flag_wins_over_header_flag() {
        assert_eq!(
            ForwardingDecision::decide(Some(false), Some(true), true),
            ForwardingDecision::LocalOnly
        );
    }

    #[test]
    fn test_auto_forward_applies_without_explicit_signal() {
        assert_eq!(
            ForwardingDecision::decide(None, None, true),
            ForwardingDecision::ForwardAuto
        );
        assert_eq!(
            ForwardingDecision::decide(None, None, false),
            ForwardingDecision::LocalOnly
        );
    }
}
