//! Classified error kinds shared across every component boundary.
//!
//! No component lets a raw library error (`reqwest::Error`, `kube::Error`) escape
//! unclassified; every fallible public operation in this crate returns
//! [`ControllerError`] or a `Result` aliased to it.

use thiserror::Error;

/// The outbound target a transient failure was observed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Metrics,
    Kubernetes,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Metrics => write!(f, "metrics"),
            Target::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    /// Retried by the Metrics Client; escalates to degraded mode if the circuit opens. Never fatal.
    #[error("transient failure talking to {target}: {message}")]
    TransientExternal { target: Target, message: String },

    /// RBAC denial. Logged once per (verb, resource); writes of that kind are disabled until restart.
    #[error("permission denied for {verb} on {resource}")]
    PermissionDenied { verb: String, resource: String },

    /// HPA, Deployment, or Pod absent. The associated workload step is skipped this tick.
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// Rejected at load (fail-fast) or at hot-reload (previous config remains active).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// TSS corruption; the store re-initializes empty and in-memory state is discarded.
    #[error("time-series store integrity violation: {0}")]
    IntegrityViolation(String),

    /// An invariant the crate itself maintains was observed broken, e.g. `minReplicas < original_min`.
    #[error("internal invariant violated: {0}")]
    InternalAssertion(String),

    /// The circuit is currently open for this target; no call was attempted.
    #[error("circuit open for {0}")]
    CircuitOpen(Target),

    /// Outbound call exceeded its deadline.
    #[error("timeout talking to {0}")]
    Timeout(Target),
}

impl ControllerError {
    /// Whether this kind represents a degraded-but-not-fatal condition the loop should
    /// continue operating through (callers must treat `Unavailable` as degraded
    /// rather than fatal").
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            ControllerError::TransientExternal { .. }
                | ControllerError::CircuitOpen(_)
                | ControllerError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_circuit_open_are_degraded() {
        let e = ControllerError::TransientExternal {
            target: Target::Metrics,
            message: "5xx".into(),
        };
        assert!(e.is_degraded());
        assert!(ControllerError::CircuitOpen(Target::Kubernetes).is_degraded());
    }

    #[test]
    fn not_found_and_invalid_config_are_not_degraded() {
        assert!(!ControllerError::NotFound {
            resource: "hpa".into(),
            id: "ns/name".into()
        }
        .is_degraded());
        assert!(!ControllerError::InvalidConfig("bad".into()).is_degraded());
    }
}
