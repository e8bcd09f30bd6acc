//! Admission decision seam.
//!
//! The transport core never interprets kernel types; it forwards them to a
//! `DecisionPolicy` and relays the verdict. The real scheduling policy lives
//! behind this trait — the default implementation admits everything.

/// Verdict for one kernel admission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
}

/// A pure admission function over the kernel type.
pub trait DecisionPolicy: Send + Sync {
    fn decide(&self, kernel_type: &str) -> Decision;
}

/// Placeholder policy: every kernel is admitted.
pub struct AllowAll;

impl DecisionPolicy for AllowAll {
    fn decide(&self, _kernel_type: &str) -> Decision {
        Decision {
            allowed: true,
            reason: "OK".to_string(),
        }
    }
}
