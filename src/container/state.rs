//! The Container Supervisor's lifecycle state machine.
//!
//! ```text
//!    [none] --create--> [created] --start--> [running]
//!       |                    |                 |
//!       |                    +-----stop(t)---->+
//!       |                                       |
//!       |                                  (natural exit | stop | kill)
//!       |                                       |
//!       +------------------ remove(-f) <--- [exited]
//! ```

/// State of a container under supervision. `None` (no container created
/// yet) is represented by `Option<ContainerHandle>` at the call site rather
/// than as a variant here, so an `Option::None` at the type level matches
/// the diagram's `[none]` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Removed,
}

impl ContainerState {
    /// Valid forward transitions, used by tests and debug assertions; the
    /// supervisor itself does not reject illegal transitions at runtime
    /// (the container runtime is the source of truth), it only tracks the
    /// last-known state for logging and idempotence checks.
    pub fn can_transition_to(self, next: ContainerState) -> bool {
        use ContainerState::*;
        matches!(
            (self, next),
            (Created, Running)
                | (Created, Exited)
                | (Running, Exited)
                | (Created, Removed)
                | (Running, Removed)
                | (Exited, Removed)
                | (Removed, Removed)
        )
    }
}
