//! Scheduling bookkeeping for background refresh jobs.
//!
//! The keystore only remembers when each job last ran; the scheduler that
//! decides *whether* to run lives with the host.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    /// Periodic re-listing of V1 conversations from the transport.
    RefreshV1,
    /// Periodic re-sync of V2 sealed invitations.
    RefreshV2,
}

impl JobType {
    pub(crate) fn storage_key(self) -> &'static str {
        match self {
            JobType::RefreshV1 => "jobs/refresh-v1",
            JobType::RefreshV2 => "jobs/refresh-v2",
        }
    }
}
