//! Process exit codes for the migration surface.

/// Contract: 0 success (including clean dry-runs), 1 per-row errors but the
/// run completed, 2 run aborted on a fatal fault, 3 gated: blocked
/// migrations found without the required flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    RowErrors,
    Aborted,
    Gated,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::RowErrors => 1,
            ExitCode::Aborted => 2,
            ExitCode::Gated => 3,
        }
    }
}
