use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// eKYC progress for one verification session.
///
/// The only legal transitions are:
///
/// - `Idle -> IdUploading` (ID image accepted for upload)
/// - `IdUploading -> IdScanned` (OCR scan succeeded)
/// - `IdScanned -> FaceVerifying` (verification attempt begins)
/// - `FaceVerifying -> Completed` (definitive match)
/// - `FaceVerifying -> IdScanned` (failure/error rollback)
/// - `Completed -> Idle` (explicit restart)
///
/// Self-transitions are permitted so a retried stream start does not need
/// a rollback round-trip first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    Idle,
    IdUploading,
    IdScanned,
    FaceVerifying,
    Completed,
}

impl Progress {
    pub fn as_str(&self) -> &'static str {
        match self {
            Progress::Idle => "idle",
            Progress::IdUploading => "id_uploading",
            Progress::IdScanned => "id_scanned",
            Progress::FaceVerifying => "face_verifying",
            Progress::Completed => "completed",
        }
    }

    pub fn can_transition_to(&self, to: Progress) -> bool {
        use Progress::*;
        if *self == to {
            return true;
        }
        matches!(
            (*self, to),
            (Idle, IdUploading)
                | (IdUploading, IdScanned)
                | (IdScanned, FaceVerifying)
                | (FaceVerifying, Completed)
                | (FaceVerifying, IdScanned)
                | (Completed, Idle)
        )
    }

    /// Moves to `to`, or fails without changing the current value.
    pub fn transition(&mut self, to: Progress) -> Result<(), ProgressError> {
        if !self.can_transition_to(to) {
            return Err(ProgressError::IllegalTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }
}

impl Default for Progress {
    fn default() -> Self {
        Progress::Idle
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Progress {
    type Err = ProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Progress::Idle),
            "id_uploading" => Ok(Progress::IdUploading),
            "id_scanned" => Ok(Progress::IdScanned),
            "face_verifying" => Ok(Progress::FaceVerifying),
            "completed" => Ok(Progress::Completed),
            other => Err(ProgressError::InvalidState(other.to_string())),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProgressError {
    #[error("unknown progress value: {0}")]
    InvalidState(String),

    #[error("illegal progress transition: {from} -> {to}")]
    IllegalTransition { from: Progress, to: Progress },
}
