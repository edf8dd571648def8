//! Exit code constants shared with the platform.
//!
//! The meaning of a code can change between CNB phases; these are the codes
//! the detect and build phases report to their callers.

use crate::build::BuildError;
use crate::detect::DetectError;
use crate::Error;

pub const SUCCESS: i32 = 0;
pub const UNSPECIFIED_ERROR: i32 = 1;
pub const FAILED_DETECTION: i32 = 100;
pub const BUILDPACK_ERROR: i32 = 102;

/// Maps an error to the exit code a caller should report.
#[must_use]
pub fn code_for(error: &Error) -> i32 {
    match error {
        Error::Detect(DetectError::FailedDetection) => FAILED_DETECTION,
        Error::Detect(DetectError::Buildpack) | Error::Build(BuildError::Buildpack { .. }) => {
            BUILDPACK_ERROR
        }
        _ => UNSPECIFIED_ERROR,
    }
}
