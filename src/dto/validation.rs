//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::session::TimeControl;

/// Longest display name accepted from clients.
pub const MAX_NAME_LEN: usize = 32;

/// Validates that a display name is 1 to 32 characters of letters, digits, `_`, `-` or `.`.
///
/// # Examples
///
/// ```ignore
/// validate_display_name("magnus_c") // Ok
/// validate_display_name("")         // Err - empty
/// validate_display_name("a b")      // Err - space
/// ```
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!("Display name must be 1 to {MAX_NAME_LEN} characters (got {len})").into(),
        );
        return Err(err);
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        let mut err = ValidationError::new("display_name_format");
        err.message =
            Some("Display name may only contain letters, digits, `_`, `-` and `.`".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a time control stays within the configured bounds.
pub fn validate_time_control(
    time_control: &TimeControl,
    max_minutes: u32,
    max_increment_secs: u32,
) -> Result<(), ValidationError> {
    if time_control.minutes() > max_minutes || time_control.increment_seconds > max_increment_secs
    {
        let mut err = ValidationError::new("time_control_range");
        err.message = Some(
            format!(
                "Time control {time_control} exceeds {max_minutes}+{max_increment_secs}"
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}
