//! Validation helpers for DTOs.

use validator::ValidationError;

/// Display names that can never be claimed by a player.
const RESERVED_NAMES: &[&str] = &["organizer", "system"];

const NAME_MAX_LENGTH: usize = 20;

/// Validates a player display name: non-blank, bounded length, printable
/// characters only, and not one of the reserved system names.
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("player_name_blank");
        err.message = Some("Player name must not be blank".into());
        return Err(err);
    }

    if trimmed.chars().count() > NAME_MAX_LENGTH {
        let mut err = ValidationError::new("player_name_length");
        err.message =
            Some(format!("Player name must be at most {NAME_MAX_LENGTH} characters").into());
        return Err(err);
    }

    if trimmed.chars().any(|c| c.is_control()) {
        let mut err = ValidationError::new("player_name_format");
        err.message = Some("Player name must not contain control characters".into());
        return Err(err);
    }

    if RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(trimmed))
    {
        let mut err = ValidationError::new("player_name_reserved");
        err.message = Some(format!("`{trimmed}` is a reserved name").into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a question point value is a multiple of 10 between 10 and 100.
pub fn validate_points(points: u32) -> Result<(), ValidationError> {
    if !(10..=100).contains(&points) || points % 10 != 0 {
        let mut err = ValidationError::new("question_points");
        err.message = Some("Points must be a multiple of 10 between 10 and 100".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        assert!(validate_player_name("Ana").is_ok());
        assert!(validate_player_name("player one").is_ok());
        assert!(validate_player_name("Zoé").is_ok());
    }

    #[test]
    fn rejects_blank_and_oversized_names() {
        assert!(validate_player_name("").is_err());
        assert!(validate_player_name("   ").is_err());
        assert!(validate_player_name(&"x".repeat(21)).is_err());
    }

    #[test]
    fn rejects_reserved_names_case_insensitively() {
        assert!(validate_player_name("Organizer").is_err());
        assert!(validate_player_name("SYSTEM").is_err());
        assert!(validate_player_name(" system ").is_err());
    }

    #[test]
    fn points_must_be_round_multiples() {
        assert!(validate_points(10).is_ok());
        assert!(validate_points(100).is_ok());
        assert!(validate_points(0).is_err());
        assert!(validate_points(25).is_err());
        assert!(validate_points(110).is_err());
    }
}
