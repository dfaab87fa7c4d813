use tollgate_core::engine::CheckError;
use tollgate_core::schema::{ParseError, ValidationError};
use tollgate_storage::StorageError;

use crate::config::ConfigError;
use crate::fixtures::FixtureError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("check error: {0}")]
    Check(#[from] CheckError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("schema validation errors: {}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("fixture error: {0}")]
    Fixture(#[from] FixtureError),

    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_error_from_check_error() {
        let check_err = CheckError::UndefinedEntityType("doc".to_string());
        let app_err: AppError = check_err.into();

        assert!(
            app_err.to_string().contains("doc"),
            "expected 'doc' in error message, got: {app_err}"
        );
    }

    #[test]
    fn app_error_from_storage_error() {
        let app_err: AppError = StorageError::EmptyDeleteFilter.into();

        assert!(
            app_err.to_string().contains("delete filter"),
            "expected 'delete filter' in error message, got: {app_err}"
        );
    }

    #[test]
    fn app_error_from_parse_error() {
        let parse_err = ParseError::DuplicateEntity("user".to_string());
        let app_err: AppError = parse_err.into();

        assert!(
            app_err.to_string().contains("duplicate entity"),
            "expected 'duplicate entity' in error message, got: {app_err}"
        );
    }

    #[test]
    fn app_error_config_is_transparent() {
        let app_err: AppError = ConfigError::Validation("bad".to_string()).into();

        assert_eq!(app_err.to_string(), "config validation failed: bad");
    }

    #[test]
    fn app_error_validation_formats_multiple_errors() {
        let errors = vec![
            ValidationError::TooManyEntities {
                count: 60,
                limit: 50,
            },
            ValidationError::TooManyRelations {
                entity: "doc".to_string(),
                count: 40,
                limit: 30,
            },
        ];
        let msg = AppError::Validation(errors).to_string();

        assert!(msg.contains("60"), "should contain count 60: {msg}");
        assert!(msg.contains("doc"), "should contain entity name: {msg}");
        assert!(msg.contains("; "), "errors should be joined: {msg}");
    }
}
