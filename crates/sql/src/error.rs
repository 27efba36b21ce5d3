use jans_orm_core::PersistenceError;
use rusqlite::ErrorCode;
use rusqlite::ffi;

/// Maps a driver failure onto the persistence error taxonomy.
pub(crate) fn classify(context: &str, err: rusqlite::Error) -> PersistenceError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation
                if failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                PersistenceError::DuplicateKey(format!("{context}: {err}"))
            }
            ErrorCode::ConstraintViolation => PersistenceError::ConstraintViolation(format!("{context}: {err}")),
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::SystemIoFailure
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked => PersistenceError::connection(context.to_string(), err),
            _ => PersistenceError::backend(context.to_string(), err),
        },
        _ => PersistenceError::backend(context.to_string(), err),
    }
}
