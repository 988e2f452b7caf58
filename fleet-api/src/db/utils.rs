/// Postgres error code of a unique constraint violation.
const UNIQUE_VIOLATION_CODE: &str = "23505";

/// Returns the violated constraint name if `err` is a unique constraint violation.
///
/// The name is empty when Postgres did not report one.
pub fn unique_violation_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION_CODE) => {
            Some(db_err.constraint().unwrap_or_default())
        }
        _ => None,
    }
}
