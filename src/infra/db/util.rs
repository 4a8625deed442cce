use crate::application::repos::RepoError;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";
const NOT_NULL_VIOLATION: &str = "23502";
const INVALID_TEXT_REPRESENTATION: &str = "22P02";
const QUERY_CANCELED: &str = "57014";

/// Translate a driver error into the repository vocabulary, keyed on SQLSTATE.
pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db) => {
            let code = db.code().map(|code| code.into_owned()).unwrap_or_default();
            let constraint = db.constraint().unwrap_or("unknown").to_string();
            match code.as_str() {
                UNIQUE_VIOLATION => RepoError::Duplicate { constraint },
                // A reply or like raced the deletion of the thread it points at.
                FOREIGN_KEY_VIOLATION if references_thread(&constraint) => RepoError::NotFound,
                FOREIGN_KEY_VIOLATION | INVALID_TEXT_REPRESENTATION => RepoError::InvalidInput {
                    message: db.message().to_string(),
                },
                CHECK_VIOLATION | NOT_NULL_VIOLATION => RepoError::Integrity {
                    message: format!("{} ({constraint})", db.message()),
                },
                QUERY_CANCELED => RepoError::Timeout,
                _ => RepoError::from_persistence(db),
            }
        }
        other => RepoError::from_persistence(other),
    }
}

/// `ILIKE` pattern matching `term` anywhere, with its own wildcards taken literally.
/// Pair with `ESCAPE '\'`.
pub fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn references_thread(constraint: &str) -> bool {
    constraint.ends_with("parent_id_fkey") || constraint.ends_with("thread_id_fkey")
}
