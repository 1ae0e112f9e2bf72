#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("time parse error: {0}")]
    TimeParse(#[from] chrono::ParseError),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
    #[error("quota update conflicted {attempts} times for {subject}")]
    Conflict { subject: String, attempts: u32 },
}

pub type Result<T> = std::result::Result<T, DbError>;
