use std::fmt;

/// Database error kinds the payment store can surface.
#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    /// Connection pool is exhausted
    PoolExhausted,
    /// Record not found where one was required
    NotFound { entity: String, id: String },
    /// Unique constraint violation (duplicate reservation or transaction id)
    UniqueConstraintViolation { constraint: String },
    /// Foreign key constraint violation
    ForeignKeyViolation { constraint: String },
    /// Query execution error
    QueryError { message: String },
    /// Database connection error
    ConnectionError { message: String },
    /// A stored value could not be decoded into its domain type
    CorruptRecord { message: String },
    /// Unknown error
    Unknown { message: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub is_retryable: bool,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        let is_retryable = matches!(
            kind,
            DatabaseErrorKind::PoolExhausted | DatabaseErrorKind::ConnectionError { .. }
        );
        Self { kind, is_retryable }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::CorruptRecord {
            message: message.into(),
        })
    }

    pub fn is_retryable(&self) -> bool {
        self.is_retryable
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueConstraintViolation { .. })
    }

    /// Map a sqlx error to our custom error type.
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::new(DatabaseErrorKind::NotFound {
                entity: "record".to_string(),
                id: "unknown".to_string(),
            }),
            sqlx::Error::PoolTimedOut => Self::new(DatabaseErrorKind::PoolExhausted),
            sqlx::Error::PoolClosed => Self::new(DatabaseErrorKind::ConnectionError {
                message: "connection pool is closed".to_string(),
            }),
            sqlx::Error::Database(db_err) => {
                let constraint = db_err
                    .constraint()
                    .unwrap_or("unknown")
                    .to_string();
                match db_err.code().as_deref() {
                    // Postgres: unique_violation
                    Some("23505") => {
                        Self::new(DatabaseErrorKind::UniqueConstraintViolation { constraint })
                    }
                    // Postgres: foreign_key_violation
                    Some("23503") => {
                        Self::new(DatabaseErrorKind::ForeignKeyViolation { constraint })
                    }
                    _ => Self::new(DatabaseErrorKind::QueryError {
                        message: db_err.message().to_string(),
                    }),
                }
            }
            sqlx::Error::Io(io_err) => Self::new(DatabaseErrorKind::ConnectionError {
                message: io_err.to_string(),
            }),
            _ => Self::new(DatabaseErrorKind::Unknown {
                message: error.to_string(),
            }),
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::PoolExhausted => {
                write!(f, "database connection pool exhausted")
            }
            DatabaseErrorKind::NotFound { entity, id } => {
                write!(f, "{} with id '{}' not found", entity, id)
            }
            DatabaseErrorKind::UniqueConstraintViolation { constraint } => {
                write!(f, "unique constraint '{}' violated", constraint)
            }
            DatabaseErrorKind::ForeignKeyViolation { constraint } => {
                write!(f, "foreign key constraint '{}' violated", constraint)
            }
            DatabaseErrorKind::QueryError { message } => {
                write!(f, "database query failed: {}", message)
            }
            DatabaseErrorKind::ConnectionError { message } => {
                write!(f, "database connection error: {}", message)
            }
            DatabaseErrorKind::CorruptRecord { message } => {
                write!(f, "corrupt record: {}", message)
            }
            DatabaseErrorKind::Unknown { message } => {
                write!(f, "unknown database error: {}", message)
            }
        }
    }
}

impl std::error::Error for DatabaseError {}
