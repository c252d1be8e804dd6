//! SQL dialect detection from the driver's adapter name

use std::fmt;

/// Dialect family used to steer statement generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSql,
    MySql,
    Sqlite,
    /// Unknown engine, carrying the raw adapter name
    Other(String),
}

impl SqlDialect {
    /// Classify an adapter name such as `postgres`, `mysql2` or `sqlite3`
    pub fn detect(adapter_name: &str) -> Self {
        let name = adapter_name.to_ascii_lowercase();

        if name.contains("postgres") || name.contains("postgis") || name.contains("redshift") {
            SqlDialect::PostgreSql
        } else if name.contains("mysql") || name.contains("mariadb") || name.contains("trilogy") {
            SqlDialect::MySql
        } else if name.contains("sqlite") {
            SqlDialect::Sqlite
        } else {
            SqlDialect::Other(adapter_name.to_string())
        }
    }

    /// Syntax hint embedded in the generation prompt
    pub fn syntax_hint(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSql => {
                "Use STRING_AGG(expr, ', ') for string aggregation and ILIKE for case-insensitive matching."
            }
            SqlDialect::MySql => {
                "Use GROUP_CONCAT(expr SEPARATOR ', ') for string aggregation and backticks for quoting identifiers."
            }
            SqlDialect::Sqlite => {
                "Use GROUP_CONCAT(expr, ', ') for string aggregation and strftime() for date handling."
            }
            SqlDialect::Other(_) => "Use ANSI SQL where possible.",
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::PostgreSql => write!(f, "PostgreSQL"),
            SqlDialect::MySql => write!(f, "MySQL"),
            SqlDialect::Sqlite => write!(f, "SQLite"),
            SqlDialect::Other(name) => write!(f, "{}", name),
        }
    }
}
