//! Test fixture utilities.

/// A statement identifier paired with the text it is prepared from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementFixture {
    /// Cache identifier.
    pub id: String,
    /// Statement text.
    pub sql: String,
}

impl StatementFixture {
    /// Create a new fixture.
    pub fn new(id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sql: sql.into(),
        }
    }

    /// Lookup of a single user row.
    pub fn users_by_id() -> Self {
        Self::new("users.by_id", "SELECT * FROM users WHERE id = $1")
    }

    /// Insert into an audit table.
    pub fn audit_insert() -> Self {
        Self::new(
            "audit.insert",
            "INSERT INTO audit (actor, action, at) VALUES ($1, $2, now())",
        )
    }

    /// `count` distinct fixtures with identifiers `stmt.0` .. `stmt.{count-1}`.
    pub fn numbered(count: usize) -> Vec<Self> {
        (0..count)
            .map(|i| Self::new(format!("stmt.{i}"), format!("SELECT {i}")))
            .collect()
    }
}
