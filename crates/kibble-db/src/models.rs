/// A stored image row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRow {
    pub id: i64,
    pub url: String,
    /// RFC 3339 UTC with millisecond precision, so text order is time order.
    pub timestamp: String,
}
