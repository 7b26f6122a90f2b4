/// A value as the engine stores it: one of SQLite's five storage classes.
#[derive(Clone, Debug, PartialEq)]
pub enum SqliteValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqliteValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}
