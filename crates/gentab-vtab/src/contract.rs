//! The callbacks a host supplies to back a virtual table.
//!
//! A [`TableFactory`] runs once per table connection and returns a
//! [`TableDefinition`]. The definition's [`RowGenerator`] runs once per scan
//! and returns a [`RowIterator`], which the cursor drains one row at a time.
//! Closures of the right shape implement the factory and generator traits.

use std::fmt;
use std::sync::Arc;

use gentab_error::HostError;
use gentab_types::{HostValue, IntegerMode};

/// One advance of a [`RowIterator`].
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A full row: one value per declared column, parameter columns included.
    Row(Vec<HostValue>),
    Done,
}

/// A stream of rows for one scan.
pub trait RowIterator: Send {
    fn advance(&mut self) -> Result<Step, HostError>;
}

/// Produces a [`RowIterator`] for a set of positional parameters.
///
/// `args` holds one value per declared parameter, in declaration order;
/// parameters the query did not bind are [`HostValue::Missing`].
pub trait RowGenerator: Send + Sync {
    fn generate(&self, args: &[HostValue]) -> Result<Box<dyn RowIterator>, HostError>;
}

impl<F> RowGenerator for F
where
    F: Fn(&[HostValue]) -> Result<Box<dyn RowIterator>, HostError> + Send + Sync,
{
    fn generate(&self, args: &[HostValue]) -> Result<Box<dyn RowIterator>, HostError> {
        self(args)
    }
}

/// Describes a table when the engine connects to it.
///
/// `args` are the engine's raw textual arguments: module name, database
/// name, table name, then any module arguments. See [`ConnectArgs`].
pub trait TableFactory: Send + Sync {
    fn define(&self, args: &[String]) -> Result<TableDefinition, HostError>;
}

impl<F> TableFactory for F
where
    F: Fn(&[String]) -> Result<TableDefinition, HostError> + Send + Sync,
{
    fn define(&self, args: &[String]) -> Result<TableDefinition, HostError> {
        self(args)
    }
}

/// What a factory returns for one table.
pub struct TableDefinition {
    /// A single `CREATE TABLE` statement declaring every column.
    pub schema_sql: String,
    pub generator: Arc<dyn RowGenerator>,
    /// Names of the leading columns that are generator parameters.
    pub parameter_names: Vec<String>,
    /// `None` inherits the session default at connect time.
    pub integer_mode: Option<IntegerMode>,
    /// Refuse use from triggers and views.
    pub direct_only: bool,
}

impl TableDefinition {
    pub fn new(schema_sql: impl Into<String>, generator: impl RowGenerator + 'static) -> Self {
        Self::with_shared_generator(schema_sql, Arc::new(generator))
    }

    pub fn with_shared_generator(
        schema_sql: impl Into<String>,
        generator: Arc<dyn RowGenerator>,
    ) -> Self {
        Self {
            schema_sql: schema_sql.into(),
            generator,
            parameter_names: Vec::new(),
            integer_mode: None,
            direct_only: false,
        }
    }

    #[must_use]
    pub fn with_parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameter_names = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_integer_mode(mut self, mode: Option<IntegerMode>) -> Self {
        self.integer_mode = mode;
        self
    }

    #[must_use]
    pub fn with_direct_only(mut self, direct_only: bool) -> Self {
        self.direct_only = direct_only;
        self
    }
}

impl fmt::Debug for TableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDefinition")
            .field("schema_sql", &self.schema_sql)
            .field("parameter_names", &self.parameter_names)
            .field("integer_mode", &self.integer_mode)
            .field("direct_only", &self.direct_only)
            .finish_non_exhaustive()
    }
}

/// The engine's connect arguments, split into their fixed positions.
#[derive(Debug, Clone, Copy)]
pub struct ConnectArgs<'a> {
    pub module: &'a str,
    pub database: &'a str,
    pub table: &'a str,
    /// Arguments from `CREATE VIRTUAL TABLE t USING module(...)`.
    pub arguments: &'a [String],
}

impl<'a> ConnectArgs<'a> {
    pub fn parse(args: &'a [String]) -> Option<Self> {
        match args {
            [module, database, table, arguments @ ..] => Some(Self {
                module,
                database,
                table,
                arguments,
            }),
            _ => None,
        }
    }
}

struct RowsIter<I>(I);

impl<I> RowIterator for RowsIter<I>
where
    I: Iterator<Item = Result<Vec<HostValue>, HostError>> + Send,
{
    fn advance(&mut self) -> Result<Step, HostError> {
        self.0.next().transpose().map(|row| row.map_or(Step::Done, Step::Row))
    }
}

/// Adapt an iterator of rows into a [`RowIterator`].
pub fn rows<I>(rows: I) -> Box<dyn RowIterator>
where
    I: IntoIterator<Item = Vec<HostValue>>,
    I::IntoIter: Send + 'static,
{
    Box::new(RowsIter(rows.into_iter().map(Ok::<_, HostError>)))
}

/// Adapt an iterator of fallible rows into a [`RowIterator`].
pub fn try_rows<I>(rows: I) -> Box<dyn RowIterator>
where
    I: IntoIterator<Item = Result<Vec<HostValue>, HostError>>,
    I::IntoIter: Send + 'static,
{
    Box::new(RowsIter(rows.into_iter()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_adapter_yields_then_finishes() {
        let mut it = rows(vec![vec![HostValue::from(1)], vec![HostValue::from(2)]]);
        assert_eq!(it.advance().unwrap(), Step::Row(vec![HostValue::Number(1.0)]));
        assert_eq!(it.advance().unwrap(), Step::Row(vec![HostValue::Number(2.0)]));
        assert_eq!(it.advance().unwrap(), Step::Done);
        assert_eq!(it.advance().unwrap(), Step::Done);
    }

    #[test]
    fn try_rows_surfaces_errors() {
        let mut it = try_rows(vec![Ok(vec![HostValue::Null]), Err(HostError::msg("bad row"))]);
        assert_eq!(it.advance().unwrap(), Step::Row(vec![HostValue::Null]));
        assert_eq!(it.advance().unwrap_err().to_string(), "bad row");
    }

    #[test]
    fn closures_are_generators_and_factories() {
        let generator = |args: &[HostValue]| -> Result<Box<dyn RowIterator>, HostError> {
            Ok(rows(vec![args.to_vec()]))
        };
        let mut it = generator.generate(&[HostValue::from("x")]).unwrap();
        assert_eq!(it.advance().unwrap(), Step::Row(vec![HostValue::from("x")]));

        let factory = |args: &[String]| -> Result<TableDefinition, HostError> {
            let connect = ConnectArgs::parse(args).ok_or("short argument list")?;
            Ok(TableDefinition::new(
                format!("CREATE TABLE x(\"{}\")", connect.table),
                generator,
            ))
        };
        let args = ["m", "main", "t"].map(String::from);
        let def = factory.define(&args).unwrap();
        assert_eq!(def.schema_sql, "CREATE TABLE x(\"t\")");
        assert!(def.parameter_names.is_empty());
        assert!(!def.direct_only);
        assert!(factory.define(&args[..2]).is_err());
    }

    #[test]
    fn connect_args_split() {
        let args = ["series", "main", "s", "1", "2"].map(String::from);
        let parsed = ConnectArgs::parse(&args).unwrap();
        assert_eq!(parsed.module, "series");
        assert_eq!(parsed.database, "main");
        assert_eq!(parsed.table, "s");
        assert_eq!(parsed.arguments, &args[3..]);
    }
}
