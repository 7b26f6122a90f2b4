//! Declarative table definitions.
//!
//! [`TableBuilder`] turns a list of column names, a list of parameter names
//! and a generator that yields data columns only into a [`TableFactory`].
//! Parameters become leading `HIDDEN` columns and every yielded row is
//! prefixed with the arguments the scan was called with.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use gentab_error::{GentabError, HostError};
use gentab_types::{HostValue, IntegerMode};

use crate::contract::{ConnectArgs, RowGenerator, RowIterator, Step, TableDefinition, TableFactory};
use crate::plan::MAX_PARAMETERS;

pub struct TableBuilder {
    columns: Vec<String>,
    parameters: Vec<String>,
    rows: Arc<dyn RowGenerator>,
    integer_mode: Option<IntegerMode>,
    direct_only: bool,
}

impl TableBuilder {
    /// `rows` receives one argument per parameter and yields rows with one
    /// value per entry in `columns`.
    pub fn new<I, S>(columns: I, rows: impl RowGenerator + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            parameters: Vec::new(),
            rows: Arc::new(rows),
            integer_mode: None,
            direct_only: false,
        }
    }

    #[must_use]
    pub fn parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn integer_mode(mut self, mode: IntegerMode) -> Self {
        self.integer_mode = Some(mode);
        self
    }

    #[must_use]
    pub fn direct_only(mut self, direct_only: bool) -> Self {
        self.direct_only = direct_only;
        self
    }

    /// The `CREATE TABLE` statement this builder declares.
    pub fn schema_sql(&self) -> String {
        let columns: Vec<String> = self
            .parameters
            .iter()
            .map(|name| format!("{} HIDDEN", quote_identifier(name)))
            .chain(self.columns.iter().map(|name| quote_identifier(name)))
            .collect();
        format!("CREATE TABLE x({});", columns.join(", "))
    }

    fn validate(&self, module: &str) -> Result<(), GentabError> {
        if self.columns.is_empty() {
            return Err(GentabError::invalid_definition(
                module,
                "must declare at least one column",
            ));
        }
        if self.parameters.len() > MAX_PARAMETERS {
            return Err(GentabError::invalid_definition(
                module,
                format!("declares more than {MAX_PARAMETERS} parameters"),
            ));
        }
        let mut seen = HashSet::new();
        for name in self.parameters.iter().chain(&self.columns) {
            if !seen.insert(name.as_str()) {
                return Err(GentabError::invalid_definition(
                    module,
                    format!("has multiple columns named \"{name}\""),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableBuilder")
            .field("columns", &self.columns)
            .field("parameters", &self.parameters)
            .field("integer_mode", &self.integer_mode)
            .field("direct_only", &self.direct_only)
            .finish_non_exhaustive()
    }
}

impl TableFactory for TableBuilder {
    fn define(&self, args: &[String]) -> Result<TableDefinition, HostError> {
        let connect = ConnectArgs::parse(args).ok_or("virtual table connected without a name")?;
        if !connect.arguments.is_empty() {
            return Err(HostError::new(GentabError::invalid_definition(
                connect.module,
                "does not accept module arguments",
            )));
        }
        self.validate(connect.module).map_err(HostError::new)?;

        let generator = PrefixedRows {
            module: Arc::from(connect.module),
            width: self.columns.len(),
            rows: Arc::clone(&self.rows),
        };
        Ok(TableDefinition::new(self.schema_sql(), generator)
            .with_parameters(self.parameters.iter().cloned())
            .with_integer_mode(self.integer_mode)
            .with_direct_only(self.direct_only))
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

struct PrefixedRows {
    module: Arc<str>,
    width: usize,
    rows: Arc<dyn RowGenerator>,
}

impl RowGenerator for PrefixedRows {
    fn generate(&self, args: &[HostValue]) -> Result<Box<dyn RowIterator>, HostError> {
        let inner = self.rows.generate(args)?;
        Ok(Box::new(PrefixedIter {
            module: Arc::clone(&self.module),
            width: self.width,
            prefix: args.to_vec(),
            inner,
        }))
    }
}

struct PrefixedIter {
    module: Arc<str>,
    width: usize,
    prefix: Vec<HostValue>,
    inner: Box<dyn RowIterator>,
}

impl RowIterator for PrefixedIter {
    fn advance(&mut self) -> Result<Step, HostError> {
        match self.inner.advance()? {
            Step::Done => Ok(Step::Done),
            Step::Row(values) => {
                if values.len() != self.width {
                    return Err(HostError::new(GentabError::invalid_definition(
                        &*self.module,
                        format!(
                            "yielded a row with {} columns but declares {}",
                            values.len(),
                            self.width
                        ),
                    )));
                }
                let mut row = Vec::with_capacity(self.prefix.len() + values.len());
                row.extend(self.prefix.iter().cloned());
                row.extend(values);
                Ok(Step::Row(row))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::rows;

    fn squares_upto(args: &[HostValue]) -> Result<Box<dyn RowIterator>, HostError> {
        let upto = args[0].as_i64().unwrap_or(0);
        Ok(rows(
            (1..=upto)
                .map(|n| vec![HostValue::from(n), HostValue::from(n * n)])
                .collect::<Vec<_>>(),
        ))
    }

    fn no_rows(_args: &[HostValue]) -> Result<Box<dyn RowIterator>, HostError> {
        Ok(rows(Vec::new()))
    }

    fn one_null(_args: &[HostValue]) -> Result<Box<dyn RowIterator>, HostError> {
        Ok(rows(vec![vec![HostValue::Null]]))
    }

    fn squares() -> TableBuilder {
        TableBuilder::new(["n", "square"], squares_upto).parameters(["upto"])
    }

    fn args(module: &str) -> Vec<String> {
        [module, "main", module].map(String::from).to_vec()
    }

    #[test]
    fn schema_puts_parameters_first() {
        assert_eq!(
            squares().schema_sql(),
            r#"CREATE TABLE x("upto" HIDDEN, "n", "square");"#
        );
    }

    #[test]
    fn identifiers_are_quoted() {
        let builder = TableBuilder::new(["say \"hi\""], no_rows);
        assert_eq!(builder.schema_sql(), r#"CREATE TABLE x("say ""hi""");"#);
    }

    #[test]
    fn rows_are_prefixed_with_arguments() {
        let def = squares().define(&args("squares")).unwrap();
        assert_eq!(def.parameter_names, vec!["upto".to_owned()]);
        let mut it = def.generator.generate(&[HostValue::BigInt(2)]).unwrap();
        assert_eq!(
            it.advance().unwrap(),
            Step::Row(vec![
                HostValue::BigInt(2),
                HostValue::BigInt(1),
                HostValue::BigInt(1)
            ])
        );
        assert_eq!(
            it.advance().unwrap(),
            Step::Row(vec![
                HostValue::BigInt(2),
                HostValue::BigInt(2),
                HostValue::BigInt(4)
            ])
        );
        assert_eq!(it.advance().unwrap(), Step::Done);
    }

    #[test]
    fn wrong_row_width_is_an_error() {
        let builder = TableBuilder::new(["a", "b"], one_null);
        let def = builder.define(&args("narrow")).unwrap();
        let mut it = def.generator.generate(&[]).unwrap();
        let err = it.advance().unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"virtual table module "narrow" yielded a row with 1 columns but declares 2"#
        );
    }

    #[test]
    fn module_arguments_are_rejected() {
        let mut connect = args("squares");
        connect.push("10".to_owned());
        let err = squares().define(&connect).unwrap_err();
        assert!(err.to_string().contains("does not accept module arguments"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let builder = squares().parameters(["n"]);
        let err = builder.define(&args("squares")).unwrap_err();
        assert!(err.downcast_ref::<GentabError>().is_some());
        assert!(err.to_string().contains("multiple columns named \"n\""));
    }

    #[test]
    fn empty_columns_are_rejected() {
        let builder = TableBuilder::new(Vec::<String>::new(), no_rows);
        assert!(builder.define(&args("empty")).is_err());
    }

    #[test]
    fn options_flow_into_definition() {
        let def = squares()
            .integer_mode(IntegerMode::Strict)
            .direct_only(true)
            .define(&args("squares"))
            .unwrap();
        assert_eq!(def.integer_mode, Some(IntegerMode::Strict));
        assert!(def.direct_only);
    }
}
