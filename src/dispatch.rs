//! Startup-time registration of declared data-access methods and call-time
//! binding of arguments into statements.
//!
//! Every declaration is validated once, when the dispatcher is built:
//! missing operation declarations, unsupported return shapes, uncovered
//! placeholders, and unresolved schema tokens all fail there, never per
//! call. At call time the dispatcher only binds values, rewrites paging
//! clauses, and hands a lazy stream to the engine.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::config::EngineConfig;
use crate::engine::{EngineCore, ExecutionEngine};
use crate::error::SqlReactiveError;
use crate::paging::{CollectionOptions, PagingDecl};
use crate::row::{FromRow, FromRowValue, GeneratedKey};
use crate::sink::{RowStream, SingleValue, SinkShared};
use crate::sqlscan::scan_placeholders;
use crate::statement::{
    Statement, StatementCallbacks, StatementEvent, StatementKind, StreamOrigin,
};
use crate::types::{Cardinality, RowValues, SortOrder};

/// Template token replaced with the configured schema name at registration.
const SCHEMA_TOKEN: &str = "{schema}";

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

/// Supplies values for named placeholders at call time.
///
/// Dotted paths arrive verbatim (`:account.id` asks for `"account.id"`);
/// how an implementation navigates its objects is its own business.
pub trait ParamSource: Send + Sync {
    fn value(&self, path: &str) -> Option<RowValues>;
}

/// A plain map-backed [`ParamSource`].
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: HashMap<String, RowValues>,
}

impl Args {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<RowValues>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl ParamSource for Args {
    fn value(&self, path: &str) -> Option<RowValues> {
        self.values.get(path).cloned()
    }
}

/// The declared result shape of a data-access method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnShape {
    /// A bounded multi-value stream.
    Stream,
    /// A single-value result.
    Single,
    /// Anything else a declaration might claim; rejected at registration.
    Other(String),
}

/// Sort/limit surface of a query declaration.
#[derive(Debug, Clone)]
pub struct QueryDecl {
    pub sql: String,
    pub paging: PagingDecl,
}

impl QueryDecl {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            paging: PagingDecl::default(),
        }
    }

    #[must_use]
    pub fn with_sort_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paging.allowed_sort_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_default_sort(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.paging.default_sort = Some((column.into(), order));
        self
    }

    #[must_use]
    pub fn with_default_limit(mut self, limit: u64) -> Self {
        self.paging.default_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_max_limit(mut self, limit: u64) -> Self {
        self.paging.max_limit = Some(limit);
        self
    }
}

/// An update declaration. The minimum affected rows defaults to 1.
#[derive(Debug, Clone)]
pub struct UpdateDecl {
    pub sql: String,
    pub min_affected_rows: u64,
    pub returning_key: bool,
}

impl UpdateDecl {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            min_affected_rows: 1,
            returning_key: false,
        }
    }

    #[must_use]
    pub fn with_min_affected_rows(mut self, min: u64) -> Self {
        self.min_affected_rows = min;
        self
    }

    #[must_use]
    pub fn with_returning_key(mut self) -> Self {
        self.returning_key = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum OperationDecl {
    Query(QueryDecl),
    Update(UpdateDecl),
}

/// One declared data-access method, as consumed at registration.
#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub name: String,
    pub operation: Option<OperationDecl>,
    pub returns: ReturnShape,
    /// Argument names/paths the method's placeholders may reference.
    pub args: Vec<String>,
}

impl MethodDecl {
    /// A query method, returning a multi-value stream by default.
    #[must_use]
    pub fn query(name: impl Into<String>, decl: QueryDecl) -> Self {
        Self {
            name: name.into(),
            operation: Some(OperationDecl::Query(decl)),
            returns: ReturnShape::Stream,
            args: Vec::new(),
        }
    }

    /// An update method; updates always return a single value.
    #[must_use]
    pub fn update(name: impl Into<String>, decl: UpdateDecl) -> Self {
        Self {
            name: name.into(),
            operation: Some(OperationDecl::Update(decl)),
            returns: ReturnShape::Single,
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_returns(mut self, returns: ReturnShape) -> Self {
        self.returns = returns;
        self
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// A declaration after validation: positional SQL plus the placeholder
/// names in binding order.
struct BoundMethod {
    name: String,
    returns: ReturnShape,
    kind: BoundKind,
}

enum BoundKind {
    Query {
        sql: String,
        param_order: Vec<String>,
        paging: PagingDecl,
    },
    Update {
        sql: String,
        param_order: Vec<String>,
        min_affected_rows: u64,
        returning_key: bool,
    },
}

/// Binds declared methods to the engine; the crate's front door for calls.
pub struct MethodDispatcher {
    core: Arc<EngineCore>,
    config: EngineConfig,
    methods: HashMap<String, Arc<BoundMethod>>,
}

impl MethodDispatcher {
    /// Validate every declaration and build the dispatch table.
    ///
    /// # Errors
    /// Returns `SqlReactiveError::ConfigError` naming the offending method
    /// for any declaration problem. Nothing is retried later; a dispatcher
    /// either builds completely or not at all.
    pub fn build(
        engine: &ExecutionEngine,
        decls: Vec<MethodDecl>,
    ) -> Result<Self, SqlReactiveError> {
        let config = engine.config().clone();
        let mut methods = HashMap::with_capacity(decls.len());
        for decl in decls {
            let bound = bind_method(decl, &config)?;
            let name = bound.name.clone();
            if methods.insert(name.clone(), Arc::new(bound)).is_some() {
                return Err(SqlReactiveError::ConfigError(format!(
                    "method `{name}` is declared more than once"
                )));
            }
        }
        Ok(Self {
            core: Arc::clone(engine.core()),
            config,
            methods,
        })
    }

    fn method(&self, name: &str) -> Result<&Arc<BoundMethod>, SqlReactiveError> {
        self.methods.get(name).ok_or_else(|| {
            SqlReactiveError::ConfigError(format!("no data-access method named `{name}`"))
        })
    }

    /// A multi-value query stream, optionally paged.
    ///
    /// The stream is lazy; execution starts on first poll. Passing
    /// `options` injects sort and LIMIT/OFFSET clauses and arranges for
    /// `options.is_last_record()` to be filled in after execution.
    ///
    /// # Errors
    /// Returns `SqlReactiveError::ConfigError` for unknown methods or a
    /// method not declared as a stream-returning query, and
    /// `SqlReactiveError::ParameterError` when an argument is missing.
    pub fn stream<T: FromRow>(
        &self,
        method: &str,
        args: &dyn ParamSource,
        options: Option<&CollectionOptions>,
    ) -> Result<RowStream<T>, SqlReactiveError> {
        let bound = self.method(method)?;
        let BoundKind::Query {
            sql,
            param_order,
            paging,
        } = &bound.kind
        else {
            return Err(SqlReactiveError::ConfigError(format!(
                "method `{method}` is not a query"
            )));
        };
        if bound.returns != ReturnShape::Stream {
            return Err(SqlReactiveError::ConfigError(format!(
                "method `{method}` does not return a multi-value stream"
            )));
        }

        let params = bind_params(method, param_order, args)?;
        let (sql, plan) = match options {
            Some(options) => {
                let plan = crate::paging::rewrite(
                    sql,
                    options,
                    paging,
                    self.config.default_limit,
                    self.config.max_limit,
                );
                (plan.sql.clone(), Some(plan))
            }
            None => (sql.clone(), None),
        };
        let kind = StatementKind::Query {
            cardinality: Cardinality::Many,
            paging: plan,
        };
        Ok(self.build_stream::<T>(method, sql, params, kind))
    }

    /// A single-value query result.
    ///
    /// # Errors
    /// As [`stream`](Self::stream), but the method must be declared
    /// single-value.
    pub fn single<T: FromRow>(
        &self,
        method: &str,
        args: &dyn ParamSource,
    ) -> Result<SingleValue<T>, SqlReactiveError> {
        let bound = self.method(method)?;
        let BoundKind::Query {
            sql, param_order, ..
        } = &bound.kind
        else {
            return Err(SqlReactiveError::ConfigError(format!(
                "method `{method}` is not a query"
            )));
        };
        if bound.returns != ReturnShape::Single {
            return Err(SqlReactiveError::ConfigError(format!(
                "method `{method}` does not return a single value"
            )));
        }

        let params = bind_params(method, param_order, args)?;
        let kind = StatementKind::Query {
            cardinality: Cardinality::One,
            paging: None,
        };
        Ok(SingleValue::new(self.build_stream::<T>(
            method,
            sql.clone(),
            params,
            kind,
        )))
    }

    /// An update returning its affected-row count.
    ///
    /// # Errors
    /// Returns `SqlReactiveError::ConfigError` for unknown or non-update
    /// methods (for key-returning ones, use
    /// [`execute_returning`](Self::execute_returning)), and
    /// `SqlReactiveError::ParameterError` for missing arguments.
    pub fn execute(
        &self,
        method: &str,
        args: &dyn ParamSource,
    ) -> Result<SingleValue<u64>, SqlReactiveError> {
        let bound = self.method(method)?;
        let BoundKind::Update {
            sql,
            param_order,
            min_affected_rows,
            returning_key,
        } = &bound.kind
        else {
            return Err(SqlReactiveError::ConfigError(format!(
                "method `{method}` is not an update"
            )));
        };
        if *returning_key {
            return Err(SqlReactiveError::ConfigError(format!(
                "method `{method}` returns a generated key; call execute_returning"
            )));
        }

        let params = bind_params(method, param_order, args)?;
        let kind = StatementKind::Update {
            min_affected_rows: *min_affected_rows,
            returning_key: false,
        };
        let stream = self.build_sink_stream::<u64>(
            method,
            sql.clone(),
            params,
            kind,
            Cardinality::One,
            |event| match event {
                StatementEvent::AffectedRows(n) => Ok(n),
                other => Err(unexpected_event(&other)),
            },
        );
        Ok(SingleValue::new(stream))
    }

    /// An insert returning its generated key.
    ///
    /// # Errors
    /// As [`execute`](Self::execute), for methods declared key-returning.
    pub fn execute_returning<K: FromRowValue>(
        &self,
        method: &str,
        args: &dyn ParamSource,
    ) -> Result<SingleValue<GeneratedKey<K>>, SqlReactiveError> {
        let bound = self.method(method)?;
        let BoundKind::Update {
            sql,
            param_order,
            min_affected_rows,
            returning_key,
        } = &bound.kind
        else {
            return Err(SqlReactiveError::ConfigError(format!(
                "method `{method}` is not an update"
            )));
        };
        if !*returning_key {
            return Err(SqlReactiveError::ConfigError(format!(
                "method `{method}` does not return a generated key"
            )));
        }

        let params = bind_params(method, param_order, args)?;
        let kind = StatementKind::Update {
            min_affected_rows: *min_affected_rows,
            returning_key: true,
        };
        let stream = self.build_sink_stream::<GeneratedKey<K>>(
            method,
            sql.clone(),
            params,
            kind,
            Cardinality::One,
            |event| match event {
                StatementEvent::GeneratedKey(value) => {
                    K::from_row_value(&value).map(GeneratedKey)
                }
                other => Err(unexpected_event(&other)),
            },
        );
        Ok(SingleValue::new(stream))
    }

    fn build_stream<T: FromRow>(
        &self,
        method: &str,
        sql: String,
        params: Vec<RowValues>,
        kind: StatementKind,
    ) -> RowStream<T> {
        let cardinality = match &kind {
            StatementKind::Query { cardinality, .. } => *cardinality,
            StatementKind::Update { .. } => Cardinality::One,
        };
        self.build_sink_stream::<T>(method, sql, params, kind, cardinality, |event| match event {
            StatementEvent::Row(row) => T::from_row(&row),
            other => Err(unexpected_event(&other)),
        })
    }

    /// Wire a sink, an origin, and the type-erased callbacks together.
    fn build_sink_stream<T: Send + 'static>(
        &self,
        method: &str,
        sql: String,
        params: Vec<RowValues>,
        kind: StatementKind,
        cardinality: Cardinality,
        decode: impl Fn(StatementEvent) -> Result<T, SqlReactiveError> + Send + Sync + 'static,
    ) -> RowStream<T> {
        let shared =
            SinkShared::<T>::new(cardinality, self.config.prefetch, self.config.stream_buffer);
        let decode = Arc::new(decode);

        let build = {
            let shared = Arc::clone(&shared);
            let method = method.to_string();
            Box::new(move || {
                let next_sink = Arc::clone(&shared);
                let error_sink = Arc::clone(&shared);
                let complete_sink = Arc::clone(&shared);
                let decode = Arc::clone(&decode);
                let callbacks = StatementCallbacks {
                    on_next: Box::new(move |event| {
                        let value = match (*decode)(event) {
                            Ok(value) => value,
                            Err(err) => {
                                next_sink.error(err.clone());
                                return Err(err);
                            }
                        };
                        next_sink.next(value)
                    }),
                    on_error: Box::new(move |err| error_sink.error(err)),
                    on_completed: Box::new(move || complete_sink.complete()),
                };
                let flow: Arc<dyn crate::sink::FlowControl> = shared.clone();
                Statement::new(
                    method.clone(),
                    sql.clone(),
                    params.clone(),
                    kind.clone(),
                    callbacks,
                    flow,
                )
            }) as Box<dyn Fn() -> Statement + Send + Sync>
        };

        let submit = {
            let core = Arc::clone(&self.core);
            Box::new(move |statement: Statement| core.submit_standalone(statement))
                as Box<dyn Fn(Statement) + Send + Sync>
        };

        let origin = Arc::new(StreamOrigin::new(method, build, submit));
        RowStream::new(shared, Some(origin))
    }
}

fn unexpected_event(event: &StatementEvent) -> SqlReactiveError {
    SqlReactiveError::ExecutionError(format!("unexpected statement event {event:?}"))
}

fn bind_params(
    method: &str,
    param_order: &[String],
    args: &dyn ParamSource,
) -> Result<Vec<RowValues>, SqlReactiveError> {
    param_order
        .iter()
        .map(|name| {
            args.value(name).ok_or_else(|| {
                SqlReactiveError::ParameterError(format!(
                    "method `{method}` has no value for placeholder `:{name}`"
                ))
            })
        })
        .collect()
}

fn bind_method(decl: MethodDecl, config: &EngineConfig) -> Result<BoundMethod, SqlReactiveError> {
    let name = decl.name;
    match &decl.returns {
        ReturnShape::Stream | ReturnShape::Single => {}
        ReturnShape::Other(shape) => {
            return Err(SqlReactiveError::ConfigError(format!(
                "method `{name}` declares unsupported return shape `{shape}`; \
                 expected a bounded stream or a single value"
            )));
        }
    }

    let Some(operation) = decl.operation else {
        return Err(SqlReactiveError::ConfigError(format!(
            "method `{name}` declares neither a query nor an update"
        )));
    };

    let kind = match operation {
        OperationDecl::Query(query) => {
            if decl.returns == ReturnShape::Single && !query.paging.allowed_sort_columns.is_empty()
            {
                return Err(SqlReactiveError::ConfigError(format!(
                    "method `{name}` declares sort columns but returns a single value"
                )));
            }
            validate_sort_columns(&name, &query.paging)?;
            let (sql, param_order) = compile_template(&name, &query.sql, &decl.args, config)?;
            BoundKind::Query {
                sql,
                param_order,
                paging: query.paging,
            }
        }
        OperationDecl::Update(update) => {
            if decl.returns != ReturnShape::Single {
                return Err(SqlReactiveError::ConfigError(format!(
                    "update method `{name}` must return a single value"
                )));
            }
            let (sql, param_order) = compile_template(&name, &update.sql, &decl.args, config)?;
            BoundKind::Update {
                sql,
                param_order,
                min_affected_rows: update.min_affected_rows,
                returning_key: update.returning_key,
            }
        }
    };

    Ok(BoundMethod {
        name,
        returns: decl.returns,
        kind,
    })
}

fn validate_sort_columns(name: &str, paging: &PagingDecl) -> Result<(), SqlReactiveError> {
    let default_column = paging.default_sort.as_ref().map(|(column, _)| column);
    for column in paging.allowed_sort_columns.iter().chain(default_column) {
        if !IDENT_RE.is_match(column) {
            return Err(SqlReactiveError::ConfigError(format!(
                "method `{name}` declares invalid sort column `{column}`"
            )));
        }
    }
    Ok(())
}

/// Substitute the schema token, collect placeholders, and produce
/// positional SQL.
fn compile_template(
    name: &str,
    template: &str,
    args: &[String],
    config: &EngineConfig,
) -> Result<(String, Vec<String>), SqlReactiveError> {
    let sql = if template.contains(SCHEMA_TOKEN) {
        let schema = config
            .schema
            .as_deref()
            .filter(|schema| !schema.is_empty())
            .ok_or_else(|| {
                SqlReactiveError::ConfigError(format!(
                    "method `{name}` uses {SCHEMA_TOKEN} but no schema is configured"
                ))
            })?;
        template.replace(SCHEMA_TOKEN, schema)
    } else {
        template.to_string()
    };

    let placeholders = scan_placeholders(&sql);
    let mut param_order = Vec::with_capacity(placeholders.len());
    let mut positional = String::with_capacity(sql.len());
    let mut cursor = 0;
    for placeholder in placeholders {
        if !args.iter().any(|arg| arg == &placeholder.name) {
            return Err(SqlReactiveError::ConfigError(format!(
                "method `{name}` placeholder `:{}` is not covered by a declared argument",
                placeholder.name
            )));
        }
        positional.push_str(&sql[cursor..placeholder.start]);
        positional.push('?');
        cursor = placeholder.end;
        param_order.push(placeholder.name);
    }
    positional.push_str(&sql[cursor..]);

    Ok((positional, param_order))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_replaces_placeholders_in_order() {
        let config = EngineConfig::default();
        let (sql, order) = compile_template(
            "find",
            "select * from t where a = :a and b = :obj.b",
            &["a".into(), "obj.b".into()],
            &config,
        )
        .unwrap();
        assert_eq!(sql, "select * from t where a = ? and b = ?");
        assert_eq!(order, vec!["a".to_string(), "obj.b".to_string()]);
    }

    #[test]
    fn uncovered_placeholder_is_a_config_error() {
        let config = EngineConfig::default();
        let err = compile_template("find", "select * from t where a = :a", &[], &config)
            .unwrap_err();
        assert!(err.to_string().contains(":a"));
    }

    #[test]
    fn schema_token_requires_configured_schema() {
        let config = EngineConfig::default();
        let err =
            compile_template("find", "select * from {schema}.t", &[], &config).unwrap_err();
        assert!(matches!(err, SqlReactiveError::ConfigError(_)));

        let config = EngineConfig::default().with_schema("main");
        let (sql, _) = compile_template("find", "select * from {schema}.t", &[], &config).unwrap();
        assert_eq!(sql, "select * from main.t");
    }

    #[test]
    fn missing_operation_and_bad_shape_fail_at_bind() {
        let config = EngineConfig::default();
        let decl = MethodDecl {
            name: "broken".into(),
            operation: None,
            returns: ReturnShape::Stream,
            args: Vec::new(),
        };
        assert!(matches!(
            bind_method(decl, &config),
            Err(SqlReactiveError::ConfigError(_))
        ));

        let decl = MethodDecl::query("odd", QueryDecl::new("select 1"))
            .with_returns(ReturnShape::Other("callback".into()));
        let err = bind_method(decl, &config).err().expect("bind should fail");
        assert!(err.to_string().contains("callback"));
    }

    #[test]
    fn invalid_sort_column_fails_at_bind() {
        let config = EngineConfig::default();
        let decl = MethodDecl::query(
            "list",
            QueryDecl::new("select * from t").with_sort_columns(["name; drop table t"]),
        );
        assert!(bind_method(decl, &config).is_err());
    }
}
