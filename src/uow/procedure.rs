use super::{UnitOfWork, run_query, until, with_timeout};
use crate::command::Parameter;
use crate::connection::{ConnectionGuard, ProcedureFailureMode};
use crate::core::{DbError, QueryResult, Result, Row, Value, normalize_name};
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, error};

/// A type stored procedure rows can be read into.
///
/// `fields` is the static list of assignable fields; `assign` writes one of
/// them. Use [`impl_from_record!`](crate::impl_from_record) rather than
/// implementing this by hand.
pub trait FromRecord: Default + Send {
    fn fields() -> &'static [&'static str];

    fn assign(&mut self, field: &str, value: Value) -> Result<()>;
}

/// Which field each result column feeds, worked out once per result set.
///
/// Names are compared case-insensitively with `_` ignored, so a
/// `full_name` column fills a `FullName` or `fullname` field. Columns
/// without a field are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    slots: Vec<(usize, &'static str)>,
}

impl ColumnMap {
    pub fn resolve<T: FromRecord>(columns: &[String]) -> Self {
        let fields: Vec<(String, &'static str)> = T::fields()
            .iter()
            .map(|field| (normalize_name(field), *field))
            .collect();

        let slots = columns
            .iter()
            .enumerate()
            .filter_map(|(idx, column)| {
                let wanted = normalize_name(column);
                fields
                    .iter()
                    .find(|(normalized, _)| *normalized == wanted)
                    .map(|(_, field)| (idx, *field))
            })
            .collect();

        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Builds one `T`. NULL leaves the field at its default.
    pub fn materialize<T: FromRecord>(&self, row: Row) -> Result<T> {
        let mut item = T::default();
        let mut values: Vec<Option<Value>> = row.into_iter().map(Some).collect();

        for (idx, field) in &self.slots {
            match values.get_mut(*idx).and_then(Option::take) {
                None | Some(Value::Null) => {}
                Some(value) => item.assign(field, value)?,
            }
        }
        Ok(item)
    }
}

pub fn map_rows<T: FromRecord>(result: QueryResult) -> Result<Vec<T>> {
    let map = ColumnMap::resolve::<T>(&result.columns);
    result
        .rows
        .into_iter()
        .map(|row| map.materialize(row))
        .collect()
}

impl UnitOfWork {
    /// Runs a stored procedure and reads its rows into `T`.
    ///
    /// Every entry of `params` is sent as a bound parameter. The call joins
    /// the open transaction if there is one, and opens the connection only
    /// for its own duration when it was closed.
    ///
    /// With [`ProcedureFailureMode::LogAndReturnEmpty`] store and mapping
    /// failures are logged and an empty vector is returned instead.
    pub async fn execute_stored_procedure<T: FromRecord>(
        &mut self,
        name: &str,
        params: &[(&str, Value)],
    ) -> Result<Vec<T>> {
        let span = self.span.clone();
        let limit = self.shared.config.command_timeout;
        let result = with_timeout(limit, name, self.run_procedure::<T>(name, params))
            .instrument(span)
            .await;
        self.settle_procedure(name, result)
    }

    /// [`UnitOfWork::execute_stored_procedure`] that stops when `signal`
    /// completes. The connection is released either way.
    pub async fn execute_stored_procedure_until<T, S>(
        &mut self,
        name: &str,
        params: &[(&str, Value)],
        signal: S,
    ) -> Result<Vec<T>>
    where
        T: FromRecord,
        S: Future<Output = ()>,
    {
        let span = self.span.clone();
        let limit = self.shared.config.command_timeout;
        let call = with_timeout(limit, name, self.run_procedure::<T>(name, params));
        let result = until(name, call, signal).instrument(span).await;
        self.settle_procedure(name, result)
    }

    async fn run_procedure<T: FromRecord>(
        &mut self,
        name: &str,
        params: &[(&str, Value)],
    ) -> Result<Vec<T>> {
        self.ensure_usable()?;
        let shared = Arc::clone(&self.shared);
        let parameters = params
            .iter()
            .map(|(param, value)| Parameter::new(*param, value.clone()))
            .collect();
        let command = shared.builder.procedure(name, parameters);

        let conn = self.connection.as_deref_mut().ok_or(DbError::Disposed)?;
        let mut guard = ConnectionGuard::open(conn).await?;
        let result = run_query(&mut *guard, &shared, command).await?;
        drop(guard);

        map_rows(result)
    }

    fn settle_procedure<T>(&self, name: &str, result: Result<Vec<T>>) -> Result<Vec<T>> {
        let e = match result {
            Ok(rows) => return Ok(rows),
            Err(e) => e,
        };

        let swallow = self.shared.config.procedure_failure_mode == ProcedureFailureMode::LogAndReturnEmpty
            && !e.is_state_misuse()
            && !matches!(e, DbError::Cancelled(_));
        error!(parent: &self.span, procedure = name, error = %e, swallowed = swallow, "stored procedure failed");

        if swallow { Ok(Vec::new()) } else { Err(e) }
    }
}
