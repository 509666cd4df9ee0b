use super::{UnitOfWork, run_query};
use crate::connection::ConnectionGuard;
use crate::core::{DbError, Result};
use crate::entity::Entity;
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// A lazy, composable read over one entity type.
///
/// Nothing is read until [`Query::load`], [`Query::first`] or
/// [`Query::count`] runs it against a unit of work. Filters and ordering
/// are applied to the rows the store returns.
///
/// ```no_run
/// # use rustuow::prelude::*;
/// # #[derive(Debug, Clone)] struct Blog { id: i64, url: String, rating: i64 }
/// # impl_entity!(Blog, table = "Blogs", key = id, columns { url, rating });
/// # async fn run(uow: &mut UnitOfWork) -> rustuow::Result<()> {
/// let top = uow
///     .query_where::<Blog>(|b| b.rating >= 4)?
///     .order_by_desc(|b| b.rating)
///     .take(10)
///     .load(uow)
///     .await?;
/// # Ok(()) }
/// ```
pub struct Query<T: Entity> {
    filters: Vec<Predicate<T>>,
    order: Vec<Comparator<T>>,
    skip: usize,
    take: Option<usize>,
    tracking: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Query<T> {
    fn new() -> Self {
        Self {
            filters: Vec::new(),
            order: Vec::new(),
            skip: 0,
            take: None,
            tracking: true,
            _entity: PhantomData,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Box::new(predicate));
        self
    }

    /// Sorts ascending by `key`. Later calls break ties of earlier ones.
    pub fn order_by<K, F>(mut self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.order.push(Box::new(move |a, b| key(a).cmp(&key(b))));
        self
    }

    pub fn order_by_desc<K, F>(mut self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.order.push(Box::new(move |a, b| key(b).cmp(&key(a))));
        self
    }

    pub fn skip(mut self, count: usize) -> Self {
        self.skip = count;
        self
    }

    pub fn take(mut self, count: usize) -> Self {
        self.take = Some(count);
        self
    }

    /// Loaded entities are not attached to the change tracker.
    pub fn no_tracking(mut self) -> Self {
        self.tracking = false;
        self
    }

    fn apply(&self, mut items: Vec<T>) -> Vec<T> {
        items.retain(|item| self.filters.iter().all(|keep| keep(item)));
        if !self.order.is_empty() {
            items.sort_by(|a, b| {
                self.order
                    .iter()
                    .map(|cmp| cmp(a, b))
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }
        items
            .into_iter()
            .skip(self.skip)
            .take(self.take.unwrap_or(usize::MAX))
            .collect()
    }

    pub async fn load(self, uow: &mut UnitOfWork) -> Result<Vec<T>> {
        let items = self.apply(uow.fetch_all::<T>().await?);
        if self.tracking {
            for item in &items {
                uow.tracker.attach(item);
            }
        }
        Ok(items)
    }

    pub async fn first(mut self, uow: &mut UnitOfWork) -> Result<Option<T>> {
        self.take = Some(self.take.map_or(1, |t| t.min(1)));
        Ok(self.load(uow).await?.into_iter().next())
    }

    pub async fn count(self, uow: &mut UnitOfWork) -> Result<usize> {
        Ok(self.no_tracking().load(uow).await?.len())
    }
}

impl UnitOfWork {
    /// All persisted rows of `T`.
    ///
    /// # Errors
    /// `EntityNotMapped` when `T` was not registered with the factory.
    pub fn query<T: Entity>(&self) -> Result<Query<T>> {
        self.ensure_usable()?;
        self.ensure_mapped::<T>()?;
        Ok(Query::new())
    }

    /// Shorthand for `query::<T>()?.filter(predicate)`.
    pub fn query_where<T: Entity>(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Result<Query<T>> {
        Ok(self.query::<T>()?.filter(predicate))
    }

    /// Same as [`UnitOfWork::query`].
    pub fn get_queryable<T: Entity>(&self) -> Result<Query<T>> {
        self.query::<T>()
    }

    /// Reads every row of `T` from the store.
    pub(crate) async fn fetch_all<T: Entity>(&mut self) -> Result<Vec<T>> {
        self.ensure_usable()?;
        let shared = Arc::clone(&self.shared);
        let mapping = shared.registry.mapping::<T>()?;
        let command = shared.builder.select(mapping.table, mapping.columns);

        let conn = self.connection.as_deref_mut().ok_or(DbError::Disposed)?;
        let mut guard = ConnectionGuard::open(conn).await?;
        let result = run_query(&mut *guard, &shared, command).await?;
        drop(guard);

        result.records().map(|record| T::from_record(&record)).collect()
    }
}
