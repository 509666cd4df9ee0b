use super::bulk::discover_tables;
use super::{Shared, UnitOfWork};
use crate::command::CommandBuilder;
use crate::connection::{ConnectionGuard, PersistenceConfig, Store};
use crate::core::{DbError, Result};
use crate::entity::{Entity, EntityRegistry};
use crate::interceptor::{CommandInterceptor, InterceptorChain};
use crate::notify::ChangeObserver;
use std::sync::Arc;
use tracing::{Span, info};

/// Creates units of work that share one configuration, entity registry,
/// interceptor chain and observer list.
///
/// Build it once at startup; creating a unit of work is cheap.
///
/// ```no_run
/// # use rustuow::prelude::*;
/// # #[derive(Debug, Clone)] struct Blog { id: i64, url: String }
/// # impl_entity!(Blog, table = "Blogs", key = id, columns { url });
/// # async fn run(store: MemoryStore) -> rustuow::Result<()> {
/// let factory = UnitOfWorkFactory::builder()
///     .store(store)
///     .config(PersistenceConfig::new("blogging"))
///     .entity::<Blog>()
///     .interceptor(SequenceKeyInterceptor::default())
///     .build()
///     .await?;
///
/// let mut uow = factory.create().await?;
/// let blogs = uow.query::<Blog>()?.load(&mut uow).await?;
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct UnitOfWorkFactory {
    store: Arc<dyn Store>,
    shared: Arc<Shared>,
}

impl UnitOfWorkFactory {
    pub fn builder() -> UnitOfWorkFactoryBuilder {
        UnitOfWorkFactoryBuilder::default()
    }

    /// A new unit of work with its own connection. The connection is opened
    /// lazily by the first operation that needs it.
    pub async fn create(&self) -> Result<UnitOfWork> {
        let connection = self.store.connect().await?;
        Ok(UnitOfWork::new(Arc::clone(&self.shared), connection))
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.shared.registry
    }
}

impl std::fmt::Debug for UnitOfWorkFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWorkFactory")
            .field("database", &self.shared.config.database)
            .field("entities", &self.shared.registry.len())
            .field("interceptors", &self.shared.interceptors)
            .field("observers", &self.shared.observers.len())
            .finish()
    }
}

#[derive(Default)]
pub struct UnitOfWorkFactoryBuilder {
    store: Option<Arc<dyn Store>>,
    config: PersistenceConfig,
    registry: EntityRegistry,
    interceptors: InterceptorChain,
    observers: Vec<Arc<dyn ChangeObserver>>,
    span: Option<Span>,
    /// First registration error, reported by `build`
    error: Option<DbError>,
}

impl UnitOfWorkFactoryBuilder {
    pub fn store<S: Store + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn shared_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: PersistenceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn entity<T: Entity>(mut self) -> Self {
        if let Err(e) = self.registry.register::<T>()
            && self.error.is_none()
        {
            self.error = Some(e);
        }
        self
    }

    /// Interceptors run in registration order.
    pub fn interceptor<I: CommandInterceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Observers are notified in registration order.
    pub fn observer<O: ChangeObserver + 'static>(mut self, observer: O) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Parent span for every unit of work created by the factory.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validates the configuration and checks every registered entity
    /// against the tables the store reports.
    ///
    /// # Errors
    /// `Configuration` for malformed settings, a missing store, a bad entity
    /// mapping or a mapped table the store does not have.
    pub async fn build(self) -> Result<UnitOfWorkFactory> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.config.validate().map_err(DbError::Configuration)?;
        let store = self
            .store
            .ok_or_else(|| DbError::Configuration("no entity store configured".to_string()))?;

        let shared = Shared {
            builder: CommandBuilder::new(self.config.insert_batch_size),
            config: self.config,
            registry: self.registry,
            interceptors: self.interceptors,
            observers: self.observers,
            parent_span: self.span,
        };

        if !shared.registry.is_empty() {
            verify_tables(store.as_ref(), &shared).await?;
        }

        info!(
            database = %shared.config.database,
            environment = %shared.config.environment,
            entities = shared.registry.len(),
            "unit of work factory ready"
        );

        Ok(UnitOfWorkFactory {
            store,
            shared: Arc::new(shared),
        })
    }
}

async fn verify_tables(store: &dyn Store, shared: &Shared) -> Result<()> {
    let mut connection = store.connect().await?;
    let mut guard = ConnectionGuard::open(connection.as_mut()).await?;
    let tables = discover_tables(&mut *guard, shared).await?;

    for mapping in shared.registry.mappings() {
        if !tables.iter().any(|t| t.eq_ignore_ascii_case(mapping.table)) {
            return Err(DbError::Configuration(format!(
                "entity '{}' is mapped to table '{}', which does not exist in '{}'",
                mapping.short_name(),
                mapping.table,
                shared.config.database
            )));
        }
    }
    Ok(())
}
