use super::UnitOfWork;
use crate::core::{DbError, Result};
use futures::future::BoxFuture;
use tracing::{Instrument, debug, error, warn};

impl UnitOfWork {
    pub fn is_in_transaction(&self) -> bool {
        self.state.is_active()
    }

    /// Idle -> InTransaction. Opens the connection when needed; it stays open
    /// until the transaction ends.
    ///
    /// # Errors
    /// `AlreadyInTransaction` when a transaction is open. The open
    /// transaction is not affected.
    pub async fn begin_transaction(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.state.is_active() {
            return Err(DbError::AlreadyInTransaction);
        }

        let conn = self.connection.as_deref_mut().ok_or(DbError::Disposed)?;
        let opened_here = !conn.is_open();
        if opened_here {
            conn.open().await?;
        }
        if let Err(e) = conn.begin().await {
            if opened_here {
                conn.close();
            }
            return Err(e);
        }

        self.opened_for_transaction = opened_here;
        self.state.begin()?;
        debug!(parent: &self.span, "transaction started");
        Ok(())
    }

    /// Flushes anything still staged, commits the native transaction and
    /// clears the change set.
    ///
    /// # Errors
    /// `NotInTransaction` while Idle, with the change set left alone.
    /// `CommitFailed` when the store rejects the flush or the commit; the
    /// transaction is rolled back and the change set reverted.
    pub async fn commit_transaction(&mut self) -> Result<()> {
        let span = self.span.clone();
        async {
            self.ensure_usable()?;
            self.state.ensure_active()?;

            if self.tracker.has_changes()
                && let Err(e) = self.flush().await
            {
                return Err(self.commit_failure(e).await);
            }

            let conn = self.connection.as_deref_mut().ok_or(DbError::Disposed)?;
            if let Err(e) = conn.commit().await {
                return Err(self.commit_failure(e).await);
            }

            self.state.end()?;
            self.release_transaction_connection();
            self.tracker.clear();
            debug!("transaction committed");
            Ok::<(), DbError>(())
        }
        .instrument(span)
        .await
    }

    /// Rolls back the native transaction and reverts the change set:
    /// modified entities get their original values back, deleted ones are
    /// restored and added ones are detached. The change set is cleared
    /// afterwards even when reverting an entry fails.
    pub async fn rollback_transaction(&mut self) -> Result<()> {
        let span = self.span.clone();
        async {
            self.ensure_usable()?;
            self.state.ensure_active()?;

            let conn = self.connection.as_deref_mut().ok_or(DbError::Disposed)?;
            let native = conn.rollback().await;
            self.state.end()?;
            self.release_transaction_connection();

            let failures = self.tracker.reject_changes();
            if failures > 0 {
                warn!(failures, "change set only partially reverted");
            }
            self.tracker.clear();

            if let Err(e) = native {
                error!(error = %e, "native rollback failed");
                return Err(e);
            }
            debug!("transaction rolled back");
            Ok::<(), DbError>(())
        }
        .instrument(span)
        .await
    }

    /// Runs `action` inside a transaction.
    ///
    /// When no transaction is open one is started, and committed if `action`
    /// succeeds. When one is already open, `action` simply joins it and the
    /// caller stays in charge of committing or rolling back.
    ///
    /// If `action` fails and this call started the transaction, it is rolled
    /// back and the error from `action` is returned unchanged.
    ///
    /// ```no_run
    /// # use rustuow::prelude::*;
    /// # #[derive(Debug, Clone)] struct Blog { id: i64, url: String }
    /// # impl_entity!(Blog, table = "Blogs", key = id, columns { url });
    /// # async fn run(uow: &mut UnitOfWork) -> anyhow::Result<()> {
    /// uow.execute_in_transaction(|uow| {
    ///     Box::pin(async move {
    ///         uow.add(&Blog { id: 0, url: "https://a".into() })?;
    ///         uow.commit().await?;
    ///         Ok::<_, anyhow::Error>(())
    ///     })
    /// })
    /// .await?;
    /// # Ok(()) }
    /// ```
    pub async fn execute_in_transaction<R, E, F>(&mut self, action: F) -> std::result::Result<R, E>
    where
        F: for<'a> FnOnce(&'a mut UnitOfWork) -> BoxFuture<'a, std::result::Result<R, E>>,
        E: From<DbError>,
    {
        let owns_transaction = !self.state.is_active();
        if owns_transaction {
            self.begin_transaction().await?;
        }

        match action(self).await {
            Ok(value) => {
                if owns_transaction {
                    self.commit_transaction().await?;
                }
                Ok(value)
            }
            Err(e) => {
                if owns_transaction
                    && self.state.is_active()
                    && let Err(rollback_err) = self.rollback_transaction().await
                {
                    warn!(parent: &self.span, error = %rollback_err, "rollback after failed action failed");
                }
                Err(e)
            }
        }
    }
}
