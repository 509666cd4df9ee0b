// ============================================================================
// Command Interceptors
// ============================================================================
//
// Interceptors observe every command right before it is handed to the
// connection and may rewrite it in place. The synchronous hook is the source
// of truth; the async hook delegates to it unless overridden, so both
// execution paths apply the same rewrite.
//
// ============================================================================

pub mod sequence;

use crate::command::Command;
use async_trait::async_trait;
use std::sync::Arc;

pub use sequence::{SequenceKeyInterceptor, SequenceSettings, rewrite_sequence_insert};

#[async_trait]
pub trait CommandInterceptor: Send + Sync {
    /// Called before a command is executed on the blocking path.
    fn reader_executing(&self, command: &mut Command);

    /// Called before a command is executed on the async path.
    async fn reader_executing_async(&self, command: &mut Command) {
        self.reader_executing(command);
    }

    fn name(&self) -> &str {
        "interceptor"
    }
}

/// Ordered list of interceptors, applied in registration order.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn CommandInterceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: Arc<dyn CommandInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn apply(&self, command: &mut Command) {
        for interceptor in &self.interceptors {
            interceptor.reader_executing(command);
        }
    }

    pub async fn apply_async(&self, command: &mut Command) {
        for interceptor in &self.interceptors {
            interceptor.reader_executing_async(command).await;
        }
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.interceptors.iter().map(|i| i.name()))
            .finish()
    }
}
