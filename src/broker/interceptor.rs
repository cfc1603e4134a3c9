//! Interceptor chains
//!
//! Interceptors see every message before it is delivered, in registration
//! order. Each one decides what happens next:
//! - pass it on unchanged or modified via [`Next::handle`]
//! - swallow it by returning `Ok(())` without calling `next` (the sender
//!   sees success, nobody receives it)
//! - reject it by returning an error (the sender sees that error verbatim,
//!   nobody receives it); use [`RouteError::intercepted`] for a plain reason
//!
//! The terminal handler after the last interceptor performs the delivery.
//!
//! [`RouteError::intercepted`]: crate::utils::error::RouteError::intercepted

use std::sync::Arc;

use async_trait::async_trait;

use crate::utils::error::Result;

#[async_trait]
pub trait Interceptor<M: Send + 'static>: Send + Sync {
    async fn intercept(&self, message: M, next: Next<'_, M>) -> Result<()>;
}

/// Delivery step run after the last interceptor.
pub type Terminal<'a, M> = &'a (dyn Fn(M) -> Result<()> + Send + Sync);

/// The remainder of a chain, handed to each interceptor.
pub struct Next<'a, M: Send + 'static> {
    interceptors: &'a [Arc<dyn Interceptor<M>>],
    terminal: Terminal<'a, M>,
}

impl<M: Send + 'static> Next<'_, M> {
    /// Passes the message to the next interceptor, or delivers it.
    pub async fn handle(self, message: M) -> Result<()> {
        match self.interceptors.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    interceptors: rest,
                    terminal: self.terminal,
                };
                head.intercept(message, next).await
            }
            None => (self.terminal)(message),
        }
    }
}

pub struct InterceptorChain<M: Send + 'static> {
    interceptors: Vec<Arc<dyn Interceptor<M>>>,
}

impl<M: Send + 'static> Default for InterceptorChain<M> {
    fn default() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }
}

impl<M: Send + 'static> InterceptorChain<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor<M>>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Runs `message` through all interceptors and then `terminal`.
    pub async fn run(&self, message: M, terminal: Terminal<'_, M>) -> Result<()> {
        Next {
            interceptors: &self.interceptors,
            terminal,
        }
        .handle(message)
        .await
    }
}

impl<M: Send + 'static> std::fmt::Debug for InterceptorChain<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}
