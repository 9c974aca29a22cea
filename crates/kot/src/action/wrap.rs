use async_trait::async_trait;

use super::{Action, Context, Outcome};
use crate::error::ActionError;

/// Hook deciding whether and how a wrapped action runs
#[async_trait]
pub trait Around<P: Send + Sync>: Send + Sync {
    /// Run around `inner`; calling `inner.run(ctx)` is up to the hook
    async fn around(
        &self,
        ctx: &mut Context<P>,
        inner: &dyn Action<P>,
    ) -> Result<Outcome, ActionError>;
}

/// Decorates an action with an [`Around`] hook
pub struct Wrap<P> {
    inner: Box<dyn Action<P>>,
    around: Box<dyn Around<P>>,
}

impl<P: Send + Sync> Wrap<P> {
    /// Wrap `inner` with `around`
    pub fn new(inner: impl Action<P> + 'static, around: impl Around<P> + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            around: Box::new(around),
        }
    }
}

#[async_trait]
impl<P: Send + Sync> Action<P> for Wrap<P> {
    async fn run(&self, ctx: &mut Context<P>) -> Result<Outcome, ActionError> {
        self.around.around(ctx, self.inner.as_ref()).await
    }
}
