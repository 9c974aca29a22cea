use async_trait::async_trait;

use super::{Action, Context, Outcome};
use crate::error::{ActionError, Error};

/// Runs a sequence of actions in declared order
///
/// By default the first failure stops the sequence. With [`Composite::allow_errors`]
/// every member runs and failures are reported together as [`Error::Aggregate`].
/// A member that halts stops the sequence either way; the halt itself is consumed
/// here and never reported to the caller.
pub struct Composite<P> {
    actions: Vec<Box<dyn Action<P>>>,
    allow_errors: bool,
}

impl<P: Send + Sync> Composite<P> {
    /// Create a composite from boxed actions
    pub fn new(actions: Vec<Box<dyn Action<P>>>) -> Self {
        Self {
            actions,
            allow_errors: false,
        }
    }

    /// Keep running members after a failure and aggregate the errors
    pub fn allow_errors(mut self) -> Self {
        self.allow_errors = true;
        self
    }

    /// Append an action
    pub fn push(&mut self, action: impl Action<P> + 'static) {
        self.actions.push(Box::new(action));
    }

    /// Append an action, builder style
    pub fn with(mut self, action: impl Action<P> + 'static) -> Self {
        self.push(action);
        self
    }

    /// Number of member actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the composite has no members
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl<P: Send + Sync> Default for Composite<P> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl<P: Send + Sync> Action<P> for Composite<P> {
    async fn run(&self, ctx: &mut Context<P>) -> Result<Outcome, ActionError> {
        let mut outcome = Outcome::default();
        let mut errors = Vec::new();

        for action in &self.actions {
            match action.run(ctx).await {
                Ok(partial) => outcome = outcome.merge(partial),
                Err(ActionError {
                    outcome: partial,
                    error,
                }) => {
                    outcome = outcome.merge(partial);
                    if !self.allow_errors {
                        return Err(ActionError::new(outcome.with_halt(false), error));
                    }
                    errors.push(error.to_string());
                }
            }
            if outcome.halt {
                break;
            }
        }

        let outcome = outcome.with_halt(false);
        if errors.is_empty() {
            Ok(outcome)
        } else {
            Err(ActionError::new(outcome, Error::Aggregate(errors)))
        }
    }
}
