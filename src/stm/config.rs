//! Transaction-manager and per-ref settings.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use typed_builder::TypedBuilder;

/// Default bound on lock acquisition, also used by [`Ref::deref`](crate::Ref::deref).
pub(crate) const DEFAULT_LOCK_WAIT: Duration = Duration::from_millis(100);

/// Predicate run against every value proposed for a ref.
pub type Validator<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Tuning knobs of the attempt loop.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for a [StmConfig]. Every field is optional:
    - `.retry_limit(...)`
    - `.lock_wait(...)`
    - `.barge_wait(...)`
"))]
pub struct StmConfig {
    /// Attempts before the loop gives up. Default: 10 000.
    #[builder(default = 10_000)]
    pub retry_limit: usize,
    /// Bound on every lock acquisition and latch wait. Default: 100ms.
    #[builder(default = DEFAULT_LOCK_WAIT)]
    pub lock_wait: Duration,
    /// How long a transaction must have run before it may barge a younger
    /// one. Default: 10ms.
    #[builder(default = Duration::from_millis(10))]
    pub barge_wait: Duration,
}

impl Default for StmConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Construction-time options of a [`Ref`](crate::Ref).
#[derive(TypedBuilder)]
pub struct RefOptions<T> {
    /// Versions kept even when no reader has faulted.
    #[builder(default = 0)]
    pub min_history: usize,
    /// Upper bound on retained historical versions.
    #[builder(default = 10)]
    pub max_history: usize,
    /// Checked against the initial value and every committed value.
    #[builder(default, setter(strip_option))]
    pub validator: Option<Validator<T>>,
}

impl<T> Default for RefOptions<T> {
    fn default() -> Self {
        Self {
            min_history: 0,
            max_history: 10,
            validator: None,
        }
    }
}

impl<T> fmt::Debug for RefOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefOptions")
            .field("min_history", &self.min_history)
            .field("max_history", &self.max_history)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}
