//! Request policies applied by the queue.
//!
//! ```text
//! request → [TokenBucket] → [Semaphore] → transport ⇄ [RetryPolicy]
//! ```

pub mod rate_limiter;
pub mod retry;

pub use rate_limiter::{RateLimiterConfig, TokenBucket};
pub use retry::{RetryConfig, RetryPolicy};
