//! Rate limiting logic and state management.

mod admin;
mod clock;
mod key;
mod limiter;
mod registry;
mod store;
mod window;

pub use admin::AdminResetFacade;
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{client_identity, RateKey, UNKNOWN_CLIENT};
pub use limiter::{LimitConfig, RateLimiter, Verdict, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};
pub use registry::LimiterRegistry;
pub use store::{WindowStore, WindowWrite};
pub use window::WindowEntry;
