//! Session lifecycle shared by tabs through one cookie.

pub mod codec;
pub mod cookie_store;
pub mod state;
pub mod store;
pub mod tracking;

pub use cookie_store::{LockOutcome, LockPhase, SessionCookieStore, SessionOperation};
pub use state::{is_active_session, SessionState};
pub use store::{SessionEnv, SessionStore, SessionStoreOptions};
pub use tracking::{SampledTracking, TrackingDecision, TrackingStrategy};
