mod automation;
mod error;
mod metrics;
mod page;
mod profile;
mod retry;
mod script;
mod state;

pub use automation::{ChromiumLauncher, ChromiumPage};
pub use error::{BrowserError, BrowserResult};
pub use metrics::LikerMetrics;
pub use page::{FeedPage, LaunchRequest, SessionLauncher};
pub use profile::{BrowserProfile, ProfileManager};
pub use retry::{execute_with_retry, RetryError, RetryOutcome, RetryPolicy};
pub use script::LikeRoutine;
pub use state::{PersistedSessionState, StoredCookie};
