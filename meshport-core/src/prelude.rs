pub use std::sync::{Arc, Mutex};
pub use std::time::{Duration, Instant};

pub use tracing::{debug, error, info, trace, warn};
