//! Central session endpoint constants

use std::time::Duration;

/// Path of the session creation endpoint, relative to the API base URL
pub const SESSIONS_PATH: &str = "sessions";

/// Nominal bearer token lifetime granted by Central
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Tokens are considered expired this long before the server says so
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60 * 60);
