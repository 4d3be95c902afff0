//! Token API constants

/// Default token endpoint for client-credential grants
pub const TOKEN_ENDPOINT: &str = "https://api.weixin.qq.com/cgi-bin/token";

/// Grant type sent with every token request
pub const GRANT_TYPE: &str = "client_credential";

/// Request timeout used when the config does not set one
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
