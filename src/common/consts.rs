use time::Duration;

pub const X_OPS_SIGN: &str = "X-Ops-Sign";
pub const X_OPS_USERID: &str = "X-Ops-Userid";
pub const X_OPS_TIMESTAMP: &str = "X-Ops-Timestamp";
pub const X_OPS_CONTENT_HASH: &str = "X-Ops-Content-Hash";
pub const X_OPS_AUTHORIZATION: &str = "X-Ops-Authorization";
pub const X_OPS_SERVER_API_VERSION: &str = "X-Ops-Server-API-Version";
pub const HOST: &str = "Host";
pub const AUTHORIZATION: &str = "Authorization";

/// Headers the verifier refuses to proceed without.
pub const MANDATORY_HEADERS: [&str; 5] = [
    X_OPS_SIGN,
    X_OPS_USERID,
    X_OPS_TIMESTAMP,
    HOST,
    X_OPS_CONTENT_HASH,
];

pub const DEFAULT_PROTO_VERSION: &str = "1.0";
pub const DEFAULT_SERVER_API_VERSION: &str = "0";
pub const DEFAULT_TIME_SKEW: Duration = Duration::minutes(15);

pub const STREAM_CHUNK_SIZE: usize = 16 * 1024;
pub const SIGNATURE_LINE_WIDTH: usize = 60;

/// `SSH_AGENT_RSA_SHA2_256` signature flag of the agent protocol.
pub const SSH_AGENT_RSA_SHA2_256: u32 = 2;
/// `string "rsa-sha2-256"` plus the length of the signature string.
pub const AGENT_SIGNATURE_PREFIX_LEN: usize = 20;
