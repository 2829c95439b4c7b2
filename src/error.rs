use std::io;

use crate::agent::AgentError;

/// Error while signing a request or reconstructing its canonical form.
///
/// These are structural/protocol errors: they abort the current call. A signature, timestamp or
/// content hash that merely fails to verify is never reported through this type.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The protocol version is not in the version table.
    #[error("Unsupported version '{0}'")]
    UnsupportedVersion(String),
    /// The digest algorithm does not belong to the requested protocol version.
    #[error("Unsupported algorithm {algorithm} for version '{version}'")]
    UnsupportedAlgorithm { algorithm: String, version: String },
    /// The content hash of one signing object was requested with two different digests.
    #[error("hashed body must always be computed with the same digest (first {first}, then {requested})")]
    InconsistentDigest {
        first: &'static str,
        requested: &'static str,
    },
    /// The timestamp could not be parsed as an absolute time.
    #[error("unable to parse timestamp {0:?}")]
    InvalidTimestamp(String),
    /// A mandatory authentication header is absent.
    #[error("required authentication header {0} missing")]
    MissingHeader(&'static str),
    /// The `X-Ops-Sign` header is not a `name=value;` list.
    #[error("malformed signing description {0:?}")]
    InvalidSignDescription(String),
    /// The key lookup has no key for the user.
    #[error("no key found for user {0:?}")]
    KeyNotFound(String),
    /// The protocol version cannot be signed without a private key.
    #[error("a private key is required to sign with protocol version {0}")]
    PrivateKeyRequired(&'static str),
    /// No ssh-agent could be reached.
    #[error(
        "Could not connect to ssh-agent. Make sure the SSH_AUTH_SOCK environment variable is set properly! ({0})"
    )]
    AgentUnavailable(#[source] io::Error),
    /// The ssh-agent refused or failed to sign.
    #[error("Unable to sign request with ssh-agent. Make sure your key is loaded with ssh-add! ({0})")]
    AgentSign(#[source] AgentError),
    /// The ssh-agent reply is too short to hold a signature.
    #[error("ssh-agent returned a {0}-byte signature blob")]
    AgentResponse(usize),
    /// The RSA primitive rejected the input (e.g. the canonical request exceeds the key size).
    #[error("unable to sign request: {0}")]
    Sign(#[source] rsa::Error),
    /// The request body stream raised an error.
    #[error("unable to read request body: {0}")]
    Io(#[from] io::Error),
    /// The key material could not be decoded.
    #[error("unable to decode key: {0}")]
    InvalidKey(String),
    /// A signed header name is not a valid HTTP header name.
    #[error(transparent)]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),
    /// A signed header value is not a valid HTTP header value.
    #[error(transparent)]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
}
