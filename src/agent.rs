//! Delegated signing through an ssh-agent.
//!
//! Only the single request this crate needs is implemented: `SSH_AGENTC_SIGN_REQUEST` with the
//! `SSH_AGENT_RSA_SHA2_256` flag, as described in
//! [draft-miller-ssh-agent § 3.6](https://www.ietf.org/archive/id/draft-miller-ssh-agent-14.html#section-3.6).

use std::io;
#[cfg(unix)]
use std::io::{Read, Write};
use std::path::Path;

use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use ssh_encoding::{Decode, Encode};
use ssh_key::public::KeyData;
use ssh_key::Mpint;

use crate::common::consts::AGENT_SIGNATURE_PREFIX_LEN;
use crate::Error;

const SSH_AGENT_FAILURE: u8 = 5;
const SSH_AGENTC_SIGN_REQUEST: u8 = 13;
const SSH_AGENT_SIGN_RESPONSE: u8 = 14;

/// Upper bound on a reply frame; real sign responses are a few hundred bytes.
const MAX_REPLY_LEN: usize = 256 * 1024;

/// Error while talking to an ssh-agent.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed agent message: {0}")]
    Encoding(#[from] ssh_encoding::Error),
    #[error("unable to encode key: {0}")]
    Key(#[from] ssh_key::Error),
    /// The agent answered `SSH_AGENT_FAILURE`, e.g. because the key isn't loaded.
    #[error("agent could not sign data with requested identity")]
    Failure,
    #[error("unexpected agent response type {0}")]
    UnexpectedResponse(u8),
}

/// An agent able to produce signatures with a key it holds.
pub trait SshAgent {
    /// Asks the agent to sign `data` with the identity matching `key`.
    ///
    /// Returns the agent's signature blob verbatim, i.e. `string format || string signature`.
    fn sign(
        &mut self,
        key: &RsaPublicKey,
        data: &[u8],
        flags: u32,
    ) -> Result<Vec<u8>, AgentError>;
}

impl<A: SshAgent + ?Sized> SshAgent for &mut A {
    fn sign(
        &mut self,
        key: &RsaPublicKey,
        data: &[u8],
        flags: u32,
    ) -> Result<Vec<u8>, AgentError> {
        (**self).sign(key, data, flags)
    }
}

/// Strips the `string "rsa-sha2-256"` and length envelope from an agent signature blob.
pub fn strip_signature_prefix(mut blob: Vec<u8>) -> Result<Vec<u8>, Error> {
    if blob.len() <= AGENT_SIGNATURE_PREFIX_LEN {
        return Err(Error::AgentResponse(blob.len()));
    }
    blob.drain(..AGENT_SIGNATURE_PREFIX_LEN);
    Ok(blob)
}

/// The `ssh-rsa` public key blob identifying `key` to the agent.
pub fn rsa_key_blob(key: &RsaPublicKey) -> Result<Vec<u8>, ssh_key::Error> {
    let key = KeyData::Rsa(ssh_key::public::RsaPublicKey {
        e: Mpint::from_positive_bytes(&key.e().to_bytes_be())?,
        n: Mpint::from_positive_bytes(&key.n().to_bytes_be())?,
    });
    let mut blob = Vec::new();
    key.encode(&mut blob)?;
    Ok(blob)
}

/// Frames an `SSH_AGENTC_SIGN_REQUEST` message, length prefix included.
pub fn sign_request(
    key: &RsaPublicKey,
    data: &[u8],
    flags: u32,
) -> Result<Vec<u8>, ssh_key::Error> {
    let mut message = Vec::new();
    SSH_AGENTC_SIGN_REQUEST.encode(&mut message)?;
    rsa_key_blob(key)?.as_slice().encode(&mut message)?;
    data.encode(&mut message)?;
    flags.encode(&mut message)?;

    let mut frame = Vec::with_capacity(message.len() + 4);
    message.as_slice().encode(&mut frame)?;
    Ok(frame)
}

/// Extracts the signature blob from an agent reply body (without its length prefix).
pub fn parse_sign_response(mut body: &[u8]) -> Result<Vec<u8>, AgentError> {
    match u8::decode(&mut body)? {
        SSH_AGENT_SIGN_RESPONSE => Ok(Vec::<u8>::decode(&mut body)?),
        SSH_AGENT_FAILURE => Err(AgentError::Failure),
        other => Err(AgentError::UnexpectedResponse(other)),
    }
}

/// A client for an agent listening on a Unix domain socket.
#[derive(Debug)]
pub struct UnixAgent {
    #[cfg(unix)]
    stream: std::os::unix::net::UnixStream,
}

impl UnixAgent {
    /// Connects to the agent named by `SSH_AUTH_SOCK`.
    pub fn connect() -> io::Result<Self> {
        let path = std::env::var_os("SSH_AUTH_SOCK").ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "SSH_AUTH_SOCK is not set")
        })?;
        Self::connect_to(path)
    }

    #[cfg(unix)]
    pub fn connect_to(path: impl AsRef<Path>) -> io::Result<Self> {
        let stream = std::os::unix::net::UnixStream::connect(path)?;
        Ok(UnixAgent { stream })
    }

    #[cfg(not(unix))]
    pub fn connect_to(_path: impl AsRef<Path>) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "ssh-agent sockets are only supported on Unix",
        ))
    }
}

impl SshAgent for UnixAgent {
    #[cfg(unix)]
    fn sign(
        &mut self,
        key: &RsaPublicKey,
        data: &[u8],
        flags: u32,
    ) -> Result<Vec<u8>, AgentError> {
        self.stream.write_all(&sign_request(key, data, flags)?)?;
        self.stream.flush()?;

        let mut len = [0_u8; 4];
        self.stream.read_exact(&mut len)?;
        let len = u32::from_be_bytes(len) as usize;
        if len > MAX_REPLY_LEN {
            return Err(AgentError::Encoding(ssh_encoding::Error::Length));
        }
        let mut body = vec![0_u8; len];
        self.stream.read_exact(&mut body)?;
        parse_sign_response(&body)
    }

    #[cfg(not(unix))]
    fn sign(&mut self, _: &RsaPublicKey, _: &[u8], _: u32) -> Result<Vec<u8>, AgentError> {
        Err(AgentError::Io(io::ErrorKind::Unsupported.into()))
    }
}
