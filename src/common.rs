pub mod consts;

use core::fmt::{self, Display, Formatter};
use core::str::FromStr;

use base64::Engine as _;
use rsa::Pkcs1v15Sign;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::Error;

/// Digest algorithm named by the `algorithm` field of the signing description.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

/// Shape of the canonical request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// `Method`, `Hashed Path`, `X-Ops-Content-Hash`, `X-Ops-Timestamp`, `X-Ops-UserId`; signed by
    /// raw RSA private encryption of the canonical string.
    Legacy,
    /// Unhashed path plus `X-Ops-Sign` and `X-Ops-Server-API-Version`; signed as a PKCS#1 v1.5
    /// signature over the digest of the canonical string.
    Digest,
}

/// One row of the protocol version table.
#[derive(Debug, PartialEq, Eq)]
pub struct Protocol {
    pub version: &'static str,
    pub algorithm: DigestAlgorithm,
    pub layout: Layout,
    /// Whether the user id enters the canonical form as its digest rather than verbatim.
    pub hashed_user_id: bool,
}

pub static VERSIONS: [Protocol; 3] = [
    Protocol {
        version: "1.0",
        algorithm: DigestAlgorithm::Sha1,
        layout: Layout::Legacy,
        hashed_user_id: false,
    },
    Protocol {
        version: "1.1",
        algorithm: DigestAlgorithm::Sha1,
        layout: Layout::Legacy,
        hashed_user_id: true,
    },
    Protocol {
        version: "1.3",
        algorithm: DigestAlgorithm::Sha256,
        layout: Layout::Digest,
        hashed_user_id: false,
    },
];

/// Looks up `version` in the version table.
pub fn lookup_version(version: &str) -> Result<&'static Protocol, Error> {
    VERSIONS
        .iter()
        .find(|protocol| protocol.version == version)
        .ok_or_else(|| Error::UnsupportedVersion(version.to_owned()))
}

/// Checks that `algorithm` is the digest the table assigns to `version`.
pub fn validate_sign_version_digest(
    algorithm: &str,
    version: &str,
) -> Result<&'static Protocol, Error> {
    let protocol = lookup_version(version)?;
    match algorithm.parse::<DigestAlgorithm>() {
        Ok(algorithm) if algorithm == protocol.algorithm => Ok(protocol),
        _ => Err(Error::UnsupportedAlgorithm {
            algorithm: algorithm.to_owned(),
            version: version.to_owned(),
        }),
    }
}

impl DigestAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
        }
    }

    /// Digests `data` and encodes the digest with standard base64.
    pub fn hash_bytes(self, data: &[u8]) -> String {
        let engine = &base64::engine::general_purpose::STANDARD;
        match self {
            DigestAlgorithm::Sha1 => engine.encode(Sha1::digest(data)),
            DigestAlgorithm::Sha256 => engine.encode(Sha256::digest(data)),
        }
    }

    /// The PKCS#1 v1.5 scheme and the message digest to sign for the digest layout.
    pub(crate) fn pkcs1v15(self, message: &[u8]) -> (Pkcs1v15Sign, Vec<u8>) {
        match self {
            DigestAlgorithm::Sha1 => (Pkcs1v15Sign::new::<Sha1>(), Sha1::digest(message).to_vec()),
            DigestAlgorithm::Sha256 => (
                Pkcs1v15Sign::new::<Sha256>(),
                Sha256::digest(message).to_vec(),
            ),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "sha1" => Ok(DigestAlgorithm::Sha1),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            _ => Err(()),
        }
    }
}

impl Display for DigestAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
