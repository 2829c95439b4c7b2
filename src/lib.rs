//! A library for signing and verifying HTTP requests with the X-Ops signed header authentication
//! protocol.
//!
//! A client canonicalizes the request (method, path, content hash, timestamp and user id), signs
//! the canonical form with its RSA key and sends the signature along in `X-Ops-*` headers. The
//! server rebuilds the canonical form from the received request and checks the signature, the
//! freshness of the timestamp and the content hash.
//!
//! Protocol versions `1.0` and `1.1` (SHA-1, raw RSA encryption of the canonical form) and `1.3`
//! (SHA-256, PKCS#1 v1.5 signature) are supported. Version `1.3` requests can also be signed by an
//! ssh-agent holding the private key.
//!
//! ## Caveats
//!
//! The verifier takes the protocol version from the `X-Ops-Sign` header the client sent. Servers
//! that want to refuse the SHA-1 versions have to check [`headers::SignDescription`] themselves.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_op_in_unsafe_fn)]

#[cfg(not(feature = "std"))]
compile_error!(concat!(
    "no_std support of `signed-header-auth` crate is not implemented. ",
    "Please enable `std` crate feature"
));

#[macro_use]
mod util;

pub mod agent;
pub mod common;
pub mod digester;
pub mod error;
pub mod headers;
pub mod request;
pub mod sign;
pub mod signing_object;
pub mod verify;

pub use self::error::Error;
pub use self::headers::{normalize_header_name, InboundHeaders, SignDescription};
pub use self::request::{InboundRequest, Param};
pub use self::sign::{SignOptions, SignedHeaders, SigningKey};
pub use self::signing_object::SigningObject;
pub use self::verify::{AuthenticationError, Identity, SignatureVerification};
