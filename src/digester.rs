//! Base64-encoded digests of request content.

use std::io::{self, Read};

use base64::Engine as _;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::common::consts::STREAM_CHUNK_SIZE;
use crate::common::DigestAlgorithm;
use crate::Error;

/// Digests `data` with `algorithm`. Not memoized.
pub fn hash_string(data: impl AsRef<[u8]>, algorithm: DigestAlgorithm) -> String {
    algorithm.hash_bytes(data.as_ref())
}

/// Digests everything `reader` yields with `algorithm`, reading at most 16 KiB at a time.
/// Not memoized.
pub fn hash_file<R: Read + ?Sized>(
    reader: &mut R,
    algorithm: DigestAlgorithm,
) -> io::Result<String> {
    match algorithm {
        DigestAlgorithm::Sha1 => hash_reader_with::<Sha1, R>(reader),
        DigestAlgorithm::Sha256 => hash_reader_with::<Sha256, R>(reader),
    }
}

fn hash_reader_with<D, R>(reader: &mut R) -> io::Result<String>
where
    D: Digest,
    R: Read + ?Sized,
{
    let mut digest = D::new();
    let mut buf = vec![0_u8; STREAM_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => Digest::update(&mut digest, &buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(base64::engine::general_purpose::STANDARD.encode(digest.finalize()))
}

/// Content digest of a single request, computed at most once.
///
/// The first call pins the digest algorithm. Later calls with the same algorithm return the
/// memoized value without touching their input; a call with another algorithm is an error.
#[derive(Debug, Default)]
pub struct Digester {
    hashed: Option<(DigestAlgorithm, String)>,
}

impl Digester {
    pub fn new() -> Self {
        Self::default()
    }

    /// The memoized digest, if one has been computed.
    pub fn hashed_body(&self) -> Option<&str> {
        self.hashed.as_ref().map(|(_, hashed)| &**hashed)
    }

    pub fn hash_body(&mut self, body: &[u8], algorithm: DigestAlgorithm) -> Result<&str, Error> {
        self.memoize(algorithm, |algorithm| Ok(hash_string(body, algorithm)))
    }

    pub fn hash_file<R: Read + ?Sized>(
        &mut self,
        file: &mut R,
        algorithm: DigestAlgorithm,
    ) -> Result<&str, Error> {
        self.memoize(algorithm, |algorithm| Ok(hash_file(file, algorithm)?))
    }

    fn memoize<F>(&mut self, algorithm: DigestAlgorithm, compute: F) -> Result<&str, Error>
    where
        F: FnOnce(DigestAlgorithm) -> Result<String, Error>,
    {
        let memo = match self.hashed.take() {
            Some(memo) => memo,
            None => (algorithm, compute(algorithm)?),
        };
        let (first, hashed) = self.hashed.insert(memo);
        if *first != algorithm {
            return Err(Error::InconsistentDigest {
                first: first.as_str(),
                requested: algorithm.as_str(),
            });
        }
        Ok(hashed.as_str())
    }
}
