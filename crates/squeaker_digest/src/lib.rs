//! SHA-512 digest primitives used to derive stage and image identities.
//!
//! Every digest in the cache is the lowercase hex encoding of a SHA-512
//! hash. Stage identity is an explicit function of its inputs (see
//! [`digest_stage`]), so a change to any input yields a new digest and
//! therefore a new cache slot without any separate versioning scheme.

use std::io::{self, Read};
use std::path::PathBuf;

use sha2::{Digest, Sha512};

/// Block size used when streaming a file through the hasher.
const STREAM_BLOCK: usize = 512 * 1024;

/// SHA-512 of the UTF-8 bytes of `s`, as lowercase hex.
pub fn digest_string(s: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-512 of the bytes of `bytes`, as lowercase hex.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-512 of a file's contents, streamed in blocks so large image blobs
/// never need to be held in memory at once.
pub fn digest_file(path: impl Into<PathBuf>) -> io::Result<String> {
    let mut file = fs_err::File::open(path)?;
    let mut hasher = Sha512::new();
    let mut buf = vec![0u8; STREAM_BLOCK];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-512 of the concatenation of the hex-decoded bytes of each digest in
/// `digests`, in the given order. Order-sensitive: this is not a set
/// aggregate, it is a sequence aggregate.
pub fn digest_digests<I, S>(digests: I) -> Result<String, hex::FromHexError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha512::new();
    for d in digests {
        let bytes = hex::decode(d.as_ref())?;
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// The stage digest that identifies a stage record: `SHA512(type + "\n" + key)`.
pub fn digest_stage(stage_type: &str, stage_key: &str) -> String {
    digest_string(&format!("{stage_type}\n{stage_key}"))
}
