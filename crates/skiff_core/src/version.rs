use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Digest producer behind [`Version::from_bytes`].
///
/// The solver never inspects digests; they only need to be comparable and
/// printable, so the associated type stays deliberately small.
pub trait Hasher: Clone {
    type Digest: Copy
        + PartialEq
        + Eq
        + AsRef<[u8]>
        + Send
        + Sync
        + std::fmt::Debug;

    fn digest(data: &[u8]) -> Self::Digest;
}

#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct Blake3Hasher;

pub type Blake3Digest = [u8; 32];

impl Hasher for Blake3Hasher {
    type Digest = Blake3Digest;

    #[inline(always)]
    fn digest(data: &[u8]) -> Self::Digest {
        *blake3::hash(data).as_bytes()
    }
}

pub type DefaultHasher = Blake3Hasher;

/// Opaque token identifying "what this task would currently produce".
///
/// Equality is the only operation the solver performs on versions: two equal
/// versions for the same key mean the cached result is still valid.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// Mints a version from raw content bytes using the default hasher.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(hex(DefaultHasher::digest(data).as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Version {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Key identifying one unit of work within a graph resolution.
///
/// Keys are the deduplication and cache identity; human-readable ids live on
/// the task itself.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a string can't fail");
    }
    out
}
