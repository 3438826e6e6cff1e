//! Fingerprints for leaves and name-set digests for registry keys.
//!
//! Leaf digests cover content. Key digests cover only the *names* of the
//! direct children, combined with XOR so enumeration order does not matter:
//!
//! ```text
//! key = D( D(D(sub_1) ^ .. ^ D(sub_m)) ^ D(val_1) ^ .. ^ D(val_n) )
//! ```
//!
//! MD5 is the default because existing object lists were written with it.
//! It is a content fingerprint only, not a tamper-evidence proof.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};

const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    pub fn output_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha256 | HashAlgorithm::Blake3 => 32,
        }
    }

    pub fn is_default(&self) -> bool {
        *self == HashAlgorithm::default()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Blake3 => "blake3",
        };
        f.write_str(name)
    }
}

/// Raw digest bytes. Comparison is exact; there is no prefix matching.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        if s.is_empty() {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        hex::decode(s).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

enum Engine {
    Md5(Md5),
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Engine {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Engine::Md5(Md5::new()),
            HashAlgorithm::Sha256 => Engine::Sha256(Sha256::new()),
            HashAlgorithm::Blake3 => Engine::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Engine::Md5(h) => h.update(data),
            Engine::Sha256(h) => h.update(data),
            Engine::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> Fingerprint {
        match self {
            Engine::Md5(h) => Fingerprint(h.finalize().to_vec()),
            Engine::Sha256(h) => Fingerprint(h.finalize().to_vec()),
            Engine::Blake3(h) => Fingerprint(h.finalize().as_bytes().to_vec()),
        }
    }
}

/// Maps leaf content and container name sets to fixed-size digests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestCompositor {
    algorithm: HashAlgorithm,
}

impl DigestCompositor {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn digest(&self, data: &[u8]) -> Fingerprint {
        let mut engine = Engine::new(self.algorithm);
        engine.update(data);
        engine.finalize()
    }

    /// Digest of raw file content.
    pub fn leaf_file(&self, content: &[u8]) -> Fingerprint {
        self.digest(content)
    }

    /// Streaming form of [`leaf_file`](Self::leaf_file).
    pub fn leaf_file_reader<R: Read>(&self, mut reader: R) -> io::Result<Fingerprint> {
        let mut engine = Engine::new(self.algorithm);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            engine.update(&buffer[..n]);
        }
        Ok(engine.finalize())
    }

    /// Digest of the little-endian type code followed by the raw value bytes.
    pub fn registry_value(&self, type_code: u32, raw: &[u8]) -> Fingerprint {
        let mut engine = Engine::new(self.algorithm);
        engine.update(&type_code.to_le_bytes());
        engine.update(raw);
        engine.finalize()
    }

    /// Name-set digest of a registry key. Content of the children is not
    /// involved; each child carries its own digest.
    pub fn container_key<S, V>(&self, sub_key_names: S, value_names: V) -> Fingerprint
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        V: IntoIterator,
        V::Item: AsRef<str>,
    {
        let mut acc = vec![0u8; self.algorithm.output_len()];
        for name in sub_key_names {
            xor_into(&mut acc, self.digest(name.as_ref().as_bytes()).as_bytes());
        }

        let mut acc = self.digest(&acc).0;
        for name in value_names {
            xor_into(&mut acc, self.digest(name.as_ref().as_bytes()).as_bytes());
        }

        self.digest(&acc)
    }
}

fn xor_into(acc: &mut [u8], other: &[u8]) {
    for (a, b) in acc.iter_mut().zip(other) {
        *a ^= b;
    }
}
