//! LFS pointer file format.
//!
//! LFS pointer files are small text files that replace large files in the Git repository.
//! They contain metadata about the actual file stored in LFS.

use std::fmt;

use crate::{Error, Oid, Result};

/// LFS specification version.
pub const LFS_SPEC_V1: &str = "https://git-lfs.github.com/spec/v1";

/// Pre-release specification version, still accepted when decoding.
pub const HAWSER_SPEC_V1: &str = "https://hawser.github.com/spec/v1";

/// Maximum size of an LFS pointer file (1KB).
pub const MAX_POINTER_SIZE: usize = 1024;

/// A content extension that was applied when the object was cleaned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerExtension {
    /// Extension name, as configured under `lfs.extension.<name>`.
    pub name: String,
    /// Position in the extension chain; lower runs first.
    pub priority: u32,
    /// OID of the content this extension consumed.
    pub oid: Oid,
}

impl PointerExtension {
    pub fn new(name: impl Into<String>, priority: u32, oid: Oid) -> Self {
        PointerExtension {
            name: name.into(),
            priority,
            oid,
        }
    }
}

/// An LFS pointer representing a file stored in LFS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pointer {
    /// The SHA256 hash of the file content.
    oid: Oid,
    /// The size of the file in bytes.
    size: u64,
    /// Extensions applied during clean, sorted by priority.
    extensions: Vec<PointerExtension>,
}

impl Pointer {
    /// Create a new pointer with the given OID and size.
    pub fn new(oid: Oid, size: u64) -> Self {
        Pointer {
            oid,
            size,
            extensions: Vec::new(),
        }
    }

    /// Create a pointer that records the extensions applied during clean.
    pub fn with_extensions(oid: Oid, size: u64, mut extensions: Vec<PointerExtension>) -> Self {
        extensions.sort_by_key(|e| e.priority);
        Pointer {
            oid,
            size,
            extensions,
        }
    }

    /// Create a pointer from file content.
    ///
    /// This computes the SHA256 hash of the content.
    pub fn from_content(content: &[u8]) -> Self {
        Pointer::new(Oid::from_content(content), content.len() as u64)
    }

    /// The pointer of an empty file.
    pub fn empty() -> Self {
        Pointer::from_content(b"")
    }

    /// Parse a pointer from its text representation.
    ///
    /// Returns [`Error::NotAPointer`] when the content is not a pointer record
    /// at all, and [`Error::InvalidPointer`] when it is one but a field is
    /// malformed. Unknown keys are ignored.
    pub fn parse(content: &[u8]) -> Result<Self> {
        if content.is_empty() {
            return Ok(Pointer::empty());
        }

        // Check size first
        if content.len() > MAX_POINTER_SIZE {
            return Err(Error::NotAPointer(
                "content too large to be a pointer".into(),
            ));
        }

        let text = std::str::from_utf8(content)
            .map_err(|_| Error::NotAPointer("invalid UTF-8".into()))?;

        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

        match lines.next().and_then(|l| l.strip_prefix("version ")) {
            Some(ver) => {
                let ver = ver.trim();
                if ver != LFS_SPEC_V1 && ver != HAWSER_SPEC_V1 {
                    return Err(Error::InvalidPointer(format!(
                        "unsupported version: {}",
                        ver
                    )));
                }
            }
            None => return Err(Error::NotAPointer("missing version".into())),
        }

        let mut oid: Option<Oid> = None;
        let mut size: Option<u64> = None;
        let mut extensions = Vec::new();

        for line in lines {
            let (key, value) = line
                .split_once(' ')
                .ok_or_else(|| Error::InvalidPointer(format!("malformed line: {:?}", line)))?;
            let value = value.trim();

            match key {
                "oid" => oid = Some(parse_sha256(value)?),
                "size" => {
                    size = Some(
                        value
                            .parse()
                            .map_err(|_| Error::InvalidPointer(format!("invalid size: {}", value)))?,
                    );
                }
                k if k.starts_with("ext-") => extensions.push(parse_extension(k, value)?),
                // forward compatibility
                _ => {}
            }
        }

        match (oid, size) {
            (Some(oid), Some(size)) => Ok(Pointer::with_extensions(oid, size, extensions)),
            (None, _) => Err(Error::InvalidPointer("missing oid".into())),
            (_, None) => Err(Error::InvalidPointer("missing size".into())),
        }
    }

    /// Check if content looks like an LFS pointer.
    ///
    /// Only the leading bytes are inspected.
    pub fn is_pointer(content: &[u8]) -> bool {
        if content.len() > MAX_POINTER_SIZE {
            return false;
        }
        let v1 = format!("version {}", LFS_SPEC_V1);
        let hawser = format!("version {}", HAWSER_SPEC_V1);
        content.starts_with(v1.as_bytes()) || content.starts_with(hawser.as_bytes())
    }

    /// Get the OID of this pointer.
    pub fn oid(&self) -> &Oid {
        &self.oid
    }

    /// Get the size of the file.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Extensions applied to produce this object, in priority order.
    pub fn extensions(&self) -> &[PointerExtension] {
        &self.extensions
    }

    /// Encode the pointer to its text representation.
    ///
    /// The empty file is represented by an empty pointer record.
    pub fn encode(&self) -> String {
        if self.size == 0 && self.extensions.is_empty() {
            return String::new();
        }

        let mut out = format!("version {}\n", LFS_SPEC_V1);
        for ext in &self.extensions {
            out.push_str(&format!(
                "ext-{}-{} sha256:{}\n",
                ext.priority,
                ext.name,
                ext.oid.to_hex()
            ));
        }
        out.push_str(&format!("oid sha256:{}\nsize {}\n", self.oid.to_hex(), self.size));
        out
    }

    /// Encode the pointer to bytes.
    pub fn encode_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

fn parse_sha256(value: &str) -> Result<Oid> {
    let hex = value
        .strip_prefix("sha256:")
        .ok_or_else(|| Error::InvalidPointer(format!("unsupported oid type: {}", value)))?;
    Oid::from_hex(hex).map_err(|e| Error::InvalidPointer(e.to_string()))
}

// ext-<priority>-<name> sha256:<oid>
fn parse_extension(key: &str, value: &str) -> Result<PointerExtension> {
    let rest = &key["ext-".len()..];
    let (priority, name) = rest
        .split_once('-')
        .ok_or_else(|| Error::InvalidPointer(format!("malformed extension: {}", key)))?;
    let priority = priority
        .parse()
        .map_err(|_| Error::InvalidPointer(format!("invalid extension priority: {}", key)))?;
    if name.is_empty() {
        return Err(Error::InvalidPointer(format!("missing extension name: {}", key)));
    }
    Ok(PointerExtension::new(name, priority, parse_sha256(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const OID: &str = "4d7a214614ab2935c943f9e0ff69d22eadbb8f32b1258daaa5e2ca24d17e2393";

    #[test]
    fn test_pointer_from_content() {
        let content = b"Hello, World!";
        let pointer = Pointer::from_content(content);
        assert_eq!(pointer.size(), 13);
        assert_eq!(
            pointer.oid().to_hex(),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_pointer_encode() {
        let pointer = Pointer::from_content(b"test");
        let encoded = pointer.encode();

        assert!(encoded.starts_with("version https://git-lfs.github.com/spec/v1\n"));
        assert!(encoded.contains("oid sha256:"));
        assert!(encoded.ends_with("size 4\n"));
    }

    #[test]
    fn test_pointer_parse_valid() {
        let pointer_text = format!(
            "version https://git-lfs.github.com/spec/v1\noid sha256:{}\nsize 12345\n",
            OID
        );

        let pointer = Pointer::parse(pointer_text.as_bytes()).unwrap();
        assert_eq!(pointer.size(), 12345);
        assert_eq!(pointer.oid().to_hex(), OID);
        assert!(pointer.extensions().is_empty());
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let text = format!(
            "version https://git-lfs.github.com/spec/v1\nfuture something\noid sha256:{}\nsize 3\n",
            OID
        );
        assert_eq!(Pointer::parse(text.as_bytes()).unwrap().size(), 3);
    }

    #[test]
    fn test_parse_hawser_version() {
        let text = format!(
            "version https://hawser.github.com/spec/v1\noid sha256:{}\nsize 1\n",
            OID
        );
        assert!(Pointer::parse(text.as_bytes()).is_ok());
    }

    #[test]
    fn test_not_a_pointer_vs_invalid() {
        assert!(matches!(
            Pointer::parse(b"Hello, World!"),
            Err(Error::NotAPointer(_))
        ));
        assert!(matches!(
            Pointer::parse(&vec![b'x'; 2000]),
            Err(Error::NotAPointer(_))
        ));

        // Malformed hash
        assert!(matches!(
            Pointer::parse(b"version https://git-lfs.github.com/spec/v1\noid sha256:abc\nsize 1\n"),
            Err(Error::InvalidPointer(_))
        ));

        // Malformed size
        let bad_size = format!(
            "version https://git-lfs.github.com/spec/v1\noid sha256:{}\nsize -4\n",
            OID
        );
        assert!(matches!(
            Pointer::parse(bad_size.as_bytes()),
            Err(Error::InvalidPointer(_))
        ));

        // Missing size
        let no_size = format!("version https://git-lfs.github.com/spec/v1\noid sha256:{}\n", OID);
        assert!(matches!(
            Pointer::parse(no_size.as_bytes()),
            Err(Error::InvalidPointer(_))
        ));
    }

    #[test]
    fn test_extensions_encode_and_parse() {
        let before = Oid::from_content(b"raw");
        let pointer = Pointer::with_extensions(
            Oid::from_content(b"cooked"),
            6,
            vec![
                PointerExtension::new("zip", 1, before.clone()),
                PointerExtension::new("crlf", 0, before.clone()),
            ],
        );

        let encoded = pointer.encode();
        let lines: Vec<&str> = encoded.lines().collect();
        assert_eq!(lines[1], format!("ext-0-crlf sha256:{}", before));
        assert_eq!(lines[2], format!("ext-1-zip sha256:{}", before));
        assert!(lines[3].starts_with("oid sha256:"));

        let parsed = Pointer::parse(encoded.as_bytes()).unwrap();
        assert_eq!(parsed, pointer);
        assert_eq!(parsed.extensions()[0].name, "crlf");
    }

    #[test]
    fn test_empty_pointer() {
        assert_eq!(Pointer::empty().encode(), "");
        assert_eq!(Pointer::parse(b"").unwrap(), Pointer::empty());
    }

    #[test]
    fn test_is_pointer() {
        let pointer = b"version https://git-lfs.github.com/spec/v1\noid sha256:abc\nsize 123\n";
        assert!(Pointer::is_pointer(pointer));

        let not_pointer = b"Hello, this is regular content";
        assert!(!Pointer::is_pointer(not_pointer));

        // Too large
        let large = vec![b'x'; 2000];
        assert!(!Pointer::is_pointer(&large));
    }

    proptest! {
        #[test]
        fn prop_encode_decode_roundtrip(
            bytes in proptest::array::uniform32(any::<u8>()),
            size in 1u64..,
            exts in proptest::collection::vec(("[a-z]{1,8}", 0u32..10), 0..3),
        ) {
            let oid = Oid::from_bytes(bytes);
            let extensions = exts
                .into_iter()
                .enumerate()
                .map(|(i, (name, _))| PointerExtension::new(name, i as u32, oid.clone()))
                .collect();
            let pointer = Pointer::with_extensions(oid.clone(), size, extensions);
            let decoded = Pointer::parse(&pointer.encode_bytes()).unwrap();
            prop_assert_eq!(decoded, pointer);
        }
    }
}
