use md5::{Digest, Md5};

/// Suffix of checksum sidecar files written next to localized local files.
/// The sidecar holds the lowercase hex MD5 digest and nothing else.
pub const CHECKSUM_SUFFIX: &str = ".md5";

/// Lowercase hex MD5 digest of `data`.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }
}
