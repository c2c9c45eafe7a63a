use std::borrow::Cow;

use sha2::{Digest, Sha256};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Strips a leading UTF-8 BOM and folds CRLF / lone CR line endings into LF.
pub fn normalize_content(bytes: &[u8]) -> Cow<'_, [u8]> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if !body.contains(&b'\r') {
        return Cow::Borrowed(body);
    }

    let mut out = Vec::with_capacity(body.len());
    let mut iter = body.iter().peekable();
    while let Some(&byte) = iter.next() {
        if byte == b'\r' {
            if iter.peek() == Some(&&b'\n') {
                iter.next();
            }
            out.push(b'\n');
        } else {
            out.push(byte);
        }
    }
    Cow::Owned(out)
}

pub fn normalized_hash(bytes: &[u8]) -> String {
    sha256_hex(&normalize_content(bytes))
}

pub fn content_equal(left: &[u8], right: &[u8]) -> bool {
    normalize_content(left) == normalize_content(right)
}

pub fn normalized_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(&normalize_content(bytes)).into_owned()
}
