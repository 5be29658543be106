//! Constant-time comparison and memory wiping

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Constant-time equality comparison
///
/// Compares two byte slices in constant time to prevent timing attacks.
/// Always returns `false` if the slices have different lengths; the
/// length check itself is not secret (token lengths are public).
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.ct_eq(b).into()
}

/// Overwrite a buffer in place
///
/// Uses a compiler-fence-backed zeroization so the write cannot be
/// optimized away. A zero-length buffer is a no-op.
pub fn wipe(buf: &mut [u8]) {
    buf.zeroize();
}
