use subtle::ConstantTimeEq as _;

/// Compares two byte strings without short-circuiting on the first differing byte.
///
/// Inputs of different length compare unequal; only the length itself leaks.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.ct_eq(b))
}
