//! Fixed-capacity string type for descriptor fields in mapped memory.
//!
//! Registry entries live in shared memory and must have a stable, fully
//! inline layout — no heap pointers may cross the process boundary.

use std::fmt;

/// NUL-terminated fixed-capacity string for shared-memory descriptors.
///
/// The payload occupies at most `N - 1` bytes; the remainder is NUL filled,
/// so the first zero byte marks the end of the string. `from_str` truncates
/// oversized input at a UTF-8 char boundary.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct FixedStr<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    /// Maximum payload length (one byte is reserved for the terminator).
    pub const CAPACITY: usize = N - 1;

    /// Create an empty string.
    #[inline]
    pub const fn new() -> Self {
        Self { data: [0; N] }
    }

    /// Create from a string slice, truncating to `N - 1` bytes.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        let mut out = Self::new();
        let truncated = if s.len() <= Self::CAPACITY {
            s
        } else {
            let mut end = Self::CAPACITY;
            while end > 0 && !s.is_char_boundary(end) {
                end -= 1;
            }
            &s[..end]
        };
        let bytes = truncated.as_bytes();
        out.data[..bytes.len()].copy_from_slice(bytes);
        out
    }

    /// View the contents up to the first NUL byte.
    ///
    /// Bytes copied out of shared memory may not be valid UTF-8 if the peer
    /// misbehaved; those read as an empty string rather than panicking.
    #[inline]
    pub fn as_str(&self) -> &str {
        let len = self.len();
        std::str::from_utf8(&self.data[..len]).unwrap_or("")
    }

    /// Length of the stored string in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.iter().position(|&b| b == 0).unwrap_or(N)
    }

    /// Whether the string is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data[0] == 0
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl<const N: usize> From<&str> for FixedStr<N> {
    fn from(s: &str) -> Self {
        Self::from_str(s)
    }
}

impl<const N: usize> AsRef<str> for FixedStr<N> {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

// SAFETY: FixedStr<N> is a repr(C) struct holding only a byte array
unsafe impl<const N: usize> bytemuck::Pod for FixedStr<N> where [u8; N]: bytemuck::Pod {}
unsafe impl<const N: usize> bytemuck::Zeroable for FixedStr<N> {}
