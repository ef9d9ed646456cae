/// Lua string type: an immutable, shared byte sequence.
///
/// Strings compare and hash by content, so two equal strings are the same
/// table key regardless of where they were created.
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// An immutable Lua string.
#[derive(Clone)]
pub struct LuaStr(Rc<[u8]>);

impl LuaStr {
    /// Create a string from bytes.
    pub fn new(bytes: &[u8]) -> Self {
        LuaStr(Rc::from(bytes))
    }

    /// Get the bytes of this string.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The string as UTF-8, if valid.
    pub fn to_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Lossy UTF-8 rendering for messages.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    /// Get the length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the string is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if both handles share the same allocation.
    #[inline]
    pub fn ptr_eq(&self, other: &LuaStr) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Concatenate a sequence of byte slices into a new string.
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut buf = Vec::new();
        for p in parts {
            buf.extend_from_slice(p);
        }
        LuaStr::from(buf)
    }
}

impl PartialEq for LuaStr {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl Eq for LuaStr {}

impl PartialOrd for LuaStr {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Byte-wise ordering, which is what Lua's `<` on strings uses in the C locale.
impl Ord for LuaStr {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Hash for LuaStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(lua_hash(&self.0));
    }
}

impl AsRef<[u8]> for LuaStr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for LuaStr {
    fn from(s: &str) -> Self {
        LuaStr::new(s.as_bytes())
    }
}

impl From<String> for LuaStr {
    fn from(s: String) -> Self {
        LuaStr(Rc::from(s.into_bytes()))
    }
}

impl From<&[u8]> for LuaStr {
    fn from(b: &[u8]) -> Self {
        LuaStr::new(b)
    }
}

impl From<Vec<u8>> for LuaStr {
    fn from(v: Vec<u8>) -> Self {
        LuaStr(Rc::from(v))
    }
}

/// Share the allocation of a string constant.
impl From<Rc<[u8]>> for LuaStr {
    fn from(rc: Rc<[u8]>) -> Self {
        LuaStr(rc)
    }
}

impl fmt::Display for LuaStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for LuaStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

/// Lua 5.3 string hash (seeded shift-add-xor over a sample of the bytes).
pub fn lua_hash(bytes: &[u8]) -> u32 {
    let len = bytes.len();
    let mut h: u32 = 0x2545_F491 ^ (len as u32);
    let step = (len >> 5) + 1;
    let mut l = len;
    while l >= step {
        h ^= (h << 5)
            .wrapping_add(h >> 2)
            .wrapping_add(bytes[l - 1] as u32);
        l -= step;
    }
    h
}
