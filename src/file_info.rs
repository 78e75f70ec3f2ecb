use crate::engine::Stat;
use std::borrow::Cow;
use std::time::SystemTime;

/// A stored value's key and stat.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileInfo {
    key: Vec<u8>,
    stat: Stat,
}

impl FileInfo {
    pub(crate) fn new(key: Vec<u8>, stat: Stat) -> Self {
        Self { key, stat }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The key as text, with invalid UTF-8 replaced.
    pub fn name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    pub fn size(&self) -> u64 {
        self.stat.size
    }

    pub fn last_used(&self) -> SystemTime {
        self.stat.last_used
    }

    pub fn stat(&self) -> Stat {
        self.stat
    }
}
