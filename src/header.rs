//! Module with HTTP header related types.

use std::fmt;

/// List of headers.
///
/// Names are normalized to lowercase when added and looked up
/// case-insensitively; values retain their original case. A header name
/// repeated later is merged into the first occurrence, joined with `;`, so
/// every name appears at most once and lookups are unambiguous.
pub struct Headers {
    parts: Vec<Header>,
    /// Index of the header most recently written to by [`add`], the target
    /// for folded continuation lines.
    ///
    /// [`add`]: Headers::add
    last: Option<usize>,
}

struct Header {
    /// Invariant: always lowercase.
    name: String,
    value: String,
}

impl Headers {
    /// Empty list of headers.
    pub const EMPTY: Headers = Headers {
        parts: Vec::new(),
        last: None,
    };

    /// Create an empty list of headers.
    pub fn new() -> Headers {
        Headers {
            parts: Vec::new(),
            last: None,
        }
    }

    /// Returns the number of headers.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Returns `true` if the list contains no headers.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Add a header.
    ///
    /// If a header with the same name (compared case-insensitively) was
    /// already added, `value` is merged into it, joined with `;`.
    pub fn add(&mut self, name: &str, value: &str) {
        if let Some(index) = self.position(name) {
            let existing = &mut self.parts[index].value;
            existing.push(';');
            existing.push_str(value);
            self.last = Some(index);
            return;
        }
        self.parts.push(Header {
            name: name.to_ascii_lowercase(),
            value: value.to_string(),
        });
        self.last = Some(self.parts.len() - 1);
    }

    /// Append `continuation` verbatim to the value of the header most
    /// recently written to by [`add`], used for folded (continuation) header
    /// lines. A repeated name merges into its first occurrence, which then
    /// is where a following continuation lands.
    ///
    /// Returns `false` if no header was added yet.
    ///
    /// [`add`]: Headers::add
    pub fn append_to_last(&mut self, continuation: &str) -> bool {
        match self.last {
            Some(index) => {
                self.parts[index].value.push_str(continuation);
                true
            }
            None => false,
        }
    }

    /// Get the value of the header with `name`, if any. The name is matched
    /// case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.parts
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| &*header.value)
    }

    /// Returns `true` if a header with `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns an iterator over all `(name, value)` pairs, in first-seen
    /// order. Names are lowercase.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parts
            .iter()
            .map(|header| (&*header.name, &*header.value))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.parts
            .iter()
            .position(|header| header.name.eq_ignore_ascii_case(name))
    }
}

impl Default for Headers {
    fn default() -> Headers {
        Headers::new()
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_map();
        for header in self.parts.iter() {
            let _ = f.entry(&header.name, &header.value);
        }
        f.finish()
    }
}
