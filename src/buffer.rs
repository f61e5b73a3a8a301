//! Module with the dynamic byte buffer.
//!
//! [`DynamicBuffer`] is used for both inbound accumulation (bytes read from a
//! socket that are not yet parsed) and outbound response assembly, including
//! prepending computed headers in front of an already buffered body.

use std::fmt;

/// Growable byte buffer with explicit cursor management.
///
/// The buffer has a `position` (number of bytes written, or the read cursor
/// after a [`flip`]) and a `capacity`. Writing past the remaining capacity
/// grows the backing storage to 1.5 times the required size, preserving all
/// previously written bytes and the position. This bounds worst-case memory
/// to 1.5 times the true requirement while avoiding repeated reallocation
/// under many small appends.
///
/// [`flip`]: DynamicBuffer::flip
pub struct DynamicBuffer {
    data: Vec<u8>,
    /// Invariant: `position <= limit <= data.len()`.
    position: usize,
    limit: usize,
}

impl DynamicBuffer {
    /// Create a buffer with `capacity` bytes of backing storage.
    pub fn with_capacity(capacity: usize) -> DynamicBuffer {
        DynamicBuffer {
            data: vec![0; capacity],
            position: 0,
            limit: capacity,
        }
    }

    /// Returns the current capacity of the backing storage.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Returns the current position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the number of bytes between position and limit.
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// Returns `true` if no bytes have been written (or all were consumed).
    pub fn is_empty(&self) -> bool {
        self.position == 0
    }

    /// Append `src`, growing the backing storage if needed.
    ///
    /// If `src` doesn't fit in the remaining capacity the new capacity becomes
    /// `ceil((capacity + (src.len() - remaining)) * 1.5)`.
    pub fn put(&mut self, src: &[u8]) {
        if src.len() > self.remaining() {
            // `capacity + (needed - remaining)` is exactly the number of bytes
            // that must be held, scale it by 1.5 rounding up.
            let required = self.capacity() + (src.len() - self.remaining());
            let new_capacity = (required * 3 + 1) / 2;
            self.data.resize(new_capacity, 0);
            self.limit = new_capacity;
        }
        self.data[self.position..self.position + src.len()].copy_from_slice(src);
        self.position += src.len();
    }

    /// Place `prefix` in front of the bytes written so far.
    ///
    /// Builds a new backing store of exactly `prefix.len() + position` bytes,
    /// copies the prefix first and the existing bytes after it, and advances
    /// the position accordingly. Used to inject the status line and headers in
    /// front of an already buffered response body once the body length is
    /// known.
    pub fn prepend(&mut self, prefix: &[u8]) {
        let mut data = Vec::with_capacity(prefix.len() + self.position);
        data.extend_from_slice(prefix);
        data.extend_from_slice(&self.data[..self.position]);
        self.position += prefix.len();
        self.limit = data.len();
        self.data = data;
    }

    /// Freeze the written region for reading: limit becomes the old position,
    /// position is reset to zero.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Advance the position by `n` bytes, e.g. after a partial socket write.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());
        self.position += n;
    }

    /// Shift the unread remainder (position..limit) to the start of the buffer
    /// for further writes.
    pub fn compact(&mut self) {
        self.data.copy_within(self.position..self.limit, 0);
        self.position = self.limit - self.position;
        self.limit = self.capacity();
    }

    /// Reset both cursors without freeing storage.
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity();
    }

    /// The readable region, i.e. the bytes between position and limit. Only
    /// meaningful after a [`flip`].
    ///
    /// [`flip`]: DynamicBuffer::flip
    pub fn bytes(&self) -> &[u8] {
        &self.data[self.position..self.limit]
    }

    /// The bytes written so far, ignoring the read cursor.
    pub fn written(&self) -> &[u8] {
        &self.data[..self.position]
    }
}

impl fmt::Debug for DynamicBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicBuffer")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.data.len())
            .finish()
    }
}
