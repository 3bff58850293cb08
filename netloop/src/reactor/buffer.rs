/// Per-connection accumulator for bytes read during one drain.
///
/// Reads land here until the socket reports would-block, at which point the
/// whole content is handed to the data callback and the buffer is cleared.
/// There is no size cap: a peer that never lets the socket go idle keeps
/// growing it.
#[derive(Debug, Default)]
pub(crate) struct Buffer {
    bytes: Vec<u8>,
}

impl Buffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends `data` to the end of the buffer.
    pub(crate) fn append(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Drops the content, keeping the allocation for the next drain.
    pub(crate) fn clear(&mut self) {
        self.bytes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_accumulates_in_order() {
        let mut buffer = Buffer::new();
        buffer.append(b"hel");
        buffer.append(b"lo");

        assert_eq!(buffer.as_slice(), b"hello");
    }

    #[test]
    fn test_nul_bytes_are_kept() {
        let mut buffer = Buffer::new();
        buffer.append(&[b'a', 0, b'b']);

        assert_eq!(buffer.as_slice(), &[b'a', 0, b'b']);
    }

    #[test]
    fn test_clear_empties_buffer() {
        let mut buffer = Buffer::new();
        buffer.append(b"data");
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.as_slice(), b"");
    }
}
