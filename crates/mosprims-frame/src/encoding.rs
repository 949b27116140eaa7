use bytes::{BufMut, BytesMut};

const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

/// Incremental big-endian UTF-16 decoder.
///
/// Socket reads do not respect code unit or surrogate pair boundaries, so the
/// decoder carries a dangling byte and an unpaired high surrogate from one
/// call to the next. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct WideDecoder {
    pending_byte: Option<u8>,
    high_surrogate: Option<u16>,
}

impl WideDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, appending complete characters to `out`.
    pub fn decode(&mut self, bytes: &[u8], out: &mut String) {
        let mut rest = bytes;
        if let Some(first) = self.pending_byte.take() {
            match rest.split_first() {
                Some((&second, tail)) => {
                    self.push_unit(u16::from_be_bytes([first, second]), out);
                    rest = tail;
                }
                None => {
                    self.pending_byte = Some(first);
                    return;
                }
            }
        }

        let mut pairs = rest.chunks_exact(2);
        for pair in &mut pairs {
            self.push_unit(u16::from_be_bytes([pair[0], pair[1]]), out);
        }
        if let [last] = pairs.remainder() {
            self.pending_byte = Some(*last);
        }
    }

    /// Flush decoder state at end of stream.
    ///
    /// Returns `true` if a dangling byte or unpaired surrogate was dropped
    /// (a replacement character is appended in that case).
    pub fn finish(&mut self, out: &mut String) -> bool {
        let dangling = self.pending_byte.take().is_some() | self.high_surrogate.take().is_some();
        if dangling {
            out.push(REPLACEMENT);
        }
        dangling
    }

    /// Whether a partial character is buffered.
    pub fn has_pending(&self) -> bool {
        self.pending_byte.is_some() || self.high_surrogate.is_some()
    }

    fn push_unit(&mut self, unit: u16, out: &mut String) {
        if let Some(high) = self.high_surrogate.take() {
            if (0xDC00..=0xDFFF).contains(&unit) {
                let code = 0x10000 + ((u32::from(high) - 0xD800) << 10) + (u32::from(unit) - 0xDC00);
                out.push(char::from_u32(code).unwrap_or(REPLACEMENT));
                return;
            }
            out.push(REPLACEMENT);
        }

        match unit {
            0xD800..=0xDBFF => self.high_surrogate = Some(unit),
            0xDC00..=0xDFFF => out.push(REPLACEMENT),
            _ => out.push(char::from_u32(u32::from(unit)).unwrap_or(REPLACEMENT)),
        }
    }
}

/// Encode `text` as big-endian UTF-16 into `dst`.
pub fn encode_wide(text: &str, dst: &mut BytesMut) {
    dst.reserve(text.len() * 2);
    for unit in text.encode_utf16() {
        dst.put_u16(unit);
    }
}
