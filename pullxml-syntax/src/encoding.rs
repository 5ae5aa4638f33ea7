//! Encoding detection and incremental decoding into UTF-8
//!
//! The encoding is first guessed from a byte-order mark or the byte pattern of the first
//! characters, and may then be refined by the `encoding` pseudo-attribute of the XML (or text)
//! declaration.

use memchr::memmem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
    Ascii,
}

impl Encoding {
    /// Detect the encoding from a byte order mark or the initial bytes, returning the length of
    /// any BOM which must be skipped
    pub fn detect(input: &[u8]) -> (Encoding, usize) {
        match input {
            [0xEF, 0xBB, 0xBF, ..] => (Encoding::Utf8, 3),
            [0xFF, 0xFE, ..] => (Encoding::Utf16Le, 2),
            [0xFE, 0xFF, ..] => (Encoding::Utf16Be, 2),
            // no BOM, but '<' encoded as 16 bits
            [0x00, b'<', ..] => (Encoding::Utf16Be, 0),
            [b'<', 0x00, ..] => (Encoding::Utf16Le, 0),
            _ => (Encoding::Utf8, 0),
        }
    }

    /// Maps the label given in an XML declaration to one of the supported encodings
    pub fn from_label(label: &str, detected: Encoding) -> Option<Encoding> {
        match label.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Encoding::Utf8),
            // the byte order is already known from detection
            "utf-16" | "utf16" | "iso-10646-ucs-2" => match detected {
                Encoding::Utf16Le | Encoding::Utf16Be => Some(detected),
                _ => Some(Encoding::Utf8),
            },
            "utf-16le" => Some(Encoding::Utf16Le),
            "utf-16be" => Some(Encoding::Utf16Be),
            "iso-8859-1" | "iso8859-1" | "iso_8859-1" | "latin1" | "latin-1" | "l1"
            | "iso-latin-1" => Some(Encoding::Latin1),
            "us-ascii" | "ascii" => Some(Encoding::Ascii),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Utf16Le | Encoding::Utf16Be => "UTF-16",
            Encoding::Latin1 => "ISO-8859-1",
            Encoding::Ascii => "US-ASCII",
        }
    }

    fn is_utf16(&self) -> bool {
        matches!(self, Encoding::Utf16Le | Encoding::Utf16Be)
    }
}

/// Extracts the value of the `encoding` pseudo-attribute from an XML declaration at the start of
/// `raw`, for encodings where the declaration itself is plain ASCII
pub fn sniff_declared_encoding(raw: &[u8]) -> Option<String> {
    if !raw.starts_with(b"<?xml") {
        return None;
    }
    let end = memmem::find(raw, b"?>")?;
    let decl = &raw[..end];
    let at = memmem::find(decl, b"encoding")?;
    let mut rest = decl[at + b"encoding".len()..]
        .iter()
        .skip_while(|b| b.is_ascii_whitespace());
    if rest.next() != Some(&b'=') {
        return None;
    }
    let mut rest = rest.skip_while(|b| b.is_ascii_whitespace());
    let quote = *rest.next()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let label: Vec<u8> = rest.take_while(|&&b| b != quote).copied().collect();
    String::from_utf8(label).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// a byte sequence that is not valid in the document encoding
    InvalidSequence,
    /// the input ended part way through a multi-byte sequence
    Truncated,
    /// a byte outside the 7-bit range in a document declared as US-ASCII
    NotAscii,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidSequence => f.write_str("invalid byte sequence for the document encoding"),
            DecodeError::Truncated => f.write_str("input ends within a multi-byte character"),
            DecodeError::NotAscii => f.write_str("non-ASCII byte in US-ASCII document"),
        }
    }
}

/// Converts chunks of input into UTF-8, carrying incomplete sequences over to the next chunk
pub struct Decoder {
    encoding: Encoding,
    pending: Vec<u8>,
}

impl Decoder {
    pub fn new(encoding: Encoding) -> Decoder {
        Decoder {
            encoding,
            pending: vec![],
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Decodes `input`, appending complete characters to `out`.  When `last` is true no further
    /// input will follow, and an incomplete trailing sequence is an error.
    pub fn decode(&mut self, input: &[u8], out: &mut String, last: bool) -> Result<(), DecodeError> {
        match self.encoding {
            Encoding::Utf8 => self.decode_utf8(input, out, last),
            Encoding::Latin1 => {
                out.extend(input.iter().map(|&b| b as char));
                Ok(())
            }
            Encoding::Ascii => {
                if input.iter().any(|b| !b.is_ascii()) {
                    return Err(DecodeError::NotAscii);
                }
                out.extend(input.iter().map(|&b| b as char));
                Ok(())
            }
            Encoding::Utf16Le | Encoding::Utf16Be => self.decode_utf16(input, out, last),
        }
    }

    fn decode_utf8(&mut self, input: &[u8], out: &mut String, last: bool) -> Result<(), DecodeError> {
        self.pending.extend_from_slice(input);
        match std::str::from_utf8(&self.pending) {
            Ok(s) => {
                out.push_str(s);
                self.pending.clear();
                Ok(())
            }
            Err(e) => {
                let valid = e.valid_up_to();
                if let Ok(s) = std::str::from_utf8(&self.pending[..valid]) {
                    out.push_str(s);
                }
                match e.error_len() {
                    Some(_) => Err(DecodeError::InvalidSequence),
                    None if last => Err(DecodeError::Truncated),
                    None => {
                        self.pending.drain(..valid);
                        Ok(())
                    }
                }
            }
        }
    }

    fn decode_utf16(&mut self, input: &[u8], out: &mut String, last: bool) -> Result<(), DecodeError> {
        debug_assert!(self.encoding.is_utf16());
        self.pending.extend_from_slice(input);
        let mut usable = self.pending.len() & !1;
        if usable >= 2 && !last {
            // keep a trailing high surrogate back until its partner arrives
            let unit = self.unit(usable - 2);
            if (0xD800..0xDC00).contains(&unit) {
                usable -= 2;
            }
        }
        let units: Vec<u16> = (0..usable).step_by(2).map(|i| self.unit(i)).collect();
        for c in char::decode_utf16(units) {
            match c {
                Ok(c) => out.push(c),
                Err(_) => return Err(DecodeError::InvalidSequence),
            }
        }
        self.pending.drain(..usable);
        if last && !self.pending.is_empty() {
            return Err(DecodeError::Truncated);
        }
        Ok(())
    }

    fn unit(&self, i: usize) -> u16 {
        let pair = [self.pending[i], self.pending[i + 1]];
        if self.encoding == Encoding::Utf16Le {
            u16::from_le_bytes(pair)
        } else {
            u16::from_be_bytes(pair)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_bom() {
        assert_eq!(Encoding::detect(b"<root/>"), (Encoding::Utf8, 0));
        assert_eq!(Encoding::detect(&[0xEF, 0xBB, 0xBF, b'<']), (Encoding::Utf8, 3));
        assert_eq!(Encoding::detect(&[0xFF, 0xFE, b'<', 0x00]), (Encoding::Utf16Le, 2));
        assert_eq!(Encoding::detect(&[0xFE, 0xFF, 0x00, b'<']), (Encoding::Utf16Be, 2));
        assert_eq!(Encoding::detect(&[0x00, b'<', 0x00, b'?']), (Encoding::Utf16Be, 0));
    }

    #[test]
    fn sniff() {
        assert_eq!(
            sniff_declared_encoding(b"<?xml version=\"1.0\" encoding = 'ISO-8859-1'?><a/>"),
            Some("ISO-8859-1".to_string())
        );
        assert_eq!(sniff_declared_encoding(b"<?xml version=\"1.0\"?><a/>"), None);
        assert_eq!(sniff_declared_encoding(b"<a/>"), None);
    }

    #[test]
    fn utf8_split_sequence() {
        // "é" is 0xC3 0xA9; deliver the two bytes in separate chunks
        let mut d = Decoder::new(Encoding::Utf8);
        let mut out = String::new();
        d.decode(b"a\xC3", &mut out, false).unwrap();
        assert_eq!(out, "a");
        d.decode(b"\xA9b", &mut out, true).unwrap();
        assert_eq!(out, "aéb");
    }

    #[test]
    fn utf8_invalid() {
        let mut d = Decoder::new(Encoding::Utf8);
        let mut out = String::new();
        assert_eq!(
            d.decode(b"a\xFFb", &mut out, false),
            Err(DecodeError::InvalidSequence)
        );
        let mut d = Decoder::new(Encoding::Utf8);
        assert_eq!(d.decode(b"a\xC3", &mut out, true), Err(DecodeError::Truncated));
    }

    #[test]
    fn utf16_surrogate_across_chunks() {
        // U+1F600 is D83D DE00
        let mut d = Decoder::new(Encoding::Utf16Be);
        let mut out = String::new();
        d.decode(&[0x00, b'x', 0xD8, 0x3D], &mut out, false).unwrap();
        assert_eq!(out, "x");
        d.decode(&[0xDE, 0x00], &mut out, true).unwrap();
        assert_eq!(out, "x\u{1F600}");
    }

    #[test]
    fn latin1() {
        let mut d = Decoder::new(Encoding::Latin1);
        let mut out = String::new();
        d.decode(&[b'c', 0xE9], &mut out, true).unwrap();
        assert_eq!(out, "cé");
    }

    #[test]
    fn labels() {
        assert_eq!(Encoding::from_label("UTF-8", Encoding::Utf8), Some(Encoding::Utf8));
        assert_eq!(
            Encoding::from_label("utf-16", Encoding::Utf16Be),
            Some(Encoding::Utf16Be)
        );
        assert_eq!(Encoding::from_label("latin1", Encoding::Utf8), Some(Encoding::Latin1));
        assert_eq!(Encoding::from_label("Shift_JIS", Encoding::Utf8), None);
    }
}
