use crate::encoding::{sniff_declared_encoding, Decoder, Encoding};
use crate::lexer::{LexError, LexErrorKind};
use crate::{is_xml_char, Position};
use std::io;
use std::io::Read;

const CHUNK_SIZE: usize = 8 * 1024;
/// how far into the input we are prepared to look for the end of the XML declaration when
/// sniffing the declared encoding
const DECL_SNIFF_LIMIT: usize = 1024;

/// Decoded character input with bounded lookahead.
///
/// Bytes are pulled from the source in chunks and decoded into `buf`; characters before `pos`
/// have been consumed and are discarded as the buffer is refilled.  Line endings are normalised
/// to `\n` as characters are consumed.
pub(crate) struct Input<R> {
    source: Option<R>,
    decoder: Decoder,
    declared_encoding: Option<String>,
    buf: String,
    pos: usize,
    eof: bool,
    position: Position,
}

impl<R: Read> Input<R> {
    pub fn new(mut source: R) -> Result<Input<R>, LexError> {
        let mut raw = vec![];
        // enough to see a BOM, and hopefully the whole XML declaration
        let mut eof = false;
        while raw.len() < DECL_SNIFF_LIMIT {
            let mut chunk = [0; 256];
            let n = read_retrying(&mut source, &mut chunk).map_err(|e| io_error(Position::default(), e))?;
            if n == 0 {
                eof = true;
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
            let body = raw.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(&raw[..]);
            if !b"<?xml".starts_with(&body[..body.len().min(5)]) {
                break;
            }
            if memchr::memmem::find(&raw, b"?>").is_some() {
                break;
            }
        }
        let (detected, bom) = Encoding::detect(&raw);
        let mut declared_encoding = None;
        let encoding = if detected == Encoding::Utf8 {
            match sniff_declared_encoding(&raw[bom..]) {
                Some(label) => {
                    let enc = Encoding::from_label(&label, detected).ok_or_else(|| LexError {
                        position: Position::default(),
                        kind: LexErrorKind::UnsupportedEncoding(label.clone()),
                    })?;
                    declared_encoding = Some(label);
                    enc
                }
                None => {
                    if bom > 0 {
                        declared_encoding = Some(detected.name().to_string());
                    }
                    detected
                }
            }
        } else {
            // the declaration can only be read once decoded; see note_declared_encoding()
            if bom > 0 {
                declared_encoding = Some(detected.name().to_string());
            }
            detected
        };
        let mut input = Input {
            source: Some(source),
            decoder: Decoder::new(encoding),
            declared_encoding,
            buf: String::new(),
            pos: 0,
            eof,
            position: Position::default(),
        };
        input.push_raw(&raw[bom..])?;
        Ok(input)
    }

    /// Input over text which is already decoded, such as the replacement text of an internal
    /// entity
    pub fn from_text(text: String) -> Input<R> {
        Input {
            source: None,
            decoder: Decoder::new(Encoding::Utf8),
            declared_encoding: None,
            buf: text,
            pos: 0,
            eof: true,
            position: Position::default(),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.decoder.encoding()
    }

    /// The encoding as labelled by the document itself (XML declaration or BOM)
    pub fn declared_encoding(&self) -> Option<&str> {
        self.declared_encoding.as_deref()
    }

    /// Records the label of the XML declaration once it has been tokenized
    pub fn note_declared_encoding(&mut self, label: String) {
        self.declared_encoding = Some(label);
    }

    pub fn position(&self) -> Position {
        self.position
    }

    fn push_raw(&mut self, raw: &[u8]) -> Result<(), LexError> {
        let last = self.eof;
        let position = self.position;
        self.decoder
            .decode(raw, &mut self.buf, last)
            .map_err(|e| LexError {
                position,
                kind: LexErrorKind::InvalidEncoding(e),
            })
    }

    fn fill(&mut self) -> Result<(), LexError> {
        if self.eof {
            return Ok(());
        }
        if self.pos > CHUNK_SIZE {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        let mut chunk = vec![0; CHUNK_SIZE];
        let n = match self.source.as_mut() {
            Some(source) => read_retrying(source, &mut chunk).map_err(|e| io_error(self.position, e))?,
            None => 0,
        };
        if n == 0 {
            self.eof = true;
        }
        self.push_raw(&chunk[..n])
    }

    /// Makes at least `n` bytes of decoded text available after the current position, if the
    /// input is that long
    fn ensure(&mut self, n: usize) -> Result<bool, LexError> {
        while self.buf.len() - self.pos < n {
            if self.eof {
                return Ok(false);
            }
            self.fill()?;
        }
        Ok(true)
    }

    pub fn peek(&mut self) -> Result<Option<char>, LexError> {
        self.ensure(1)?;
        Ok(self.buf[self.pos..].chars().next())
    }

    pub fn starts_with(&mut self, s: &str) -> Result<bool, LexError> {
        self.ensure(s.len())?;
        Ok(self.buf[self.pos..].starts_with(s))
    }

    /// Consumes the next character, normalising `\r\n` and lone `\r` to `\n`, and rejecting
    /// characters outside the XML character range
    pub fn next_char(&mut self) -> Result<Option<char>, LexError> {
        let c = match self.peek()? {
            Some(c) => c,
            None => return Ok(None),
        };
        if !is_xml_char(c) {
            return Err(LexError {
                position: self.position,
                kind: LexErrorKind::IllegalChar(c),
            });
        }
        self.pos += c.len_utf8();
        self.position.offset += c.len_utf8();
        if c == '\r' {
            if self.peek()? == Some('\n') {
                self.pos += 1;
                self.position.offset += 1;
            }
            self.newline();
            return Ok(Some('\n'));
        }
        if c == '\n' {
            self.newline();
        } else {
            self.position.column += 1;
        }
        Ok(Some(c))
    }

    fn newline(&mut self) {
        self.position.line += 1;
        self.position.column = 1;
    }

    /// Consumes `s`, which the caller has established is next in the input
    pub fn consume(&mut self, s: &str) -> Result<(), LexError> {
        for _ in s.chars() {
            self.next_char()?;
        }
        Ok(())
    }

    /// Consumes `s` if it is next in the input
    pub fn eat(&mut self, s: &str) -> Result<bool, LexError> {
        if self.starts_with(s)? {
            self.consume(s)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Appends characters to `out` up to the delimiter, which is consumed but not appended.
    /// Returns false if the input ended before the delimiter was found.
    pub fn take_until(&mut self, delim: &str, out: &mut String) -> Result<bool, LexError> {
        loop {
            if self.eat(delim)? {
                return Ok(true);
            }
            match self.next_char()? {
                Some(c) => out.push(c),
                None => return Ok(false),
            }
        }
    }

    pub fn skip_whitespace(&mut self) -> Result<bool, LexError> {
        let mut skipped = false;
        while let Some(c) = self.peek()? {
            if !crate::is_whitespace(c) {
                break;
            }
            self.next_char()?;
            skipped = true;
        }
        Ok(skipped)
    }

    /// Releases the underlying source
    pub fn close(&mut self) {
        self.source = None;
        self.eof = true;
        self.buf.clear();
        self.pos = 0;
    }
}

fn read_retrying<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn io_error(position: Position, e: io::Error) -> LexError {
    LexError {
        position,
        kind: LexErrorKind::Io(e.kind(), e.to_string()),
    }
}
