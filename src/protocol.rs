//! Binary request protocol parser and response encoder.
//!
//! Every request starts with a 4-byte big-endian signed opcode. Some opcodes
//! carry arguments, which follow immediately:
//!
//! ```text
//! 1  list       (no arguments)
//! 2  rent       i32 index
//! 3  return     i32 index
//! 4  register   str genre, str title, i32 copies, str author
//! 5  terminate  (no arguments, no response)
//! *  unknown    (no arguments, empty response)
//! ```
//!
//! Strings, in both directions, are a 2-byte big-endian byte length followed by
//! modified UTF-8: U+0000 is written as `C0 80` and characters outside the
//! BMP as two 3-byte surrogate sequences. Every response is one such string.

use bytes::{BufMut, BytesMut};
use std::fmt::Write;
use thiserror::Error;

use crate::catalog::Catalog;

pub const OP_LIST: i32 = 1;
pub const OP_RENT: i32 = 2;
pub const OP_RETURN: i32 = 3;
pub const OP_REGISTER: i32 = 4;
pub const OP_TERMINATE: i32 = 5;

/// Largest string body a 2-byte length prefix can describe
pub const MAX_STRING_LENGTH: usize = u16::MAX as usize;

/// Parsed client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    List,
    Rent {
        index: i32,
    },
    Return {
        index: i32,
    },
    Register {
        genre: String,
        title: String,
        copies: i32,
        author: String,
    },
    /// End of session; no response is sent
    Terminate,
    /// Any other opcode, answered with an empty string
    Unknown(i32),
}

impl Request {
    /// Operation name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Request::List => "list",
            Request::Rent { .. } => "rent",
            Request::Return { .. } => "return",
            Request::Register { .. } => "register",
            Request::Terminate => "terminate",
            Request::Unknown(_) => "unknown",
        }
    }

    /// Wire form of this request, as the client driver sends it.
    #[cfg(test)]
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        match self {
            Request::List => buf.put_i32(OP_LIST),
            Request::Rent { index } => {
                buf.put_i32(OP_RENT);
                buf.put_i32(*index);
            }
            Request::Return { index } => {
                buf.put_i32(OP_RETURN);
                buf.put_i32(*index);
            }
            Request::Register {
                genre,
                title,
                copies,
                author,
            } => {
                buf.put_i32(OP_REGISTER);
                buf.extend_from_slice(&encode_string(genre).unwrap());
                buf.extend_from_slice(&encode_string(title).unwrap());
                buf.put_i32(*copies);
                buf.extend_from_slice(&encode_string(author).unwrap());
            }
            Request::Terminate => buf.put_i32(OP_TERMINATE),
            Request::Unknown(opcode) => buf.put_i32(*opcode),
        }
        buf
    }
}

/// Protocol parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A string argument is not valid modified UTF-8
    #[error("Invalid string in {0} field")]
    InvalidString(&'static str),
}

/// Result of parsing a request
#[derive(Debug)]
pub enum ParseResult {
    /// Successfully parsed request with bytes consumed
    Complete(Request, usize),
    /// Need more data
    Incomplete,
    /// Malformed request; the stream cannot be resynchronised
    Error(ParseError),
}

/// A string too long to be framed with a 2-byte length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Encoded string is {0} bytes, limit is {MAX_STRING_LENGTH}")]
pub struct StringTooLong(pub usize);

/// Parse one request from the front of `input`.
pub fn parse(input: &[u8]) -> ParseResult {
    let mut reader = Reader { input, pos: 0 };
    match reader.request() {
        Ok(Some(request)) => ParseResult::Complete(request, reader.pos),
        Ok(None) => ParseResult::Incomplete,
        Err(e) => ParseResult::Error(e),
    }
}

/// Cursor over a possibly partial request
struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn request(&mut self) -> Result<Option<Request>, ParseError> {
        let Some(opcode) = self.int() else {
            return Ok(None);
        };

        let request = match opcode {
            OP_LIST => Request::List,
            OP_RENT | OP_RETURN => {
                let Some(index) = self.int() else {
                    return Ok(None);
                };
                if opcode == OP_RENT {
                    Request::Rent { index }
                } else {
                    Request::Return { index }
                }
            }
            OP_REGISTER => {
                let Some(genre) = self.string("genre")? else {
                    return Ok(None);
                };
                let Some(title) = self.string("title")? else {
                    return Ok(None);
                };
                let Some(copies) = self.int() else {
                    return Ok(None);
                };
                let Some(author) = self.string("author")? else {
                    return Ok(None);
                };
                Request::Register {
                    genre,
                    title,
                    copies,
                    author,
                }
            }
            OP_TERMINATE => Request::Terminate,
            other => Request::Unknown(other),
        };

        Ok(Some(request))
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let bytes = self.input.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn int(&mut self) -> Option<i32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().ok()?;
        Some(i32::from_be_bytes(bytes))
    }

    fn string(&mut self, field: &'static str) -> Result<Option<String>, ParseError> {
        let Some(len) = self.take(2) else {
            return Ok(None);
        };
        let len = usize::from(u16::from_be_bytes([len[0], len[1]]));
        let Some(body) = self.take(len) else {
            return Ok(None);
        };
        decode_modified_utf8(body)
            .map(Some)
            .ok_or(ParseError::InvalidString(field))
    }
}

/// Frame `text` as a length-prefixed modified UTF-8 string.
pub fn encode_string(text: &str) -> Result<BytesMut, StringTooLong> {
    let mut body = Vec::with_capacity(text.len());
    encode_modified_utf8(text, &mut body);
    if body.len() > MAX_STRING_LENGTH {
        return Err(StringTooLong(body.len()));
    }

    let mut buf = BytesMut::with_capacity(2 + body.len());
    buf.put_u16(body.len() as u16);
    buf.extend_from_slice(&body);
    Ok(buf)
}

fn encode_modified_utf8(text: &str, out: &mut Vec<u8>) {
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
}

fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let continuation = |b: u8| (b & 0xC0 == 0x80).then_some(u16::from(b & 0x3F));

    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let lead = bytes[i];
        let unit = match lead >> 4 {
            0x0..=0x7 => {
                i += 1;
                u16::from(lead)
            }
            0xC | 0xD => {
                let b2 = continuation(*bytes.get(i + 1)?)?;
                i += 2;
                (u16::from(lead & 0x1F) << 6) | b2
            }
            0xE => {
                let b2 = continuation(*bytes.get(i + 1)?)?;
                let b3 = continuation(*bytes.get(i + 2)?)?;
                i += 3;
                (u16::from(lead & 0x0F) << 12) | (b2 << 6) | b3
            }
            _ => return None,
        };
        units.push(unit);
    }

    String::from_utf16(&units).ok()
}

/// Fixed response texts
pub struct Response;

impl Response {
    pub fn invalid_index() -> &'static str {
        "Índice inválido."
    }

    pub fn unavailable() -> &'static str {
        "Este livro não está disponível para aluguel."
    }

    pub fn rented() -> &'static str {
        "Livro alugado com sucesso!"
    }

    pub fn returned() -> &'static str {
        "Livro devolvido com sucesso!"
    }

    pub fn registered() -> &'static str {
        "Novo livro cadastrado com sucesso"
    }

    pub fn unknown() -> &'static str {
        ""
    }

    /// Multi-line listing of every book with its index.
    pub fn listing(catalog: &Catalog) -> String {
        let mut out = String::from("\n=========== LIVROS ===========\n");
        for (index, book) in catalog.list() {
            // Writing to a String cannot fail
            let _ = write!(out, "Index: {index}\n{book}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Book;

    fn register_hobbit() -> Request {
        Request::Register {
            genre: "Fantasy".into(),
            title: "Hobbit".into(),
            copies: 5,
            author: "Tolkien".into(),
        }
    }

    #[test]
    fn test_parse_list() {
        match parse(&[0, 0, 0, 1]) {
            ParseResult::Complete(Request::List, 4) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rent_and_return() {
        match parse(&[0, 0, 0, 2, 0, 0, 0, 7]) {
            ParseResult::Complete(Request::Rent { index: 7 }, 8) => {}
            other => panic!("unexpected: {:?}", other),
        }

        match parse(&[0, 0, 0, 3, 0xFF, 0xFF, 0xFF, 0xFF]) {
            ParseResult::Complete(Request::Return { index: -1 }, 8) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_register() {
        let mut buffer = vec![0, 0, 0, 4];
        buffer.extend_from_slice(&[0, 7]);
        buffer.extend_from_slice(b"Fantasy");
        buffer.extend_from_slice(&[0, 6]);
        buffer.extend_from_slice(b"Hobbit");
        buffer.extend_from_slice(&[0, 0, 0, 5]);
        buffer.extend_from_slice(&[0, 7]);
        buffer.extend_from_slice(b"Tolkien");

        match parse(&buffer) {
            ParseResult::Complete(request, consumed) => {
                assert_eq!(request, register_hobbit());
                assert_eq!(consumed, buffer.len());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_terminate_and_unknown() {
        match parse(&[0, 0, 0, 5]) {
            ParseResult::Complete(Request::Terminate, 4) => {}
            other => panic!("unexpected: {:?}", other),
        }

        match parse(&[0, 0, 0, 42, 0, 0, 0, 1]) {
            ParseResult::Complete(Request::Unknown(42), 4) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_incomplete_at_every_split() {
        let encoded = register_hobbit().encode();
        for split in 0..encoded.len() {
            match parse(&encoded[..split]) {
                ParseResult::Incomplete => {}
                other => panic!("unexpected at {split}: {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_leaves_pipelined_bytes() {
        let mut buffer = Request::Rent { index: 0 }.encode();
        buffer.extend_from_slice(&Request::List.encode());

        match parse(&buffer) {
            ParseResult::Complete(Request::Rent { index: 0 }, 8) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_string() {
        let mut buffer = vec![0, 0, 0, 4];
        buffer.extend_from_slice(&[0, 2, 0xFF, 0xFE]);

        match parse(&buffer) {
            ParseResult::Error(ParseError::InvalidString("genre")) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_multibyte_is_invalid() {
        let mut buffer = vec![0, 0, 0, 4];
        buffer.extend_from_slice(&[0, 1, 0xC3]);

        match parse(&buffer) {
            ParseResult::Error(ParseError::InvalidString("genre")) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_encode_accented_response() {
        let encoded = encode_string(Response::invalid_index()).unwrap();
        let body = "Índice inválido.".as_bytes();
        assert_eq!(&encoded[..2], &(body.len() as u16).to_be_bytes());
        assert_eq!(&encoded[2..], body);
    }

    #[test]
    fn test_encode_empty_string() {
        assert_eq!(&encode_string(Response::unknown()).unwrap()[..], &[0, 0]);
    }

    #[test]
    fn test_modified_utf8_nul_and_supplementary() {
        let encoded = encode_string("a\0😀").unwrap();
        assert_eq!(
            &encoded[..],
            &[0, 9, b'a', 0xC0, 0x80, 0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]
        );
        assert_eq!(decode_modified_utf8(&encoded[2..]).as_deref(), Some("a\0😀"));
    }

    #[test]
    fn test_decode_rejects_lone_surrogate() {
        assert_eq!(decode_modified_utf8(&[0xED, 0xA0, 0xBD]), None);
    }

    #[test]
    fn test_encode_too_long() {
        let text = "x".repeat(MAX_STRING_LENGTH + 1);
        assert_eq!(encode_string(&text), Err(StringTooLong(MAX_STRING_LENGTH + 1)));
        assert!(encode_string(&text[1..]).is_ok());
    }

    #[test]
    fn test_listing() {
        let catalog = Catalog::from_books(vec![
            Book::new("Herbert", "Dune", "SciFi", 2),
            Book::new("Tolkien", "Hobbit", "Fantasy", 5),
        ]);

        assert_eq!(
            Response::listing(&catalog),
            "\n=========== LIVROS ===========\n\
             Index: 0\nTitulo: Dune \nAutor: Herbert \nGenero: SciFi \nExemplares: 2\n\n\
             Index: 1\nTitulo: Hobbit \nAutor: Tolkien \nGenero: Fantasy \nExemplares: 5\n\n"
        );
    }

    #[test]
    fn test_listing_empty_catalog() {
        assert_eq!(
            Response::listing(&Catalog::new()),
            "\n=========== LIVROS ===========\n"
        );
    }
}
