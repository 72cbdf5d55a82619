//! PDF object parser.
//!
//! Recursive descent over lexer tokens into [`Object`] values. Nesting is
//! bounded so hostile documents cannot exhaust the stack.

use crate::error::{Error, Result};
use crate::lexer::{Token, hex_value, token};
use crate::object::{Object, ObjectRef, PdfDict};
use nom::IResult;
use std::collections::HashMap;

/// Maximum array/dictionary nesting depth.
pub const MAX_NESTING: u32 = 64;

fn fail(input: &[u8], kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Decode escape sequences in a literal string body.
///
/// ```
/// # use ltv_oxide::parser::decode_literal_string_escapes;
/// assert_eq!(decode_literal_string_escapes(b"a\\(b\\)\\101"), b"a(b)A");
/// ```
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        let escaped = raw[i + 1];
        i += 2;
        match escaped {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'\n' => {},
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut code = u32::from(escaped - b'0');
                let mut digits = 1;
                while digits < 3 {
                    match raw.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            code = code * 8 + u32::from(d - b'0');
                            i += 1;
                            digits += 1;
                        },
                        _ => break,
                    }
                }
                out.push((code & 0xFF) as u8);
            },
            other => out.push(other),
        }
    }
    out
}

/// Decode a hex string body. Whitespace is ignored, an odd trailing digit is padded with 0.
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut nibbles = Vec::with_capacity(hex_bytes.len());
    for &c in hex_bytes {
        if c.is_ascii_whitespace() || c == 0 {
            continue;
        }
        let nibble = hex_value(c).ok_or_else(|| Error::ParseError {
            offset: 0,
            reason: format!("invalid hex digit {:?}", c as char),
        })?;
        nibbles.push(nibble);
    }
    if nibbles.len() % 2 == 1 {
        nibbles.push(0);
    }
    Ok(nibbles.chunks(2).map(|pair| pair[0] << 4 | pair[1]).collect())
}

/// Parse a PDF object.
///
/// ```
/// use ltv_oxide::parser::parse_object;
///
/// let (_, obj) = parse_object(b"<< /Type /Sig /ByteRange [0 10 20 30] >>").unwrap();
/// assert_eq!(obj.dict_type(), Some("Sig"));
/// ```
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    parse_nested(input, 0)
}

fn parse_nested(input: &[u8], depth: u32) -> IResult<&[u8], Object> {
    if depth > MAX_NESTING {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TooLarge,
        )));
    }
    let (rest, tok) = token(input)?;
    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Boolean(true))),
        Token::False => Ok((rest, Object::Boolean(false))),
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::Name(name) => Ok((rest, Object::Name(name))),
        Token::LiteralString(raw) => Ok((rest, Object::String(decode_literal_string_escapes(raw)))),
        Token::HexString(raw) => match decode_hex(raw) {
            Ok(bytes) => Ok((rest, Object::String(bytes))),
            Err(_) => Err(fail(input, nom::error::ErrorKind::HexDigit)),
        },
        Token::Integer(id) => {
            if let Ok((after_gen, Token::Integer(gen))) = token(rest) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if id >= 0 && (0..=i64::from(u16::MAX)).contains(&gen) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(id as u32, gen as u16))));
                    }
                }
            }
            Ok((rest, Object::Integer(id)))
        },
        Token::ArrayStart => parse_array(rest, depth),
        Token::DictStart => {
            let (rest, dict) = parse_dictionary(rest, depth)?;
            match token(rest) {
                Ok((stream_input, Token::StreamStart)) => {
                    let (rest, data) = parse_stream_data(stream_input, &dict)?;
                    Ok((rest, Object::Stream {
                        dict,
                        data: bytes::Bytes::copy_from_slice(data),
                    }))
                },
                _ => Ok((rest, Object::Dictionary(dict))),
            }
        },
        _ => Err(fail(input, nom::error::ErrorKind::Tag)),
    }
}

fn parse_array(mut input: &[u8], depth: u32) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    loop {
        if let Ok((rest, Token::ArrayEnd)) = token(input) {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, item) = parse_nested(input, depth + 1)?;
        items.push(item);
        input = rest;
    }
}

fn parse_dictionary(mut input: &[u8], depth: u32) -> IResult<&[u8], PdfDict> {
    let mut dict = HashMap::new();
    loop {
        let (rest, tok) = token(input)?;
        match tok {
            Token::DictEnd => return Ok((rest, dict)),
            Token::Name(key) => {
                let (rest, value) = parse_nested(rest, depth + 1)?;
                dict.insert(key, value);
                input = rest;
            },
            _ => return Err(fail(input, nom::error::ErrorKind::Tag)),
        }
    }
}

/// Stream body after the `stream` keyword.
///
/// A direct `/Length` is trusted when `endstream` follows it; otherwise the
/// body runs to the next `endstream` keyword.
fn parse_stream_data<'a>(input: &'a [u8], dict: &PdfDict) -> IResult<&'a [u8], &'a [u8]> {
    let body = if input.starts_with(b"\r\n") {
        &input[2..]
    } else if input.starts_with(b"\n") || input.starts_with(b"\r") {
        &input[1..]
    } else {
        input
    };

    if let Some(length) = dict.get("Length").and_then(Object::as_integer) {
        if length >= 0 && (length as usize) <= body.len() {
            let (data, after) = body.split_at(length as usize);
            if let Ok((rest, Token::StreamEnd)) = token(after) {
                return Ok((rest, data));
            }
        }
        log::debug!("Stream /Length {} does not reach endstream, scanning", length);
    }

    let pos = find_keyword(body, b"endstream").ok_or_else(|| fail(body, nom::error::ErrorKind::Eof))?;
    let mut data = &body[..pos];
    if data.ends_with(b"\r\n") {
        data = &data[..data.len() - 2];
    } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
        data = &data[..data.len() - 1];
    }
    Ok((&body[pos + b"endstream".len()..], data))
}

/// First position of `keyword` in `input`.
pub fn find_keyword(input: &[u8], keyword: &[u8]) -> Option<usize> {
    input.windows(keyword.len()).position(|window| window == keyword)
}

/// Parse `N G obj <object> endobj`.
///
/// A missing `endobj` is tolerated; the object ends where parsing stopped.
pub fn parse_indirect_object(input: &[u8]) -> IResult<&[u8], (ObjectRef, Object)> {
    let (rest, id) = match token(input)? {
        (rest, Token::Integer(id)) if id >= 0 => (rest, id as u32),
        _ => return Err(fail(input, nom::error::ErrorKind::Digit)),
    };
    let (rest, gen) = match token(rest)? {
        (rest, Token::Integer(gen)) if (0..=i64::from(u16::MAX)).contains(&gen) => (rest, gen as u16),
        _ => return Err(fail(input, nom::error::ErrorKind::Digit)),
    };
    let (rest, _) = match token(rest)? {
        (rest, Token::ObjStart) => (rest, ()),
        _ => return Err(fail(input, nom::error::ErrorKind::Tag)),
    };
    let (rest, object) = parse_object(rest)?;
    let rest = match token(rest) {
        Ok((after, Token::ObjEnd)) => after,
        _ => {
            log::debug!("Object {} {} has no endobj", id, gen);
            rest
        },
    };
    Ok((rest, (ObjectRef::new(id, gen), object)))
}
