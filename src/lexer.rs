//! PDF lexer (tokenizer).
//!
//! Splits PDF bytes into numbers, strings, names, keywords and delimiters.
//! Whitespace (space, \t, \r, \n, \0, \f) and comments (% to EOL) are skipped.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_till, take_while},
    character::complete::{char, digit1, one_of},
    combinator::{map, opt, recognize, value},
    sequence::{delimited, pair, preceded},
};

/// Token types recognized by the PDF lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (42, -123)
    Integer(i64),
    /// Real number (3.14, -.5)
    Real(f64),
    /// Literal string content, escapes not yet decoded
    LiteralString(&'a [u8]),
    /// Hex string content, whitespace preserved
    HexString(&'a [u8]),
    /// Name with `#XX` escapes decoded
    Name(String),
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `[`
    ArrayStart,
    /// `]`
    ArrayEnd,
    /// `<<`
    DictStart,
    /// `>>`
    DictEnd,
    /// `obj`
    ObjStart,
    /// `endobj`
    ObjEnd,
    /// `stream`
    StreamStart,
    /// `endstream`
    StreamEnd,
    /// `R` of an indirect reference
    R,
}

fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

fn is_delimiter(c: u8) -> bool {
    matches!(c, b'/' | b'%' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}')
}

fn comment(input: &[u8]) -> IResult<&[u8], ()> {
    value((), preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n')))(input)
}

/// Skip whitespace and comments.
pub fn skip_ws(mut input: &[u8]) -> &[u8] {
    loop {
        let start = input.iter().position(|&c| !is_whitespace(c)).unwrap_or(input.len());
        input = &input[start..];
        match comment(input) {
            Ok((rest, _)) => input = rest,
            Err(_) => return input,
        }
    }
}

fn number_error(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
}

fn parse_number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, text) = recognize(pair(
        opt(one_of("+-")),
        alt((
            recognize(pair(digit1, opt(pair(char('.'), opt(digit1))))),
            recognize(pair(char('.'), digit1)),
        )),
    ))(input)?;
    let text = std::str::from_utf8(text).map_err(|_| number_error(input))?;
    if text.contains('.') {
        let normalized = if text.ends_with('.') {
            format!("{}0", text)
        } else {
            text.to_string()
        };
        let real = normalized.parse::<f64>().map_err(|_| number_error(input))?;
        Ok((rest, Token::Real(real)))
    } else {
        let int = text.parse::<i64>().map_err(|_| number_error(input))?;
        Ok((rest, Token::Integer(int)))
    }
}

fn parse_literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (body, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut pos = 0usize;
    while pos < body.len() {
        match body[pos] {
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&body[pos + 1..], Token::LiteralString(&body[..pos])));
                }
                pos += 1;
            },
            _ => pos += 1,
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)))
}

fn parse_hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }
    delimited(
        char('<'),
        map(
            take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c)),
            Token::HexString,
        ),
        char('>'),
    )(input)
}

/// Decode `#XX` escape sequences in a PDF name.
///
/// ```
/// # use ltv_oxide::lexer::decode_name_escapes;
/// assert_eq!(decode_name_escapes("Adobe#2EPPKLite"), "Adobe.PPKLite");
/// assert_eq!(decode_name_escapes("A#"), "A#");
/// ```
pub fn decode_name_escapes(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'#' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

/// Value of a single hex digit.
pub fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn parse_name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(take_while(|c: u8| !is_whitespace(c) && !is_delimiter(c)), |raw| {
            Token::Name(decode_name_escapes(&String::from_utf8_lossy(raw)))
        }),
    )(input)
}

fn parse_keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, tok) = alt((
        value(Token::False, tag(b"false")),
        value(Token::True, tag(b"true")),
        value(Token::Null, tag(b"null")),
        value(Token::ObjStart, tag(b"obj")),
        value(Token::ObjEnd, tag(b"endobj")),
        value(Token::StreamEnd, tag(b"endstream")),
        value(Token::StreamStart, tag(b"stream")),
        value(Token::R, tag(b"R")),
    ))(input)?;
    // Keywords must not run into a longer regular word ("Rx", "objects").
    match rest.first() {
        Some(&c) if !is_whitespace(c) && !is_delimiter(c) => {
            Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)))
        },
        _ => Ok((rest, tok)),
    }
}

fn parse_delimiter(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    alt((
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
    ))(input)
}

/// Parse a single PDF token after skipping whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let input = skip_ws(input);
    alt((
        parse_delimiter,
        parse_keyword,
        parse_name,
        parse_number,
        parse_literal_string,
        parse_hex_string,
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_and_reals() {
        assert_eq!(token(b"42 ").unwrap().1, Token::Integer(42));
        assert_eq!(token(b"-17").unwrap().1, Token::Integer(-17));
        assert_eq!(token(b"+3").unwrap().1, Token::Integer(3));
        assert_eq!(token(b".5").unwrap().1, Token::Real(0.5));
        assert_eq!(token(b"-2.25").unwrap().1, Token::Real(-2.25));
        assert_eq!(token(b"4.").unwrap().1, Token::Real(4.0));
    }

    #[test]
    fn test_strings() {
        assert_eq!(token(b"(Hello (nested) \\) x)").unwrap().1, Token::LiteralString(b"Hello (nested) \\) x"));
        assert_eq!(token(b"<48 65>").unwrap().1, Token::HexString(b"48 65"));
        assert!(token(b"(unterminated").is_err());
    }

    #[test]
    fn test_names() {
        assert_eq!(token(b"/ByteRange[").unwrap().1, Token::Name("ByteRange".to_string()));
        assert_eq!(token(b"/A#20B").unwrap().1, Token::Name("A B".to_string()));
    }

    #[test]
    fn test_keywords_and_delimiters() {
        assert_eq!(token(b"<<").unwrap().1, Token::DictStart);
        assert_eq!(token(b">>").unwrap().1, Token::DictEnd);
        assert_eq!(token(b"endobj").unwrap().1, Token::ObjEnd);
        assert_eq!(token(b"endstream\n").unwrap().1, Token::StreamEnd);
        assert_eq!(token(b"stream\r\n").unwrap().1, Token::StreamStart);
        assert_eq!(token(b"R]").unwrap().1, Token::R);
        assert_eq!(token(b"true").unwrap().1, Token::True);
    }

    #[test]
    fn test_keyword_boundary() {
        assert!(token(b"Rx").is_err());
        assert!(token(b"objects").is_err());
    }

    #[test]
    fn test_comments_are_skipped() {
        let (rest, tok) = token(b"% comment\n  % another\r\n 7 0 R").unwrap();
        assert_eq!(tok, Token::Integer(7));
        assert_eq!(token(rest).unwrap().1, Token::Integer(0));
    }

    #[test]
    fn test_decode_name_escapes() {
        assert_eq!(decode_name_escapes("Type"), "Type");
        assert_eq!(decode_name_escapes("A#2"), "A#2");
        assert_eq!(decode_name_escapes("#41#42"), "AB");
    }
}
