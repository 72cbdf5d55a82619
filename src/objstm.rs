//! Object stream parsing (PDF 1.5+).
//!
//! A `/Type /ObjStm` stream starts with `/N` pairs of `object-number offset`
//! integers, followed at `/First` by the serialized objects. Incremental
//! updates written by signing tools frequently carry their new objects here.

use crate::error::{Error, Result};
use crate::lexer::{Token, token};
use crate::object::Object;
use crate::parser::parse_object;

/// Extract `(object number, object)` pairs from an object stream.
pub fn parse_object_stream(stream_obj: &Object) -> Result<Vec<(u32, Object)>> {
    let dict = match stream_obj {
        Object::Stream { dict, .. } => dict,
        other => {
            return Err(Error::InvalidObjectType {
                expected: "Stream".to_string(),
                found: other.type_name().to_string(),
            })
        },
    };
    if let Some(type_name) = stream_obj.dict_type() {
        if type_name != "ObjStm" {
            return Err(Error::InvalidPdf(format!("expected /Type /ObjStm, got /{}", type_name)));
        }
    }

    let count = dict
        .get("N")
        .and_then(Object::as_integer)
        .filter(|n| *n >= 0)
        .ok_or_else(|| Error::InvalidPdf("object stream missing /N".to_string()))? as usize;
    let first = dict
        .get("First")
        .and_then(Object::as_integer)
        .filter(|n| *n >= 0)
        .ok_or_else(|| Error::InvalidPdf("object stream missing /First".to_string()))? as usize;

    let data = stream_obj.decode_stream_data()?;
    if first > data.len() {
        return Err(Error::ParseError {
            offset: first,
            reason: format!("/First beyond decoded length {}", data.len()),
        });
    }

    let pairs = parse_offset_table(&data[..first], count)?;
    let body = &data[first..];
    let mut objects = Vec::with_capacity(pairs.len());
    for (obj_num, offset) in pairs {
        if offset >= body.len() {
            log::warn!("Object {} offset {} outside object stream", obj_num, offset);
            continue;
        }
        match parse_object(&body[offset..]) {
            Ok((_, obj)) => objects.push((obj_num, obj)),
            Err(e) => log::warn!("Failed to parse object {} in object stream: {:?}", obj_num, e),
        }
    }
    Ok(objects)
}

fn parse_offset_table(mut data: &[u8], count: usize) -> Result<Vec<(u32, usize)>> {
    let mut pairs = Vec::with_capacity(count.min(4096));
    for i in 0..count {
        let mut next_int = || -> Result<i64> {
            match token(data) {
                Ok((rest, Token::Integer(n))) if n >= 0 => {
                    data = rest;
                    Ok(n)
                },
                _ => Err(Error::ParseError {
                    offset: 0,
                    reason: format!("bad object stream offset table at pair {}", i),
                }),
            }
        };
        let obj_num = next_int()?;
        let offset = next_int()?;
        pairs.push((obj_num as u32, offset as usize));
    }
    Ok(pairs)
}
