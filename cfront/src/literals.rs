//! Literal decoding: radix-aware integers, escaped characters and float
//! literal normalization.

use std::num::ParseIntError;

use num::Num;
use pest::iterators::Pair;

use crate::parser::Rule;
use crate::{new_parser_error, Result};

fn parse_radix<T>(pair: &Pair<Rule>, base: u32) -> Result<T>
where
    T: Num<FromStrRadixErr = ParseIntError>,
{
    T::from_str_radix(pair.as_str(), base)
        .map_err(|err| new_parser_error(pair.as_span(), format!("Parsing integer failed: {}", err)))
}

/// Decodes an `int_lit`: decimal as `i32`, hexadecimal as `u32` reinterpreted
/// into `i32` so `0xFFFFFFFF` means -1.
pub fn parse_int(pair: Pair<Rule>) -> Result<i32> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::hex_int => {
            let digits = inner.into_inner().next().unwrap();
            Ok(parse_radix::<u32>(&digits, 16)? as i32)
        }
        Rule::dec_int => parse_radix::<i32>(&inner, 10),
        _ => unreachable!(),
    }
}

/// Decodes a `char_lit` into its integer value, handling the usual escapes.
pub fn parse_char(pair: Pair<Rule>) -> Result<i32> {
    let inner = pair.into_inner().next().unwrap();
    let span = inner.as_span();
    let text = inner.as_str();
    let mut chars = text.chars();
    let first = chars.next().unwrap();
    if first != '\\' {
        return Ok(first as i32);
    }
    let escape = chars.next().unwrap();
    let value = match escape {
        'n' => b'\n',
        't' => b'\t',
        'r' => b'\r',
        '0' => 0,
        '\\' => b'\\',
        '\'' => b'\'',
        '"' => b'"',
        other => {
            return Err(new_parser_error(
                span,
                format!("unknown escape sequence '\\{}'", other),
            ))
        }
    };
    Ok(i32::from(value))
}

/// Normalizes a `float_lit` to the text stored in the symbol table: the
/// optional `f` suffix is dropped, the digits are kept verbatim.
pub fn parse_float_text(pair: &Pair<Rule>) -> String {
    pair.as_str()
        .trim_end_matches(|c| c == 'f' || c == 'F')
        .to_string()
}
