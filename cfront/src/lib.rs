//! Front half of the C subset compiler: pest grammar and parser, syntax
//! tree, semantic analysis and IR construction, glued into [`compile`].
//!
//! The main error type is a type alias of `pest::error::Error`, so parse
//! and semantic diagnostics share one shape and carry line/column
//! information for free.

pub mod ast;
pub mod irgen;
mod literals;
mod parser;
pub mod sema;

use pest::iterators::Pair;
use pest::{Parser, Span};
use rcc::target::{emit_program, Target};

pub use crate::parser::{CParser, Rule};

pub type Error = pest::error::Error<Rule>;

pub type Result<T> = std::result::Result<T, Error>;

pub fn new_parser_error(span: Span, message: String) -> Error {
    Error::new_from_span(pest::error::ErrorVariant::CustomError { message }, span)
}

pub fn parse(input: &str) -> Result<Pair<Rule>> {
    Ok(CParser::parse(Rule::program, input)?.next().unwrap())
}

/// Runs the whole pipeline: parse, validate, build the IR and emit the
/// assembly listing for `target`. Returns the listing together with the
/// warnings the analyzer accumulated.
pub fn compile(input: &str, target: Target) -> Result<(String, Vec<String>)> {
    let pair = parse(input)?;
    let program = ast::build_program(pair)?;
    let functions = sema::collect_functions(&program)?;
    let warnings = sema::analyze(&program, &functions)?;
    let (ctx, cfgs) = irgen::build(&program, &functions);

    let mut buffer = Vec::new();
    emit_program(&mut buffer, target.isa(), &ctx, &cfgs)
        .expect("writing to an in-memory buffer cannot fail");
    let asm = String::from_utf8(buffer).expect("assembly output is valid UTF-8");
    Ok((asm, warnings))
}

#[cfg(test)]
mod test;
