// SPDX-License-Identifier: GPL-3.0-or-later

/*
 *  src/parser.rs - Settings text parser library for CTB settings files.
 *  Copyright (C) 2026  Forest Crossman <cyrozap@gmail.com>
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

/*!
 * # `parser` Module
 *
 * This module parses the decompressed settings text into a raw tree of
 * [ParseNode]s.
 *
 * The settings language is line-oriented:
 *
 * ```text
 * description="Monochrome
 * apply_factor=FALSE
 * scale_factor=1.0
 * plot_style{
 *  0{
 *   name="Color_1
 *   color=-1
 *   lineweight=0
 *  }
 * }
 * ```
 *
 * Strings run from the opening quote to the end of the line, floats may be
 * followed by free-form text which is ignored, and a block holds either
 * items or nested blocks but never both.
 *
 * Integers must fit in an [i64] and floats must be finite; anything else is
 * a [GrammarError::SyntaxError] rather than a rounded or substituted value.
 * Blocks nest at most [MAX_BLOCK_DEPTH] levels deep.
 *
 * ## Usage Example
 *
 * ```no_run
 * use ctbparser::decoder::DecodedContainer;
 * use ctbparser::parser;
 *
 * fn main() -> Result<(), Box<dyn std::error::Error>> {
 *     let decoded = DecodedContainer::from_filename("acad.ctb")?;
 *     let forest = parser::parse_bytes(decoded.data())?;
 *     for node in &forest {
 *         println!("{:?}", node.key());
 *     }
 *     Ok(())
 * }
 * ```
 */

use std::fmt;

use log::{debug, trace};
use serde::Serialize;
use thiserror::Error;

/// How many levels deep blocks may nest.
pub const MAX_BLOCK_DEPTH: usize = 64;

/// A scalar setting value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// `TRUE` or `FALSE`.
    Boolean(bool),
    Integer(i64),
    Float(f64),
    /// A quoted string, without the opening quote.
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(true) => f.write_str("TRUE"),
            Value::Boolean(false) => f.write_str("FALSE"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Text(s) => write!(f, "\"{}", s),
        }
    }
}

/// A node of the raw parse tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseNode {
    /// A `key = value` line.
    Item { key: String, value: Value },
    /// A named, brace-delimited block.
    Block { key: String, children: Vec<ParseNode> },
    /// A lone element of a flat `[key, value, key, value, ...]` sequence.
    ///
    /// The grammar never produces this; it exists for trees built by hand
    /// and handed to [crate::normalizer::normalize].
    Bare(Value),
}

impl ParseNode {
    /// The key of an item or block.
    pub fn key(&self) -> Option<&str> {
        match self {
            ParseNode::Item { key, .. } | ParseNode::Block { key, .. } => Some(key),
            ParseNode::Bare(_) => None,
        }
    }
}

/// Errors that can occur while parsing settings text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    /// The payload is not valid UTF-8.
    #[error("Settings text is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The text does not match the grammar.
    ///
    /// `position` is a byte offset; `line` and `column` are 1-based.
    #[error("Syntax error at line {line}, column {column}: expected {expected}")]
    SyntaxError {
        position: usize,
        line: usize,
        column: usize,
        expected: &'static str,
    },
}

/// Decodes a payload as UTF-8 and parses it.
///
/// A single trailing NUL byte is stripped first. A NUL anywhere else is
/// handed to the grammar like any other character.
pub fn parse_bytes(data: &[u8]) -> Result<Vec<ParseNode>, GrammarError> {
    let text = std::str::from_utf8(data)?;
    let text = text.strip_suffix('\0').unwrap_or(text);
    parse(text)
}

/// Parses settings text into a forest of top-level nodes.
///
/// The whole input must match; on failure no nodes are returned and the
/// error points at the furthest position the parser reached.
pub fn parse(text: &str) -> Result<Vec<ParseNode>, GrammarError> {
    let mut parser = Parser {
        text,
        pos: 0,
        depth: 0,
    };
    match parser.document() {
        Ok(forest) => {
            debug!("Parsed {} top-level settings nodes", forest.len());
            trace!("Parse tree: {:#?}", forest);
            Ok(forest)
        }
        Err(failure) => Err(failure.into_error(text)),
    }
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    position: usize,
    expected: &'static str,
}

impl Failure {
    /// Keeps whichever failure got further into the input, preferring `self`
    /// on a tie.
    fn furthest(self, other: Failure) -> Failure {
        if other.position > self.position {
            other
        } else {
            self
        }
    }

    fn into_error(self, text: &str) -> GrammarError {
        let before = &text[..self.position];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        let column = before[line_start..].chars().count() + 1;
        GrammarError::SyntaxError {
            position: self.position,
            line,
            column,
            expected: self.expected,
        }
    }
}

type PResult<T> = Result<T, Failure>;

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    /// Number of blocks currently open.
    depth: usize,
}

impl<'a> Parser<'a> {
    fn bytes(&self) -> &'a [u8] {
        self.text.as_bytes()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.pos).copied()
    }

    fn fail<T>(&self, expected: &'static str) -> PResult<T> {
        Err(Failure {
            position: self.pos,
            expected,
        })
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    fn skip_blanks(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r')) {
            self.pos += 1;
        }
    }

    fn digits_at(&self, start: usize) -> usize {
        self.bytes()[start.min(self.bytes().len())..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    }

    fn sign_at(&self, at: usize) -> usize {
        match self.bytes().get(at) {
            Some(b'+' | b'-') => 1,
            _ => 0,
        }
    }

    fn rest_of_line(&mut self) -> &'a str {
        let text = self.text;
        let start = self.pos;
        let end = text[start..].find('\n').map_or(text.len(), |i| start + i);
        self.pos = end;
        &text[start..end]
    }

    /// Repeats `rule` until it fails, rewinding past the failed attempt.
    fn many<F>(&mut self, mut rule: F) -> (Vec<ParseNode>, Failure)
    where
        F: FnMut(&mut Self) -> PResult<ParseNode>,
    {
        let mut nodes = Vec::new();
        loop {
            let start = self.pos;
            match rule(self) {
                Ok(node) => nodes.push(node),
                Err(failure) => {
                    self.pos = start;
                    return (nodes, failure);
                }
            }
        }
    }

    fn document(&mut self) -> PResult<Vec<ParseNode>> {
        let (nodes, failure) = self.many(Self::statement);
        self.skip_whitespace();
        if self.pos == self.text.len() {
            Ok(nodes)
        } else {
            Err(Failure {
                position: self.pos,
                expected: "end of input",
            }
            .furthest(failure))
        }
    }

    fn statement(&mut self) -> PResult<ParseNode> {
        let start = self.pos;
        self.item().or_else(|item_failure| {
            self.pos = start;
            self.block()
                .map_err(|block_failure| item_failure.furthest(block_failure))
        })
    }

    fn item(&mut self) -> PResult<ParseNode> {
        let key = self.key()?;
        self.literal(b'=', "\"=\"")?;
        let value = self.value()?;
        self.eol()?;
        Ok(ParseNode::Item { key, value })
    }

    fn block(&mut self) -> PResult<ParseNode> {
        let key = self.key()?;
        self.literal(b'{', "\"{\"")?;
        if self.depth >= MAX_BLOCK_DEPTH {
            return self.fail("block nesting within limit");
        }
        self.eol()?;
        self.depth += 1;
        let children = self.block_body();
        self.depth -= 1;
        let children = children?;
        self.literal(b'}', "\"}\"")?;
        self.eol()?;
        Ok(ParseNode::Block { key, children })
    }

    /// A body is all items or all blocks. Items are tried first; whichever
    /// interpretation reaches the closing brace wins.
    fn block_body(&mut self) -> PResult<Vec<ParseNode>> {
        let start = self.pos;

        let (items, item_failure) = self.many(Self::item);
        let items_end = self.pos;
        if self.closes_block() {
            self.pos = items_end;
            return Ok(items);
        }
        let items_close = Failure {
            position: self.pos,
            expected: "\"}\"",
        };

        self.pos = start;
        let (blocks, block_failure) = self.many(Self::block);
        let blocks_end = self.pos;
        if self.closes_block() {
            self.pos = blocks_end;
            return Ok(blocks);
        }
        let blocks_close = Failure {
            position: self.pos,
            expected: "\"}\"",
        };

        Err(items_close
            .furthest(blocks_close)
            .furthest(item_failure)
            .furthest(block_failure))
    }

    fn closes_block(&mut self) -> bool {
        self.skip_whitespace();
        self.peek() == Some(b'}')
    }

    fn key(&mut self) -> PResult<String> {
        self.skip_whitespace();
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        if self.pos == start {
            return self.fail("key");
        }
        Ok(self.text[start..self.pos].to_string())
    }

    fn literal(&mut self, byte: u8, expected: &'static str) -> PResult<()> {
        self.skip_whitespace();
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            self.fail(expected)
        }
    }

    /// Matches a line ending, or the end of the input.
    fn eol(&mut self) -> PResult<()> {
        self.skip_blanks();
        match self.peek() {
            None => Ok(()),
            Some(b'\n') => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => self.fail("end of line"),
        }
    }

    fn value(&mut self) -> PResult<Value> {
        self.skip_whitespace();
        let rest = &self.text[self.pos..];
        if rest.starts_with("TRUE") {
            self.pos += 4;
            return Ok(Value::Boolean(true));
        }
        if rest.starts_with("FALSE") {
            self.pos += 5;
            return Ok(Value::Boolean(false));
        }
        if let Some(value) = self.float()? {
            return Ok(value);
        }
        if let Some(value) = self.integer()? {
            return Ok(value);
        }
        if self.peek() == Some(b'"') {
            self.pos += 1;
            let text = self.rest_of_line();
            let text = text.strip_suffix('\r').unwrap_or(text);
            return Ok(Value::Text(text.to_string()));
        }
        self.fail("value")
    }

    /// Matches a real number with a decimal point or an exponent. Anything
    /// after it on the same line is discarded.
    fn float(&mut self) -> PResult<Option<Value>> {
        let start = self.pos;
        let mut end = start + self.sign_at(start);

        let int_digits = self.digits_at(end);
        end += int_digits;

        let mut has_fraction = false;
        if self.bytes().get(end) == Some(&b'.') {
            let frac_digits = self.digits_at(end + 1);
            if int_digits > 0 || frac_digits > 0 {
                has_fraction = true;
                end += 1 + frac_digits;
            }
        }
        if int_digits == 0 && !has_fraction {
            return Ok(None);
        }

        let mut has_exponent = false;
        if matches!(self.bytes().get(end), Some(b'e' | b'E')) {
            let exp_start = end + 1 + self.sign_at(end + 1);
            let exp_digits = self.digits_at(exp_start);
            if exp_digits > 0 {
                has_exponent = true;
                end = exp_start + exp_digits;
            }
        }
        if !has_fraction && !has_exponent {
            return Ok(None);
        }

        let number = match self.text[start..end].parse::<f64>() {
            Ok(number) if number.is_finite() => number,
            _ => return self.fail("finite real number"),
        };
        self.pos = end;
        let trailer = self.rest_of_line();
        if !trailer.trim().is_empty() {
            trace!("Discarding trailing text after float {}: {:?}", number, trailer);
        }
        Ok(Some(Value::Float(number)))
    }

    fn integer(&mut self) -> PResult<Option<Value>> {
        let start = self.pos;
        let digits_start = start + self.sign_at(start);
        let digits = self.digits_at(digits_start);
        if digits == 0 {
            return Ok(None);
        }

        let end = digits_start + digits;
        match self.text[start..end].parse::<i64>() {
            Ok(number) => {
                self.pos = end;
                Ok(Some(Value::Integer(number)))
            }
            Err(_) => self.fail("integer within the 64-bit range"),
        }
    }
}
