//! Parser for build.psi files.
//!
//! A file is a sequence of statements:
//!
//! ```text
//! # comment
//! interpreter = python3
//! script scripts/clean.py
//!   in = data/raw.csv
//!   out = data/clean.csv
//! default data/clean.csv
//! ```
//!
//! Top-level bindings are expanded as they are read.  A declaration is a
//! command kind followed by its subject on the same line, then indented
//! `key = value` lines.  What the keys mean is up to the registry.
//!
//! To avoid allocations parsing frequently uses references into the input
//! text, marked with the lifetime `'text`.

use crate::eval::{EvalPart, EvalString, Vars};
use crate::scanner::{ParseError, ParseResult, Scanner};
use crate::smallmap::SmallMap;
use std::path::Path;

/// One declared command, not yet interpreted.
#[derive(Debug)]
pub struct Decl<'text> {
    pub kind: &'text str,
    /// Rest of the declaration line, expanded; may be empty.
    pub subject: String,
    /// Line number of the declaration, for error messages.
    pub line: usize,
    pub vars: SmallMap<&'text str, String>,
}

#[derive(Debug)]
pub enum Statement<'text> {
    Decl(Decl<'text>),
    Default(Vec<String>),
}

pub struct Parser<'text> {
    scanner: Scanner<'text>,
    pub vars: Vars<'text>,
}

fn is_ident_char(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.')
}

/// Like is_ident_char, but without '.', so "$stem.csv" refers to "stem".
fn is_varname_char(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-')
}

impl<'text> Parser<'text> {
    /// The buffer must be nul-terminated.
    pub fn new(buf: &'text [u8]) -> Parser<'text> {
        Parser {
            scanner: Scanner::new(buf),
            vars: Vars::new(),
        }
    }

    pub fn format_parse_error(&self, filename: &Path, err: ParseError) -> String {
        self.scanner.format_parse_error(filename, err)
    }

    pub fn read(&mut self) -> ParseResult<Option<Statement<'text>>> {
        loop {
            match self.scanner.peek() {
                '\0' => return Ok(None),
                '\n' | '\r' => {
                    if !self.scanner.skip_newline() {
                        return self.scanner.parse_error("stray carriage return");
                    }
                }
                '#' => self.skip_comment(),
                ' ' | '\t' => {
                    // Blank lines may carry whitespace; anything else indented
                    // must belong to a declaration.
                    self.scanner.skip_spaces();
                    match self.scanner.peek() {
                        '\0' | '\n' | '\r' | '#' => {}
                        _ => return self.scanner.parse_error("unexpected indent"),
                    }
                }
                _ => {
                    let line = self.scanner.line;
                    let ident = self.read_ident()?;
                    self.scanner.skip_spaces();
                    if self.scanner.peek() == '=' {
                        let val = self.read_vardef()?;
                        self.vars.insert(ident, val);
                        continue;
                    }
                    if ident == "default" {
                        return Ok(Some(Statement::Default(self.read_default()?)));
                    }
                    return Ok(Some(Statement::Decl(self.read_decl(ident, line)?)));
                }
            }
        }
    }

    /// Read "= value" through the end of the line, expanded.
    fn read_vardef(&mut self) -> ParseResult<String> {
        self.scanner.expect('=')?;
        self.scanner.skip_spaces();
        let eval = self.read_eval()?;
        Ok(self.expand(&eval))
    }

    fn expand(&self, eval: &EvalString<&str>) -> String {
        eval.evaluate(&[&self.vars]).trim_end().to_owned()
    }

    fn read_decl(&mut self, kind: &'text str, line: usize) -> ParseResult<Decl<'text>> {
        let subject = self.read_eval()?;
        let subject = self.expand(&subject);
        let mut vars = SmallMap::new();
        while matches!(self.scanner.peek(), ' ' | '\t') {
            self.scanner.skip_spaces();
            match self.scanner.peek() {
                '#' => {
                    self.skip_comment();
                    continue;
                }
                // A blank line ends the block.
                '\n' | '\r' | '\0' => break,
                _ => {}
            }
            let name = self.read_ident()?;
            if vars.contains_key(name) {
                return self
                    .scanner
                    .parse_error(format!("duplicate key {:?}", name));
            }
            self.scanner.skip_spaces();
            let val = self.read_vardef()?;
            vars.insert(name, val);
        }
        Ok(Decl {
            kind,
            subject,
            line,
            vars,
        })
    }

    fn read_default(&mut self) -> ParseResult<Vec<String>> {
        let eval = self.read_eval()?;
        let defaults: Vec<String> = self
            .expand(&eval)
            .split_whitespace()
            .map(str::to_owned)
            .collect();
        if defaults.is_empty() {
            self.scanner.back();
            return self.scanner.parse_error("expected path");
        }
        Ok(defaults)
    }

    fn skip_comment(&mut self) {
        loop {
            match self.scanner.read() {
                '\0' => {
                    self.scanner.back();
                    return;
                }
                '\n' => return,
                _ => {}
            }
        }
    }

    fn read_ident(&mut self) -> ParseResult<&'text str> {
        let start = self.scanner.ofs;
        while is_ident_char(self.scanner.peek()) {
            self.scanner.next();
        }
        let end = self.scanner.ofs;
        if end == start {
            return self.scanner.parse_error("failed to scan ident");
        }
        Ok(self.scanner.slice(start, end))
    }

    /// Read the rest of the line, up to and including its newline.
    fn read_eval(&mut self) -> ParseResult<EvalString<&'text str>> {
        let mut parts = Vec::new();
        let mut ofs = self.scanner.ofs;
        let end = loop {
            match self.scanner.peek() {
                '\0' => break self.scanner.ofs,
                '\n' => {
                    let end = self.scanner.ofs;
                    self.scanner.next();
                    break end;
                }
                '$' => {
                    let end = self.scanner.ofs;
                    if end > ofs {
                        parts.push(EvalPart::Literal(self.scanner.slice(ofs, end)));
                    }
                    self.scanner.next();
                    if let Some(part) = self.read_escape()? {
                        parts.push(part);
                    }
                    ofs = self.scanner.ofs;
                }
                _ => self.scanner.next(),
            }
        };
        if end > ofs {
            parts.push(EvalPart::Literal(self.scanner.slice(ofs, end)));
        }
        Ok(EvalString::new(parts))
    }

    /// Read what follows a '$'.  Returns None for a line continuation.
    fn read_escape(&mut self) -> ParseResult<Option<EvalPart<&'text str>>> {
        Ok(Some(match self.scanner.peek() {
            '\n' | '\r' => {
                self.scanner.skip_newline();
                self.scanner.skip_spaces();
                return Ok(None);
            }
            ' ' | '$' => {
                let start = self.scanner.ofs;
                self.scanner.next();
                EvalPart::Literal(self.scanner.slice(start, start + 1))
            }
            '{' => {
                self.scanner.next();
                let start = self.scanner.ofs;
                loop {
                    match self.scanner.peek() {
                        '\0' | '\n' => return self.scanner.parse_error("unterminated ${"),
                        '}' => break,
                        _ => self.scanner.next(),
                    }
                }
                let end = self.scanner.ofs;
                self.scanner.next();
                EvalPart::VarRef(self.scanner.slice(start, end).trim())
            }
            c if is_varname_char(c) => {
                let start = self.scanner.ofs;
                while is_varname_char(self.scanner.peek()) {
                    self.scanner.next();
                }
                EvalPart::VarRef(self.scanner.slice(start, self.scanner.ofs))
            }
            _ => {
                return self
                    .scanner
                    .parse_error("bad $-escape (literal $ must be written as $$)")
            }
        }))
    }
}
