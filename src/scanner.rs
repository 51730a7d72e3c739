//! Scans an input string (source file) character by character.

use std::path::Path;

#[derive(Debug)]
pub struct ParseError {
    msg: String,
    ofs: usize,
}
pub type ParseResult<T> = Result<T, ParseError>;

/// A cursor over the bytes of a build file.  The buffer must end with a nul
/// byte, which serves as the end-of-file marker so peek() never runs off
/// the end.
pub struct Scanner<'a> {
    buf: &'a [u8],
    pub ofs: usize,
    pub line: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        assert!(buf.ends_with(b"\0"), "Scanner requires nul-terminated buf");
        Scanner {
            buf,
            ofs: 0,
            line: 1,
        }
    }

    /// The text between two offsets.  Callers only slice at ASCII
    /// delimiters, so the result is valid UTF-8 whenever the input is.
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        std::str::from_utf8(&self.buf[start..end]).unwrap_or("")
    }

    pub fn peek(&self) -> char {
        self.buf[self.ofs] as char
    }

    pub fn next(&mut self) {
        if self.peek() == '\n' {
            self.line += 1;
        }
        if self.ofs + 1 < self.buf.len() {
            self.ofs += 1;
        }
    }

    pub fn back(&mut self) {
        if self.ofs == 0 {
            return;
        }
        self.ofs -= 1;
        if self.peek() == '\n' {
            self.line -= 1;
        }
    }

    pub fn read(&mut self) -> char {
        let c = self.peek();
        self.next();
        c
    }

    pub fn skip(&mut self, ch: char) -> bool {
        if self.peek() == ch {
            self.next();
            return true;
        }
        false
    }

    pub fn skip_spaces(&mut self) {
        while self.skip(' ') || self.skip('\t') {}
    }

    /// Skip a "\n" or "\r\n" line ending, if present.
    pub fn skip_newline(&mut self) -> bool {
        if self.peek() == '\r' && self.buf.get(self.ofs + 1) == Some(&b'\n') {
            self.next();
        }
        self.skip('\n')
    }

    pub fn expect(&mut self, ch: char) -> ParseResult<()> {
        let r = self.read();
        if r != ch {
            self.back();
            return self.parse_error(format!("expected {:?}, got {:?}", ch, r));
        }
        Ok(())
    }

    pub fn parse_error<T, S: Into<String>>(&self, msg: S) -> ParseResult<T> {
        Err(ParseError {
            msg: msg.into(),
            ofs: self.ofs,
        })
    }

    /// Render an error as "parse error: msg", the offending line and a caret
    /// under the column.
    pub fn format_parse_error(&self, filename: &Path, err: ParseError) -> String {
        let text = &self.buf[..self.buf.len() - 1];
        let line_start = text[..err.ofs.min(text.len())]
            .iter()
            .rposition(|&c| c == b'\n')
            .map_or(0, |i| i + 1);
        let line_end = text[line_start..]
            .iter()
            .position(|&c| c == b'\n')
            .map_or(text.len(), |i| line_start + i);
        let line_number = text[..line_start].iter().filter(|&&c| c == b'\n').count() + 1;

        let mut context = String::from_utf8_lossy(&text[line_start..line_end]).into_owned();
        let mut col = err.ofs.saturating_sub(line_start);
        let mut msg = format!("parse error: {}\n", err.msg);
        let prefix = format!("{}:{}: ", filename.display(), line_number);
        msg.push_str(&prefix);
        if col > 40 && context.is_char_boundary(col - 20) {
            // Trim beginning of line to fit it on screen.
            msg.push_str("...");
            context = context[col - 20..].to_string();
            col = 3 + 20;
        }
        if context.len() > 60 && context.is_char_boundary(60) {
            context.truncate(60);
            context.push_str("...");
        }
        msg.push_str(&context);
        msg.push('\n');
        msg.push_str(&" ".repeat(prefix.len() + col));
        msg.push_str("^\n");
        msg
    }
}
