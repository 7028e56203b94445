//! Structural scanner for generated JavaScript.
//!
//! Not a parser: it walks strings, template literals, comments and regular
//! expression literals well enough to
//! - blank out comments (so pattern matching never sees commented code)
//! - report unterminated literals and unbalanced brackets with a position
//!
//! Anything it accepts may still fail to parse in the sandbox; anything it
//! rejects would certainly fail there.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    /// String, template, comment or regex literal without its end.
    Unterminated,

    /// Closing bracket that does not match the innermost opener.
    Unexpected,

    /// Brackets still open at end of input; `closers` closes them in order.
    Unclosed { closers: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    pub kind: IssueKind,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {}, column {})", self.message, self.line, self.column)
    }
}

impl std::error::Error for SyntaxIssue {}

/// Result of one scan.
#[derive(Debug, Clone)]
pub struct Scan {
    /// Source with every comment replaced by spaces (newlines kept).
    pub stripped: String,
    pub issue: Option<SyntaxIssue>,
}

pub fn check_structure(source: &str) -> Result<(), SyntaxIssue> {
    match scan(source).issue {
        Some(issue) => Err(issue),
        None => Ok(()),
    }
}

pub fn strip_comments(source: &str) -> String {
    scan(source).stripped
}

pub fn scan(source: &str) -> Scan {
    let mut scanner = Scanner::new(source);
    let issue = scanner.run().err();
    Scan {
        stripped: scanner.out,
        issue,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opener {
    Paren,
    Bracket,
    Brace,
    TemplateExpr,
}

impl Opener {
    fn open_char(self) -> char {
        match self {
            Opener::Paren => '(',
            Opener::Bracket => '[',
            Opener::Brace => '{',
            Opener::TemplateExpr => '{',
        }
    }

    fn close_char(self) -> char {
        match self {
            Opener::Paren => ')',
            Opener::Bracket => ']',
            Opener::Brace | Opener::TemplateExpr => '}',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LastToken {
    None,
    Punct(char),
    Word(String),
    Literal,
}

const REGEX_PRECEDING_WORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void", "throw",
    "yield", "await", "instanceof",
];

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    stack: Vec<(Opener, usize, usize)>,
    last: LastToken,
    out: String,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            stack: Vec::new(),
            last: LastToken::None,
            out: String::with_capacity(source.len()),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Consume one char, copying it to the output.
    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        self.out.push(c);
        self.advance_position(c);
        Some(c)
    }

    /// Consume one char, writing a blank in its place (newlines survive).
    fn blank(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        self.out.push(if c == '\n' { '\n' } else { ' ' });
        self.advance_position(c);
        Some(c)
    }

    fn advance_position(&mut self, c: char) {
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }

    fn issue(&self, kind: IssueKind, line: usize, column: usize, message: impl Into<String>) -> SyntaxIssue {
        SyntaxIssue {
            kind,
            line,
            column,
            message: message.into(),
        }
    }

    fn regex_allowed(&self) -> bool {
        match &self.last {
            LastToken::None => true,
            LastToken::Punct(c) => !matches!(c, ')' | ']'),
            LastToken::Word(w) => REGEX_PRECEDING_WORDS.contains(&w.as_str()),
            LastToken::Literal => false,
        }
    }

    fn run(&mut self) -> Result<(), SyntaxIssue> {
        while let Some(c) = self.peek(0) {
            match c {
                '/' if self.peek(1) == Some('/') => self.line_comment(),
                '/' if self.peek(1) == Some('*') => self.block_comment()?,
                '/' if self.regex_allowed() => self.regex_literal()?,
                '\'' | '"' => self.string_literal(c)?,
                '`' => self.template_literal()?,
                '(' | '[' | '{' => {
                    let opener = match c {
                        '(' => Opener::Paren,
                        '[' => Opener::Bracket,
                        _ => Opener::Brace,
                    };
                    self.stack.push((opener, self.line, self.column));
                    self.bump();
                    self.last = LastToken::Punct(c);
                }
                ')' | ']' | '}' => self.close(c)?,
                c if c.is_whitespace() => {
                    self.bump();
                }
                c if c.is_alphanumeric() || c == '_' || c == '$' => self.word(),
                _ => {
                    self.bump();
                    self.last = LastToken::Punct(c);
                }
            }
        }

        if let Some(&(opener, line, column)) = self.stack.last() {
            let closers: String = self.stack.iter().rev().map(|(o, _, _)| o.close_char()).collect();
            let message = if opener == Opener::TemplateExpr {
                "unterminated template literal expression".to_string()
            } else {
                format!("unclosed '{}'", opener.open_char())
            };
            return Err(self.issue(IssueKind::Unclosed { closers }, line, column, message));
        }
        Ok(())
    }

    fn word(&mut self) {
        let mut w = String::new();
        while let Some(c) = self.peek(0) {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                w.push(c);
                self.bump();
            } else {
                break;
            }
        }
        self.last = if w.starts_with(|c: char| c.is_ascii_digit()) {
            LastToken::Literal
        } else {
            LastToken::Word(w)
        };
    }

    fn line_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.blank();
        }
    }

    fn block_comment(&mut self) -> Result<(), SyntaxIssue> {
        let (line, column) = (self.line, self.column);
        self.blank();
        self.blank();
        loop {
            match self.peek(0) {
                None => {
                    return Err(self.issue(IssueKind::Unterminated, line, column, "unterminated block comment"));
                }
                Some('*') if self.peek(1) == Some('/') => {
                    self.blank();
                    self.blank();
                    return Ok(());
                }
                Some(_) => {
                    self.blank();
                }
            }
        }
    }

    fn string_literal(&mut self, quote: char) -> Result<(), SyntaxIssue> {
        let (line, column) = (self.line, self.column);
        self.bump();
        loop {
            match self.peek(0) {
                None | Some('\n') => {
                    return Err(self.issue(IssueKind::Unterminated, line, column, "unterminated string literal"));
                }
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some(c) if c == quote => {
                    self.bump();
                    self.last = LastToken::Literal;
                    return Ok(());
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn template_literal(&mut self) -> Result<(), SyntaxIssue> {
        let (line, column) = (self.line, self.column);
        self.bump();
        self.template_body(line, column)
    }

    /// Scan template text up to the closing backtick or the next `${`.
    fn template_body(&mut self, line: usize, column: usize) -> Result<(), SyntaxIssue> {
        loop {
            match self.peek(0) {
                None => {
                    return Err(self.issue(IssueKind::Unterminated, line, column, "unterminated template literal"));
                }
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some('`') => {
                    self.bump();
                    self.last = LastToken::Literal;
                    return Ok(());
                }
                Some('$') if self.peek(1) == Some('{') => {
                    self.stack.push((Opener::TemplateExpr, line, column));
                    self.bump();
                    self.bump();
                    self.last = LastToken::Punct('{');
                    return Ok(());
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn regex_literal(&mut self) -> Result<(), SyntaxIssue> {
        let (line, column) = (self.line, self.column);
        self.bump();
        let mut in_class = false;
        loop {
            match self.peek(0) {
                None | Some('\n') => {
                    return Err(self.issue(
                        IssueKind::Unterminated,
                        line,
                        column,
                        "unterminated regular expression literal",
                    ));
                }
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some('[') => {
                    in_class = true;
                    self.bump();
                }
                Some(']') => {
                    in_class = false;
                    self.bump();
                }
                Some('/') if !in_class => {
                    self.bump();
                    while matches!(self.peek(0), Some(c) if c.is_ascii_alphabetic()) {
                        self.bump();
                    }
                    self.last = LastToken::Literal;
                    return Ok(());
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn close(&mut self, c: char) -> Result<(), SyntaxIssue> {
        let (line, column) = (self.line, self.column);
        match self.stack.pop() {
            None => Err(self.issue(IssueKind::Unexpected, line, column, format!("unexpected '{c}'"))),
            Some((opener, open_line, open_column)) if opener.close_char() != c => Err(self.issue(
                IssueKind::Unexpected,
                line,
                column,
                format!(
                    "unexpected '{c}', expected '{}' to close '{}' from line {open_line}, column {open_column}",
                    opener.close_char(),
                    opener.open_char()
                ),
            )),
            Some((Opener::TemplateExpr, open_line, open_column)) => {
                self.bump();
                self.template_body(open_line, open_column)
            }
            Some(_) => {
                self.bump();
                self.last = LastToken::Punct(c);
                Ok(())
            }
        }
    }
}
