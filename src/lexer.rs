//! Tokenizer for build files.
//!
//! Recognisers are tried in a fixed priority order at each cursor position; the first
//! one that matches wins. See `tokenize` for the order.

use crate::system::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    OpenParen,
    CloseParen,
    Colon,
    Newline,
    Literal,
    QuotedLiteral,
    MultilineLiteral,
    Variable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub content: String,
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn location(&self) -> String {
        format!("{}:{}:{}", self.file, self.line, self.column)
    }

    pub fn is_variable(&self) -> bool {
        self.kind == TokenKind::Variable
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || "./$_-=+".contains(c)
}

struct Cursor<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    file: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(file: &'a str, source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            file,
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        let want: Vec<char> = s.chars().collect();
        if self.pos + want.len() > self.chars.len() {
            return false;
        }
        self.chars[self.pos..self.pos + want.len()] == want[..]
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn consume(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    fn error(&self, msg: impl Into<String>) -> Error {
        Error::LexError(self.file.to_string(), self.line, self.column, msg.into())
    }
}

/// Tokenize a build file's contents. `file` is used only for error locations.
pub fn tokenize(file: &str, source: &str) -> Result<Vec<Token>, Error> {
    let mut cur = Cursor::new(file, source);
    let mut tokens = Vec::new();

    while !cur.eof() {
        if try_comment(&mut cur) {
            continue;
        }
        if try_line_continuation(&mut cur) {
            continue;
        }
        if let Some(token) = try_simple_char(&mut cur) {
            tokens.push(token);
            continue;
        }
        if let Some(token) = try_multiline_literal(&mut cur)? {
            tokens.push(token);
            continue;
        }
        if let Some(token) = try_quoted_literal(&mut cur)? {
            tokens.push(token);
            continue;
        }
        if let Some(token) = try_identifier(&mut cur) {
            tokens.push(token);
            continue;
        }
        if try_whitespace(&mut cur) {
            continue;
        }

        let bad = cur.peek().unwrap();
        return Err(cur.error(format!("unexpected character: {bad:?}")));
    }

    Ok(tokens)
}

fn try_comment(cur: &mut Cursor) -> bool {
    if cur.peek() != Some('#') {
        return false;
    }
    while !cur.eof() && cur.peek() != Some('\n') {
        cur.advance();
    }
    true
}

fn try_line_continuation(cur: &mut Cursor) -> bool {
    if cur.starts_with("\\\n") {
        cur.consume(2);
        true
    } else {
        false
    }
}

fn try_simple_char(cur: &mut Cursor) -> Option<Token> {
    let (kind, content) = match cur.peek()? {
        '\n' => (TokenKind::Newline, "<new-line>"),
        '(' => (TokenKind::OpenParen, "("),
        ')' => (TokenKind::CloseParen, ")"),
        ':' => (TokenKind::Colon, ":"),
        _ => return None,
    };
    let token = Token {
        kind,
        content: content.to_string(),
        file: cur.file.to_string(),
        line: cur.line,
        column: cur.column,
    };
    cur.advance();
    Some(token)
}

fn try_multiline_literal(cur: &mut Cursor) -> Result<Option<Token>, Error> {
    if !cur.starts_with("\"\"\"") {
        return Ok(None);
    }
    let (line, column) = (cur.line, cur.column);
    cur.consume(3);

    let mut data = String::new();
    loop {
        if cur.eof() {
            return Err(cur.error("unterminated multiline literal"));
        }
        if cur.starts_with("\"\"\"") {
            cur.consume(3);
            return Ok(Some(Token {
                kind: TokenKind::MultilineLiteral,
                content: data,
                file: cur.file.to_string(),
                line,
                column,
            }));
        }
        data.push(cur.peek().unwrap());
        cur.advance();
    }
}

fn try_quoted_literal(cur: &mut Cursor) -> Result<Option<Token>, Error> {
    if cur.peek() != Some('"') {
        return Ok(None);
    }
    let (line, column) = (cur.line, cur.column);
    cur.advance();

    let mut data = String::new();
    loop {
        if cur.eof() {
            return Err(cur.error("unterminated quoted literal"));
        }
        if cur.peek() == Some('"') {
            cur.advance();
            return Ok(Some(Token {
                kind: TokenKind::QuotedLiteral,
                content: data,
                file: cur.file.to_string(),
                line,
                column,
            }));
        }
        data.push(cur.peek().unwrap());
        cur.advance();
    }
}

fn try_identifier(cur: &mut Cursor) -> Option<Token> {
    let first = cur.peek()?;
    if !is_identifier_char(first) {
        return None;
    }

    let (line, column) = (cur.line, cur.column);
    let kind = if first == '$' {
        TokenKind::Variable
    } else {
        TokenKind::Literal
    };

    let mut data = String::new();
    while let Some(c) = cur.peek() {
        if is_identifier_char(c) {
            data.push(c);
            cur.advance();
        } else {
            break;
        }
    }

    Some(Token {
        kind,
        content: data,
        file: cur.file.to_string(),
        line,
        column,
    })
}

fn try_whitespace(cur: &mut Cursor) -> bool {
    let mut any = false;
    while cur.peek() == Some(' ') {
        any = true;
        cur.advance();
    }
    any
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty_file() {
        let tokens = tokenize("f.pake", "").unwrap();
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_comment_is_dropped() {
        let tokens = tokenize("f.pake", "# hello\nset $x (1)\n").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Newline);
    }

    #[test]
    fn test_line_continuation_joins_lines() {
        let tokens = tokenize("f.pake", "set $x (\\\n1)\n").unwrap();
        // no Newline token should appear between `(` and `1`
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Literal,
                TokenKind::Variable,
                TokenKind::OpenParen,
                TokenKind::Literal,
                TokenKind::CloseParen,
                TokenKind::Newline,
            ]
        );
    }

    #[test]
    fn test_simple_directive() {
        let tokens = tokenize("f.pake", "set $x (a b)\n").unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Literal,
                TokenKind::Variable,
                TokenKind::OpenParen,
                TokenKind::Literal,
                TokenKind::Literal,
                TokenKind::CloseParen,
                TokenKind::Newline,
            ]
        );
        assert_eq!(tokens[0].content, "set");
        assert_eq!(tokens[1].content, "$x");
    }

    #[test]
    fn test_variable_qualified_reference() {
        let tokens = tokenize("f.pake", "$mod.var\n").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Variable);
        assert_eq!(tokens[0].content, "$mod.var");
    }

    #[test]
    fn test_quoted_literal_preserves_spaces() {
        let tokens = tokenize("f.pake", "\"hello world\"\n").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::QuotedLiteral);
        assert_eq!(tokens[0].content, "hello world");
    }

    #[test]
    fn test_multiline_literal() {
        let tokens = tokenize("f.pake", "\"\"\"line one\nline two\"\"\"\n").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::MultilineLiteral);
        assert_eq!(tokens[0].content, "line one\nline two");
    }

    #[test]
    fn test_colon_list_tokens() {
        let tokens = tokenize("f.pake", "(a:$b c:$d)\n").unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::OpenParen,
                TokenKind::Literal,
                TokenKind::Colon,
                TokenKind::Variable,
                TokenKind::Literal,
                TokenKind::Colon,
                TokenKind::Variable,
                TokenKind::CloseParen,
                TokenKind::Newline,
            ]
        );
    }

    #[test]
    fn test_unterminated_quoted_literal_errors() {
        let err = tokenize("f.pake", "\"unterminated").unwrap_err();
        match err {
            Error::LexError(file, ..) => assert_eq!(file, "f.pake"),
            other => panic!("expected LexError, got {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_character_errors() {
        let err = tokenize("f.pake", "@\n").unwrap_err();
        match err {
            Error::LexError(_, line, column, _) => {
                assert_eq!(line, 1);
                assert_eq!(column, 1);
            }
            other => panic!("expected LexError, got {other:?}"),
        }
    }

    #[test]
    fn test_line_and_column_tracking() {
        let tokens = tokenize("f.pake", "set $x\nappend $y\n").unwrap();
        let append_token = tokens.iter().find(|t| t.content == "append").unwrap();
        assert_eq!(append_token.line, 2);
        assert_eq!(append_token.column, 1);
    }
}
