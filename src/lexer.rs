//! Hand-written scanner for EAC source text.
//!
//! Statements end at `.`, so newlines are ordinary whitespace — except that
//! leading whitespace drives block structure: when a line's indentation
//! rises or falls relative to the previous one, the lexer emits `Indent` /
//! `Dedent` tokens (tab counts as four spaces). Blank lines and
//! comment-only lines never affect nesting, and all open levels close at
//! end of input.
//!
//! Typed literals are decoded here: `date "2026-02-11"` fuses into a DATE
//! token (calendar-checked), `USD 1_000.50` into a MONEY token with an
//! exact decimal amount, and words shaped like `A1G999` into RANGE tokens.
//! The lexer stops at the first error.

use rust_decimal::Decimal;

use crate::error::{LexError, LexErrorKind};
use crate::intern::{Interner, Symbol};
use crate::token::{CellRange, Currency, Keyword, Punct, Span, Token, TokenKind};

pub struct Lexer<'src, 'int> {
    src: &'src str,
    pos: usize,
    line: u32,
    column: u32,
    interner: &'int mut Interner,
    tokens: Vec<Token>,
    indent_stack: Vec<usize>,
    at_line_start: bool,
}

/// Tokenize a whole source text. The result always ends with an EOF token.
pub fn tokenize(src: &str, interner: &mut Interner) -> Result<Vec<Token>, LexError> {
    Lexer::new(src, interner).run()
}

impl<'src, 'int> Lexer<'src, 'int> {
    pub fn new(src: &'src str, interner: &'int mut Interner) -> Self {
        Lexer {
            src,
            pos: 0,
            line: 1,
            column: 1,
            interner,
            tokens: Vec::new(),
            indent_stack: vec![0],
            at_line_start: true,
        }
    }

    pub fn run(mut self) -> Result<Vec<Token>, LexError> {
        loop {
            if self.at_line_start {
                self.handle_line_start();
                self.at_line_start = false;
            }

            match self.peek() {
                None => break,
                Some(' ') | Some('\t') | Some('\r') => {
                    self.bump();
                }
                Some('\n') => {
                    self.bump_newline();
                }
                Some('-') if self.peek_at(1) == Some('-') => {
                    self.skip_to_line_end();
                }
                Some('"') => {
                    let (sym, raw, span) = self.scan_string()?;
                    self.push(TokenKind::Str(sym), &raw, span);
                }
                Some(c) if c.is_ascii_digit() => {
                    self.scan_number_token()?;
                }
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                    self.scan_word()?;
                }
                Some(_) => {
                    self.scan_punct()?;
                }
            }
        }

        // Close any blocks still open at EOF.
        let eof_span = self.here();
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.tokens.push(Token::new(TokenKind::Dedent, Symbol::EMPTY, eof_span));
        }
        self.tokens.push(Token::new(TokenKind::Eof, Symbol::EMPTY, eof_span));
        Ok(self.tokens)
    }

    /// Measure the indentation of the line starting at the current position
    /// and emit Indent/Dedent tokens as the level changes. Blank and
    /// comment-only lines are consumed without touching the indent stack.
    fn handle_line_start(&mut self) {
        loop {
            let mut indent = 0usize;
            loop {
                match self.peek() {
                    Some(' ') => {
                        indent += 1;
                        self.bump();
                    }
                    Some('\t') => {
                        indent += 4;
                        self.bump();
                    }
                    Some('\r') => {
                        self.bump();
                    }
                    _ => break,
                }
            }

            match self.peek() {
                // Blank line: swallow and restart on the next one.
                Some('\n') => {
                    self.bump_newline();
                    continue;
                }
                // Comment-only line.
                Some('-') if self.peek_at(1) == Some('-') => {
                    self.skip_to_line_end();
                    if self.peek() == Some('\n') {
                        self.bump_newline();
                        continue;
                    }
                    return; // comment ran to EOF
                }
                None => return,
                Some(_) => {
                    let here = self.here();
                    let current = *self.indent_stack.last().unwrap();
                    if indent > current {
                        self.indent_stack.push(indent);
                        self.tokens.push(Token::new(TokenKind::Indent, Symbol::EMPTY, here));
                    } else if indent < current {
                        while self.indent_stack.len() > 1
                            && indent < *self.indent_stack.last().unwrap()
                        {
                            self.indent_stack.pop();
                            self.tokens.push(Token::new(
                                TokenKind::Dedent,
                                Symbol::EMPTY,
                                here,
                            ));
                        }
                    }
                    return;
                }
            }
        }
    }

    fn scan_word(&mut self) -> Result<(), LexError> {
        let start = self.mark();
        let from = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.bump();
            } else if c == '.'
                && self
                    .peek_at(1)
                    .map_or(false, |n| n.is_ascii_alphanumeric() || n == '_')
            {
                // Interior dot of a qualified name; a trailing dot is the
                // sentence period.
                self.bump();
            } else {
                break;
            }
        }
        let word = &self.src[from..self.pos];
        let span = self.span_since(start);

        if !word.contains('.') {
            match CellRange::decode(word) {
                Some(Ok(range)) => {
                    self.push(TokenKind::Range(range), word, span);
                    return Ok(());
                }
                Some(Err(reason)) => {
                    return Err(LexError::new(
                        LexErrorKind::BadRange { word: word.to_string(), reason },
                        span,
                    ));
                }
                None => {}
            }
            if let Some(currency) = Currency::from_word(word) {
                return self.scan_money(currency, start);
            }
            if word == "date" && self.date_string_follows() {
                return self.scan_date(start);
            }
            if let Some(kw) = Keyword::from_word(word) {
                self.push(TokenKind::Keyword(kw), word, span);
                return Ok(());
            }
        }

        let sym = self.interner.intern(word);
        self.push(TokenKind::Ident(sym), word, span);
        Ok(())
    }

    /// `USD 1_000.50` — the currency word has already been consumed.
    fn scan_money(&mut self, currency: Currency, start: Mark) -> Result<(), LexError> {
        self.skip_inline_spaces();
        if !self.peek().map_or(false, |c| c.is_ascii_digit()) {
            return Err(LexError::new(
                LexErrorKind::MissingAmount(currency),
                self.here(),
            ));
        }
        let digits = self.scan_digits();
        let span = self.span_since(start);
        let mut amount: Decimal = digits
            .parse()
            .map_err(|_| LexError::new(LexErrorKind::BadNumber(digits.clone()), span))?;
        // Money always keeps at least two fractional digits.
        if amount.scale() < 2 {
            amount.rescale(2);
        }
        let lexeme = &self.src[start.pos..self.pos];
        self.push(TokenKind::Money { currency, amount }, lexeme, span);
        Ok(())
    }

    fn date_string_follows(&self) -> bool {
        let rest = &self.src[self.pos..];
        rest.trim_start_matches([' ', '\t']).starts_with('"')
    }

    /// `date "YYYY-MM-DD"` — the `date` word has already been consumed.
    fn scan_date(&mut self, start: Mark) -> Result<(), LexError> {
        self.skip_inline_spaces();
        let (_, raw, _) = self.scan_string()?;
        let span = self.span_since(start);
        let text = raw.trim_matches('"');
        let date = parse_iso_date(text)
            .ok_or_else(|| LexError::new(LexErrorKind::BadDate(text.to_string()), span))?;
        let lexeme = &self.src[start.pos..self.pos];
        self.push(TokenKind::Date(date), lexeme, span);
        Ok(())
    }

    fn scan_number_token(&mut self) -> Result<(), LexError> {
        let start = self.mark();
        let digits = self.scan_digits();
        let span = self.span_since(start);
        let value: f64 = digits
            .parse()
            .map_err(|_| LexError::new(LexErrorKind::BadNumber(digits.clone()), span))?;
        let lexeme = &self.src[start.pos..self.pos];
        self.push(TokenKind::Number(value), lexeme, span);
        Ok(())
    }

    /// Integer part, optional fraction. Underscores are thousands
    /// separators and are stripped. A dot not followed by a digit is left
    /// alone — it is the sentence period.
    fn scan_digits(&mut self) -> String {
        let mut cleaned = String::new();
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {
                    cleaned.push(c);
                    self.bump();
                }
                '_' => {
                    self.bump();
                }
                '.' if self.peek_at(1).map_or(false, |n| n.is_ascii_digit()) => {
                    cleaned.push('.');
                    self.bump();
                }
                _ => break,
            }
        }
        cleaned
    }

    fn scan_string(&mut self) -> Result<(Symbol, String, Span), LexError> {
        let start = self.mark();
        self.bump(); // opening quote
        let mut decoded = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(LexError::new(
                        LexErrorKind::UnterminatedString,
                        self.span_since(start),
                    ));
                }
                Some('\\') => {
                    self.bump();
                    let escaped = self.peek().ok_or_else(|| {
                        LexError::new(LexErrorKind::UnterminatedString, self.span_since(start))
                    })?;
                    match escaped {
                        '"' => decoded.push('"'),
                        '\\' => decoded.push('\\'),
                        'n' => decoded.push('\n'),
                        't' => decoded.push('\t'),
                        other => {
                            return Err(LexError::new(
                                LexErrorKind::BadEscape(other),
                                self.here(),
                            ));
                        }
                    }
                    self.bump();
                }
                Some('"') => {
                    self.bump();
                    break;
                }
                Some(c) => {
                    decoded.push(c);
                    self.bump();
                }
            }
        }
        let span = self.span_since(start);
        let raw = self.src[start.pos..self.pos].to_string();
        let sym = self.interner.intern(&decoded);
        Ok((sym, raw, span))
    }

    fn scan_punct(&mut self) -> Result<(), LexError> {
        let start = self.mark();
        let c = self.bump().unwrap();
        let punct = match c {
            '.' => Punct::Period,
            ',' => Punct::Comma,
            ':' => Punct::Colon,
            ';' => Punct::Semicolon,
            '(' => Punct::LParen,
            ')' => Punct::RParen,
            '+' => Punct::Plus,
            '-' => Punct::Minus,
            '*' => Punct::Star,
            '/' => Punct::Slash,
            '=' => Punct::Eq,
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Punct::NotEq
                } else {
                    return Err(LexError::new(
                        LexErrorKind::UnexpectedChar('!'),
                        self.span_since(start),
                    ));
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Punct::GtEq
                } else {
                    Punct::Gt
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Punct::LtEq
                } else {
                    Punct::Lt
                }
            }
            other => {
                return Err(LexError::new(
                    LexErrorKind::UnexpectedChar(other),
                    self.span_since(start),
                ));
            }
        };
        let span = self.span_since(start);
        self.push(TokenKind::Punct(punct), punct.as_str(), span);
        Ok(())
    }

    // Cursor plumbing.

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        self.column += 1;
        Some(c)
    }

    fn bump_newline(&mut self) {
        debug_assert_eq!(self.peek(), Some('\n'));
        self.pos += 1;
        self.line += 1;
        self.column = 1;
        self.at_line_start = true;
    }

    fn skip_inline_spaces(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.bump();
        }
    }

    fn skip_to_line_end(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn mark(&self) -> Mark {
        Mark { pos: self.pos, line: self.line, column: self.column }
    }

    fn here(&self) -> Span {
        Span::new(self.pos, self.pos, self.line, self.column)
    }

    fn span_since(&self, mark: Mark) -> Span {
        Span::new(mark.pos, self.pos, mark.line, mark.column)
    }

    fn push(&mut self, kind: TokenKind, lexeme: &str, span: Span) {
        let lexeme = self.interner.intern(lexeme);
        self.tokens.push(Token::new(kind, lexeme, span));
    }
}

#[derive(Clone, Copy)]
struct Mark {
    pos: usize,
    line: u32,
    column: u32,
}

/// Strict `YYYY-MM-DD`, then a Gregorian calendar check.
fn parse_iso_date(text: &str) -> Option<chrono::NaiveDate> {
    let bytes = text.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    for (i, b) in bytes.iter().enumerate() {
        if i != 4 && i != 7 && !b.is_ascii_digit() {
            return None;
        }
    }
    let year: i32 = text[0..4].parse().ok()?;
    let month: u32 = text[5..7].parse().ok()?;
    let day: u32 = text[8..10].parse().ok()?;
    chrono::NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<TokenKind> {
        let mut interner = Interner::new();
        tokenize(src, &mut interner)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn lex_err(src: &str) -> LexError {
        let mut interner = Interner::new();
        tokenize(src, &mut interner).unwrap_err()
    }

    #[test]
    fn empty_source_is_just_eof() {
        assert_eq!(lex(""), vec![TokenKind::Eof]);
    }

    #[test]
    fn keywords_are_case_sensitive() {
        let mut interner = Interner::new();
        let tokens = tokenize("Open open", &mut interner).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Open));
        assert!(matches!(tokens[1].kind, TokenKind::Ident(_)));
    }

    #[test]
    fn open_workbook_statement() {
        let kinds = lex("Open workbook \"data/x.xlsx\".");
        assert_eq!(kinds.len(), 5); // Open workbook STRING . EOF
        assert_eq!(kinds[0], TokenKind::Keyword(Keyword::Open));
        assert_eq!(kinds[1], TokenKind::Keyword(Keyword::Workbook));
        assert!(matches!(kinds[2], TokenKind::Str(_)));
        assert_eq!(kinds[3], TokenKind::Punct(Punct::Period));
    }

    #[test]
    fn string_escapes_decode() {
        let mut interner = Interner::new();
        let tokens = tokenize(r#""a \"quoted\" \\ thing""#, &mut interner).unwrap();
        let TokenKind::Str(sym) = tokens[0].kind else { panic!() };
        assert_eq!(interner.resolve(sym), "a \"quoted\" \\ thing");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = lex_err("\"never closed");
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
    }

    #[test]
    fn money_literal_preserves_two_decimals() {
        let kinds = lex("USD 0.00");
        let TokenKind::Money { currency, amount } = &kinds[0] else { panic!() };
        assert_eq!(*currency, Currency::Usd);
        assert_eq!(amount.to_string(), "0.00");
    }

    #[test]
    fn money_strips_underscores() {
        let kinds = lex("EUR 1_000.50");
        let TokenKind::Money { amount, .. } = &kinds[0] else { panic!() };
        assert_eq!(amount.to_string(), "1000.50");
    }

    #[test]
    fn whole_money_amount_gets_cents() {
        let kinds = lex("GBP 7");
        let TokenKind::Money { amount, .. } = &kinds[0] else { panic!() };
        assert_eq!(amount.to_string(), "7.00");
    }

    #[test]
    fn currency_without_amount_is_an_error() {
        let err = lex_err("Filter T where T.a > USD.");
        assert_eq!(err.kind, LexErrorKind::MissingAmount(Currency::Usd));
    }

    #[test]
    fn date_literal_decodes() {
        let kinds = lex("date \"2026-02-11\"");
        assert_eq!(
            kinds[0],
            TokenKind::Date(chrono::NaiveDate::from_ymd_opt(2026, 2, 11).unwrap())
        );
    }

    #[test]
    fn out_of_range_date_is_a_lexical_error() {
        let err = lex_err("date \"2026-02-30\"");
        assert!(matches!(err.kind, LexErrorKind::BadDate(_)));
        let err = lex_err("date \"2026-13-01\"");
        assert!(matches!(err.kind, LexErrorKind::BadDate(_)));
    }

    #[test]
    fn malformed_date_is_a_lexical_error() {
        let err = lex_err("date \"11-02-2026\"");
        assert!(matches!(err.kind, LexErrorKind::BadDate(_)));
    }

    #[test]
    fn bare_date_keyword_stays_a_keyword() {
        let kinds = lex("Define d as date");
        assert!(kinds.contains(&TokenKind::Keyword(Keyword::Date)));
    }

    #[test]
    fn range_token_decodes_and_normalises() {
        let kinds = lex("A1G999");
        let TokenKind::Range(range) = kinds[0] else { panic!() };
        assert_eq!(range.to_string(), "A1G999");
        assert_eq!(range.end_col, 7);
        assert_eq!(range.end_row, 999);
    }

    #[test]
    fn backwards_range_is_rejected() {
        let err = lex_err("In sheet \"S\", treat range B1A1 as table T.");
        assert!(matches!(err.kind, LexErrorKind::BadRange { .. }));
    }

    #[test]
    fn qualified_name_is_one_token() {
        let mut interner = Interner::new();
        let tokens = tokenize("T.Balance", &mut interner).unwrap();
        let TokenKind::Ident(sym) = tokens[0].kind else { panic!() };
        assert_eq!(interner.resolve(sym), "T.Balance");
        assert_eq!(tokens.len(), 2); // IDENT EOF
    }

    #[test]
    fn trailing_dot_is_the_period() {
        let kinds = lex("Filter T where T.x > 0.");
        // The final `0.` splits into NUMBER and PERIOD.
        assert_eq!(kinds[kinds.len() - 2], TokenKind::Punct(Punct::Period));
        assert!(kinds.contains(&TokenKind::Number(0.0)));
    }

    #[test]
    fn comments_run_to_end_of_line() {
        let kinds = lex("Open workbook \"x\". -- the rest is noise . , ;\nLog out.");
        assert!(kinds.contains(&TokenKind::Keyword(Keyword::Log)));
        assert!(!kinds.contains(&TokenKind::Punct(Punct::Semicolon)));
    }

    #[test]
    fn two_char_operators() {
        let kinds = lex(">= <= != = > <");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Punct(Punct::GtEq),
                TokenKind::Punct(Punct::LtEq),
                TokenKind::Punct(Punct::NotEq),
                TokenKind::Punct(Punct::Eq),
                TokenKind::Punct(Punct::Gt),
                TokenKind::Punct(Punct::Lt),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unexpected_character_reports_location() {
        let err = lex_err("Set x to 1 @ 2.");
        assert_eq!(err.kind, LexErrorKind::UnexpectedChar('@'));
        assert_eq!(err.span.line, 1);
        assert_eq!(err.span.column, 12);
    }

    #[test]
    fn line_and_column_tracking() {
        let mut interner = Interner::new();
        let tokens = tokenize("Open workbook \"x\".\nLog out.", &mut interner).unwrap();
        let log = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Keyword(Keyword::Log))
            .unwrap();
        assert_eq!(log.span.line, 2);
        assert_eq!(log.span.column, 1);
    }

    #[test]
    fn indentation_produces_indent_and_dedent() {
        let kinds = lex("If x > 0:\n    Log out.\nExport T to \"o.csv\".");
        let indent = kinds.iter().position(|k| *k == TokenKind::Indent).unwrap();
        let dedent = kinds.iter().position(|k| *k == TokenKind::Dedent).unwrap();
        assert!(indent < dedent);
        // Export follows the dedent, back at top level.
        assert!(matches!(kinds[dedent + 1], TokenKind::Keyword(Keyword::Export)));
    }

    #[test]
    fn blank_and_comment_lines_keep_indentation() {
        let kinds = lex("If x > 0:\n    Log out.\n\n    -- still inside\n    Log out.\n");
        let dedents = kinds.iter().filter(|k| **k == TokenKind::Dedent).count();
        let indents = kinds.iter().filter(|k| **k == TokenKind::Indent).count();
        assert_eq!(indents, 1);
        assert_eq!(dedents, 1); // closed at EOF
    }

    #[test]
    fn nested_blocks_close_at_eof() {
        let kinds = lex("If a:\n  If b:\n    Log out.");
        let dedents = kinds.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(dedents, 2);
        assert_eq!(kinds.last(), Some(&TokenKind::Eof));
    }
}
