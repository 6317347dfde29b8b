//! Source positions for SQL text
//!
//! A [`SourceMap`] is built from sqlparser's tokenizer: a copy of the text
//! with comment and string literal tokens blanked out (byte offsets and
//! newlines preserved), the statement ranges split on `;` tokens, and every
//! dotted identifier chain with the token that precedes it. Tokenizer
//! locations (line and character column) are converted to byte offsets here.
//!
//! Text the tokenizer cannot get through, such as an unterminated quote, is
//! blanked from the failing token to the end.

use crate::parser::sqlparser_dialect;
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer, Whitespace};
use sqlweave_core::Dialect;
use std::collections::HashSet;
use std::iter::Peekable;
use std::ops::Range;
use std::str::CharIndices;
use tracing::trace;

/// Tokens after which a name is most likely a relation or definition
const RELATION_KEYWORDS: &[&str] = &[
    "FROM", "JOIN", "INTO", "UPDATE", "USING", "TABLE", "MERGE", "VIEW", "ONLY", "EXISTS",
    "WITH", "RECURSIVE", "DELETE", "LATERAL", ",",
];

/// A dotted identifier chain found in the token stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameChain {
    /// Byte range of the whole chain
    pub span: Range<usize>,

    /// Normalized object name
    pub normalized: String,

    /// Upper-cased previous token (keyword or punctuation)
    pub preceded_by: Option<String>,
}

impl NameChain {
    fn follows_relation_keyword(&self) -> bool {
        self.preceded_by
            .as_deref()
            .map(|t| RELATION_KEYWORDS.contains(&t))
            .unwrap_or(false)
    }
}

/// A token with its byte range in the source
struct Lexeme {
    token: Token,
    span: Range<usize>,
}

impl Lexeme {
    fn is_trivia(&self) -> bool {
        matches!(self.token, Token::Whitespace(_))
    }

    fn is_masked(&self) -> bool {
        matches!(
            self.token,
            Token::Whitespace(Whitespace::SingleLineComment { .. } | Whitespace::MultiLineComment(_))
                | Token::SingleQuotedString(_)
                | Token::DoubleQuotedString(_)
                | Token::TripleSingleQuotedString(_)
                | Token::TripleDoubleQuotedString(_)
                | Token::DollarQuotedString(_)
                | Token::SingleQuotedByteStringLiteral(_)
                | Token::DoubleQuotedByteStringLiteral(_)
                | Token::TripleSingleQuotedByteStringLiteral(_)
                | Token::TripleDoubleQuotedByteStringLiteral(_)
                | Token::SingleQuotedRawStringLiteral(_)
                | Token::DoubleQuotedRawStringLiteral(_)
                | Token::TripleSingleQuotedRawStringLiteral(_)
                | Token::TripleDoubleQuotedRawStringLiteral(_)
                | Token::NationalStringLiteral(_)
                | Token::EscapedStringLiteral(_)
                | Token::UnicodeStringLiteral(_)
                | Token::HexStringLiteral(_)
        )
    }
}

/// Walks the source forward, turning tokenizer locations into byte offsets
struct Cursor<'a> {
    chars: Peekable<CharIndices<'a>>,
    len: usize,
    line: u64,
    column: u64,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.char_indices().peekable(),
            len: text.len(),
            line: 1,
            column: 1,
        }
    }

    /// Offset of `target`; locations must be requested in order
    fn offset_at(&mut self, target: Location) -> usize {
        while (self.line, self.column) < (target.line, target.column) {
            let Some((_, ch)) = self.chars.next() else {
                break;
            };
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.chars.peek().map(|(offset, _)| *offset).unwrap_or(self.len)
    }
}

/// Masked text, line table, statement ranges and identifier chains
#[derive(Debug, Clone)]
pub struct SourceMap {
    source: String,
    masked: String,
    line_starts: Vec<usize>,
    statements: Vec<Range<usize>>,
    chains: Vec<NameChain>,
}

impl SourceMap {
    pub fn new(sql: &str, dialect: Dialect) -> Self {
        let (lexemes, lexed_to) = tokenize(sql, dialect);
        let masked = mask(sql, &lexemes, lexed_to);
        let line_starts = std::iter::once(0)
            .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        let statements = split_statements(&masked, &lexemes);
        let chains = scan_chains(&lexemes);

        Self {
            source: sql.to_string(),
            masked,
            line_starts,
            statements,
            chains,
        }
    }

    /// Text with comments and string literals replaced by spaces
    pub fn masked(&self) -> &str {
        &self.masked
    }

    /// Byte ranges of the non-empty statements, in order
    pub fn statements(&self) -> &[Range<usize>] {
        &self.statements
    }

    /// Range covering the whole text
    pub fn full_range(&self) -> Range<usize> {
        0..self.masked.len()
    }

    /// 1-based line number of a byte offset
    pub fn line_of(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset).max(1)
    }

    /// Byte offset of a parser location (1-based line, character column)
    pub fn offset_of(&self, location: Location) -> Option<usize> {
        let line = usize::try_from(location.line).ok()?.checked_sub(1)?;
        let column = usize::try_from(location.column).ok()?.checked_sub(1)?;
        let start = *self.line_starts.get(line)?;
        let end = self.line_starts.get(line + 1).copied().unwrap_or(self.source.len());

        let text = &self.source[start..end];
        match text.char_indices().nth(column) {
            Some((offset, _)) => Some(start + offset),
            None if text.chars().count() == column => Some(end),
            None => None,
        }
    }

    /// Index of the statement containing a byte offset
    pub fn statement_of(&self, offset: usize) -> usize {
        self.statements
            .iter()
            .rposition(|range| range.start <= offset)
            .unwrap_or(0)
    }

    /// Identifier chains fully inside `range`
    pub fn chains_in(&self, range: Range<usize>) -> impl Iterator<Item = &NameChain> {
        self.chains
            .iter()
            .filter(move |c| c.span.start >= range.start && c.span.end <= range.end)
    }

    /// Find the occurrence of a normalized name inside `range`
    ///
    /// Prefers an unclaimed occurrence that follows a relation keyword, then
    /// any unclaimed occurrence, then the first occurrence. The chosen offset
    /// is added to `claimed`.
    pub fn locate(
        &self,
        normalized: &str,
        range: Range<usize>,
        claimed: &mut HashSet<usize>,
    ) -> Option<usize> {
        let candidates: Vec<&NameChain> = self
            .chains_in(range)
            .filter(|c| c.normalized == normalized)
            .collect();

        let chosen = candidates
            .iter()
            .find(|c| !claimed.contains(&c.span.start) && c.follows_relation_keyword())
            .or_else(|| candidates.iter().find(|c| !claimed.contains(&c.span.start)))
            .or_else(|| candidates.first())?;

        claimed.insert(chosen.span.start);
        Some(chosen.span.start)
    }
}

/// Tokenize `sql`, returning the lexemes and the offset the tokenizer reached
fn tokenize(sql: &str, dialect: Dialect) -> (Vec<Lexeme>, usize) {
    let sql_dialect = sqlparser_dialect(dialect);
    let mut tokens: Vec<TokenWithSpan> = Vec::new();
    let result = Tokenizer::new(&*sql_dialect, sql).tokenize_with_location_into_buf(&mut tokens);

    let mut cursor = Cursor::new(sql);
    let lexemes: Vec<Lexeme> = tokens
        .into_iter()
        .filter(|token| token.token != Token::EOF)
        .map(|token| {
            let start = cursor.offset_at(token.span.start);
            let end = cursor.offset_at(token.span.end).max(start);
            Lexeme {
                token: token.token,
                span: start..end,
            }
        })
        .collect();

    let lexed_to = match result {
        Ok(()) => sql.len(),
        Err(err) => {
            trace!(error = %err, "tokenizer stopped early");
            lexemes.last().map(|lexeme| lexeme.span.end).unwrap_or(0)
        }
    };
    (lexemes, lexed_to)
}

fn push_blank(out: &mut String, text: &str) {
    for ch in text.chars() {
        if ch == '\n' {
            out.push('\n');
        } else {
            out.extend(std::iter::repeat(' ').take(ch.len_utf8()));
        }
    }
}

fn mask(sql: &str, lexemes: &[Lexeme], lexed_to: usize) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut at = 0;

    for lexeme in lexemes.iter() {
        if !(lexeme.is_masked() && lexeme.span.start >= at) {
            continue;
        }
        out.push_str(&sql[at..lexeme.span.start]);
        push_blank(&mut out, &sql[lexeme.span.clone()]);
        at = lexeme.span.end;
    }

    let lexed_to = lexed_to.max(at);
    out.push_str(&sql[at..lexed_to]);
    push_blank(&mut out, &sql[lexed_to..]);
    out
}

fn split_statements(masked: &str, lexemes: &[Lexeme]) -> Vec<Range<usize>> {
    let mut statements = Vec::new();
    let mut start = 0;

    for lexeme in lexemes.iter().filter(|lexeme| lexeme.token == Token::SemiColon) {
        if !masked[start..lexeme.span.start].trim().is_empty() {
            statements.push(start..lexeme.span.start);
        }
        start = lexeme.span.end;
    }
    if !masked[start..].trim().is_empty() {
        statements.push(start..masked.len());
    }

    statements
}

fn scan_chains(lexemes: &[Lexeme]) -> Vec<NameChain> {
    let significant: Vec<&Lexeme> = lexemes.iter().filter(|lexeme| !lexeme.is_trivia()).collect();
    let mut chains = Vec::new();
    let mut previous: Option<String> = None;
    let mut i = 0;

    while i < significant.len() {
        let lexeme = significant[i];
        let Token::Word(first) = &lexeme.token else {
            previous = Some(match &lexeme.token {
                Token::Number(..) => String::new(),
                other => other.to_string().to_uppercase(),
            });
            i += 1;
            continue;
        };

        let mut parts = vec![first.value.as_str()];
        let mut end = lexeme.span.end;
        i += 1;
        while let [Lexeme { token: Token::Period, .. }, Lexeme { token: Token::Word(next), span }, ..] =
            &significant[i..]
        {
            parts.push(next.value.as_str());
            end = span.end;
            i += 2;
        }

        let bare_word = parts.len() == 1 && first.quote_style.is_none();
        chains.push(NameChain {
            span: lexeme.span.start..end,
            normalized: parts
                .iter()
                .map(|part| part.trim().to_lowercase())
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join("."),
            preceded_by: previous.take(),
        });
        previous = Some(if bare_word {
            first.value.to_uppercase()
        } else {
            String::new()
        });
    }

    chains
}
