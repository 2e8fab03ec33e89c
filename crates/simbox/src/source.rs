//! Token-level view of a generated program.
//!
//! `Tokens` lexes once, drops comments and records the bracket depth of
//! every token so the validator and transformer can reason about top-level
//! statements without a full JavaScript grammar.

use std::ops::Range;

use chumsky::prelude::*;

mod lexer;
pub use lexer::{Token, lexer};

mod edits;
pub use edits::SourceEdits;

pub type LexError<'code> = Rich<'code, char>;

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub span: Range<usize>,
    pub node: T,
}

/// Tokens ending a line that continue the statement onto the next one.
const CONTINUES_AFTER: &str = "=+-*/%&|^!~<>?:,.([{";
/// Tokens starting a line that continue the previous statement.
const CONTINUES_BEFORE: &str = ".?+-*/%&|^=<>,:([";

pub struct Tokens<'code> {
    source: &'code str,
    tokens: Vec<Spanned<Token<'code>>>,
    depths: Vec<usize>,
}

impl<'code> Tokens<'code> {
    pub fn new(source: &'code str) -> Self {
        let mut tokens = lexer().parse(source).into_output().unwrap_or_default();
        tokens.retain(|token| !matches!(token.node, Token::Comment(_)));

        let mut depths = Vec::with_capacity(tokens.len());
        let mut depth = 0usize;
        for token in &tokens {
            match token.node {
                Token::Punct('(' | '[' | '{') => {
                    depths.push(depth);
                    depth += 1;
                }
                Token::Punct(')' | ']' | '}') => {
                    depth = depth.saturating_sub(1);
                    depths.push(depth);
                }
                _ => depths.push(depth),
            }
        }

        Self {
            source,
            tokens,
            depths,
        }
    }

    pub fn source(&self) -> &'code str {
        self.source
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token(&self, index: usize) -> Option<Token<'code>> {
        self.tokens.get(index).map(|token| token.node)
    }

    pub fn span(&self, index: usize) -> Range<usize> {
        self.tokens[index].span.clone()
    }

    /// Byte range from the start of `first` to the end of `last`.
    pub fn span_between(&self, first: usize, last: usize) -> Range<usize> {
        self.tokens[first].span.start..self.tokens[last].span.end
    }

    /// Bracket depth of a token; an opening bracket and its closing pair share one.
    pub fn depth(&self, index: usize) -> usize {
        self.depths[index]
    }

    pub fn is_identifier(&self, index: usize, name: &str) -> bool {
        self.token(index).is_some_and(|token| token.is_identifier(name))
    }

    pub fn is_punct(&self, index: usize, character: char) -> bool {
        self.token(index).is_some_and(|token| token.is_punct(character))
    }

    /// Indices of all tokens outside any bracket.
    pub fn top_level(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.tokens.len()).filter(|index| self.depths[*index] == 0)
    }

    /// Index of the bracket closing the one opened at `open`.
    pub fn matching_close(&self, open: usize) -> Option<usize> {
        let depth = self.depths[open];
        (open + 1..self.tokens.len()).find(|index| {
            self.depths[*index] == depth
                && matches!(self.tokens[*index].node, Token::Punct(')' | ']' | '}'))
        })
    }

    pub fn line_break_between(&self, left: usize, right: usize) -> bool {
        self.source[self.tokens[left].span.end..self.tokens[right].span.start].contains('\n')
    }

    /// Index of the last token of the statement starting at `start`.
    ///
    /// A statement ends at a `;` on its own depth, right before the
    /// enclosing block closes, or at a line break that does not continue it.
    pub fn statement_end(&self, start: usize) -> usize {
        let depth = self.depths[start];
        let mut index = start;
        loop {
            if self.depths[index] == depth && self.is_punct(index, ';') {
                return index;
            }
            let next = index + 1;
            if next >= self.tokens.len() || self.depths[next] < depth {
                return index;
            }
            if self.depths[index] == depth
                && self.depths[next] == depth
                && self.line_break_between(index, next)
                && !self.continues_after(index)
                && !self.continues_before(next)
            {
                return index;
            }
            index = next;
        }
    }

    /// Index of the first token of the statement containing `index`.
    pub fn statement_start(&self, index: usize) -> usize {
        let depth = self.depths[index];
        let mut start = index;
        while start > 0 {
            let previous = start - 1;
            if self.depths[previous] < depth
                || (self.depths[previous] == depth
                    && (self.is_punct(previous, ';') || self.is_punct(previous, '}')))
            {
                break;
            }
            start = previous;
        }
        start
    }

    fn continues_after(&self, index: usize) -> bool {
        matches!(
            self.tokens[index].node,
            Token::Punct(character) if CONTINUES_AFTER.contains(character)
        )
    }

    fn continues_before(&self, index: usize) -> bool {
        matches!(
            self.tokens[index].node,
            Token::Punct(character) if CONTINUES_BEFORE.contains(character)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depths_pair_brackets() {
        let tokens = Tokens::new("a(b[c]){d}");
        let depths: Vec<_> = (0..tokens.len()).map(|index| tokens.depth(index)).collect();
        assert_eq!(depths, vec![0, 0, 1, 1, 2, 1, 0, 0, 1, 0]);
        assert_eq!(tokens.matching_close(1), Some(6));
        assert_eq!(tokens.matching_close(7), Some(9));
    }

    #[test]
    fn comments_are_dropped() {
        let tokens = Tokens::new("a /* b */ c // d");
        assert_eq!(tokens.len(), 2);
        assert!(tokens.is_identifier(1, "c"));
    }

    #[test]
    fn statement_ends_at_semicolon() {
        let tokens = Tokens::new("const a = f(1,\n 2); const b = 3;");
        assert!(tokens.is_punct(tokens.statement_end(0), ';'));
        assert_eq!(tokens.statement_end(0), 9);
    }

    #[test]
    fn statement_ends_at_line_break_without_semicolon() {
        let tokens = Tokens::new("const a = window.a\nconst b = 1");
        let end = tokens.statement_end(0);
        assert!(tokens.is_identifier(end, "a"));
        assert_eq!(end, 5);
    }

    #[test]
    fn continued_lines_stay_in_one_statement() {
        let tokens = Tokens::new("const a = b\n  .c\nconst d = 1");
        let end = tokens.statement_end(0);
        assert!(tokens.is_identifier(end, "c"));
    }

    #[test]
    fn statement_ends_before_enclosing_block_closes() {
        let tokens = Tokens::new("{ let x = 1 }");
        assert_eq!(tokens.statement_end(1), 4);
    }

    #[test]
    fn statement_start_walks_back_to_previous_statement() {
        let tokens = Tokens::new("a(); const b = require('x');");
        let require = 7;
        assert!(tokens.is_identifier(require, "require"));
        assert!(tokens.is_identifier(tokens.statement_start(require), "const"));
    }
}
