use super::{LexError, Spanned};
use chumsky::prelude::*;
use std::borrow::Cow;
use std::fmt;

/// Coarse token of a generated ES module.
///
/// Only as much structure as the validator and transformer need: operators
/// stay single punctuation characters and keywords stay identifiers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token<'code> {
    Identifier(&'code str),
    Number(&'code str),
    /// Quoted string literal, quotes included.
    Text(&'code str),
    /// Template literal, backticks included.
    Template(&'code str),
    Comment(&'code str),
    Punct(char),
}

impl<'code> Token<'code> {
    pub fn into_cow_str(self) -> Cow<'code, str> {
        match self {
            Self::Identifier(identifier) => identifier.into(),
            Self::Number(number) => number.into(),
            Self::Text(text) => text.into(),
            Self::Template(template) => template.into(),
            Self::Comment(comment) => comment.into(),
            Self::Punct(character) => character.to_string().into(),
        }
    }

    pub fn is_identifier(&self, name: &str) -> bool {
        matches!(self, Self::Identifier(identifier) if *identifier == name)
    }

    pub fn is_punct(&self, character: char) -> bool {
        matches!(self, Self::Punct(punct) if *punct == character)
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.into_cow_str())
    }
}

pub fn lexer<'code>()
-> impl Parser<'code, &'code str, Vec<Spanned<Token<'code>>>, extra::Err<LexError<'code>>> {
    let line_comment = just("//")
        .then(any().and_is(text::newline().not()).repeated())
        .to_slice()
        .map(Token::Comment);

    let block_comment = just("/*")
        .then(any().and_is(just("*/").not()).repeated())
        .then(just("*/"))
        .to_slice()
        .map(Token::Comment);

    let escape = just('\\').then(any()).ignored();

    let double_quoted = just('"')
        .then(choice((escape.clone(), none_of("\\\"\n").ignored())).repeated())
        .then(just('"'))
        .to_slice()
        .map(Token::Text);

    let single_quoted = just('\'')
        .then(choice((escape.clone(), none_of("\\'\n").ignored())).repeated())
        .then(just('\''))
        .to_slice()
        .map(Token::Text);

    // `${ ... }` bodies may nest braces (object literals, arrow bodies)
    let balanced = recursive(|balanced| {
        choice((
            just('{').then(balanced).then(just('}')).to_slice(),
            none_of("{}").to_slice(),
        ))
        .repeated()
        .to_slice()
    });

    let template = just('`')
        .then(
            choice((
                escape,
                just("${").then(balanced).then(just('}')).ignored(),
                none_of("`\\").ignored(),
            ))
            .repeated(),
        )
        .then(just('`'))
        .to_slice()
        .map(Token::Template);

    let number = any()
        .filter(char::is_ascii_digit)
        .then(
            any()
                .filter(|character: &char| {
                    character.is_ascii_alphanumeric() || *character == '.' || *character == '_'
                })
                .repeated(),
        )
        .to_slice()
        .map(Token::Number);

    let identifier = any()
        .filter(|character: &char| {
            character.is_alphabetic() || *character == '_' || *character == '$'
        })
        .then(
            any()
                .filter(|character: &char| {
                    character.is_alphanumeric() || *character == '_' || *character == '$'
                })
                .repeated(),
        )
        .to_slice()
        .map(Token::Identifier);

    // Catch-all: unterminated quotes and regex bodies end up here
    let punct = any()
        .filter(|character: &char| !character.is_whitespace())
        .map(Token::Punct);

    let token = choice((
        line_comment,
        block_comment,
        template,
        double_quoted,
        single_quoted,
        number,
        identifier,
        punct,
    ));

    token
        .map_with(|token, extra| Spanned {
            node: token,
            span: { let span: SimpleSpan = extra.span(); span.into_range() },
        })
        .padded()
        .repeated()
        .collect::<Vec<_>>()
        .padded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chumsky::prelude::Parser;

    fn tokens(code: &str) -> Vec<Token<'_>> {
        let result = lexer().parse(code);
        result.output().unwrap().iter().map(|token| token.node).collect()
    }

    #[test]
    fn lexes_function_header() {
        assert_eq!(
            tokens("export function render(el, params) {}"),
            vec![
                Token::Identifier("export"),
                Token::Identifier("function"),
                Token::Identifier("render"),
                Token::Punct('('),
                Token::Identifier("el"),
                Token::Punct(','),
                Token::Identifier("params"),
                Token::Punct(')'),
                Token::Punct('{'),
                Token::Punct('}'),
            ]
        );
    }

    #[test]
    fn strings_and_comments_are_single_tokens() {
        assert_eq!(
            tokens("// fetch(x)\nconst a = 'it\\'s'; /* { */ \"b\""),
            vec![
                Token::Comment("// fetch(x)"),
                Token::Identifier("const"),
                Token::Identifier("a"),
                Token::Punct('='),
                Token::Text("'it\\'s'"),
                Token::Punct(';'),
                Token::Comment("/* { */"),
                Token::Text("\"b\""),
            ]
        );
    }

    #[test]
    fn template_with_nested_interpolation() {
        assert_eq!(
            tokens("`a ${ {x: 1}.x } b` + 2"),
            vec![
                Token::Template("`a ${ {x: 1}.x } b`"),
                Token::Punct('+'),
                Token::Number("2"),
            ]
        );
    }

    #[test]
    fn unterminated_string_degrades_to_punct() {
        assert_eq!(
            tokens("\"abc\nx"),
            vec![
                Token::Punct('"'),
                Token::Identifier("abc"),
                Token::Identifier("x"),
            ]
        );
    }

    #[test]
    fn whitespace_only_input_is_empty() {
        assert!(tokens("  \n\t ").is_empty());
        assert!(tokens("").is_empty());
    }

    #[test]
    fn spans_are_byte_ranges() {
        let result = lexer().parse("a  $b");
        let spans: Vec<_> = result.output().unwrap().iter().map(|t| t.span.clone()).collect();
        assert_eq!(spans, vec![0..1, 3..5]);
    }
}
