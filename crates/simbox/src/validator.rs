//! Static vetting of generated programs.
//!
//! The deny-list is a heuristic over the raw text and catches careless
//! output, not a determined adversary. Isolation comes from the host.

use std::ops::Range;

use regex::Regex;

use crate::config::SandboxConfig;
use crate::error::{ConfigError, DenyCategory, ExportProblem, ValidationFailure};
use crate::source::{Token, Tokens};
use crate::transformer::{TransformedProgram, Transformer};

pub type ValidationVerdict = Result<(), ValidationFailure>;

/// `(rule, pattern, category)`
const BUILTIN_RULES: [(&str, &str, DenyCategory); 10] = [
    ("fetch", r"fetch\s*\(", DenyCategory::Network),
    ("XMLHttpRequest", r"XMLHttpRequest", DenyCategory::Network),
    ("WebSocket", r"WebSocket", DenyCategory::Network),
    ("document.cookie", r"document\.cookie", DenyCategory::Storage),
    ("localStorage", r"localStorage", DenyCategory::Storage),
    ("sessionStorage", r"sessionStorage", DenyCategory::Storage),
    ("location", r"location\.", DenyCategory::Navigation),
    ("eval", r"eval\s*\(", DenyCategory::DynamicEvaluation),
    ("Function", r"Function\s*\(", DenyCategory::DynamicEvaluation),
    ("import()", r"import\s*\(", DenyCategory::DynamicEvaluation),
];

/// Parses a function body with the host's own parser.
pub trait SyntaxProbe {
    fn probe_syntax(&self, body: &str) -> Result<(), String>;
}

#[derive(Debug)]
struct DenyRule {
    rule: String,
    pattern: Regex,
    category: DenyCategory,
}

#[derive(Debug)]
pub struct Validator {
    rules: Vec<DenyRule>,
}

impl Validator {
    pub fn new(config: &SandboxConfig) -> Result<Self, ConfigError> {
        let builtin = BUILTIN_RULES
            .iter()
            .map(|(rule, pattern, category)| compile(rule, pattern, *category));
        let custom = config
            .extra_deny_patterns
            .iter()
            .map(|pattern| compile(pattern, pattern, DenyCategory::Custom));
        let rules = builtin.chain(custom).collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }

    /// Deny-list and export shape; pure over `source`.
    pub fn validate(&self, source: &str) -> ValidationVerdict {
        self.check_deny_list(source)?;
        check_export(&Tokens::new(source))
    }

    pub fn probe_syntax(
        &self,
        program: &TransformedProgram,
        probe: &impl SyntaxProbe,
    ) -> ValidationVerdict {
        probe
            .probe_syntax(&program.probe_body)
            .map_err(|message| ValidationFailure::Syntax { message })
    }

    /// Validates, transforms and syntax-probes `source` in one go.
    pub fn vet(
        &self,
        source: &str,
        transformer: &Transformer,
        probe: &impl SyntaxProbe,
    ) -> Result<TransformedProgram, ValidationFailure> {
        self.validate(source)?;
        let program = transformer.transform(source);
        self.probe_syntax(&program, probe)?;
        Ok(program)
    }

    /// Reports the rule matching earliest in the text.
    fn check_deny_list(&self, source: &str) -> ValidationVerdict {
        let hit = self
            .rules
            .iter()
            .filter_map(|rule| rule.pattern.find(source).map(|found| (found.range(), rule)))
            .min_by_key(|(span, _)| span.start);
        match hit {
            Some((span, rule)) => Err(ValidationFailure::Forbidden {
                rule: rule.rule.clone(),
                category: rule.category,
                span,
            }),
            None => Ok(()),
        }
    }
}

fn compile(rule: &str, pattern: &str, category: DenyCategory) -> Result<DenyRule, ConfigError> {
    let pattern = Regex::new(pattern).map_err(|error| ConfigError::InvalidDenyPattern {
        pattern: pattern.to_owned(),
        message: error.to_string(),
    })?;
    Ok(DenyRule {
        rule: rule.to_owned(),
        pattern,
        category,
    })
}

fn export_failure(problem: ExportProblem, span: Option<Range<usize>>) -> ValidationVerdict {
    Err(ValidationFailure::Export { problem, span })
}

/// Exactly one top-level `export`, of the form `export [async] function render(a, b) {`.
fn check_export(tokens: &Tokens) -> ValidationVerdict {
    let exports: Vec<usize> = tokens
        .top_level()
        .filter(|index| {
            let member = *index > 0 && tokens.is_punct(index - 1, '.');
            tokens.is_identifier(*index, "export") && !member
        })
        .collect();

    let export = match exports.as_slice() {
        [] => return export_failure(ExportProblem::Missing, None),
        [export] => *export,
        [_, second, ..] => {
            return export_failure(
                ExportProblem::MultipleExports {
                    count: exports.len(),
                },
                Some(tokens.span(*second)),
            );
        }
    };

    let function = if tokens.is_identifier(export + 1, "async") {
        export + 2
    } else {
        export + 1
    };
    let is_render_function = tokens.is_identifier(function, "function")
        && tokens.is_identifier(function + 1, "render")
        && tokens.is_punct(function + 2, '(');
    if !is_render_function {
        let end = tokens.statement_end(export);
        let mentions_render = (export..=end).any(|index| tokens.is_identifier(index, "render"));
        let problem = if mentions_render {
            ExportProblem::UnsupportedForm
        } else {
            ExportProblem::Missing
        };
        return export_failure(problem, Some(tokens.span_between(export, end)));
    }

    let open = function + 2;
    let Some(close) = tokens.matching_close(open) else {
        return export_failure(ExportProblem::UnsupportedForm, Some(tokens.span(export)));
    };
    let span = Some(tokens.span_between(export, close));

    let parameters = split_parameters(tokens, open, close);
    if parameters
        .iter()
        .any(|parameter| is_rest(tokens, parameter.start))
    {
        return export_failure(ExportProblem::RestParameter, span);
    }
    if parameters.len() != 2 {
        return export_failure(
            ExportProblem::WrongParameterCount {
                found: parameters.len(),
            },
            span,
        );
    }
    if !tokens.is_punct(close + 1, '{') {
        return export_failure(ExportProblem::UnsupportedForm, span);
    }
    Ok(())
}

/// Token ranges of the parameters between `open` and `close`; a trailing comma adds none.
fn split_parameters(tokens: &Tokens, open: usize, close: usize) -> Vec<Range<usize>> {
    let depth = tokens.depth(open) + 1;
    let mut parameters = Vec::new();
    let mut start = open + 1;
    for index in open + 1..=close {
        let separates =
            index == close || (tokens.depth(index) == depth && tokens.is_punct(index, ','));
        if separates {
            if index > start {
                parameters.push(start..index);
            }
            start = index + 1;
        }
    }
    parameters
}

fn is_rest(tokens: &Tokens, start: usize) -> bool {
    (start..start + 3).all(|index| tokens.is_punct(index, '.'))
}

/// Bracket balance and stray quote check, the structural subset of a parse.
pub fn check_structure(body: &str) -> Result<(), String> {
    let tokens = Tokens::new(body);
    let line_of = |index: usize| body[..tokens.span(index).start].matches('\n').count() + 1;
    let mut open: Vec<(char, usize)> = Vec::new();

    for index in 0..tokens.len() {
        let Some(Token::Punct(character)) = tokens.token(index) else {
            continue;
        };
        match character {
            '(' | '[' | '{' => open.push((character, index)),
            ')' | ']' | '}' => {
                let expected = match character {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match open.pop() {
                    Some((opening, _)) if opening == expected => {}
                    _ => {
                        return Err(format!(
                            "Unexpected token '{character}' (line {})",
                            line_of(index)
                        ));
                    }
                }
            }
            '"' | '\'' | '`' => {
                return Err(format!(
                    "Invalid or unexpected token (line {})",
                    line_of(index)
                ));
            }
            _ => {}
        }
    }

    match open.last() {
        Some((character, index)) => Err(format!(
            "Unexpected end of input, '{character}' opened on line {} is never closed",
            line_of(*index)
        )),
        None => Ok(()),
    }
}
