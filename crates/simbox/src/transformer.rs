//! Rewrites a generated module into one the sandbox can load.
//!
//! Every step records span edits against the same token stream of the
//! original text. Steps run in a fixed order and an edit overlapping one
//! recorded by an earlier step is dropped, so import stripping wins over
//! neutralization, which wins over redeclaration removal. Removed text
//! keeps its line breaks, which keeps user lines at a fixed offset (the
//! prelude height) in the output.

use std::fmt::Write as _;
use std::ops::Range;

use crate::config::{LibraryGlobal, SandboxConfig};
use crate::source::{SourceEdits, Token, Tokens};

/// Name the user's render function is renamed to.
pub const USER_RENDER: &str = "__simboxRender";
/// Prelude helper producing throwing stand-ins for forbidden constructs.
pub const FORBIDDEN_STUB: &str = "__simboxForbidden";

const DECLARATION_KEYWORDS: [&str; 3] = ["const", "let", "var"];
const NEUTRALIZED_CALLEES: [&str; 2] = ["eval", "Function"];

/// What each rewriting step changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformReport {
    pub imports_stripped: usize,
    pub constructs_neutralized: usize,
    pub redeclarations_removed: usize,
    pub render_adapted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformedProgram {
    /// Loadable ES module.
    pub module_source: String,
    /// The same program with module-only syntax removed, parseable as a function body.
    pub probe_body: String,
    /// Lines the prelude adds in front of the user's first line.
    pub prelude_lines: usize,
    pub report: TransformReport,
}

impl TransformedProgram {
    /// Maps a 1-based line of `module_source` back to the user's source.
    pub fn original_line(&self, line: u32) -> Option<u32> {
        let line = (line as usize).checked_sub(self.prelude_lines)?;
        (line > 0).then_some(line as u32)
    }
}

pub struct Transformer {
    library_root: String,
    globals: Vec<LibraryGlobal>,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new(&SandboxConfig::default())
    }
}

impl Transformer {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            library_root: config.library_root.clone(),
            globals: config.globals.clone(),
        }
    }

    /// Best-effort rewrite; never fails.
    pub fn transform(&self, source: &str) -> TransformedProgram {
        let tokens = Tokens::new(source);
        let mut edits = SourceEdits::new();
        let mut report = TransformReport::default();

        report.imports_stripped = strip_imports(&tokens, &mut edits);
        report.constructs_neutralized = neutralize_dynamic_evaluation(&tokens, &mut edits);
        report.redeclarations_removed = self.remove_redeclarations(&tokens, &mut edits);
        report.render_adapted = adapt_render(&tokens, &mut edits);

        let body = edits.apply(source);
        let prelude = self.prelude();
        let prelude_lines = prelude.matches('\n').count();

        let mut module_source = String::with_capacity(prelude.len() + body.len() + 256);
        module_source.push_str(&prelude);
        module_source.push_str(&body);
        let mut probe_body = module_source.clone();
        if report.render_adapted {
            let adapter = render_adapter();
            module_source.push_str("\nexport ");
            module_source.push_str(&adapter);
            probe_body.push('\n');
            probe_body.push_str(&adapter);
        }

        log::debug!(
            "transformed program: {} imports stripped, {} neutralized, {} redeclarations removed",
            report.imports_stripped,
            report.constructs_neutralized,
            report.redeclarations_removed
        );

        TransformedProgram {
            module_source,
            probe_body,
            prelude_lines,
            report,
        }
    }

    fn prelude(&self) -> String {
        let mut prelude = format!(
            "const {FORBIDDEN_STUB} = (name) => function () {{ throw new Error(`${{name}} is not allowed in the sandbox`); }};\n"
        );
        for LibraryGlobal { alias, global } in &self.globals {
            let _ = writeln!(
                prelude,
                "const {alias} = {root}?.{global} ?? globalThis.{global};",
                root = self.library_root
            );
        }
        prelude
    }

    fn is_global_alias(&self, name: &str) -> bool {
        self.globals.iter().any(|global| global.alias == name)
    }

    /// Top-level `const|let|var` declarators binding a host global alias.
    fn remove_redeclarations(&self, tokens: &Tokens, edits: &mut SourceEdits) -> usize {
        let mut removed = 0;
        let declarations: Vec<usize> = tokens
            .top_level()
            .filter(|index| {
                DECLARATION_KEYWORDS
                    .iter()
                    .any(|keyword| tokens.is_identifier(*index, keyword))
                    && !is_member_access(tokens, *index)
            })
            .collect();

        for keyword in declarations {
            let end = tokens.statement_end(keyword);
            let declarators = split_declarators(tokens, keyword, end);
            let shadowing: Vec<usize> = declarators
                .iter()
                .enumerate()
                .filter(|(_, declarator)| {
                    matches!(
                        tokens.token(declarator.start),
                        Some(Token::Identifier(name)) if self.is_global_alias(name)
                    )
                })
                .map(|(position, _)| position)
                .collect();
            if shadowing.is_empty() {
                continue;
            }

            if shadowing.len() == declarators.len() {
                let range = tokens.span_between(keyword, end);
                if !edits.overlaps(&range) {
                    edits.remove(range, tokens.source());
                    removed += shadowing.len();
                }
                continue;
            }

            for position in shadowing {
                let declarator = &declarators[position];
                // Take the separating comma with it: the following one, or the
                // preceding one for the last declarator
                let (first, last) = if position + 1 < declarators.len() {
                    (declarator.start, declarator.end + 1)
                } else {
                    (declarator.start - 1, declarator.end)
                };
                let range = tokens.span_between(first, last);
                if !edits.overlaps(&range) {
                    edits.remove(range, tokens.source());
                    removed += 1;
                }
            }
        }
        removed
    }
}

/// Token index range (inclusive) of one declarator.
struct Declarator {
    start: usize,
    end: usize,
}

fn split_declarators(tokens: &Tokens, keyword: usize, end: usize) -> Vec<Declarator> {
    let depth = tokens.depth(keyword);
    let last = if tokens.is_punct(end, ';') { end - 1 } else { end };
    let mut declarators = Vec::new();
    let mut start = keyword + 1;
    for index in keyword + 1..=last {
        if tokens.depth(index) == depth && tokens.is_punct(index, ',') {
            if index > start {
                declarators.push(Declarator {
                    start,
                    end: index - 1,
                });
            }
            start = index + 1;
        }
    }
    if start <= last {
        declarators.push(Declarator { start, end: last });
    }
    declarators
}

fn is_member_access(tokens: &Tokens, index: usize) -> bool {
    index > 0 && tokens.is_punct(index - 1, '.')
}

/// Static `import ... from '...'` statements and `require('...')` calls.
fn strip_imports(tokens: &Tokens, edits: &mut SourceEdits) -> usize {
    let mut stripped = 0;
    let source = tokens.source();

    let imports: Vec<usize> = tokens
        .top_level()
        .filter(|index| {
            tokens.is_identifier(*index, "import")
                && !is_member_access(tokens, *index)
                && !tokens.is_punct(index + 1, '(')
                && !tokens.is_punct(index + 1, '.')
        })
        .collect();
    for import in imports {
        let mut end = None;
        for index in import + 1..tokens.len() {
            match tokens.token(index) {
                Some(Token::Text(_)) if tokens.depth(index) == 0 => {
                    end = Some(index);
                    break;
                }
                Some(Token::Punct(';')) if tokens.depth(index) == 0 => {
                    end = Some(index);
                    break;
                }
                _ => {}
            }
        }
        let mut end = end.unwrap_or_else(|| tokens.statement_end(import));
        if tokens.is_punct(end + 1, ';') {
            end += 1;
        }
        let range = tokens.span_between(import, end);
        if !edits.overlaps(&range) {
            edits.remove(range, source);
            stripped += 1;
        }
    }

    for index in 0..tokens.len() {
        let is_require_call = tokens.is_identifier(index, "require")
            && !is_member_access(tokens, index)
            && tokens.is_punct(index + 1, '(')
            && matches!(tokens.token(index + 2), Some(Token::Text(_)))
            && tokens.is_punct(index + 3, ')');
        if !is_require_call {
            continue;
        }
        let start = tokens.statement_start(index);
        let is_declaration = DECLARATION_KEYWORDS
            .iter()
            .any(|keyword| tokens.is_identifier(start, keyword));
        let (range, replacement): (Range<usize>, &str) = if is_declaration {
            (tokens.span_between(start, tokens.statement_end(start)), "")
        } else {
            (tokens.span_between(index, index + 3), "undefined")
        };
        if edits.overlaps(&range) {
            continue;
        }
        if replacement.is_empty() {
            edits.remove(range, source);
        } else {
            edits.replace(range, replacement);
        }
        stripped += 1;
    }
    stripped
}

/// `eval(`, `Function(` and `new Function(`, including member forms like
/// `window.eval(`, become calls of the throwing prelude stub.
fn neutralize_dynamic_evaluation(tokens: &Tokens, edits: &mut SourceEdits) -> usize {
    let mut neutralized = 0;
    for index in 0..tokens.len() {
        let Some(Token::Identifier(name)) = tokens.token(index) else {
            continue;
        };
        if !NEUTRALIZED_CALLEES.contains(&name) || !tokens.is_punct(index + 1, '(') {
            continue;
        }
        let mut start = index;
        while start >= 2
            && tokens.is_punct(start - 1, '.')
            && matches!(tokens.token(start - 2), Some(Token::Identifier(_)))
        {
            start -= 2;
        }
        let range = tokens.span_between(start, index);
        if edits.overlaps(&range) {
            continue;
        }
        edits.replace(range, format!("({FORBIDDEN_STUB}(\"{name}\"))"));
        neutralized += 1;
    }
    neutralized
}

/// Renames the exported `render` to the internal name; the fixed adapter
/// export is appended by the caller.
fn adapt_render(tokens: &Tokens, edits: &mut SourceEdits) -> bool {
    let Some(export) = tokens.top_level().find(|index| {
        tokens.is_identifier(*index, "export") && !is_member_access(tokens, *index)
    }) else {
        return false;
    };
    let function = if tokens.is_identifier(export + 1, "async") {
        export + 2
    } else {
        export + 1
    };
    if !tokens.is_identifier(function, "function")
        || !tokens.is_identifier(function + 1, "render")
        || !tokens.is_punct(function + 2, '(')
    {
        return false;
    }
    edits.replace(tokens.span(export), "");
    edits.replace(tokens.span(function + 1), USER_RENDER);
    true
}

/// The fixed `render(host, params, context)` contract wrapped around the user's function.
fn render_adapter() -> String {
    format!(
        "function render(host, params, context) {{\n  return {USER_RENDER}(host, params ?? (context ? context.params : undefined), context);\n}}\n"
    )
}
