//! Source rewriting for the entry point.
//!
//! The platform owns the listening socket, so the packaged entry must not
//! bind one, and the adapter needs the application object exported. Both
//! edits are anchored text patterns, not a parse.

use crate::entry::{Language, ModuleSystem};
use regex::Regex;
use std::sync::LazyLock;

/// Identifier used when no framework constructor is found.
pub const DEFAULT_APP_IDENT: &str = "app";

static APP_CONSTRUCTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::\s*[\w.<>, ]+?\s*)?=\s*(?:new\s+)?(?:express|fastify|Fastify|Koa|koa|Hono|polka|connect)\s*\(",
    )
    .unwrap()
});

static ESM_DEFAULT_EXPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*export\s+default\b").unwrap());

static CLASSIC_EXPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)\bmodule\.exports\s*=[^=]").unwrap());

/// Name of the application object, from its framework constructor call.
pub fn detect_app_ident(source: &str) -> String {
    APP_CONSTRUCTOR
        .captures(source)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| DEFAULT_APP_IDENT.to_string())
}

/// Outcome of [`strip_listener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrippedSource {
    pub source: String,
    /// Listener calls removed.
    pub removed: usize,
    /// Listener calls found but left in place because their argument list
    /// never closes.
    pub unclosed: usize,
}

/// Variables bound to an HTTP server wrapping the application object, as in
/// `const server = http.createServer(app)`.
fn server_idents(source: &str, app: &str) -> Vec<String> {
    let pattern = format!(
        r"(?m)^[ \t]*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*=\s*{}",
        create_server_call(app)
    );
    let Ok(declaration) = Regex::new(&pattern) else {
        return Vec::new();
    };
    declaration
        .captures_iter(source)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// `http.createServer(app)`, `https.createServer(options, app)` or a bare
/// imported `createServer(app)`.
fn create_server_call(app: &str) -> String {
    format!(
        r"(?:(?:https?|http2)\s*\.\s*)?create(?:Secure)?Server\s*\(\s*(?:[^()]*?,\s*)?{}\s*\)",
        regex::escape(app)
    )
}

/// Remove every statement that binds a listening socket for the
/// application, argument list and callback body included.
///
/// Receivers are the application object itself, a server created around it
/// (`http.createServer(app).listen(...)`), and any variable such a server was
/// assigned to. Only calls at the start of a statement line match
/// (optionally assigned, as in `const server = app.listen(...)`).
pub fn strip_listener(source: &str, app: &str) -> StrippedSource {
    let mut receivers = vec![regex::escape(app), create_server_call(app)];
    receivers.extend(server_idents(source, app).iter().map(|v| regex::escape(v)));
    let pattern = format!(
        r"(?m)^[ \t]*(?:(?:const|let|var)\s+[A-Za-z_$][\w$]*\s*=\s*)?(?:await\s+)?(?:{})\s*\.\s*listen\s*\(",
        receivers.join("|")
    );
    let Ok(listen) = Regex::new(&pattern) else {
        return StrippedSource {
            source: source.to_string(),
            removed: 0,
            unclosed: 0,
        };
    };

    let mut out = String::with_capacity(source.len());
    let mut copied = 0;
    let mut pos = 0;
    let mut removed = 0;
    let mut unclosed = 0;

    while let Some(m) = listen.find_at(source, pos) {
        match matching_paren(source, m.end() - 1) {
            Some(close) => {
                let end = statement_end(source, close + 1);
                out.push_str(&source[copied..m.start()]);
                copied = end;
                pos = end;
                removed += 1;
            }
            None => {
                pos = m.end();
                unclosed += 1;
            }
        }
    }
    out.push_str(&source[copied..]);
    StrippedSource {
        source: out,
        removed,
        unclosed,
    }
}

/// Append whichever export statements the module convention allows and the
/// source lacks. Running it on its own output changes nothing.
///
/// Declarative modules and compiled sources get both forms, the classic one
/// guarded so it is inert where `module` is undefined. Classic scripts only
/// get `module.exports`, since `export` is a syntax error there.
pub fn ensure_exports(
    source: &str,
    app: &str,
    module: ModuleSystem,
    language: Language,
) -> String {
    let wants_esm = module == ModuleSystem::Esm || language == Language::TypeScript;

    let mut additions = Vec::new();
    if wants_esm && !ESM_DEFAULT_EXPORT.is_match(source) {
        additions.push(format!("export default {};", app));
    }
    if !CLASSIC_EXPORT.is_match(source) {
        if wants_esm {
            additions.push(format!(
                "if (typeof module !== \"undefined\") module.exports = {};",
                app
            ));
        } else {
            additions.push(format!("module.exports = {};", app));
        }
    }

    if additions.is_empty() {
        return source.to_string();
    }

    let mut out = source.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    for line in additions {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[derive(Clone, Copy)]
enum Scan {
    /// Code; `braces` counts open `{` so a template substitution knows where
    /// it ends.
    Code { braces: usize },
    Quoted(u8),
    Template,
    LineComment,
    BlockComment,
    /// Regular expression literal; `class` is true inside `[...]`.
    Regex { class: bool },
}

/// Byte offset of the `)` closing the `(` at `open`, skipping parentheses
/// inside strings, template literals, regex literals and comments.
fn matching_paren(src: &str, open: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut stack = vec![Scan::Code { braces: 0 }];
    let mut depth = 0usize;
    let mut i = open;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        let top = stack.len() - 1;

        match stack[top] {
            Scan::Code { braces } => match b {
                b'(' => depth += 1,
                b')' => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                b'\'' | b'"' => stack.push(Scan::Quoted(b)),
                b'`' => stack.push(Scan::Template),
                b'/' if next == Some(b'/') => {
                    stack.push(Scan::LineComment);
                    i += 1;
                }
                b'/' if next == Some(b'*') => {
                    stack.push(Scan::BlockComment);
                    i += 1;
                }
                b'/' if regex_allowed(bytes, i) => stack.push(Scan::Regex { class: false }),
                b'{' => stack[top] = Scan::Code { braces: braces + 1 },
                b'}' if braces == 0 && top > 0 => {
                    stack.pop();
                }
                b'}' => stack[top] = Scan::Code { braces: braces.saturating_sub(1) },
                _ => {}
            },
            Scan::Quoted(quote) => match b {
                b'\\' => i += 1,
                b'\n' => {
                    stack.pop();
                }
                _ if b == quote => {
                    stack.pop();
                }
                _ => {}
            },
            Scan::Template => match b {
                b'\\' => i += 1,
                b'`' => {
                    stack.pop();
                }
                b'$' if next == Some(b'{') => {
                    stack.push(Scan::Code { braces: 0 });
                    i += 1;
                }
                _ => {}
            },
            Scan::LineComment => {
                if b == b'\n' {
                    stack.pop();
                }
            }
            Scan::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    stack.pop();
                    i += 1;
                }
            }
            Scan::Regex { class } => match b {
                b'\\' => i += 1,
                b'[' => stack[top] = Scan::Regex { class: true },
                b']' => stack[top] = Scan::Regex { class: false },
                b'/' if !class => {
                    stack.pop();
                }
                // A regex literal cannot span lines.
                b'\n' => return None,
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Keywords after which `/` starts an expression rather than dividing.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case",
    "do", "else", "yield", "await",
];

/// Whether a `/` at `at` opens a regex literal: true unless the previous
/// significant token ends an operand (identifier, number, `)` or `]`).
fn regex_allowed(bytes: &[u8], at: usize) -> bool {
    let mut i = at;
    while i > 0 && bytes[i - 1].is_ascii_whitespace() {
        i -= 1;
    }
    let Some(&prev) = i.checked_sub(1).and_then(|p| bytes.get(p)) else {
        return true;
    };
    match prev {
        b')' | b']' => false,
        b if b.is_ascii_alphanumeric() || b == b'_' || b == b'$' => {
            let end = i;
            while i > 0
                && (bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_' || bytes[i - 1] == b'$')
            {
                i -= 1;
            }
            std::str::from_utf8(&bytes[i..end])
                .is_ok_and(|word| REGEX_PREFIX_KEYWORDS.contains(&word))
        }
        _ => true,
    }
}

/// End of the statement whose call closed just before `from`: an optional
/// `;`, trailing blanks and one line break.
fn statement_end(src: &str, from: usize) -> usize {
    let bytes = src.as_bytes();
    let mut i = from;
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    if bytes.get(i) == Some(&b';') {
        i += 1;
    }
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    if bytes.get(i) == Some(&b'\r') {
        i += 1;
    }
    if bytes.get(i) == Some(&b'\n') {
        i += 1;
    }
    i
}
