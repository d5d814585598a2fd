//! Structural locators and line edits over Python sources.
//!
//! Procedures never edit at fixed offsets: every insertion point is found from
//! a function signature boundary, a class body, a field declaration, or the
//! import block, so an edit stays valid after earlier edits moved lines.

use std::sync::OnceLock;

use regex::Regex;

fn def_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\s*)(?:async\s+)?def\s+(\w+)\s*\(").expect("valid def regex"))
}

fn class_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\s*)class\s+(\w+)\s*[(:]").expect("valid class regex"))
}

/// A parsed function definition. Line indices are zero-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpan {
    /// Function name.
    pub name: String,
    /// Line of the `def`.
    pub def_line: usize,
    /// Last line of the (possibly multi-line) signature.
    pub signature_end: usize,
    /// First line after the signature and docstring.
    pub body_start: usize,
    /// Exclusive end of the function.
    pub end: usize,
    /// Indent width of the `def` line.
    pub indent: usize,
    /// Whitespace prefix for new body lines.
    pub body_indent: String,
    /// Parameter names, without `self`/`cls`.
    pub params: Vec<String>,
}

/// A class definition. Line indices are zero-based; `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSpan {
    /// Class name.
    pub name: String,
    /// Line of the `class` statement.
    pub start: usize,
    /// Exclusive end of the class body.
    pub end: usize,
    /// Indent width of the `class` line.
    pub indent: usize,
}

// ---------------------------------------------------------------------------
// Lines
// ---------------------------------------------------------------------------

/// Lines without terminators.
pub fn split_lines(src: &str) -> Vec<&str> {
    src.lines().collect()
}

/// Join lines back, keeping the source's trailing newline.
pub fn join_lines(lines: &[String], trailing_newline: bool) -> String {
    let mut out = lines.join("\n");
    if trailing_newline {
        out.push('\n');
    }
    out
}

/// Width of the leading whitespace, in bytes.
pub fn indent_width(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// The leading whitespace itself.
pub fn leading_whitespace(line: &str) -> &str {
    &line[..indent_width(line)]
}

fn is_blank_or_comment(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with('#')
}

/// Insert `new_lines` before line index `at`.
pub fn insert_lines(src: &str, at: usize, new_lines: &[String]) -> String {
    let mut lines: Vec<String> = src.lines().map(str::to_string).collect();
    let at = at.min(lines.len());
    for (offset, line) in new_lines.iter().enumerate() {
        lines.insert(at + offset, line.clone());
    }
    join_lines(&lines, src.ends_with('\n') || src.is_empty())
}

/// Replace line range `[start, end]` (inclusive) with `replacement`.
pub fn replace_lines(src: &str, start: usize, end: usize, replacement: &[String]) -> String {
    let lines: Vec<String> = src.lines().map(str::to_string).collect();
    let mut out = Vec::with_capacity(lines.len() + replacement.len());
    out.extend_from_slice(&lines[..start.min(lines.len())]);
    out.extend_from_slice(replacement);
    if end + 1 < lines.len() {
        out.extend_from_slice(&lines[end + 1..]);
    }
    join_lines(&out, src.ends_with('\n'))
}

/// Net bracket depth change of a line, ignoring brackets inside string
/// literals and comments.
fn bracket_delta(line: &str) -> i32 {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in line.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '#' => break,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth
}

/// Byte offset of the parenthesis closing the first call in `stmt`, skipping
/// string literals and comments.
pub fn outer_call_close(stmt: &str) -> Option<usize> {
    let mut depth = 0;
    let mut opened = false;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut comment = false;
    for (i, c) in stmt.char_indices() {
        if comment {
            comment = c != '\n';
            continue;
        }
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '#' => comment = true,
            '(' | '[' | '{' => {
                opened |= c == '(' && depth == 0;
                depth += 1;
            }
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 && opened && c == ')' {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Last line of the statement starting at `start`, following open brackets.
pub fn statement_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 0;
    for (i, line) in lines.iter().enumerate().skip(start) {
        depth += bracket_delta(line);
        if depth <= 0 && !line.trim_end().ends_with('\\') {
            return i;
        }
    }
    lines.len().saturating_sub(1)
}

/// Exclusive end of the block opened at `header`: the first following
/// non-blank line indented at or left of `indent`.
fn block_end(lines: &[&str], after: usize, indent: usize) -> usize {
    lines
        .iter()
        .enumerate()
        .skip(after + 1)
        .find(|(_, l)| !is_blank_or_comment(l) && indent_width(l) <= indent)
        .map_or(lines.len(), |(i, _)| i)
}

// ---------------------------------------------------------------------------
// Functions and classes
// ---------------------------------------------------------------------------

/// Every `def` in the source, nested ones included, in line order.
pub fn functions(src: &str) -> Vec<FunctionSpan> {
    let lines = split_lines(src);
    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = def_regex().captures(line) else {
            continue;
        };
        let indent = caps[1].len();
        let name = caps[2].to_string();

        let signature_end = statement_end(&lines, i);
        let signature: String = lines[i..=signature_end].join("\n");
        let params = parse_params(&signature);

        let Some(first_body) = (signature_end + 1..lines.len()).find(|j| !lines[*j].trim().is_empty())
        else {
            continue;
        };
        if indent_width(lines[first_body]) <= indent {
            // One-line body (`def f(): pass`); nothing to insert into.
            continue;
        }
        let body_indent = leading_whitespace(lines[first_body]).to_string();
        let body_start = skip_docstring(&lines, first_body);
        // Measured from the body so a dedented docstring line cannot end the
        // function before its body starts.
        let end = block_end(&lines, body_start - 1, indent);

        out.push(FunctionSpan {
            name,
            def_line: i,
            signature_end,
            body_start,
            end,
            indent,
            body_indent,
            params,
        });
    }
    out
}

/// Index of the first line after a docstring starting at `first`, or `first`
/// when there is none.
fn skip_docstring(lines: &[&str], first: usize) -> usize {
    let trimmed = lines[first].trim_start();
    let trimmed = trimmed
        .strip_prefix('r')
        .or_else(|| trimmed.strip_prefix('u'))
        .unwrap_or(trimmed);
    let quote = if trimmed.starts_with("\"\"\"") {
        "\"\"\""
    } else if trimmed.starts_with("'''") {
        "'''"
    } else {
        return first;
    };
    if trimmed[3..].contains(quote) {
        return first + 1;
    }
    (first + 1..lines.len())
        .find(|j| lines[*j].contains(quote))
        .map_or(lines.len(), |j| j + 1)
}

fn parse_params(signature: &str) -> Vec<String> {
    let Some(open) = signature.find('(') else {
        return Vec::new();
    };
    let mut depth = 0;
    let mut current = String::new();
    let mut parts = Vec::new();
    for c in signature[open + 1..].chars() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' if depth == 0 => break,
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
        .iter()
        .filter_map(|p| {
            let name = p
                .split([':', '='])
                .next()?
                .trim()
                .trim_start_matches('*')
                .to_string();
            (!name.is_empty() && name != "self" && name != "cls" && name != "/").then_some(name)
        })
        .collect()
}

/// First function named exactly `name`.
pub fn find_function(src: &str, name: &str) -> Option<FunctionSpan> {
    functions(src).into_iter().find(|f| f.name == name)
}

/// First function whose name equals one of `names`, else the first whose name
/// contains one of them.
pub fn find_function_like(src: &str, names: &[String]) -> Option<FunctionSpan> {
    let all = functions(src);
    names
        .iter()
        .find_map(|n| all.iter().find(|f| &f.name == n))
        .or_else(|| {
            names
                .iter()
                .find_map(|n| all.iter().find(|f| f.name.contains(n.as_str())))
        })
        .cloned()
}

/// Every class definition, in line order.
pub fn classes(src: &str) -> Vec<ClassSpan> {
    let lines = split_lines(src);
    lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| {
            let caps = class_regex().captures(line)?;
            let indent = caps[1].len();
            Some(ClassSpan {
                name: caps[2].to_string(),
                start: i,
                end: block_end(&lines, statement_end(&lines, i), indent),
                indent,
            })
        })
        .collect()
}

/// First class named exactly `name`.
pub fn find_class(src: &str, name: &str) -> Option<ClassSpan> {
    classes(src).into_iter().find(|c| c.name == name)
}

/// Line of `name = ...` or `name: T ...` inside `range`.
pub fn find_field_line(src: &str, range: (usize, usize), name: &str) -> Option<usize> {
    let pattern = format!(r"^\s*{}\s*[:=]", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    split_lines(src)
        .iter()
        .enumerate()
        .skip(range.0)
        .take(range.1.saturating_sub(range.0))
        .find(|(_, line)| re.is_match(line))
        .map(|(i, _)| i)
}

/// Line assigning `var` inside a function body.
pub fn find_assignment(src: &str, span: &FunctionSpan, var: &str) -> Option<usize> {
    let pattern = format!(r"^\s*{}\s*(?::[^=]+)?=[^=]", regex::escape(var));
    let re = Regex::new(&pattern).ok()?;
    split_lines(src)
        .iter()
        .enumerate()
        .take(span.end)
        .skip(span.body_start)
        .find(|(_, line)| re.is_match(line))
        .map(|(i, _)| i)
}

/// Line after the statement at `line`, skipping an immediately following
/// `if <var> is None` / `if not <var>` block.
pub fn after_assignment(src: &str, line: usize, var: &str) -> usize {
    let lines = split_lines(src);
    let next = statement_end(&lines, line) + 1;
    let Some(check) = (next..lines.len()).find(|j| !lines[*j].trim().is_empty()) else {
        return next;
    };
    let t = lines[check].trim();
    let is_none_check = t.starts_with(&format!("if not {var}"))
        || t.starts_with(&format!("if {var} is None"));
    if is_none_check {
        block_end(&lines, statement_end(&lines, check), indent_width(lines[check]))
    } else {
        next
    }
}

/// Whether the function body already carries `marker`.
pub fn body_contains(src: &str, span: &FunctionSpan, marker: &str) -> bool {
    split_lines(src)
        .iter()
        .take(span.end)
        .skip(span.def_line)
        .any(|l| l.contains(marker))
}

// ---------------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------------

/// Whether `name` is imported by any `from ... import` or `import` line.
pub fn imports_name(src: &str, name: &str) -> bool {
    let lines = split_lines(src);
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim_start();
        if line.starts_with("from ") && line.contains(" import ") {
            let end = statement_end(&lines, i);
            let stmt = lines[i..=end].join(" ");
            let names = stmt.split(" import ").nth(1).unwrap_or_default();
            if names
                .split(|c: char| c == ',' || c == '(' || c == ')' || c.is_whitespace())
                .any(|n| n == name)
            {
                return true;
            }
            i = end + 1;
            continue;
        }
        if let Some(rest) = line.strip_prefix("import ") {
            if rest.split(',').any(|m| m.split_whitespace().last() == Some(name)) {
                return true;
            }
        }
        i += 1;
    }
    false
}

/// Add `from module import name` unless `name` is already imported. Extends
/// an existing single-line import from the same module when there is one.
pub fn ensure_import(src: &str, module: &str, name: &str) -> String {
    if imports_name(src, name) {
        return src.to_string();
    }
    let lines = split_lines(src);
    let prefix = format!("from {module} import ");

    if let Some(i) = lines.iter().position(|l| {
        l.starts_with(&prefix) && !l.contains('(') && !l.trim_end().ends_with('\\')
    }) {
        let extended = format!("{}, {name}", lines[i].trim_end());
        return replace_lines(src, i, i, &[extended]);
    }

    let mut insert_at = 0;
    let mut i = 0;
    if lines
        .first()
        .is_some_and(|l| l.trim_start().starts_with("\"\"\"") || l.trim_start().starts_with("'''"))
    {
        insert_at = skip_docstring(&lines, 0);
        i = insert_at;
    }
    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("import ") || line.starts_with("from ") {
            let end = statement_end(&lines, i);
            insert_at = end + 1;
            i = end + 1;
            continue;
        }
        i += 1;
    }
    insert_lines(src, insert_at, &[format!("{prefix}{name}")])
}

// ---------------------------------------------------------------------------
// Diffs
// ---------------------------------------------------------------------------

/// Minimal single-hunk line diff between two versions of a file.
pub fn line_diff(path: &str, old: &str, new: &str) -> String {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let prefix = old_lines
        .iter()
        .zip(&new_lines)
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = old_lines.len().min(new_lines.len()) - prefix;
    let suffix = old_lines
        .iter()
        .rev()
        .zip(new_lines.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let removed = &old_lines[prefix..old_lines.len() - suffix];
    let added = &new_lines[prefix..new_lines.len() - suffix];

    let mut out = format!(
        "--- a/{path}\n+++ b/{path}\n@@ -{},{} +{},{} @@\n",
        prefix + 1,
        removed.len(),
        prefix + 1,
        added.len()
    );
    for line in removed {
        out.push('-');
        out.push_str(line);
        out.push('\n');
    }
    for line in added {
        out.push('+');
        out.push_str(line);
        out.push('\n');
    }
    out
}
