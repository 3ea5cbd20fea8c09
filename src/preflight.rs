//! Source preflight: normalization and structural validation.
//!
//! Before any session is opened, submitted program text is normalized
//! (line endings, leading tabs, trailing whitespace) and scanned for
//! structural faults that would make the run pointless: unbalanced
//! delimiters, unterminated string literals, and dedents that match no
//! enclosing indentation level. Rejection here is cheap; rejection after
//! launching a runtime is not.

use thiserror::Error;

const TAB_WIDTH: usize = 4;

/// A structural fault found before execution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreflightError {
    /// Unbalanced delimiters or an unterminated string literal.
    #[error("SyntaxError: {0}")]
    Syntax(String),
    /// A dedent that matches no enclosing indentation level.
    #[error("IndentationError: {0}")]
    Indentation(String),
}

/// Drop Markdown code-fence lines from `source`.
///
/// Model- and human-authored snippets routinely arrive wrapped in
/// triple-backtick fences; any line carrying the fence marker is dropped
/// wholesale, wherever the marker sits on the line.
pub fn strip_code_fences(source: &str) -> String {
    source
        .lines()
        .filter(|line| !line.contains("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalize and validate `source`, returning the formatted text.
///
/// Normalization: CRLF becomes LF, leading tabs expand to four spaces,
/// trailing whitespace is stripped per line, and the result ends with
/// exactly one newline (empty input stays empty). Validation rejects
/// unbalanced brackets, unterminated strings, and inconsistent dedents.
pub fn format_source(source: &str) -> Result<String, PreflightError> {
    let normalized = normalize(source);
    validate(&normalized)?;
    Ok(normalized)
}

fn normalize(source: &str) -> String {
    let source = source.replace("\r\n", "\n");
    let mut out = String::with_capacity(source.len());
    for line in source.split('\n') {
        out.push_str(expand_leading_tabs(line).trim_end());
        out.push('\n');
    }
    // split('\n') yields a final empty piece; drop the newline added for it.
    out.pop();
    while out.ends_with('\n') {
        out.pop();
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn expand_leading_tabs(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_indent = true;
    for ch in line.chars() {
        match ch {
            '\t' if in_indent => out.push_str(&" ".repeat(TAB_WIDTH)),
            _ => {
                if ch != ' ' {
                    in_indent = false;
                }
                out.push(ch);
            }
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrState {
    None,
    Single(char),
    Triple(char),
}

/// Per-line scan state captured at the start of each line.
#[derive(Debug, Clone, Copy)]
struct LineStart {
    string: StrState,
    bracket_depth: usize,
}

fn validate(source: &str) -> Result<(), PreflightError> {
    let starts = scan_delimiters(source)?;
    check_indentation(source, &starts)
}

/// Walk the whole text once, tracking string and bracket state. Returns
/// the state at the start of each line so the indentation pass can skip
/// continuation lines.
fn scan_delimiters(source: &str) -> Result<Vec<LineStart>, PreflightError> {
    let mut starts = Vec::new();
    let mut string = StrState::None;
    // Open brackets with the line each was opened on.
    let mut brackets: Vec<(char, usize)> = Vec::new();

    for (idx, line) in source.split('\n').enumerate() {
        let lineno = idx + 1;
        starts.push(LineStart {
            string,
            bracket_depth: brackets.len(),
        });

        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let ch = chars[i];
            match string {
                StrState::Single(quote) => {
                    if ch == '\\' {
                        i += 1;
                    } else if ch == quote {
                        string = StrState::None;
                    }
                }
                StrState::Triple(quote) => {
                    if ch == '\\' {
                        i += 1;
                    } else if ch == quote && chars[i..].iter().take(3).filter(|c| **c == quote).count() == 3
                    {
                        string = StrState::None;
                        i += 2;
                    }
                }
                StrState::None => match ch {
                    '#' => break,
                    '\'' | '"' => {
                        if chars[i..].iter().take(3).filter(|c| **c == ch).count() == 3 {
                            string = StrState::Triple(ch);
                            i += 2;
                        } else {
                            string = StrState::Single(ch);
                        }
                    }
                    '(' | '[' | '{' => brackets.push((ch, lineno)),
                    ')' | ']' | '}' => {
                        let expected = match ch {
                            ')' => '(',
                            ']' => '[',
                            _ => '{',
                        };
                        match brackets.pop() {
                            Some((open, _)) if open == expected => {}
                            Some((open, open_line)) => {
                                return Err(PreflightError::Syntax(format!(
                                    "closing '{ch}' does not match opening '{open}' (line {open_line})"
                                )));
                            }
                            None => {
                                return Err(PreflightError::Syntax(format!(
                                    "unmatched '{ch}' (line {lineno})"
                                )));
                            }
                        }
                    }
                    _ => {}
                },
            }
            i += 1;
        }

        // Single-quoted strings do not cross line boundaries unless the
        // line ends with a backslash continuation.
        if let StrState::Single(quote) = string {
            if !line.ends_with('\\') {
                return Err(PreflightError::Syntax(format!(
                    "unterminated string literal '{quote}' (line {lineno})"
                )));
            }
        }
    }

    if let StrState::Triple(quote) = string {
        return Err(PreflightError::Syntax(format!(
            "unterminated triple-quoted string literal '{quote}'"
        )));
    }
    if let Some((open, open_line)) = brackets.pop() {
        return Err(PreflightError::Syntax(format!(
            "'{open}' was never closed (line {open_line})"
        )));
    }
    Ok(starts)
}

/// Check that every dedent on a logical top-level line returns to some
/// enclosing indentation level. Lines inside brackets or strings are
/// continuations and exempt.
fn check_indentation(source: &str, starts: &[LineStart]) -> Result<(), PreflightError> {
    let mut levels: Vec<usize> = vec![0];
    for (idx, line) in source.split('\n').enumerate() {
        let lineno = idx + 1;
        let start = &starts[idx];
        if start.bracket_depth > 0 || start.string != StrState::None {
            continue;
        }
        let stripped = line.trim_start();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }
        let indent = line.len() - stripped.len();
        let current = *levels.last().unwrap_or(&0);
        if indent > current {
            levels.push(indent);
        } else if indent < current {
            while levels.len() > 1 && *levels.last().unwrap_or(&0) > indent {
                levels.pop();
            }
            if *levels.last().unwrap_or(&0) != indent {
                return Err(PreflightError::Indentation(format!(
                    "unindent does not match any outer indentation level (line {lineno})"
                )));
            }
        }
    }
    Ok(())
}
