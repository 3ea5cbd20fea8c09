//! Grammar-backed parser for the filesystem command language.
//!
//! The grammar is compiled into the binary at build time from
//! `grammar.pest`; the parser holds no state and a single instance can be
//! shared across any number of sessions and threads.

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

use super::{Command, ParseError};

#[derive(Parser)]
#[grammar = "command/grammar.pest"]
struct CommandParser;

/// Parse one command line into its typed form.
pub fn parse_line(input: &str) -> Result<Command, ParseError> {
    let mut pairs = CommandParser::parse(Rule::line, input).map_err(|e| ParseError {
        message: e.to_string(),
        input: input.to_string(),
    })?;
    let line = pairs.next().ok_or_else(|| ParseError {
        message: "empty parse".to_string(),
        input: input.to_string(),
    })?;
    for pair in line.into_inner() {
        match pair.as_rule() {
            Rule::EOI => continue,
            _ => return build(pair, input),
        }
    }
    Err(ParseError {
        message: "empty command".to_string(),
        input: input.to_string(),
    })
}

fn build(pair: Pair<'_, Rule>, input: &str) -> Result<Command, ParseError> {
    match pair.as_rule() {
        Rule::ls_cmd => {
            let mut recursive = false;
            let mut info = false;
            let mut path = None;
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::option => match inner.as_str() {
                        "-r" => recursive = true,
                        "-info" => info = true,
                        // Unknown options are tolerated, not errors.
                        _ => {}
                    },
                    Rule::path => path = Some(inner.as_str().to_string()),
                    _ => {}
                }
            }
            Ok(Command::List {
                path,
                recursive,
                info,
            })
        }
        Rule::cp_cmd => {
            let mut recursive = false;
            let mut paths = Vec::with_capacity(2);
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::rflag => recursive = true,
                    Rule::path => paths.push(inner.as_str().to_string()),
                    _ => {}
                }
            }
            let mut paths = paths.into_iter();
            let src = paths.next().ok_or_else(|| missing("source path", input))?;
            let dst = paths
                .next()
                .ok_or_else(|| missing("destination path", input))?;
            Ok(Command::Copy {
                src,
                dst,
                recursive,
            })
        }
        Rule::rm_cmd => Ok(Command::Remove {
            path: only_path(pair, input)?,
        }),
        Rule::mkdir_cmd => Ok(Command::MakeDir {
            path: only_path(pair, input)?,
        }),
        Rule::rmdir_cmd => Ok(Command::RemoveDir {
            path: only_path(pair, input)?,
        }),
        Rule::get_cmd => Ok(Command::ReadFile {
            path: only_path(pair, input)?,
        }),
        Rule::put_cmd => {
            let mut content = None;
            let mut append = false;
            let mut path = None;
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::double_quoted | Rule::single_quoted => {
                        content = Some(strip_quotes(inner.as_str()));
                    }
                    Rule::operator => append = inner.as_str() == ">>",
                    Rule::path => path = Some(inner.as_str().to_string()),
                    _ => {}
                }
            }
            Ok(Command::WriteFile {
                path: path.ok_or_else(|| missing("target path", input))?,
                content: content.ok_or_else(|| missing("quoted content", input))?,
                append,
            })
        }
        rule => Err(ParseError {
            message: format!("unexpected rule {rule:?}"),
            input: input.to_string(),
        }),
    }
}

fn only_path(pair: Pair<'_, Rule>, input: &str) -> Result<String, ParseError> {
    pair.into_inner()
        .find(|inner| inner.as_rule() == Rule::path)
        .map(|inner| inner.as_str().to_string())
        .ok_or_else(|| missing("path", input))
}

// The outer quotes are the only transformation; escapes stay verbatim.
fn strip_quotes(quoted: &str) -> String {
    quoted[1..quoted.len().saturating_sub(1)].to_string()
}

fn missing(what: &str, input: &str) -> ParseError {
    ParseError {
        message: format!("missing {what}"),
        input: input.to_string(),
    }
}
