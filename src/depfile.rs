//! Parsing of Makefile syntax as found in `.d` files emitted by C compilers.
//!
//! Only the subset compilers actually emit: `target: input input...` rules
//! with backslash-newline continuations and the handful of escapes gcc
//! produces (`\ `, `\#`, `$$`).

use crate::scanner::{ParseResult, Scanner};

#[derive(Debug, PartialEq)]
pub struct Depfile {
    /// The output named by the depfile; empty if the file was empty.
    pub out: String,
    pub ins: Vec<String>,
    /// Whether more than one distinct target appeared.  The caller decides
    /// between warning and erroring.
    pub distinct_targets: bool,
}

/// Skip spaces and backslashed newlines between paths.
fn skip_spaces(scanner: &mut Scanner) -> ParseResult<()> {
    loop {
        match scanner.read() {
            ' ' => {}
            '\\' => match scanner.read() {
                '\n' => {}
                '\r' => {
                    scanner.expect('\n')?;
                }
                _ => {
                    // An escape that belongs to the next path.
                    scanner.back();
                    scanner.back();
                    break;
                }
            },
            _ => {
                scanner.back();
                break;
            }
        }
    }
    Ok(())
}

/// Read one path from the input, unescaping as we go.  A colon ends the
/// path only when followed by whitespace, so Windows drive letters pass
/// through.
fn read_path(scanner: &mut Scanner) -> ParseResult<Option<String>> {
    skip_spaces(scanner)?;
    let mut path = String::new();
    loop {
        match scanner.read() {
            '\0' | ' ' | '\n' => {
                scanner.back();
                break;
            }
            '\r' if scanner.peek() == '\n' => {
                scanner.back();
                break;
            }
            ':' => match scanner.peek() {
                ' ' | '\n' | '\r' | '\0' => {
                    scanner.back();
                    break;
                }
                _ => path.push(':'),
            },
            '\\' => match scanner.peek() {
                '\n' | '\r' => {
                    // Line continuation terminates the path.
                    scanner.back();
                    break;
                }
                ' ' => {
                    scanner.next();
                    path.push(' ');
                }
                '#' => {
                    scanner.next();
                    path.push('#');
                }
                // Not an escape; gcc passes Windows-style paths through.
                _ => path.push('\\'),
            },
            '$' => {
                if scanner.peek() == '$' {
                    scanner.next();
                }
                path.push('$');
            }
            c => path.push(c),
        }
    }
    if path.is_empty() {
        return Ok(None);
    }
    Ok(Some(path))
}

/// Parse a `.d` file.  Rules with the same target are merged; distinct
/// targets are flagged for the caller.
pub fn parse(scanner: &mut Scanner) -> ParseResult<Depfile> {
    let mut out: Option<String> = None;
    let mut ins = Vec::new();
    let mut distinct_targets = false;
    loop {
        while matches!(scanner.peek(), ' ' | '\n' | '\r') {
            scanner.next();
        }
        let target = match read_path(scanner)? {
            None => break,
            Some(t) => t,
        };
        skip_spaces(scanner)?;
        if !scanner.skip(':') {
            return scanner.parse_error("expected ':' in depfile");
        }
        while let Some(path) = read_path(scanner)? {
            ins.push(path);
        }
        match &out {
            None => out = Some(target),
            Some(prev) if *prev == target => {}
            Some(_) => distinct_targets = true,
        }
    }
    scanner.expect('\0')?;

    Ok(Depfile {
        out: out.unwrap_or_default(),
        ins,
        distinct_targets,
    })
}
