//! Parsing of cl.exe `/showIncludes` output: pulls the include notes out of
//! a command's captured output, leaving the rest for the user to see.

use std::collections::HashSet;

const DEPS_PREFIX_ENGLISH: &str = "Note: including file: ";

pub struct ClParse {
    /// Discovered include paths, deduplicated, in first-seen order.
    pub includes: Vec<String>,
    /// The command output with include notes and the input-filename echo
    /// removed.
    pub filtered_output: String,
}

/// If the line is a "Note: including file:" line, return the path it names.
fn filter_show_includes<'a>(line: &'a str, deps_prefix: Option<&str>) -> Option<&'a str> {
    let prefix = deps_prefix.unwrap_or(DEPS_PREFIX_ENGLISH);
    line.strip_prefix(prefix).map(|rest| rest.trim_start())
}

/// cl.exe echoes the name of the file it compiles as the first line of its
/// output; filter that too.
fn filter_input_filename(line: &str) -> bool {
    let line = line.trim_end().to_ascii_lowercase();
    !line.contains(' ')
        && (line.ends_with(".c")
            || line.ends_with(".cc")
            || line.ends_with(".cxx")
            || line.ends_with(".cpp"))
}

pub fn parse(output: &str, deps_prefix: Option<&str>) -> ClParse {
    let mut includes = Vec::new();
    let mut seen = HashSet::new();
    let mut filtered_output = String::new();
    for line in output.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(include) = filter_show_includes(line, deps_prefix) {
            let include = include.trim_end();
            if seen.insert(include.to_string()) {
                includes.push(include.to_string());
            }
        } else if !filter_input_filename(line) {
            filtered_output.push_str(line);
            filtered_output.push('\n');
        }
    }
    ClParse {
        includes,
        filtered_output,
    }
}
