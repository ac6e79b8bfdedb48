//! Reader for the Tiny v1 and v2 mapping formats.

use crate::tree::{ClassMapping, MemberMapping, SymbolMapping};
use crate::MappingError;
use indexmap::IndexMap;
use std::fs;
use std::path::Path;

pub fn read_file(path: &Path) -> Result<SymbolMapping, MappingError> {
    let content = fs::read_to_string(path).map_err(|source| MappingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content)
}

/// Parses a Tiny table, detecting the version from the header line.
pub fn parse(content: &str) -> Result<SymbolMapping, MappingError> {
    let header = content.lines().next().unwrap_or("");
    let columns: Vec<&str> = header.split('\t').collect();

    match columns.as_slice() {
        ["v1", namespaces @ ..] if namespaces.len() >= 2 => parse_v1(content, namespaces),
        ["tiny", "2", _minor, namespaces @ ..] if namespaces.len() >= 2 => {
            parse_v2(content, namespaces)
        }
        _ => Err(MappingError::UnsupportedFormat(header.to_string())),
    }
}

fn parse_v1(content: &str, namespaces: &[&str]) -> Result<SymbolMapping, MappingError> {
    let mut classes: IndexMap<String, ClassMapping> = IndexMap::new();
    let width = namespaces.len();

    for (offset, line) in content.lines().enumerate().skip(1) {
        let line_no = offset + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let columns: Vec<&str> = line.split('\t').collect();
        match columns[0] {
            "CLASS" => {
                let names = expect_names(&columns[1..], width, line_no)?;
                match classes.get_mut(&names[0]) {
                    Some(class) => class.set_names(names),
                    None => {
                        classes.insert(names[0].clone(), ClassMapping::new(names));
                    }
                }
            }
            kind @ ("FIELD" | "METHOD") => {
                if columns.len() < 3 {
                    return Err(parse_error(line_no, "member row is missing owner or descriptor"));
                }
                let owner = columns[1];
                let descriptor = columns[2];
                let names = expect_names(&columns[3..], width, line_no)?;
                let member = MemberMapping::new(descriptor, names);
                let class = classes
                    .entry(owner.to_string())
                    .or_insert_with(|| ClassMapping::new(vec![owner.to_string(); width]));
                if kind == "FIELD" {
                    class.add_field(member);
                } else {
                    class.add_method(member);
                }
            }
            other => {
                return Err(parse_error(line_no, format!("unknown row kind '{other}'")));
            }
        }
    }

    let mut mapping = SymbolMapping::new(namespaces.iter().copied());
    mapping.classes_mut().extend(classes.into_values());
    Ok(mapping)
}

fn parse_v2(content: &str, namespaces: &[&str]) -> Result<SymbolMapping, MappingError> {
    let mut mapping = SymbolMapping::new(namespaces.iter().copied());
    let width = namespaces.len();
    let mut escaped_names = false;
    let mut current: Option<ClassMapping> = None;

    for (offset, line) in content.lines().enumerate().skip(1) {
        let line_no = offset + 1;
        if line.trim().is_empty() {
            continue;
        }

        let depth = line.bytes().take_while(|byte| *byte == b'\t').count();
        let columns: Vec<&str> = line[depth..].split('\t').collect();

        match (depth, columns[0]) {
            (0, "c") => {
                if let Some(class) = current.take() {
                    mapping.push_class(class);
                }
                let names = decode_names(&columns[1..], width, line_no, escaped_names)?;
                current = Some(ClassMapping::new(names));
            }
            (1, kind @ ("f" | "m")) => {
                let Some(class) = current.as_mut() else {
                    return Err(parse_error(line_no, "member outside of a class section"));
                };
                if columns.len() < 2 {
                    return Err(parse_error(line_no, "member is missing its descriptor"));
                }
                let names = decode_names(&columns[2..], width, line_no, escaped_names)?;
                let member = MemberMapping::new(columns[1], names);
                if kind == "f" {
                    class.add_field(member);
                } else {
                    class.add_method(member);
                }
            }
            (1, property) if current.is_none() => {
                if property == "escaped-names" {
                    escaped_names = true;
                }
            }
            // comments, parameters and locals carry nothing the remapper needs
            (1, "c") | (2, _) | (3, _) => {}
            (_, other) => {
                return Err(parse_error(
                    line_no,
                    format!("unexpected section '{other}' at depth {depth}"),
                ));
            }
        }
    }

    if let Some(class) = current.take() {
        mapping.push_class(class);
    }

    Ok(mapping)
}

fn expect_names(columns: &[&str], width: usize, line: usize) -> Result<Vec<String>, MappingError> {
    if columns.len() < width {
        return Err(parse_error(
            line,
            format!("expected {width} names, found {}", columns.len()),
        ));
    }
    Ok(columns[..width].iter().map(|name| name.to_string()).collect())
}

fn decode_names(
    columns: &[&str],
    width: usize,
    line: usize,
    escaped: bool,
) -> Result<Vec<String>, MappingError> {
    let names = expect_names(columns, width, line)?;
    if !escaped {
        return Ok(names);
    }
    Ok(names.iter().map(|name| unescape(name)).collect())
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn parse_error(line: usize, message: impl Into<String>) -> MappingError {
    MappingError::Parse {
        line,
        message: message.into(),
    }
}
