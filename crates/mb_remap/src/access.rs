//! Access widener files: one declaration per line, rewritten symbol by
//! symbol into the target namespace.
//!
//! ```text
//! accessWidener	v2	intermediary
//! accessible	class	net/minecraft/class_1
//! transitive-accessible	method	net/minecraft/class_1	method_1	()V
//! mutable	field	net/minecraft/class_1	field_1	I	# comment
//! ```

use mb_mapping::SymbolMappingIndex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessWidenerError {
    #[error("access widener namespace '{found}' does not match the remap source namespace '{expected}'")]
    NamespaceMismatch { expected: String, found: String },
    #[error("access widener line {line}: {message}")]
    Syntax { line: usize, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Version {
    V1,
    V2,
}

pub fn rewrite_access_widener(bytes: &[u8], index: &SymbolMappingIndex) -> Result<Vec<u8>, AccessWidenerError> {
    let text = std::str::from_utf8(bytes).map_err(|_| AccessWidenerError::Syntax {
        line: 1,
        message: "file is not valid UTF-8".to_string(),
    })?;

    let mut version: Option<Version> = None;
    let mut out: Vec<String> = Vec::new();

    for (offset, raw) in text.split('\n').enumerate() {
        let line_no = offset + 1;
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let (content, comment) = match line.find('#') {
            Some(at) => (&line[..at], Some(&line[at..])),
            None => (line, None),
        };
        let tokens: Vec<&str> = content.split_whitespace().collect();
        if tokens.is_empty() {
            out.push(line.to_string());
            continue;
        }

        let rewritten = match version {
            None => {
                let (parsed, header) = rewrite_header(&tokens, index, line_no)?;
                version = Some(parsed);
                header
            }
            Some(version) => rewrite_declaration(&tokens, version, index, line_no)?,
        };

        out.push(match comment {
            Some(comment) => format!("{rewritten}\t{comment}"),
            None => rewritten,
        });
    }

    if version.is_none() {
        return Err(syntax(1, "missing accessWidener header"));
    }

    Ok(out.join("\n").into_bytes())
}

fn rewrite_header(
    tokens: &[&str],
    index: &SymbolMappingIndex,
    line: usize,
) -> Result<(Version, String), AccessWidenerError> {
    let [magic, version, namespace] = tokens else {
        return Err(syntax(line, "header must be 'accessWidener <version> <namespace>'"));
    };
    if *magic != "accessWidener" {
        return Err(syntax(line, format!("expected accessWidener header, found '{magic}'")));
    }
    let parsed = match *version {
        "v1" => Version::V1,
        "v2" => Version::V2,
        other => return Err(syntax(line, format!("unsupported version '{other}'"))),
    };
    if *namespace != index.source_namespace() {
        return Err(AccessWidenerError::NamespaceMismatch {
            expected: index.source_namespace().to_string(),
            found: namespace.to_string(),
        });
    }
    Ok((
        parsed,
        format!("accessWidener\t{version}\t{}", index.target_namespace()),
    ))
}

fn rewrite_declaration(
    tokens: &[&str],
    version: Version,
    index: &SymbolMappingIndex,
    line: usize,
) -> Result<String, AccessWidenerError> {
    let access = tokens[0];
    let base = match access.strip_prefix("transitive-") {
        Some(_) if version == Version::V1 => {
            return Err(syntax(line, "transitive access requires a v2 header"));
        }
        Some(base) => base,
        None => access,
    };
    if !matches!(base, "accessible" | "extendable" | "mutable") {
        return Err(syntax(line, format!("unknown access '{access}'")));
    }

    let Some(kind) = tokens.get(1) else {
        return Err(syntax(line, "missing target kind"));
    };

    match *kind {
        "class" => {
            let [_, _, class] = tokens else {
                return Err(syntax(line, "class declarations take exactly one class name"));
            };
            if base == "mutable" {
                return Err(syntax(line, "classes cannot be made mutable"));
            }
            let class = index.map_class(class).unwrap_or(*class);
            Ok(format!("{access}\tclass\t{class}"))
        }
        "method" | "field" => {
            let [_, _, owner, name, descriptor] = tokens else {
                return Err(syntax(line, format!("{kind} declarations take an owner, a name and a descriptor")));
            };
            let is_method = *kind == "method";
            if is_method && base == "mutable" {
                return Err(syntax(line, "methods cannot be made mutable"));
            }
            if !is_method && base == "extendable" {
                return Err(syntax(line, "fields cannot be made extendable"));
            }
            let mapped_name = if is_method {
                index.map_method(owner, name, descriptor)
            } else {
                index.map_field(owner, name, descriptor)
            }
            .unwrap_or(*name);
            let mapped_owner = index.map_class(owner).unwrap_or(*owner);
            let mapped_descriptor = index.map_descriptor(descriptor);
            Ok(format!(
                "{access}\t{kind}\t{mapped_owner}\t{mapped_name}\t{mapped_descriptor}"
            ))
        }
        other => Err(syntax(line, format!("unknown target kind '{other}'"))),
    }
}

fn syntax(line: usize, message: impl Into<String>) -> AccessWidenerError {
    AccessWidenerError::Syntax {
        line,
        message: message.into(),
    }
}
