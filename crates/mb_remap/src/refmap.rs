//! Mixin reference-map rewriting.

use indexmap::IndexMap;
use mb_mapping::SymbolMappingIndex;
use serde::{Deserialize, Serialize};

/// `{ "mappings": { <class>: { <entry>: <reference> } } }`.
///
/// Other top-level keys of an input document are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refmap {
    #[serde(default)]
    pub mappings: IndexMap<String, IndexMap<String, String>>,
}

impl Refmap {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_vec_pretty(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

/// Rewrites every reference value; class and entry keys are kept verbatim.
pub fn rewrite_refmap(refmap: &Refmap, index: &SymbolMappingIndex) -> Refmap {
    let mappings = refmap
        .mappings
        .iter()
        .map(|(class_key, entries)| {
            let entries = entries
                .iter()
                .map(|(entry_key, reference)| {
                    (entry_key.clone(), remap_reference(reference, index))
                })
                .collect();
            (class_key.clone(), entries)
        })
        .collect();
    Refmap { mappings }
}

pub fn remap_refmap_bytes(bytes: &[u8], index: &SymbolMappingIndex) -> Result<Vec<u8>, serde_json::Error> {
    let refmap = Refmap::from_slice(bytes)?;
    rewrite_refmap(&refmap, index).to_vec_pretty()
}

/// Remaps one `[L]<owner>[;<member>]` reference.
///
/// A reference made of a bare member (no owner) is resolved through the
/// mapping-wide fallback search and comes out in `L<owner>;<member>` form.
/// When the search finds nothing the reference is returned unchanged.
pub fn remap_reference(reference: &str, index: &SymbolMappingIndex) -> String {
    let (class_part, member) = match reference.split_once(';') {
        Some((class_part, member)) => (class_part, Some(member)),
        None => (reference, None),
    };

    if looks_like_bare_member(class_part) {
        let bare_name = class_part
            .split(['(', ':'])
            .next()
            .unwrap_or(class_part);
        let is_method = class_part.contains('(')
            || (class_part.starts_with("method_") && !class_part.contains(':'));
        return match index.find_owning_class_by_bare_name(bare_name, is_method) {
            Some(found) => {
                let owner = format!("L{};", found.owner);
                format!(
                    "{}{}",
                    index.class_target_name(&owner),
                    index.member_target_name(&owner, &found.member)
                )
            }
            None => reference.to_string(),
        };
    }

    let Some(member) = member else {
        return remap_class_reference(class_part, index);
    };

    let internal = class_part.strip_prefix('L').unwrap_or(class_part);
    let owner = format!("L{internal};");
    format!(
        "{}{}",
        index.class_target_name(&owner),
        index.member_target_name(&owner, member)
    )
}

/// Class-only references. `Lowner` comes out in descriptor form, `Lowner;`,
/// while a plain internal name stays a plain internal name. Unmapped
/// references of either form are returned unchanged.
fn remap_class_reference(class_part: &str, index: &SymbolMappingIndex) -> String {
    if let Some(target) = index.map_class(class_part) {
        return target.to_string();
    }
    match class_part
        .strip_prefix('L')
        .and_then(|internal| index.map_class(internal))
    {
        Some(target) => format!("L{target};"),
        None => class_part.to_string(),
    }
}

fn looks_like_bare_member(class_part: &str) -> bool {
    class_part.contains('(')
        || class_part.contains(':')
        || class_part.starts_with("field_")
        || class_part.starts_with("method_")
}
