use crate::descriptor::{remap_descriptor, remap_signature, DescriptorError};
use crate::tree::SymbolMapping;
use crate::MappingError;
use std::collections::HashMap;

/// Lookup view over a `SymbolMapping` for one ordered namespace pair.
///
/// Every lookup is scoped to the pair the index was built for; unmapped
/// symbols pass through unchanged.
#[derive(Debug, Clone)]
pub struct SymbolMappingIndex {
    source: String,
    target: String,
    classes: HashMap<String, ClassEntry>,
    order: Vec<String>,
    reverse: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct ClassEntry {
    target: String,
    fields: Vec<MemberEntry>,
    methods: Vec<MemberEntry>,
    field_lookup: HashMap<(String, String), usize>,
    method_lookup: HashMap<(String, String), usize>,
}

#[derive(Debug, Clone)]
struct MemberEntry {
    source_name: String,
    source_descriptor: String,
    target_name: String,
    target_descriptor: String,
}

/// Result of the bare-name fallback search: the owning class (internal name)
/// and the member in `name(args)ret` or `name:desc` form, both source-side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMember {
    pub owner: String,
    pub member: String,
}

impl SymbolMappingIndex {
    pub fn new(mapping: &SymbolMapping, source: &str, target: &str) -> Result<Self, MappingError> {
        let source_id = mapping.namespace_id(source)?;
        let target_id = mapping.namespace_id(target)?;

        // Descriptors are stored in namespace 0; translate them per side.
        let mut to_source = HashMap::with_capacity(mapping.classes().len());
        let mut to_target = HashMap::with_capacity(mapping.classes().len());
        for class in mapping.classes() {
            to_source.insert(class.name(0).to_string(), class.name(source_id).to_string());
            to_target.insert(class.name(0).to_string(), class.name(target_id).to_string());
        }

        let mut classes = HashMap::with_capacity(mapping.classes().len());
        let mut order = Vec::with_capacity(mapping.classes().len());
        let mut reverse = HashMap::with_capacity(mapping.classes().len());

        for class in mapping.classes() {
            let source_name = class.name(source_id).to_string();
            let target_name = class.name(target_id).to_string();

            let mut entry = ClassEntry {
                target: target_name.clone(),
                fields: Vec::with_capacity(class.fields().len()),
                methods: Vec::with_capacity(class.methods().len()),
                field_lookup: HashMap::new(),
                method_lookup: HashMap::new(),
            };

            for field in class.fields() {
                let member = MemberEntry {
                    source_name: field.name(source_id).to_string(),
                    source_descriptor: translate(field.descriptor(), &to_source, source_id),
                    target_name: field.name(target_id).to_string(),
                    target_descriptor: translate(field.descriptor(), &to_target, target_id),
                };
                entry.field_lookup.insert(
                    (member.source_name.clone(), member.source_descriptor.clone()),
                    entry.fields.len(),
                );
                entry.fields.push(member);
            }

            for method in class.methods() {
                let member = MemberEntry {
                    source_name: method.name(source_id).to_string(),
                    source_descriptor: translate(method.descriptor(), &to_source, source_id),
                    target_name: method.name(target_id).to_string(),
                    target_descriptor: translate(method.descriptor(), &to_target, target_id),
                };
                entry.method_lookup.insert(
                    (member.source_name.clone(), member.source_descriptor.clone()),
                    entry.methods.len(),
                );
                entry.methods.push(member);
            }

            reverse.insert(target_name, source_name.clone());
            if classes.insert(source_name.clone(), entry).is_none() {
                order.push(source_name);
            }
        }

        Ok(Self {
            source: source.to_string(),
            target: target.to_string(),
            classes,
            order,
            reverse,
        })
    }

    pub fn source_namespace(&self) -> &str {
        &self.source
    }

    pub fn target_namespace(&self) -> &str {
        &self.target
    }

    pub fn class_count(&self) -> usize {
        self.order.len()
    }

    /// Target internal name of a class, `None` when the table does not know it.
    pub fn map_class(&self, internal_name: &str) -> Option<&str> {
        self.classes
            .get(internal_name)
            .map(|entry| entry.target.as_str())
    }

    /// Source internal name for a class already expressed in the target namespace.
    pub fn unmap_class(&self, internal_name: &str) -> Option<&str> {
        self.reverse.get(internal_name).map(String::as_str)
    }

    /// Target name of a field declared directly on `owner`.
    pub fn map_field(&self, owner: &str, name: &str, descriptor: &str) -> Option<&str> {
        let entry = self.classes.get(owner)?;
        let index = entry
            .field_lookup
            .get(&(name.to_string(), descriptor.to_string()))?;
        Some(entry.fields[*index].target_name.as_str())
    }

    /// Target name of a method declared directly on `owner`.
    pub fn map_method(&self, owner: &str, name: &str, descriptor: &str) -> Option<&str> {
        let entry = self.classes.get(owner)?;
        let index = entry
            .method_lookup
            .get(&(name.to_string(), descriptor.to_string()))?;
        Some(entry.methods[*index].target_name.as_str())
    }

    /// Target name of the methods on `owner` named `name`, whatever their
    /// descriptor. `None` when there are none or their target names differ.
    pub fn map_method_by_name(&self, owner: &str, name: &str) -> Option<&str> {
        let entry = self.classes.get(owner)?;
        let mut targets = entry
            .methods
            .iter()
            .filter(|method| method.source_name == name)
            .map(|method| method.target_name.as_str());
        let first = targets.next()?;
        targets.all(|target| target == first).then_some(first)
    }

    pub fn map_descriptor(&self, descriptor: &str) -> String {
        remap_descriptor(descriptor, |name| self.map_class(name))
    }

    pub fn map_signature(&self, signature: &str) -> Result<String, DescriptorError> {
        remap_signature(signature, |name| self.map_class(name))
    }

    /// `Lowner;` (or a bare internal name) to its target descriptor form.
    pub fn class_target_name(&self, descriptor: &str) -> String {
        let internal = strip_class_descriptor(descriptor);
        match self.map_class(internal) {
            Some(target) => format!("L{target};"),
            None => descriptor.to_string(),
        }
    }

    /// Remaps `name(args)ret` or `name:desc` declared on `owner`.
    ///
    /// A field reference without a descriptor matches the first field with
    /// that name.
    pub fn member_target_name(&self, owner: &str, member: &str) -> String {
        let Some(entry) = self.classes.get(strip_class_descriptor(owner)) else {
            return member.to_string();
        };

        if let Some(paren) = member.find('(') {
            let (name, descriptor) = member.split_at(paren);
            return match entry
                .method_lookup
                .get(&(name.to_string(), descriptor.to_string()))
            {
                Some(index) => {
                    let method = &entry.methods[*index];
                    format!("{}{}", method.target_name, method.target_descriptor)
                }
                None => member.to_string(),
            };
        }

        let found = match member.split_once(':') {
            Some((name, descriptor)) => entry
                .field_lookup
                .get(&(name.to_string(), descriptor.to_string()))
                .map(|index| &entry.fields[*index]),
            None => entry.fields.iter().find(|field| field.source_name == member),
        };

        match found {
            Some(field) if member.contains(':') => {
                format!("{}:{}", field.target_name, field.target_descriptor)
            }
            Some(field) => field.target_name.clone(),
            None => member.to_string(),
        }
    }

    /// Scans every class, in table order, for a member with the given bare
    /// name. The first declaring class wins; ambiguity is reported but not
    /// resolved.
    pub fn find_owning_class_by_bare_name(
        &self,
        bare_name: &str,
        is_method: bool,
    ) -> Option<OwnedMember> {
        let mut found: Option<OwnedMember> = None;
        let mut candidates = 0usize;

        for class_name in &self.order {
            let entry = &self.classes[class_name];
            let members = if is_method {
                &entry.methods
            } else {
                &entry.fields
            };
            let Some(member) = members.iter().find(|member| member.source_name == bare_name)
            else {
                continue;
            };

            candidates += 1;
            if found.is_none() {
                let member = if is_method {
                    format!("{}{}", member.source_name, member.source_descriptor)
                } else {
                    format!("{}:{}", member.source_name, member.source_descriptor)
                };
                found = Some(OwnedMember {
                    owner: class_name.clone(),
                    member,
                });
            }
        }

        if candidates > 1 {
            if let Some(chosen) = &found {
                tracing::warn!(
                    member = bare_name,
                    candidates,
                    owner = %chosen.owner,
                    "ambiguous member reference without owner; using first declaring class"
                );
            }
        }

        found
    }
}

fn strip_class_descriptor(descriptor: &str) -> &str {
    match descriptor.strip_suffix(';') {
        Some(inner) => inner.strip_prefix('L').unwrap_or(inner),
        None => descriptor,
    }
}

fn translate(descriptor: &str, names: &HashMap<String, String>, namespace: usize) -> String {
    if namespace == 0 {
        return descriptor.to_string();
    }
    remap_descriptor(descriptor, |name| names.get(name).map(String::as_str))
}
