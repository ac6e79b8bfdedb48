//! Constant-pool level remap engine.
//!
//! Inputs are registered per tag; the class hierarchy of every input (and of
//! the host classpath) is known before any tag is applied, so overriding
//! members are renamed consistently across artifacts.

use crate::classfile::{
    parse_header, Attribute, ClassFile, ClassHeader, ClassParseError, ClassReader, Constant,
    ConstantPool, MemberInfo, ACC_PRIVATE, ACC_STATIC, TAG_FIELDREF, TAG_INVOKE_DYNAMIC,
};
use crate::jar::OutputJar;
use crate::RemapError;
use mb_mapping::SymbolMappingIndex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};
use zip::ZipArchive;

/// Handle for the classes read from one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputTag(usize);

#[derive(Debug)]
struct InputClass {
    entry_name: String,
    bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct Remapper {
    index: Arc<SymbolMappingIndex>,
    hierarchy: HashMap<String, ClassHeader>,
    inputs: Vec<Vec<InputClass>>,
    finished: bool,
}

impl Remapper {
    pub fn new(index: Arc<SymbolMappingIndex>) -> Self {
        Self {
            index,
            hierarchy: HashMap::new(),
            inputs: Vec::new(),
            finished: false,
        }
    }

    pub fn index(&self) -> &SymbolMappingIndex {
        &self.index
    }

    pub fn create_input_tag(&mut self) -> InputTag {
        self.inputs.push(Vec::new());
        InputTag(self.inputs.len() - 1)
    }

    /// Registers every `.class` entry of the jar at `path` under `tag`.
    ///
    /// Only class headers are decoded here; full parsing waits for `apply`.
    pub fn read_inputs(&mut self, tag: InputTag, path: &Path) -> Result<usize, RemapError> {
        let file = fs::File::open(path).map_err(|source| RemapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut archive = ZipArchive::new(file).map_err(|source| RemapError::Zip {
            path: path.to_path_buf(),
            source,
        })?;

        let mut classes = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|source| RemapError::Zip {
                path: path.to_path_buf(),
                source,
            })?;
            if entry.is_dir() || !entry.name().ends_with(".class") {
                continue;
            }
            let entry_name = entry.name().to_string();
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut bytes)
                .map_err(|source| RemapError::Io {
                    path: path.join(&entry_name),
                    source,
                })?;

            let header = parse_header(&bytes).map_err(|source| RemapError::Class {
                entry: entry_name.clone(),
                source,
            })?;
            self.hierarchy.insert(header.name.clone(), header);
            classes.push(InputClass { entry_name, bytes });
        }

        let count = classes.len();
        let slot = self
            .inputs
            .get_mut(tag.0)
            .ok_or(RemapError::UnknownTag)?;
        slot.extend(classes);
        debug!(path = %path.display(), classes = count, "registered remap inputs");
        Ok(count)
    }

    /// Adds host classes, already in the target namespace, to the hierarchy.
    /// They are never written anywhere.
    pub fn read_classpath(&mut self, paths: &[PathBuf]) -> Result<usize, RemapError> {
        let mut headers = Vec::new();
        for path in paths {
            if path.is_dir() {
                collect_dir_headers(path, &mut headers)?;
            } else if path.exists() {
                collect_jar_headers(path, &mut headers)?;
            } else {
                debug!(path = %path.display(), "skipping missing remap classpath entry");
            }
        }

        let count = headers.len();
        for header in headers {
            let header = self.to_source_header(header);
            // mod inputs describe themselves better than the host copy
            self.hierarchy.entry(header.name.clone()).or_insert(header);
        }
        debug!(classes = count, "populated remap classpath");
        Ok(count)
    }

    /// Remaps every class registered under `tag` into `output`.
    pub fn apply(&self, tag: InputTag, output: &mut OutputJar) -> Result<usize, RemapError> {
        let classes = self.inputs.get(tag.0).ok_or(RemapError::UnknownTag)?;
        for class in classes {
            let (name, bytes) = self.remap_class(&class.bytes).map_err(|source| RemapError::Class {
                entry: class.entry_name.clone(),
                source,
            })?;
            let entry_name = renamed_entry(&class.entry_name, &name.0, &name.1);
            output.write_entry(&entry_name, &bytes)?;
        }
        Ok(classes.len())
    }

    /// Releases every registered input. Safe to call more than once.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.inputs.clear();
        self.hierarchy.clear();
    }

    /// Returns `((old_name, new_name), bytes)` for one class.
    pub fn remap_class(&self, bytes: &[u8]) -> Result<((String, String), Vec<u8>), ClassParseError> {
        let mut class = ClassFile::parse(bytes)?;
        let original = class.pool.clone();
        let old_name = original.class_name(class.this_class)?;
        let mut changed = false;

        for slot in 1..original.len() {
            let index = slot as u16;
            match original.get(index)? {
                Constant::Class { name_index } => {
                    let name = original.utf8(*name_index)?;
                    let mapped = self.map_class_constant(&name);
                    if mapped != name {
                        let name_index = class.pool.intern_utf8(&mapped)?;
                        class.pool.set(index, Constant::Class { name_index })?;
                        changed = true;
                    }
                }
                Constant::MemberRef {
                    tag,
                    class_index,
                    name_and_type_index,
                } => {
                    let owner = original.class_name(*class_index)?;
                    let (name, descriptor) = original.name_and_type(*name_and_type_index)?;
                    let mapped_name = if owner.starts_with('[') {
                        None
                    } else if *tag == TAG_FIELDREF {
                        self.resolve_field(&owner, &name, &descriptor)
                    } else {
                        self.resolve_method(&owner, &name, &descriptor)
                    };
                    let mapped_name = mapped_name.unwrap_or(name.as_str()).to_string();
                    let mapped_descriptor = self.index.map_descriptor(&descriptor);
                    if mapped_name != name || mapped_descriptor != descriptor {
                        let name_and_type_index = class
                            .pool
                            .intern_name_and_type(&mapped_name, &mapped_descriptor)?;
                        class.pool.set(
                            index,
                            Constant::MemberRef {
                                tag: *tag,
                                class_index: *class_index,
                                name_and_type_index,
                            },
                        )?;
                        changed = true;
                    }
                }
                Constant::Dynamic {
                    tag,
                    bootstrap_index,
                    name_and_type_index,
                } => {
                    let (name, descriptor) = original.name_and_type(*name_and_type_index)?;
                    let mapped_name = if *tag == TAG_INVOKE_DYNAMIC {
                        self.resolve_call_site(&class, &original, *bootstrap_index, &name, &descriptor)?
                    } else {
                        None
                    };
                    let mapped_name = mapped_name.unwrap_or(name.as_str()).to_string();
                    let mapped_descriptor = self.index.map_descriptor(&descriptor);
                    if mapped_name != name || mapped_descriptor != descriptor {
                        let name_and_type_index =
                            class.pool.intern_name_and_type(&mapped_name, &mapped_descriptor)?;
                        class.pool.set(
                            index,
                            Constant::Dynamic {
                                tag: *tag,
                                bootstrap_index: *bootstrap_index,
                                name_and_type_index,
                            },
                        )?;
                        changed = true;
                    }
                }
                Constant::MethodType { descriptor_index } => {
                    let descriptor = original.utf8(*descriptor_index)?;
                    let mapped = self.index.map_descriptor(&descriptor);
                    if mapped != descriptor {
                        let descriptor_index = class.pool.intern_utf8(&mapped)?;
                        class.pool.set(index, Constant::MethodType { descriptor_index })?;
                        changed = true;
                    }
                }
                _ => {}
            }
        }

        let mut fields = std::mem::take(&mut class.fields);
        for field in &mut fields {
            changed |= self.remap_member(&mut class, &old_name, field, false)?;
        }
        class.fields = fields;

        let mut methods = std::mem::take(&mut class.methods);
        for method in &mut methods {
            changed |= self.remap_member(&mut class, &old_name, method, true)?;
        }
        class.methods = methods;

        let mut attributes = std::mem::take(&mut class.attributes);
        changed |= self.remap_attributes(&mut class, &mut attributes)?;
        class.attributes = attributes;

        let new_name = class.name()?;
        if !changed {
            trace!(class = %old_name, "class unchanged by remap");
            return Ok(((old_name, new_name), bytes.to_vec()));
        }
        Ok(((old_name, new_name), class.to_bytes()))
    }

    fn remap_member(
        &self,
        class: &mut ClassFile,
        owner: &str,
        member: &mut MemberInfo,
        is_method: bool,
    ) -> Result<bool, ClassParseError> {
        let name = class.pool.utf8(member.name_index)?;
        let descriptor = class.pool.utf8(member.descriptor_index)?;
        let mut changed = false;

        let mapped_name = if !is_method {
            self.resolve_field(owner, &name, &descriptor)
        } else if name == "<init>" || name == "<clinit>" {
            None
        } else if member.access_flags & (ACC_PRIVATE | ACC_STATIC) != 0 {
            self.index.map_method(owner, &name, &descriptor)
        } else {
            self.resolve_method(owner, &name, &descriptor)
        };
        if let Some(mapped) = mapped_name {
            if mapped != name {
                member.name_index = class.pool.intern_utf8(mapped)?;
                changed = true;
            }
        }

        let mapped_descriptor = self.index.map_descriptor(&descriptor);
        if mapped_descriptor != descriptor {
            member.descriptor_index = class.pool.intern_utf8(&mapped_descriptor)?;
            changed = true;
        }

        changed |= self.remap_attributes(class, &mut member.attributes)?;
        Ok(changed)
    }

    // Utf8 slots are never rewritten in place, so names and signatures are
    // read straight from the pool being edited.
    fn remap_attributes(
        &self,
        class: &mut ClassFile,
        attributes: &mut [Attribute],
    ) -> Result<bool, ClassParseError> {
        let mut changed = false;
        for attribute in attributes.iter_mut() {
            let name = class.pool.utf8(attribute.name_index)?;
            match name.as_str() {
                "Signature" => {
                    let mut reader = ClassReader::new(&attribute.info);
                    let signature_index = reader.read_u2()?;
                    let signature = class.pool.utf8(signature_index)?;
                    let mapped = match self.index.map_signature(&signature) {
                        Ok(mapped) => mapped,
                        Err(error) => {
                            debug!(%signature, %error, "keeping unparseable signature");
                            continue;
                        }
                    };
                    if mapped != signature {
                        let index = class.pool.intern_utf8(&mapped)?;
                        attribute.info = index.to_be_bytes().to_vec();
                        changed = true;
                    }
                }
                "Code" => {
                    if let Some(info) = self.remap_code(class, &attribute.info)? {
                        attribute.info = info;
                        changed = true;
                    }
                }
                _ => {}
            }
        }
        Ok(changed)
    }

    /// Rewrites local variable descriptors and signatures inside a `Code`
    /// attribute. Returns `None` when nothing changed.
    fn remap_code(
        &self,
        class: &mut ClassFile,
        info: &[u8],
    ) -> Result<Option<Vec<u8>>, ClassParseError> {
        let mut reader = ClassReader::new(info);
        reader.skip(4)?; // max_stack, max_locals
        let code_length = reader.read_u4()? as usize;
        reader.skip(code_length)?;
        let exception_table_length = reader.read_u2()? as usize;
        reader.skip(exception_table_length * 8)?;

        let mut out = info.to_vec();
        let mut changed = false;
        let attributes_count = reader.read_u2()?;
        for _ in 0..attributes_count {
            let name_index = reader.read_u2()?;
            let length = reader.read_u4()? as usize;
            let start = reader.position();
            let name = class.pool.utf8(name_index)?;
            let is_type_table = match name.as_str() {
                "LocalVariableTable" => false,
                "LocalVariableTypeTable" => true,
                _ => {
                    reader.skip(length)?;
                    continue;
                }
            };

            let entries = reader.read_u2()?;
            for entry in 0..entries as usize {
                reader.skip(6)?; // start_pc, length, name_index
                let descriptor_index = reader.read_u2()?;
                reader.skip(2)?; // index
                let value = class.pool.utf8(descriptor_index)?;
                let mapped = if is_type_table {
                    self.index.map_signature(&value).unwrap_or_else(|_| value.clone())
                } else {
                    self.index.map_descriptor(&value)
                };
                if mapped != value {
                    let index = class.pool.intern_utf8(&mapped)?;
                    let offset = start + 2 + entry * 10 + 6;
                    out[offset..offset + 2].copy_from_slice(&index.to_be_bytes());
                    changed = true;
                }
            }
        }

        Ok(changed.then_some(out))
    }

    fn map_class_constant(&self, name: &str) -> String {
        if name.starts_with('[') {
            return self.index.map_descriptor(name);
        }
        self.index.map_class(name).unwrap_or(name).to_string()
    }

    fn resolve_field(&self, owner: &str, name: &str, descriptor: &str) -> Option<&str> {
        self.walk(owner, |class| self.index.map_field(class, name, descriptor))
    }

    fn resolve_method(&self, owner: &str, name: &str, descriptor: &str) -> Option<&str> {
        self.walk(owner, |class| self.index.map_method(class, name, descriptor))
    }

    /// Target name of the interface method an `invokedynamic` call site
    /// implements. The interface is the call site's return type; the erased
    /// method type is the first bootstrap argument when that is a
    /// `MethodType`, otherwise the name alone must be unambiguous.
    fn resolve_call_site(
        &self,
        class: &ClassFile,
        pool: &ConstantPool,
        bootstrap_index: u16,
        name: &str,
        descriptor: &str,
    ) -> Result<Option<&str>, ClassParseError> {
        let Some(interface) = descriptor
            .rsplit_once(')')
            .and_then(|(_, ret)| ret.strip_prefix('L'))
            .and_then(|ret| ret.strip_suffix(';'))
        else {
            return Ok(None);
        };

        if let Some(method_type) = bootstrap_method_type(class, pool, bootstrap_index)? {
            if let Some(mapped) = self.resolve_method(interface, name, &method_type) {
                return Ok(Some(mapped));
            }
        }
        Ok(self.walk(interface, |owner| self.index.map_method_by_name(owner, name)))
    }

    /// Breadth-first over `owner` and its supertypes.
    fn walk<'a>(&'a self, owner: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> Option<&'a str> {
        let mut queue = VecDeque::from([owner.to_string()]);
        let mut seen = HashSet::new();
        while let Some(class) = queue.pop_front() {
            if !seen.insert(class.clone()) {
                continue;
            }
            if let Some(mapped) = lookup(class.as_str()) {
                return Some(mapped);
            }
            if let Some(header) = self.hierarchy.get(&class) {
                queue.extend(header.super_name.iter().cloned());
                queue.extend(header.interfaces.iter().cloned());
            }
        }
        None
    }

    fn to_source_header(&self, header: ClassHeader) -> ClassHeader {
        let unmap = |name: String| -> String {
            self.index
                .unmap_class(&name)
                .map(str::to_string)
                .unwrap_or(name)
        };
        ClassHeader {
            name: unmap(header.name),
            super_name: header.super_name.map(unmap),
            interfaces: header.interfaces.into_iter().map(unmap).collect(),
        }
    }
}

fn renamed_entry(entry_name: &str, old_name: &str, new_name: &str) -> String {
    if old_name == new_name {
        return entry_name.to_string();
    }
    match entry_name.strip_suffix(&format!("{old_name}.class")) {
        Some(prefix) => format!("{prefix}{new_name}.class"),
        None => entry_name.to_string(),
    }
}

/// First static argument of bootstrap method `bootstrap_index`, when it is a
/// `MethodType`.
fn bootstrap_method_type(
    class: &ClassFile,
    pool: &ConstantPool,
    bootstrap_index: u16,
) -> Result<Option<String>, ClassParseError> {
    for attribute in &class.attributes {
        if pool.utf8(attribute.name_index)? != "BootstrapMethods" {
            continue;
        }
        let mut reader = ClassReader::new(&attribute.info);
        let count = reader.read_u2()?;
        for current in 0..count {
            reader.skip(2)?; // bootstrap_method_ref
            let argument_count = reader.read_u2()? as usize;
            if current != bootstrap_index {
                reader.skip(argument_count * 2)?;
                continue;
            }
            if argument_count == 0 {
                return Ok(None);
            }
            return match pool.get(reader.read_u2()?)? {
                Constant::MethodType { descriptor_index } => Ok(Some(pool.utf8(*descriptor_index)?)),
                _ => Ok(None),
            };
        }
    }
    Ok(None)
}

fn collect_jar_headers(path: &Path, headers: &mut Vec<ClassHeader>) -> Result<(), RemapError> {
    let file = fs::File::open(path).map_err(|source| RemapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = ZipArchive::new(file).map_err(|source| RemapError::Zip {
        path: path.to_path_buf(),
        source,
    })?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|source| RemapError::Zip {
            path: path.to_path_buf(),
            source,
        })?;
        if !entry.name().ends_with(".class") {
            continue;
        }
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|source| RemapError::Io {
                path: path.join(entry.name()),
                source,
            })?;
        match parse_header(&bytes) {
            Ok(header) => headers.push(header),
            Err(error) => debug!(entry = entry.name(), %error, "skipping unreadable classpath class"),
        }
    }
    Ok(())
}

fn collect_dir_headers(dir: &Path, headers: &mut Vec<ClassHeader>) -> Result<(), RemapError> {
    let entries = fs::read_dir(dir).map_err(|source| RemapError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let path = entry
            .map_err(|source| RemapError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if path.is_dir() {
            collect_dir_headers(&path, headers)?;
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("class") {
            continue;
        }
        let bytes = fs::read(&path).map_err(|source| RemapError::Io {
            path: path.clone(),
            source,
        })?;
        match parse_header(&bytes) {
            Ok(header) => headers.push(header),
            Err(error) => debug!(path = %path.display(), %error, "skipping unreadable classpath class"),
        }
    }
    Ok(())
}
