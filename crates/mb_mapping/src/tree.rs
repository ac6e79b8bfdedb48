use crate::MappingError;

/// Mapping table binding every class and member to its name in each namespace.
///
/// Member descriptors are stored in the first namespace only; the other
/// namespaces derive theirs by remapping the class names they mention.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolMapping {
    namespaces: Vec<String>,
    classes: Vec<ClassMapping>,
}

impl SymbolMapping {
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespaces: namespaces.into_iter().map(Into::into).collect(),
            classes: Vec::new(),
        }
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub fn namespace_id(&self, namespace: &str) -> Result<usize, MappingError> {
        self.namespaces
            .iter()
            .position(|candidate| candidate == namespace)
            .ok_or_else(|| MappingError::UnknownNamespace {
                namespace: namespace.to_string(),
                available: self.namespaces.join(", "),
            })
    }

    pub fn classes(&self) -> &[ClassMapping] {
        &self.classes
    }

    pub fn push_class(&mut self, class: ClassMapping) {
        self.classes.push(class);
    }

    pub(crate) fn classes_mut(&mut self) -> &mut Vec<ClassMapping> {
        &mut self.classes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMapping {
    names: Vec<String>,
    fields: Vec<MemberMapping>,
    methods: Vec<MemberMapping>,
}

impl ClassMapping {
    /// Empty names inherit the first namespace's name.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: fill_missing(names.into_iter().map(Into::into).collect()),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self, namespace: usize) -> &str {
        self.names
            .get(namespace)
            .or_else(|| self.names.first())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub(crate) fn set_names(&mut self, names: Vec<String>) {
        self.names = fill_missing(names);
    }

    pub fn fields(&self) -> &[MemberMapping] {
        &self.fields
    }

    pub fn methods(&self) -> &[MemberMapping] {
        &self.methods
    }

    pub fn with_field(mut self, field: MemberMapping) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_method(mut self, method: MemberMapping) -> Self {
        self.methods.push(method);
        self
    }

    pub fn add_field(&mut self, field: MemberMapping) {
        self.fields.push(field);
    }

    pub fn add_method(&mut self, method: MemberMapping) {
        self.methods.push(method);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberMapping {
    descriptor: String,
    names: Vec<String>,
}

impl MemberMapping {
    /// `descriptor` is expressed in the first namespace.
    pub fn new<I, S>(descriptor: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            descriptor: descriptor.into(),
            names: fill_missing(names.into_iter().map(Into::into).collect()),
        }
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn name(&self, namespace: usize) -> &str {
        self.names
            .get(namespace)
            .or_else(|| self.names.first())
            .map(String::as_str)
            .unwrap_or("")
    }
}

fn fill_missing(mut names: Vec<String>) -> Vec<String> {
    if let Some(first) = names.first().cloned() {
        for name in names.iter_mut().skip(1) {
            if name.is_empty() {
                *name = first.clone();
            }
        }
    }
    names
}
