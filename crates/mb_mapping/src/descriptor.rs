//! Class-name substitution inside JVM descriptors and generic signatures.
//!
//! Both helpers take a lookup closure returning the replacement internal name
//! for a class, or `None` to keep it. Nothing outside class names is touched.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("unexpected end of signature '{signature}'")]
    UnexpectedEnd { signature: String },
    #[error("unexpected '{found}' at offset {offset} in signature '{signature}'")]
    Unexpected {
        signature: String,
        offset: usize,
        found: char,
    },
}

/// Rewrites every `L<name>;` class reference of a field or method descriptor.
pub fn remap_descriptor<'a, F>(descriptor: &str, map: F) -> String
where
    F: Fn(&str) -> Option<&'a str>,
{
    let bytes = descriptor.as_bytes();
    let mut out = String::with_capacity(descriptor.len());
    let mut copied = 0;
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] == b'L' {
            let Some(offset) = descriptor[pos + 1..].find(';') else {
                break;
            };
            let end = pos + 1 + offset;
            out.push_str(&descriptor[copied..=pos]);
            let name = &descriptor[pos + 1..end];
            out.push_str(map(name).unwrap_or(name));
            copied = end;
            pos = end + 1;
            continue;
        }
        pos += 1;
    }

    out.push_str(&descriptor[copied..]);
    out
}

/// Rewrites class names inside a generic `Signature` attribute value.
///
/// Handles class, method and field signatures, including formal type
/// parameters, wildcards and inner-class suffixes (`Outer<TT;>.Inner`).
pub fn remap_signature<'a, F>(signature: &str, map: F) -> Result<String, DescriptorError>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let mut parser = SignatureParser {
        src: signature,
        pos: 0,
        out: String::with_capacity(signature.len()),
        map: &map,
    };
    parser.signature()?;
    Ok(parser.out)
}

struct SignatureParser<'s, 'f, F> {
    src: &'s str,
    pos: usize,
    out: String,
    map: &'f F,
}

impl<'s, 'f, 'a, F> SignatureParser<'s, 'f, F>
where
    F: Fn(&str) -> Option<&'a str>,
{
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn end_error(&self) -> DescriptorError {
        DescriptorError::UnexpectedEnd {
            signature: self.src.to_string(),
        }
    }

    fn unexpected(&self) -> DescriptorError {
        match self.src[self.pos..].chars().next() {
            Some(found) => DescriptorError::Unexpected {
                signature: self.src.to_string(),
                offset: self.pos,
                found,
            },
            None => self.end_error(),
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), DescriptorError> {
        match self.peek() {
            Some(found) if found == byte => {
                self.out.push(byte as char);
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(self.unexpected()),
            None => Err(self.end_error()),
        }
    }

    /// Copies an identifier up to (not including) any of `stops`.
    fn identifier(&mut self, stops: &[u8]) -> Result<&'s str, DescriptorError> {
        let src = self.src;
        let start = self.pos;
        loop {
            match self.peek() {
                Some(byte) if stops.contains(&byte) => break,
                Some(_) => self.pos += 1,
                None => return Err(self.end_error()),
            }
        }
        Ok(&src[start..self.pos])
    }

    fn signature(&mut self) -> Result<(), DescriptorError> {
        if self.peek() == Some(b'<') {
            self.type_parameters()?;
        }

        if self.peek() == Some(b'(') {
            self.expect(b'(')?;
            loop {
                match self.peek() {
                    Some(b')') => break,
                    Some(_) => self.type_signature()?,
                    None => return Err(self.end_error()),
                }
            }
            self.expect(b')')?;
            self.type_signature()?;
            while self.peek() == Some(b'^') {
                self.expect(b'^')?;
                self.type_signature()?;
            }
        } else {
            while self.peek().is_some() {
                self.type_signature()?;
            }
        }

        if self.peek().is_some() {
            return Err(self.unexpected());
        }
        Ok(())
    }

    fn type_parameters(&mut self) -> Result<(), DescriptorError> {
        self.expect(b'<')?;
        loop {
            match self.peek() {
                Some(b'>') => break,
                Some(_) => {}
                None => return Err(self.end_error()),
            }
            let name = self.identifier(&[b':'])?;
            self.out.push_str(name);
            while self.peek() == Some(b':') {
                self.expect(b':')?;
                if matches!(self.peek(), Some(b'L' | b'T' | b'[')) {
                    self.type_signature()?;
                }
            }
        }
        self.expect(b'>')
    }

    fn type_signature(&mut self) -> Result<(), DescriptorError> {
        match self.peek() {
            Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b'V') => {
                let byte = self.src.as_bytes()[self.pos];
                self.expect(byte)
            }
            Some(b'L') => self.class_type(),
            Some(b'T') => {
                self.expect(b'T')?;
                let name = self.identifier(&[b';'])?;
                self.out.push_str(name);
                self.expect(b';')
            }
            Some(b'[') => {
                self.expect(b'[')?;
                self.type_signature()
            }
            Some(_) => Err(self.unexpected()),
            None => Err(self.end_error()),
        }
    }

    fn class_type(&mut self) -> Result<(), DescriptorError> {
        self.expect(b'L')?;
        let name = self.identifier(&[b'<', b'.', b';'])?;
        let mapped = (self.map)(name).unwrap_or(name);
        self.out.push_str(mapped);

        let mut source = name.to_string();
        let mut target = mapped.to_string();

        loop {
            match self.peek() {
                Some(b'<') => self.type_arguments()?,
                Some(b'.') => {
                    self.expect(b'.')?;
                    let inner = self.identifier(&[b'<', b'.', b';'])?;
                    let inner_source = format!("{source}${inner}");
                    let inner_target = match (self.map)(&inner_source) {
                        Some(found) => found.to_string(),
                        None => format!("{target}${inner}"),
                    };
                    let prefix = format!("{target}$");
                    let simple = inner_target.strip_prefix(&prefix).unwrap_or(inner);
                    self.out.push_str(simple);
                    source = inner_source;
                    target = inner_target;
                }
                Some(b';') => return self.expect(b';'),
                Some(_) => return Err(self.unexpected()),
                None => return Err(self.end_error()),
            }
        }
    }

    fn type_arguments(&mut self) -> Result<(), DescriptorError> {
        self.expect(b'<')?;
        loop {
            match self.peek() {
                Some(b'>') => break,
                Some(b'*') => self.expect(b'*')?,
                Some(byte @ (b'+' | b'-')) => {
                    self.expect(byte)?;
                    self.type_signature()?;
                }
                Some(_) => self.type_signature()?,
                None => return Err(self.end_error()),
            }
        }
        self.expect(b'>')
    }
}
