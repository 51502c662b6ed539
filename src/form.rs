//! Multipart form bodies.

use crate::error::Error;
use std::path::PathBuf;

/// A multipart form body for a POST request.
///
/// The form is described up front and converted into the transfer engine's
/// own representation at submission, so a builder holding a form stays
/// cheap to move around and inspect.
#[derive(Clone, Debug, Default)]
pub struct Form {
    parts: Vec<Part>,
}

#[derive(Clone, Debug)]
struct Part {
    name: String,
    value: PartValue,
    content_type: Option<String>,
}

#[derive(Clone, Debug)]
enum PartValue {
    Text(String),
    File(PathBuf),
}

impl Form {
    /// Create an empty form.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part {
            name: name.into(),
            value: PartValue::Text(value.into()),
            content_type: None,
        });
        self
    }

    /// Add a field uploaded from a file on disk.
    pub fn file(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.parts.push(Part {
            name: name.into(),
            value: PartValue::File(path.into()),
            content_type: None,
        });
        self
    }

    /// Set an explicit content type on the most recently added field.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        if let Some(part) = self.parts.last_mut() {
            part.content_type = Some(content_type.into());
        }
        self
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Build the engine-side form.
    pub(crate) fn to_curl(&self) -> Result<curl::easy::Form, Error> {
        let mut form = curl::easy::Form::new();

        for part in &self.parts {
            let mut builder = form.part(&part.name);

            match &part.value {
                PartValue::Text(text) => {
                    builder.contents(text.as_bytes());
                }
                PartValue::File(path) => {
                    builder.file(path);
                }
            }

            if let Some(content_type) = part.content_type.as_deref() {
                builder.content_type(content_type);
            }

            builder.add()?;
        }

        Ok(form)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_accumulate_in_order() {
        let form = Form::new()
            .text("speed", "fast")
            .text("cool_name", "true")
            .content_type("text/plain");

        assert!(!form.is_empty());
        assert_eq!(form.parts.len(), 2);
        assert_eq!(form.parts[1].content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn converts_to_an_engine_form() {
        let form = Form::new().text("a", "1").text("b", "2");

        assert!(form.to_curl().is_ok());
    }
}
