//! # Field Errors
//!
//! Errors pointing at one or more fields of an object, with paths relative
//! to the value being validated. Callers validating a nested value prefix
//! the paths with [`FieldErrors::via_field`] and [`FieldErrors::via_index`]
//! as the errors bubble up.

use std::fmt;

/// Path of the value being validated itself
pub const CURRENT_FIELD: &str = "";

/// A problem with one or more fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub message: String,
    pub paths: Vec<String>,
    pub details: String,
}

impl FieldError {
    fn new(message: String, paths: &[&str]) -> Self {
        Self {
            message,
            paths: paths.iter().map(|p| (*p).to_string()).collect(),
            details: String::new(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: &str) -> Self {
        self.details = details.to_string();
        self
    }

    fn map_paths(mut self, f: impl Fn(&str) -> String) -> Self {
        self.paths = self.paths.iter().map(|p| f(p)).collect();
        self
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.message, self.paths.join(", "))?;
        if !self.details.is_empty() {
            write!(f, "\n{}", self.details)?;
        }
        Ok(())
    }
}

/// Ordered collection of [`FieldError`]s; empty means valid
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(Vec<FieldError>);

impl std::error::Error for FieldErrors {}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("\n"))
    }
}

impl From<FieldError> for FieldErrors {
    fn from(err: FieldError) -> Self {
        Self(vec![err])
    }
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// Append `other`, keeping order
    #[must_use]
    pub fn also(mut self, other: impl Into<FieldErrors>) -> Self {
        self.0.extend(other.into().0);
        self
    }

    /// Nest every path under `field`
    #[must_use]
    pub fn via_field(self, field: &str) -> Self {
        self.map_paths(|path| {
            if path.is_empty() {
                field.to_string()
            } else if path.starts_with('[') {
                format!("{field}{path}")
            } else {
                format!("{field}.{path}")
            }
        })
    }

    /// Nest every path under the list element `index`
    #[must_use]
    pub fn via_index(self, index: usize) -> Self {
        self.map_paths(|path| {
            if path.is_empty() || path.starts_with('[') {
                format!("[{index}]{path}")
            } else {
                format!("[{index}].{path}")
            }
        })
    }

    /// Nest every path under `field[index]`
    #[must_use]
    pub fn via_field_index(self, field: &str, index: usize) -> Self {
        self.via_index(index).via_field(field)
    }

    fn map_paths(self, f: impl Fn(&str) -> String) -> Self {
        Self(self.0.into_iter().map(|e| e.map_paths(&f)).collect())
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

pub fn missing_field(paths: &[&str]) -> FieldErrors {
    FieldError::new("missing field(s)".to_string(), paths).into()
}

pub fn invalid_value(value: &str, path: &str) -> FieldErrors {
    FieldError::new(format!("invalid value: {value}"), &[path]).into()
}

pub fn duplicate_value(value: &str, paths: &[&str]) -> FieldErrors {
    FieldError::new(format!("duplicate value: {value}"), paths).into()
}

pub fn missing_one_of(paths: &[&str]) -> FieldErrors {
    FieldError::new("expected exactly one, got neither".to_string(), paths).into()
}

pub fn multiple_one_of(paths: &[&str]) -> FieldErrors {
    FieldError::new("expected exactly one, got both".to_string(), paths).into()
}

pub fn disallowed_fields(paths: &[&str]) -> FieldErrors {
    FieldError::new("must not set the field(s)".to_string(), paths).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_via_field_and_index_prefix_paths() {
        let errs = missing_field(&["stream", CURRENT_FIELD]).via_field_index("inputs", 2);
        let paths: Vec<&str> = errs.iter().flat_map(|e| e.paths.iter().map(String::as_str)).collect();
        assert_eq!(paths, vec!["inputs[2].stream", "inputs[2]"]);

        let nested = invalid_value("42", "[0].startOffset").via_field("inputs").via_field("spec");
        assert_eq!(nested.iter().next().unwrap().paths, vec!["spec.inputs[0].startOffset"]);
    }

    #[test]
    fn test_also_keeps_order_and_display() {
        let errs = FieldErrors::new()
            .also(missing_field(&["spec"]))
            .also(duplicate_value("in", &["inputs[0].alias", "inputs[1].alias"]))
            .also(FieldErrors::new());
        assert_eq!(errs.len(), 2);
        assert_eq!(
            errs.to_string(),
            "missing field(s): spec\nduplicate value: in: inputs[0].alias, inputs[1].alias"
        );
        assert!(errs.clone().into_result().is_err());
        assert!(FieldErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_messages() {
        let cases = [
            (missing_one_of(&["a", "b"]), "expected exactly one, got neither"),
            (multiple_one_of(&["a", "b"]), "expected exactly one, got both"),
            (disallowed_fields(&["a"]), "must not set the field(s)"),
            (invalid_value("x", "a"), "invalid value: x"),
        ];
        for (errs, message) in cases {
            assert_eq!(errs.iter().next().unwrap().message, message);
        }
    }
}
