//! Input forms describing the configurable inputs of recipes, providers and backends.
//!
//! A form is an ordered list of fields. Each field may carry a default (which
//! makes it optional) and a user-set value. Forms persist as a small document:
//!
//! ```json
//! {
//!   "variables": [
//!     { "name": "region", "value": "us-east-1", "optional": false },
//!     { "name": "size", "optional": true }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::CapabilityError;

/// A single input of a configurable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputField {
  pub name: String,
  pub display_name: String,
  pub description: String,
  /// Default declared by the template. A field with a default is optional.
  pub default_value: Option<String>,
  /// Value explicitly set by the user.
  pub value: Option<String>,
  pub sensitive: bool,
  /// Environment variables this field's value is also exported as.
  pub env_vars: Vec<String>,
}

impl InputField {
  /// Create a required field.
  pub fn new(name: impl Into<String>) -> Self {
    let name = name.into();
    Self {
      display_name: name.clone(),
      name,
      ..Default::default()
    }
  }

  /// Give the field a default value, making it optional.
  pub fn with_default(mut self, default: impl Into<String>) -> Self {
    self.default_value = Some(default.into());
    self
  }

  pub fn with_value(mut self, value: impl Into<String>) -> Self {
    self.value = Some(value.into());
    self
  }

  pub fn with_env_vars<I, S>(mut self, vars: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.env_vars = vars.into_iter().map(Into::into).collect();
    self
  }

  /// Whether the user explicitly set a value.
  pub fn input_set(&self) -> bool {
    self.value.is_some()
  }

  /// The effective value: the user-set value, else the default.
  pub fn value(&self) -> Option<&str> {
    self.value.as_deref().or(self.default_value.as_deref())
  }

  pub fn optional(&self) -> bool {
    self.default_value.is_some()
  }
}

/// An ordered group of input fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputForm {
  pub name: String,
  pub description: String,
  fields: Vec<InputField>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FormDocument {
  #[serde(default)]
  variables: Vec<VariableDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VariableDocument {
  name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  value: Option<String>,
  #[serde(default)]
  optional: bool,
}

impl InputForm {
  pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: description.into(),
      fields: Vec::new(),
    }
  }

  /// Append a field, keeping declaration order.
  pub fn with_field(mut self, field: InputField) -> Self {
    self.fields.push(field);
    self
  }

  pub fn fields(&self) -> &[InputField] {
    &self.fields
  }

  pub fn field(&self, name: &str) -> Option<&InputField> {
    self.fields.iter().find(|f| f.name == name)
  }

  /// Set the user value of a field.
  pub fn set_field_value(&mut self, name: &str, value: impl Into<String>) -> Result<(), CapabilityError> {
    let form = self.name.clone();
    let field = self
      .fields
      .iter_mut()
      .find(|f| f.name == name)
      .ok_or_else(|| CapabilityError::UnknownField {
        form,
        field: name.to_string(),
      })?;
    field.value = Some(value.into());
    Ok(())
  }

  /// Reset a field to its default.
  pub fn clear_field_value(&mut self, name: &str) -> Result<(), CapabilityError> {
    let form = self.name.clone();
    let field = self
      .fields
      .iter_mut()
      .find(|f| f.name == name)
      .ok_or_else(|| CapabilityError::UnknownField {
        form,
        field: name.to_string(),
      })?;
    field.value = None;
    Ok(())
  }

  /// Every field without a default has a value.
  pub fn is_complete(&self) -> bool {
    self.fields.iter().all(|f| f.value().is_some())
  }

  pub fn to_document(&self) -> Result<serde_json::Value, CapabilityError> {
    let doc = FormDocument {
      variables: self
        .fields
        .iter()
        .map(|f| VariableDocument {
          name: f.name.clone(),
          value: f.value.clone(),
          optional: f.optional(),
        })
        .collect(),
    };
    serde_json::to_value(doc).map_err(CapabilityError::Serialize)
  }

  /// Overlay the user values recorded in `doc` onto this form.
  ///
  /// Variables the form does not declare are ignored, so documents written
  /// by an older template version still load.
  pub fn load_document(&mut self, doc: &serde_json::Value) -> Result<(), CapabilityError> {
    let doc: FormDocument =
      serde_json::from_value(doc.clone()).map_err(|e| CapabilityError::InvalidDocument {
        name: self.name.clone(),
        message: e.to_string(),
      })?;

    for variable in doc.variables {
      match self.fields.iter_mut().find(|f| f.name == variable.name) {
        Some(field) => field.value = variable.value,
        None => debug!(form = %self.name, variable = %variable.name, "ignoring undeclared variable in document"),
      }
    }
    Ok(())
  }
}
