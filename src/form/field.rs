use serde_json::Value;

use super::validation::ValidationTicket;

/// Leaf scope: one value plus its validation and interaction state.
///
/// `value`, `error` and `touched` are plain state; writing them never runs
/// validation or broadcasts anything. Bindings do both explicitly.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldNode {
    pub value: Value,
    pub error: Option<String>,
    pub touched: bool,
    initial_value: Value,
    ticket: ValidationTicket,
}

impl FieldNode {
    /// The working value is an owned copy of `initial_value`, so nested
    /// arrays and objects never alias the caller's initial state.
    pub fn new(initial_value: Value) -> Self {
        Self {
            value: initial_value.clone(),
            error: None,
            touched: false,
            initial_value,
            ticket: ValidationTicket::default(),
        }
    }

    pub fn initial_value(&self) -> &Value {
        &self.initial_value
    }

    pub fn valid(&self) -> bool {
        self.error.as_deref().is_none_or(str::is_empty)
    }

    /// Structural comparison against the value seen at mount time.
    pub fn changed(&self) -> bool {
        self.value != self.initial_value
    }

    /// Restores the initial value. Error and touched state are kept.
    pub fn reset(&mut self) {
        self.value = self.initial_value.clone();
    }

    /// Sets the value to `null`. Error and touched state are kept.
    pub fn clear(&mut self) {
        self.value = Value::Null;
    }

    /// The non-empty error message, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|message| !message.is_empty())
    }

    pub(super) fn ticket(&self) -> ValidationTicket {
        self.ticket
    }

    pub(super) fn next_ticket(&mut self) -> ValidationTicket {
        self.ticket = ValidationTicket(self.ticket.0 + 1);
        self.ticket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reset_and_clear_keep_error_and_touched() {
        let mut field = FieldNode::new(json!("initial"));
        field.value = json!("edited");
        field.error = Some("too short".into());
        field.touched = true;
        assert!(field.changed());
        assert!(!field.valid());

        field.reset();
        assert_eq!(field.value, json!("initial"));
        assert!(!field.changed());
        assert_eq!(field.error_message(), Some("too short"));
        assert!(field.touched);

        field.clear();
        assert_eq!(field.value, Value::Null);
        assert!(field.touched);
    }

    #[test]
    fn empty_error_counts_as_valid() {
        let mut field = FieldNode::new(Value::Null);
        field.error = Some(String::new());
        assert!(field.valid());
        assert_eq!(field.error_message(), None);
    }

    #[test]
    fn structurally_equal_value_is_unchanged() {
        let mut field = FieldNode::new(json!(["a", "b"]));
        if let Value::Array(items) = &mut field.value {
            items.push(json!("c"));
        }
        assert!(field.changed());
        assert_eq!(field.initial_value(), &json!(["a", "b"]));

        field.value = json!(["a", "b"]);
        assert!(!field.changed());
    }
}
