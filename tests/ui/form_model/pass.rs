use calmform::form::{FieldLens, FormModel};
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, calmform::form::FormModel)]
struct DemoForm {
    email: String,
}

fn main() {
    let fields = DemoForm::fields();
    let lens = fields.email();
    let mut model = DemoForm {
        email: "fry@planetexpress.earth".to_string(),
    };
    lens.set(&mut model, "leela@planetexpress.earth".to_string());
    assert_eq!(lens.key().as_str(), "email");
    assert_eq!(lens.get(&model), "leela@planetexpress.earth");
}
