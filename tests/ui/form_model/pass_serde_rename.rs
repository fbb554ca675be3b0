use calmform::form::{FieldLens, FormModel};
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, calmform::form::FormModel)]
struct ShipForm {
    #[serde(rename = "shipName")]
    ship_name: String,
    #[serde(skip)]
    cached_label: String,
    #[serde(default)]
    crew: Vec<String>,
}

fn main() {
    let fields = ShipForm::fields();
    assert_eq!(fields.ship_name().key().as_str(), "shipName");
    assert_eq!(fields.crew().key().as_str(), "crew");

    let model = ShipForm {
        ship_name: "Planet Express Ship".to_string(),
        cached_label: String::new(),
        crew: vec!["Leela".to_string()],
    };
    assert_eq!(fields.ship_name().get(&model), "Planet Express Ship");
    let _ = model.cached_label;
}
