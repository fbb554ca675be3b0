use std::fmt::{Display, Formatter};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::controller::{FormController, FormOptions, FormResult};
use super::events::FormSignal;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldKey(&'static str);

impl FieldKey {
    pub const fn new(value: &'static str) -> Self {
        Self(value)
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// A typed view of one top-level field of a model.
pub trait FieldLens<T>: Copy + Send + Sync + 'static {
    type Value: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    fn key(self) -> FieldKey;
    fn get<'a>(self, model: &'a T) -> &'a Self::Value;
    fn set(self, model: &mut T, value: Self::Value);
}

/// A struct whose serialized form is the value tree of a form.
pub trait FormModel: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Fields;

    fn fields() -> Self::Fields;
}

impl FormController {
    pub fn for_model<T: FormModel>(model: &T, options: FormOptions) -> FormResult<Self> {
        Self::new(serde_json::to_value(model)?, options)
    }

    /// Deserializes the current value tree into `T`.
    pub fn model<T: FormModel>(&self) -> FormResult<T> {
        Ok(serde_json::from_value(self.value()?)?)
    }

    pub fn read<T, L>(&self, lens: L) -> FormResult<L::Value>
    where
        T: FormModel,
        L: FieldLens<T>,
    {
        let model = self.model::<T>()?;
        Ok(lens.get(&model).clone())
    }

    /// Writes one field through its lens and broadcasts `FieldUpdate`.
    pub fn write<T, L>(&self, lens: L, value: L::Value) -> FormResult<()>
    where
        T: FormModel,
        L: FieldLens<T>,
    {
        let mut model = self.model::<T>()?;
        lens.set(&mut model, value);
        let value = serde_json::to_value(lens.get(&model))?;
        let field = self.root().field(lens.key().as_str())?;
        field.set_value(value)?;
        field.broadcast(FormSignal::FieldUpdate);
        Ok(())
    }
}
