//! Declarative shapes for typed proxies.
//!
//! A `Schema` names the properties a remote value is known to have and, for each, the schema
//! of the value behind it. `Proxy::get_attribute` consults the table so that a child proxy
//! carries the right shape without any reflection on the far side.

/// Property name and the schema of its value, if it has a known shape.
pub type Property = (&'static str, Option<&'static Schema>);

#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    pub properties: &'static [Property],
}

/// The shape of an arbitrary value. Declares nothing.
pub static OBJECT: Schema = Schema { name: "Object", properties: &[] };

impl Schema {
    /// True when `name` is listed in the table.
    pub fn declares(&self, name: &str) -> bool {
        self.properties.iter().any(|(p, _)| *p == name)
    }

    /// The declared schema of property `name`, falling back to `OBJECT`.
    pub fn child(&self, name: &str) -> &'static Schema {
        self.properties
            .iter()
            .find(|(p, _)| *p == name)
            .and_then(|(_, schema)| *schema)
            .unwrap_or(&OBJECT)
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}
