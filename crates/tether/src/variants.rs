//! Typed proxy variants.
//!
//! A variant is a `Proxy` with a schema and named accessors. It derefs to the generic proxy,
//! so every untyped operation stays available.

use std::ops::Deref;
use std::ops::DerefMut;

use crate::error::Error;
use crate::error::Result;
use crate::proxy::Proxy;
use crate::schema::Schema;
use crate::value::Value;

pub trait ProxyVariant: Sized {
    fn schema() -> &'static Schema;

    fn from_proxy(proxy: Proxy) -> Self;

    fn proxy(&self) -> &Proxy;

    /// Reads a property the schema declares. Undeclared names are rejected locally.
    fn property(&self, name: &str) -> Result<Proxy> {
        let schema = Self::schema();
        if !schema.declares(name) {
            return Err(Error::UnknownProperty { schema: schema.name, name: name.to_owned() });
        }
        self.proxy().get_attribute(name)
    }

    /// Writes a property the schema declares.
    fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<bool> {
        let schema = Self::schema();
        if !schema.declares(name) {
            return Err(Error::UnknownProperty { schema: schema.name, name: name.to_owned() });
        }
        self.proxy().set_attribute(name, value)
    }
}

pub static WINDOW: Schema = Schema {
    name: "Window",
    properties: &[
        ("document", Some(&DOCUMENT)),
        ("location", None),
        ("navigator", None),
        ("console", None),
        ("setTitle", None),
        ("loadPageContent", None),
    ],
};

pub static DOCUMENT: Schema = Schema {
    name: "Document",
    properties: &[
        ("body", None),
        ("head", None),
        ("title", None),
        ("documentElement", None),
        ("readyState", None),
    ],
};

macro_rules! variant {
    ($name:ident, $schema:expr) => {
        impl ProxyVariant for $name {
            fn schema() -> &'static Schema {
                &$schema
            }

            fn from_proxy(proxy: Proxy) -> Self {
                Self(proxy)
            }

            fn proxy(&self) -> &Proxy {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = Proxy;

            fn deref(&self) -> &Proxy {
                &self.0
            }
        }

        impl DerefMut for $name {
            fn deref_mut(&mut self) -> &mut Proxy {
                &mut self.0
            }
        }
    };
}

/// The page's global object.
#[derive(Debug)]
pub struct Window(Proxy);

variant!(Window, WINDOW);

impl Window {
    pub fn document(&self) -> Result<Document> {
        self.property("document")?.as_subtype()
    }
}

#[derive(Debug)]
pub struct Document(Proxy);

variant!(Document, DOCUMENT);

impl Document {
    /// The first element matching `query`, or a proxy to `null`.
    pub fn get_element(&self, query: &str) -> Result<Proxy> {
        self.access("return self.querySelector(query);", vec![("query", Value::from(query))])
    }

    /// A proxy to an array of every element matching `query`.
    pub fn get_elements(&self, query: &str) -> Result<Proxy> {
        let code = "return Array.from(self.querySelectorAll(query));";
        self.access(code, vec![("query", Value::from(query))])
    }

    /// Every element matching `query`, one proxy each.
    pub fn get_element_list(&self, query: &str) -> Result<Vec<Proxy>> {
        let elements = self.get_elements(query)?;
        let length = elements.get_attribute("length")?.materialize()?;
        let count = length.as_f64().unwrap_or(0.0) as usize;
        (0..count).map(|i| elements.get_attribute(&i.to_string())).collect()
    }

    /// Parses an HTML fragment into a detached element.
    pub fn html_to_element(&self, html: &str) -> Result<Proxy> {
        let code = "const template = self.createElement('template'); \
                    template.innerHTML = html.trim(); \
                    return template.content.firstChild;";
        self.access(code, vec![("html", Value::from(html))])
    }

    pub fn title(&self) -> Result<String> {
        match self.property("title")?.materialize()? {
            Value::String(title) => Ok(title),
            Value::Undefined | Value::Null => Ok(String::new()),
            other => Err(Error::Protocol(format!("document title is a {}", other.type_name()))),
        }
    }

    pub fn set_title(&self, title: &str) -> Result<bool> {
        self.set_property("title", title)
    }
}
