use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One node of the parsed configuration tree, as supplied by the
/// configuration collaborator. Attribute values and the optional id are
/// template strings, evaluated at execution time against the live context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDef {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<OperationDef>,
    #[serde(default)]
    pub body_text: Option<String>,
}

impl OperationDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            attributes: BTreeMap::new(),
            children: Vec::new(),
            body_text: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: OperationDef) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: Vec<OperationDef>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.body_text = Some(text.into());
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// First child definition with the given element name.
    pub fn child_named(&self, name: &str) -> Option<&OperationDef> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a OperationDef> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }
}

/// A named function definition from the configuration; its body is an
/// ordinary operation list executed inside the call's parameter frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub body: Vec<OperationDef>,
}

/// Parsed configuration handed to the execution session: the root operation
/// list plus the function table and run-wide defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub operations: Vec<OperationDef>,
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionDef>,
    pub default_language: String,
    pub charset: String,
}

impl Config {
    pub fn new(operations: Vec<OperationDef>) -> Self {
        Self {
            operations,
            ..Self::default()
        }
    }

    pub fn with_function(mut self, function: FunctionDef) -> Self {
        self.functions.insert(function.name.clone(), function);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            operations: Vec::new(),
            functions: BTreeMap::new(),
            default_language: "rhai".to_string(),
            charset: "utf-8".to_string(),
        }
    }
}
