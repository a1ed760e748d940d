//! Resource and triple representations
//!
//! Facts are stored as triples of dictionary ids. This module defines:
//! - `Resource` - IRIs, blank nodes and literals as written by the user
//! - `Dictionary` - the bidirectional mapping between resources and ids
//! - `Triple` - three resource ids in subject, predicate, object order
//!
//! Id `0` is never assigned. `rdf:type`, `owl:sameAs` and `owl:Nothing` are
//! registered in every dictionary with fixed ids.

use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Dictionary id of a resource
pub type ResourceId = u64;

/// The id no resource ever receives
pub const INVALID_RESOURCE_ID: ResourceId = 0;

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const OWL_SAME_AS: &str = "http://www.w3.org/2002/07/owl#sameAs";
pub const OWL_NOTHING: &str = "http://www.w3.org/2002/07/owl#Nothing";

pub const RDF_TYPE_ID: ResourceId = 1;
pub const OWL_SAME_AS_ID: ResourceId = 2;
pub const OWL_NOTHING_ID: ResourceId = 3;

/// A fact: subject, predicate, object
pub type Triple = [ResourceId; 3];

/// Build an `owl:sameAs` triple
pub fn same_as(left: ResourceId, right: ResourceId) -> Triple {
    [left, OWL_SAME_AS_ID, right]
}

/// Whether a triple has `owl:sameAs` as its predicate
pub fn is_same_as(triple: &Triple) -> bool {
    triple[1] == OWL_SAME_AS_ID
}

/// The kind of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Iri,
    BlankNode,
    Literal,
}

/// A resource as it appears in input data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resource {
    /// A named node
    Iri(String),
    /// An anonymous node, identified by its label
    BlankNode(String),
    /// A literal value, compared lexically
    Literal(String),
}

impl Resource {
    /// Create an IRI resource
    pub fn iri(s: impl Into<String>) -> Self {
        Resource::Iri(s.into())
    }

    /// Create a blank node resource
    pub fn blank(label: impl Into<String>) -> Self {
        Resource::BlankNode(label.into())
    }

    /// Create a literal resource
    pub fn literal(value: impl Into<String>) -> Self {
        Resource::Literal(value.into())
    }

    /// Parse the compact textual form used by scenario files.
    ///
    /// `_:x` is a blank node, `"x"` is a literal, `<x>` and bare names are IRIs.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some(label) = text.strip_prefix("_:") {
            Resource::blank(label)
        } else if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
            Resource::literal(&text[1..text.len() - 1])
        } else if text.len() >= 2 && text.starts_with('<') && text.ends_with('>') {
            Resource::iri(&text[1..text.len() - 1])
        } else {
            match text {
                "a" | "rdf:type" => Resource::iri(RDF_TYPE),
                "owl:sameAs" | "sameAs" => Resource::iri(OWL_SAME_AS),
                "owl:Nothing" => Resource::iri(OWL_NOTHING),
                other => Resource::iri(other),
            }
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Iri(_) => ResourceKind::Iri,
            Resource::BlankNode(_) => ResourceKind::BlankNode,
            Resource::Literal(_) => ResourceKind::Literal,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Iri(iri) => match iri.as_str() {
                RDF_TYPE => write!(f, "rdf:type"),
                OWL_SAME_AS => write!(f, "owl:sameAs"),
                OWL_NOTHING => write!(f, "owl:Nothing"),
                _ if iri.contains(':') => write!(f, "<{}>", iri),
                _ => write!(f, "{}", iri),
            },
            Resource::BlankNode(label) => write!(f, "_:{}", label),
            Resource::Literal(value) => write!(f, "\"{}\"", value),
        }
    }
}

/// Interns resources and hands out dense ids starting at 1
#[derive(Debug, Clone)]
pub struct Dictionary {
    resources: IndexSet<Resource>,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl Dictionary {
    /// Create a dictionary with the built-in vocabulary registered
    pub fn new() -> Self {
        let mut resources = IndexSet::new();
        resources.insert(Resource::iri(RDF_TYPE));
        resources.insert(Resource::iri(OWL_SAME_AS));
        resources.insert(Resource::iri(OWL_NOTHING));
        Self { resources }
    }

    /// Return the id of `resource`, assigning a new one if needed
    pub fn intern(&mut self, resource: Resource) -> ResourceId {
        let (index, _) = self.resources.insert_full(resource);
        index as ResourceId + 1
    }

    /// Intern the compact textual form of a resource
    pub fn intern_str(&mut self, text: &str) -> ResourceId {
        self.intern(Resource::parse(text))
    }

    /// Look up a resource id without assigning one
    pub fn lookup(&self, resource: &Resource) -> Option<ResourceId> {
        self.resources
            .get_index_of(resource)
            .map(|index| index as ResourceId + 1)
    }

    /// Resolve an id back to its resource
    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        if id == INVALID_RESOURCE_ID {
            return None;
        }
        self.resources.get_index(id as usize - 1)
    }

    /// Kind of the resource with this id
    pub fn kind(&self, id: ResourceId) -> Option<ResourceKind> {
        self.resource(id).map(Resource::kind)
    }

    /// Highest id assigned so far
    pub fn max_resource_id(&self) -> ResourceId {
        self.resources.len() as ResourceId
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Render an id for logs and CLI output
    pub fn display(&self, id: ResourceId) -> String {
        match self.resource(id) {
            Some(resource) => resource.to_string(),
            None => format!("#{}", id),
        }
    }

    /// Render a triple for logs and CLI output
    pub fn display_triple(&self, triple: &Triple) -> String {
        format!(
            "{} {} {}",
            self.display(triple[0]),
            self.display(triple[1]),
            self.display(triple[2])
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_ids() {
        let dict = Dictionary::new();
        assert_eq!(dict.lookup(&Resource::iri(RDF_TYPE)), Some(RDF_TYPE_ID));
        assert_eq!(dict.lookup(&Resource::iri(OWL_SAME_AS)), Some(OWL_SAME_AS_ID));
        assert_eq!(dict.lookup(&Resource::iri(OWL_NOTHING)), Some(OWL_NOTHING_ID));
        assert!(dict.resource(INVALID_RESOURCE_ID).is_none());
    }

    #[test]
    fn test_intern_is_stable() {
        let mut dict = Dictionary::new();
        let a = dict.intern_str("ex:a");
        let b = dict.intern_str("_:b");
        assert_eq!(dict.intern_str("ex:a"), a);
        assert_ne!(a, b);
        assert_eq!(dict.kind(a), Some(ResourceKind::Iri));
        assert_eq!(dict.kind(b), Some(ResourceKind::BlankNode));
        assert_eq!(dict.max_resource_id(), b);
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(Resource::parse("\"42\""), Resource::literal("42"));
        assert_eq!(Resource::parse("<http://x/y>"), Resource::iri("http://x/y"));
        assert_eq!(Resource::parse("a"), Resource::iri(RDF_TYPE));
        assert_eq!(Resource::parse("sameAs"), Resource::iri(OWL_SAME_AS));
    }

    #[test]
    fn test_display_triple() {
        let mut dict = Dictionary::new();
        let x = dict.intern_str("x");
        let c = dict.intern_str("C");
        assert_eq!(dict.display_triple(&[x, RDF_TYPE_ID, c]), "x rdf:type C");
        assert!(is_same_as(&same_as(x, c)));
    }
}
