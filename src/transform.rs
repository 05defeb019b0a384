// Schema-agnostic markup -> JSON tree transformation.
//
// Repeated child tags are promoted to arrays on their second occurrence, so a
// field holds a bare value when the server sent it once and an array when it
// sent it more than once. Readers downstream must accept both shapes.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::warn;

use crate::markup::{MarkupElement, MarkupNode};

/// Key under which an element's attributes are collected.
pub const ATTRIBUTES_KEY: &str = "@attributes";

/// Key under which text content sits when it shares an element with
/// attributes or child elements.
pub const TEXT_KEY: &str = "#text";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonValue {
    Scalar(String),
    Object(IndexMap<String, JsonValue>),
    Array(Vec<JsonValue>),
}

impl JsonValue {
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        match self {
            JsonValue::Object(fields) => fields.get(key),
            _ => None,
        }
    }

    /// Follows a chain of object keys, stopping at the first missing one.
    pub fn path(&self, segments: &[&str]) -> Option<&JsonValue> {
        segments
            .iter()
            .try_fold(self, |value, segment| value.get(segment))
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            JsonValue::Scalar(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for JsonValue {
    fn from(text: &str) -> Self {
        JsonValue::Scalar(text.to_string())
    }
}

pub fn transform(node: &MarkupNode) -> JsonValue {
    match node {
        MarkupNode::Text(content) => JsonValue::Scalar(content.trim().to_string()),
        MarkupNode::Element(element) => transform_element(element),
    }
}

/// Transforms a whole document: the root element's value keyed by its name.
pub fn transform_document(root: &MarkupElement) -> JsonValue {
    let mut document = IndexMap::new();
    document.insert(root.name.clone(), transform_element(root));
    JsonValue::Object(document)
}

fn transform_element(element: &MarkupElement) -> JsonValue {
    // `<b>x</b>` reads as "x"; with attributes the text moves under `#text`.
    if element.attributes.is_empty() {
        if let [MarkupNode::Text(content)] = element.children.as_slice() {
            return JsonValue::Scalar(content.trim().to_string());
        }
    }

    let mut object = IndexMap::new();

    if !element.attributes.is_empty() {
        let attributes = element
            .attributes
            .iter()
            .map(|(name, value)| (name.clone(), JsonValue::Scalar(value.clone())))
            .collect();
        object.insert(ATTRIBUTES_KEY.to_string(), JsonValue::Object(attributes));
    }

    for child in &element.children {
        let key = match child {
            MarkupNode::Element(child_element) => child_element.name.as_str(),
            MarkupNode::Text(_) => TEXT_KEY,
        };

        // The attribute map owns the reserved key.
        if key == ATTRIBUTES_KEY {
            warn!(
                parent = %element.name,
                "⚠️  Dropping child element named {} under <{}>",
                ATTRIBUTES_KEY,
                element.name
            );
            continue;
        }

        let value = transform(child);

        match object.get_mut(key) {
            None => {
                object.insert(key.to_string(), value);
            }
            Some(JsonValue::Array(items)) => items.push(value),
            Some(existing) => {
                let prior = std::mem::replace(existing, JsonValue::Array(Vec::new()));
                *existing = JsonValue::Array(vec![prior, value]);
            }
        }
    }

    JsonValue::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::parse_markup;
    use serde_json::json;

    fn transformed(xml: &str) -> serde_json::Value {
        let root = parse_markup(xml).unwrap();
        serde_json::to_value(transform_document(&root)).unwrap()
    }

    #[test]
    fn repeated_tags_become_an_array_in_document_order() {
        assert_eq!(
            transformed("<a><b>x</b><b>y</b></a>"),
            json!({ "a": { "b": ["x", "y"] } })
        );
    }

    #[test]
    fn attributes_come_first_under_the_reserved_key() {
        let value = transformed(r#"<a id="1"><b>x</b></a>"#);

        assert_eq!(value, json!({ "a": { "@attributes": { "id": "1" }, "b": "x" } }));

        let root = parse_markup(r#"<a id="1"><b>x</b></a>"#).unwrap();
        let JsonValue::Object(fields) = transform(&MarkupNode::Element(root)) else {
            panic!("element with attributes must transform to an object");
        };
        assert_eq!(fields.keys().next().map(String::as_str), Some(ATTRIBUTES_KEY));
    }

    #[test]
    fn single_occurrence_stays_bare() {
        let root = MarkupElement::new("a")
            .with_child(MarkupElement::new("b").with_text("1"))
            .with_child(MarkupElement::new("c").with_text("2"))
            .with_child(MarkupElement::new("c").with_text("3"));

        let value = transform(&root.into());

        assert_eq!(value.get("b"), Some(&JsonValue::from("1")));
        assert_eq!(
            value.get("c"),
            Some(&JsonValue::Array(vec!["2".into(), "3".into()]))
        );
    }

    #[test]
    fn array_length_matches_occurrence_count() {
        for count in 2..6 {
            let mut root = MarkupElement::new("list");
            for i in 0..count {
                root = root.with_child(MarkupElement::new("item").with_text(i.to_string()));
            }

            let value = transform(&root.into());
            let Some(JsonValue::Array(items)) = value.get("item") else {
                panic!("{count} items must promote to an array");
            };
            let texts: Vec<_> = items.iter().filter_map(JsonValue::as_scalar).collect();
            let expected: Vec<String> = (0..count).map(|i| i.to_string()).collect();
            assert_eq!(texts, expected);
        }
    }

    #[test]
    fn text_beside_attributes_goes_under_text_key() {
        assert_eq!(
            transformed(r#"<a><seq unit="n"> 12 </seq></a>"#),
            json!({ "a": { "seq": { "@attributes": { "unit": "n" }, "#text": "12" } } })
        );
    }

    #[test]
    fn whitespace_text_nodes_are_kept_as_empty_scalars() {
        assert_eq!(
            transformed("<a>\n  <b>x</b>\n</a>"),
            json!({ "a": { "#text": ["", ""], "b": "x" } })
        );
    }

    #[test]
    fn empty_element_is_an_empty_object() {
        assert_eq!(transformed("<a><b/></a>"), json!({ "a": { "b": {} } }));
    }

    #[test]
    fn reserved_child_name_never_overwrites_attributes() {
        let root = MarkupElement::new("a")
            .with_attribute("id", "1")
            .with_child(MarkupElement::new(ATTRIBUTES_KEY).with_text("spoof"));

        let value = serde_json::to_value(transform(&root.into())).unwrap();

        assert_eq!(value, json!({ "@attributes": { "id": "1" } }));
    }

    #[test]
    fn path_stops_at_missing_segment() {
        let value = transform_document(&parse_markup("<r><m><l>1</l></m></r>").unwrap());

        assert_eq!(value.path(&["r", "m", "l"]), Some(&JsonValue::from("1")));
        assert_eq!(value.path(&["r", "x", "l"]), None);
        assert_eq!(value.path(&["r", "m", "l", "deeper"]), None);
    }
}
