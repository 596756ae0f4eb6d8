//! Small helpers over `xmltree` elements.
//!
//! Calibration and configuration documents are both plain element trees. These
//! helpers keep the traversal code in the rest of the crate short and make sure
//! every document is parsed and emitted with the same settings.

use std::borrow::Cow;

use xmltree::{Element, EmitterConfig, ParserConfig, XMLNode};

/// Parser settings that keep comments, processing instructions and whitespace.
pub fn parser_config() -> ParserConfig {
    ParserConfig::new()
        .trim_whitespace(false)
        .whitespace_to_characters(true)
        .cdata_to_characters(false)
        .ignore_comments(false)
}

/// Emitter settings that write the tree back without re-indenting it.
pub fn emitter_config() -> EmitterConfig {
    EmitterConfig::new()
        .write_document_declaration(false)
        .perform_indent(false)
        .autopad_comments(false)
}

/// Direct element children, in document order.
pub fn child_elements<'a>(el: &'a Element) -> impl Iterator<Item = &'a Element> + 'a {
    el.children.iter().filter_map(|node| match node {
        XMLNode::Element(e) => Some(e),
        _ => None,
    })
}

pub fn child_elements_mut<'a>(el: &'a mut Element) -> impl Iterator<Item = &'a mut Element> + 'a {
    el.children.iter_mut().filter_map(|node| match node {
        XMLNode::Element(e) => Some(e),
        _ => None,
    })
}

/// Direct children with the given tag name.
///
/// The element borrow and the name borrow are independent, so matches can
/// outlive a temporary tag name.
pub fn children_named<'a, 'n>(el: &'a Element, name: &'n str) -> impl Iterator<Item = &'a Element> + use<'a, 'n> {
    child_elements(el).filter(move |e| e.name == name)
}

/// First direct child with the given tag name.
pub fn first_child<'a>(el: &'a Element, name: &str) -> Option<&'a Element> {
    child_elements(el).find(|e| e.name == name)
}

pub fn first_child_mut<'a>(el: &'a mut Element, name: &str) -> Option<&'a mut Element> {
    child_elements_mut(el).find(|e| e.name == name)
}

pub fn attr<'a>(el: &'a Element, name: &str) -> Option<&'a str> {
    el.attributes.get(name).map(String::as_str)
}

/// Concatenated text content of an element (text and CDATA children only).
pub fn text(el: &Element) -> Option<Cow<'_, str>> {
    let mut parts = el.children.iter().filter_map(|node| match node {
        XMLNode::Text(t) | XMLNode::CData(t) => Some(t.as_str()),
        _ => None,
    });
    let first = parts.next()?;
    match parts.next() {
        None => Some(Cow::Borrowed(first)),
        Some(second) => {
            let mut joined = String::from(first);
            joined.push_str(second);
            parts.for_each(|p| joined.push_str(p));
            Some(Cow::Owned(joined))
        }
    }
}

/// Trimmed text content, `None` when the element has no text.
pub fn trimmed_text(el: &Element) -> Option<String> {
    text(el).map(|t| t.trim().to_string())
}

/// Replace the text content of a leaf element.
///
/// Comments and child elements are kept; existing text nodes are dropped.
pub fn set_text(el: &mut Element, value: &str) {
    el.children
        .retain(|node| !matches!(node, XMLNode::Text(_) | XMLNode::CData(_)));
    el.children.push(XMLNode::Text(value.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> Element {
        Element::parse_with_config(xml.as_bytes(), parser_config()).unwrap()
    }

    #[test]
    fn text_joins_fragments_and_trims() {
        let el = parse("<a>  12<!-- note -->3 </a>");
        assert_eq!(trimmed_text(&el).as_deref(), Some("123"));
    }

    #[test]
    fn set_text_keeps_comments() {
        let mut el = parse("<a><!-- keep -->old</a>");
        set_text(&mut el, "new");
        assert_eq!(trimmed_text(&el).as_deref(), Some("new"));
        assert!(el.children.iter().any(|n| matches!(n, XMLNode::Comment(_))));
    }

    #[test]
    fn children_named_filters_by_tag() {
        let el = parse("<r><x id=\"1\"/><y/><x id=\"2\"/></r>");
        let ids: Vec<_> = children_named(&el, "x").filter_map(|e| attr(e, "id")).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(first_child(&el, "z").is_none());
    }
}
