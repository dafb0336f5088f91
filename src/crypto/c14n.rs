//! XML canonicalization (C14N 1.0 and Exclusive C14N, comments omitted).
//!
//! Operates on a parsed `roxmltree` document. Whitespace-only text nodes are
//! dropped, matching how the toolkit's reference verifier loads documents.

use std::collections::BTreeMap;

use roxmltree::{Node, NodeId};

pub const C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// Canonicalization flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// C14N 1.0: every in-scope namespace is rendered.
    Inclusive,
    /// Exclusive C14N: only visibly utilized namespaces are rendered.
    Exclusive,
}

impl Method {
    /// Resolves an algorithm URI. Unknown URIs, including the
    /// with-comments variants, return `None`.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            C14N => Some(Method::Inclusive),
            EXC_C14N => Some(Method::Exclusive),
            _ => None,
        }
    }
}

/// Canonicalizes the subtree rooted at `node`.
///
/// `exclude`, when set, names an element dropped from the output together
/// with its descendants (the enveloped-signature transform).
pub fn canonicalize(node: Node<'_, '_>, method: Method, exclude: Option<NodeId>) -> String {
    canonicalize_with_prefixes(node, method, exclude, &[])
}

/// Like [`canonicalize`], with an `InclusiveNamespaces` prefix list.
///
/// Under Exclusive C14N the listed prefixes (`""` for the default namespace)
/// are rendered whenever in scope, as C14N 1.0 would. Ignored for
/// `Method::Inclusive`.
pub fn canonicalize_with_prefixes(
    node: Node<'_, '_>,
    method: Method,
    exclude: Option<NodeId>,
    inclusive_prefixes: &[String],
) -> String {
    let mut out = String::new();
    let rendered = BTreeMap::new();
    write_element(&mut out, node, method, exclude, inclusive_prefixes, &rendered);
    out
}

/// Splits a `PrefixList` attribute value, mapping `#default` to `""`.
pub fn parse_prefix_list(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(|p| if p == "#default" { "" } else { p })
        .map(str::to_string)
        .collect()
}

fn write_element(
    out: &mut String,
    node: Node<'_, '_>,
    method: Method,
    exclude: Option<NodeId>,
    inclusive_prefixes: &[String],
    rendered: &BTreeMap<String, String>,
) {
    let qname = element_qname(node);
    let (prefix, _) = split_qname(qname);

    let mut declared = rendered.clone();
    let mut ns_out: BTreeMap<String, String> = BTreeMap::new();

    match method {
        Method::Inclusive => {
            for ns in node.namespaces() {
                let p = ns.name().unwrap_or("");
                if p == "xml" {
                    continue;
                }
                if declared.get(p).map(String::as_str) != Some(ns.uri()) {
                    ns_out.insert(p.to_string(), ns.uri().to_string());
                }
            }
            let has_default = node.namespaces().any(|ns| ns.name().is_none());
            if !has_default && declared.get("").is_some_and(|uri| !uri.is_empty()) {
                ns_out.insert(String::new(), String::new());
            }
        }
        Method::Exclusive => {
            let element_uri = node.tag_name().namespace().unwrap_or("");
            let mut utilized = vec![(prefix.to_string(), element_uri.to_string())];
            for attr in node.attributes() {
                if let Some(uri) = attr.namespace() {
                    if let Some(p) = attribute_prefix(node, uri).filter(|p| *p != "xml") {
                        utilized.push((p.to_string(), uri.to_string()));
                    }
                }
            }
            for p in inclusive_prefixes.iter().filter(|p| p.as_str() != "xml") {
                if let Some(ns) = node.namespaces().find(|ns| ns.name().unwrap_or("") == p.as_str()) {
                    utilized.push((p.clone(), ns.uri().to_string()));
                }
            }
            for (p, uri) in utilized {
                let current = declared.get(&p).map(String::as_str).unwrap_or("");
                if current != uri {
                    ns_out.insert(p, uri);
                }
            }
        }
    }

    out.push('<');
    out.push_str(qname);

    for (p, uri) in &ns_out {
        if p.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(p);
            out.push_str("=\"");
        }
        escape_attr(out, uri);
        out.push('"');
        declared.insert(p.clone(), uri.clone());
    }

    let mut attrs: Vec<(&str, String, &str)> = node
        .attributes()
        .filter(|a| a.namespace() != Some(XMLNS_URI))
        .map(|a| {
            let uri = a.namespace().unwrap_or("");
            let name = match a.namespace().and_then(|uri| attribute_prefix(node, uri)) {
                Some(p) => format!("{}:{}", p, a.name()),
                None => a.name().to_string(),
            };
            (uri, name, a.value())
        })
        .collect();
    attrs.sort_by(|a, b| {
        let local_a = split_qname(&a.1).1;
        let local_b = split_qname(&b.1).1;
        (a.0, local_a).cmp(&(b.0, local_b))
    });

    for (_, name, value) in attrs {
        out.push(' ');
        out.push_str(&name);
        out.push_str("=\"");
        escape_attr(out, value);
        out.push('"');
    }
    out.push('>');

    for child in node.children() {
        if Some(child.id()) == exclude {
            continue;
        }
        if child.is_element() {
            write_element(out, child, method, exclude, inclusive_prefixes, &declared);
        } else if child.is_text() {
            let text = child.text().unwrap_or("");
            if !text.trim().is_empty() {
                escape_text(out, text);
            }
        } else if let Some(pi) = child.pi() {
            out.push_str("<?");
            out.push_str(pi.target);
            if let Some(value) = pi.value {
                out.push(' ');
                out.push_str(value);
            }
            out.push_str("?>");
        }
    }

    out.push_str("</");
    out.push_str(qname);
    out.push('>');
}

const XMLNS_URI: &str = "http://www.w3.org/2000/xmlns/";

/// The element's qualified name exactly as written in the source.
fn element_qname<'a>(node: Node<'a, '_>) -> &'a str {
    let text = &node.document().input_text()[node.range()];
    let tag = text.strip_prefix('<').unwrap_or(text);
    let end = tag
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(tag.len());
    &tag[..end]
}

fn split_qname(qname: &str) -> (&str, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (prefix, local),
        None => ("", qname),
    }
}

fn attribute_prefix<'a>(node: Node<'a, '_>, uri: &str) -> Option<&'a str> {
    if uri == "http://www.w3.org/XML/1998/namespace" {
        return Some("xml");
    }
    node.namespaces()
        .filter(|ns| ns.uri() == uri)
        .find_map(|ns| ns.name())
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c14n(xml: &str, method: Method) -> String {
        let doc = roxmltree::Document::parse(xml).unwrap();
        canonicalize(doc.root_element(), method, None)
    }

    #[test]
    fn sorts_attributes_and_expands_empty_elements() {
        let out = c14n(r#"<a z="1" b='2'><e/></a>"#, Method::Inclusive);
        assert_eq!(out, r#"<a b="2" z="1"><e></e></a>"#);
    }

    #[test]
    fn drops_comments_and_whitespace_only_text() {
        let out = c14n("<a>\n  <!-- note -->\n  <b> x </b>\n</a>", Method::Inclusive);
        assert_eq!(out, "<a><b> x </b></a>");
    }

    #[test]
    fn escapes_text_and_attributes() {
        let out = c14n(r#"<a t="&quot;&lt;&#9;">1 &lt; 2 &amp;&gt;</a>"#, Method::Inclusive);
        assert_eq!(out, "<a t=\"&quot;&lt;&#x9;\">1 &lt; 2 &amp;&gt;</a>");
    }

    #[test]
    fn inclusive_renders_inherited_namespaces_on_subtree() {
        let xml = r#"<r xmlns:u="urn:unused" xmlns:v="urn:v"><v:m><c/></v:m></r>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let m = doc.descendants().find(|n| n.has_tag_name("m")).unwrap();

        let inclusive = canonicalize(m, Method::Inclusive, None);
        assert_eq!(inclusive, r#"<v:m xmlns:u="urn:unused" xmlns:v="urn:v"><c></c></v:m>"#);

        let exclusive = canonicalize(m, Method::Exclusive, None);
        assert_eq!(exclusive, r#"<v:m xmlns:v="urn:v"><c></c></v:m>"#);
    }

    #[test]
    fn exclusive_renders_listed_prefixes() {
        let xml = r#"<r xmlns:u="urn:u" xmlns:w="urn:w" xmlns:v="urn:v"><v:m><c/></v:m></r>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let m = doc.descendants().find(|n| n.has_tag_name("m")).unwrap();

        let prefixes = parse_prefix_list("u #default missing");
        assert_eq!(prefixes, vec!["u", "", "missing"]);

        let out = canonicalize_with_prefixes(m, Method::Exclusive, None, &prefixes);
        assert_eq!(out, r#"<v:m xmlns:u="urn:u" xmlns:v="urn:v"><c></c></v:m>"#);
    }

    #[test]
    fn default_namespace_is_declared_once() {
        let out = c14n(r#"<a xmlns="urn:d"><b xmlns="urn:d"/></a>"#, Method::Exclusive);
        assert_eq!(out, r#"<a xmlns="urn:d"><b></b></a>"#);
    }

    #[test]
    fn excluded_node_is_skipped() {
        let xml = "<a><keep/><drop><x/></drop></a>";
        let doc = roxmltree::Document::parse(xml).unwrap();
        let drop = doc.descendants().find(|n| n.has_tag_name("drop")).unwrap();
        let out = canonicalize(doc.root_element(), Method::Exclusive, Some(drop.id()));
        assert_eq!(out, "<a><keep></keep></a>");
    }

    #[test]
    fn algorithm_uris() {
        assert_eq!(Method::from_uri(C14N), Some(Method::Inclusive));
        assert_eq!(Method::from_uri(EXC_C14N), Some(Method::Exclusive));
        assert_eq!(
            Method::from_uri("http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments"),
            None
        );
    }
}
