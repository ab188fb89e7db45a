//! Selector evaluation.
//!
//! A selector's `match` expression has the form
//! `[namespace/][kind:]name[=value]`. A bare selector targets a catalog
//! entry by name or capability. A `tag:` selector walks the application's
//! tags and substitutes `$*` in the name/capability templates with each
//! matching tag's lowercased name.

use crate::crd::Selector;
use crate::model::Tag;

use super::error::{Error, Result};
use super::resolver::Resolver;

/// Parsed form of a `match` expression.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedSelector {
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub value: String,
}

impl ParsedSelector {
    pub fn parse(expression: &str) -> Self {
        let mut parsed = Self::default();
        let mut rest = expression;
        if let Some((namespace, tail)) = rest.split_once('/') {
            parsed.namespace = namespace.to_string();
            rest = tail;
        }
        if let Some((kind, tail)) = rest.split_once(':') {
            parsed.kind = kind.to_string();
            rest = tail;
        }
        match rest.split_once('=') {
            Some((name, value)) => {
                parsed.name = name.to_string();
                parsed.value = value.to_string();
            }
            None => parsed.name = rest.to_string(),
        }
        parsed
    }
}

/// Evaluate a selector against the catalog (through `resolver`) and the
/// task's application tags. Matches are de-duplicated by name, first-seen
/// order preserved.
pub fn evaluate(
    selector: &Selector,
    resolver: &dyn Resolver,
    tags: &[Tag],
) -> Result<Vec<String>> {
    let parsed = ParsedSelector::parse(&selector.matched);
    let matched = match parsed.kind.as_str() {
        "" => bare(selector, resolver),
        "tag" => tag(selector, &parsed, resolver, tags),
        kind => return Err(Error::SelectorNotSupported(kind.to_string())),
    };
    Ok(dedup(matched))
}

fn bare(selector: &Selector, resolver: &dyn Resolver) -> Vec<String> {
    if !selector.name.is_empty() {
        if resolver.find(&selector.name) {
            return vec![selector.name.clone()];
        }
        return Vec::new();
    }
    if !selector.capability.is_empty() {
        return resolver.match_capability(&selector.capability);
    }
    Vec::new()
}

fn tag(
    selector: &Selector,
    parsed: &ParsedSelector,
    resolver: &dyn Resolver,
    tags: &[Tag],
) -> Vec<String> {
    let mut matched = Vec::new();
    for tag in tags {
        if tag.category != parsed.name {
            continue;
        }
        if !(parsed.value.is_empty() || tag.name == parsed.value) {
            continue;
        }
        let substituted = tag.name.to_lowercase();
        if !selector.name.is_empty() {
            let name = selector.name.replacen("$*", &substituted, 1);
            if resolver.find(&name) {
                matched.push(name);
            }
        }
        if !selector.capability.is_empty() {
            let capability = selector.capability.replacen("$*", &substituted, 1);
            matched.extend(resolver.match_capability(&capability));
        }
    }
    matched
}

fn dedup(matched: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    matched
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::cluster::testing;
    use crate::scheduler::resolver::AddonResolver;
    use kube::ResourceExt;

    fn tag(category: &str, name: &str) -> Tag {
        Tag {
            id: 0,
            name: name.to_string(),
            category: category.to_string(),
        }
    }

    fn selector(matched: &str, name: &str, capability: &str) -> Selector {
        Selector {
            matched: matched.to_string(),
            name: name.to_string(),
            capability: capability.to_string(),
        }
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            ParsedSelector::parse("tag:Language=Java"),
            ParsedSelector {
                kind: "tag".into(),
                name: "Language".into(),
                value: "Java".into(),
                ..Default::default()
            }
        );
        assert_eq!(
            ParsedSelector::parse("hub/tag:Language="),
            ParsedSelector {
                namespace: "hub".into(),
                kind: "tag".into(),
                name: "Language".into(),
                ..Default::default()
            }
        );
        assert_eq!(
            ParsedSelector::parse("a1"),
            ParsedSelector {
                name: "a1".into(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_bare_by_name_and_capability() {
        let mut snapshot = testing::snapshot();
        for addon in [
            testing::addon("a1", "analyze", "java-analysis"),
            testing::addon("a2", "analyze", "java-analysis"),
        ] {
            snapshot.addons.insert(addon.name_any(), addon);
        }
        let resolver = AddonResolver::new(&snapshot, "analyze");

        let matched = evaluate(&selector("", "a1", ""), &resolver, &[]).unwrap();
        assert_eq!(matched, vec!["a1"]);

        let matched = evaluate(&selector("", "missing", ""), &resolver, &[]).unwrap();
        assert!(matched.is_empty());

        let matched = evaluate(&selector("", "", "java-analysis"), &resolver, &[]).unwrap();
        assert_eq!(matched, vec!["a1", "a2"]);
    }

    #[test]
    fn test_tag_selector_substitutes_template() {
        let mut snapshot = testing::snapshot();
        for addon in [
            testing::addon("java-analyzer", "analyze", "java-analysis"),
            testing::addon("go-analyzer", "analyze", "go-analysis"),
        ] {
            snapshot.addons.insert(addon.name_any(), addon);
        }
        let resolver = AddonResolver::new(&snapshot, "analyze");
        let tags = vec![tag("Language", "Java"), tag("Language", "Go"), tag("OS", "Linux")];

        // Name template, any tag value.
        let matched = evaluate(
            &selector("tag:Language=", "$*-analyzer", ""),
            &resolver,
            &tags,
        )
        .unwrap();
        assert_eq!(matched, vec!["java-analyzer", "go-analyzer"]);

        // Capability template, value pinned.
        let matched = evaluate(
            &selector("tag:Language=Java", "", "$*-analysis"),
            &resolver,
            &tags,
        )
        .unwrap();
        assert_eq!(matched, vec!["java-analyzer"]);
    }

    #[test]
    fn test_tag_selector_dedups_by_name() {
        let mut snapshot = testing::snapshot();
        let addon = testing::addon("java-analyzer", "analyze", "");
        snapshot.addons.insert(addon.name_any(), addon);
        let resolver = AddonResolver::new(&snapshot, "analyze");
        let tags = vec![tag("Language", "Java"), tag("Language", "Java")];
        let matched = evaluate(
            &selector("tag:Language=", "$*-analyzer", ""),
            &resolver,
            &tags,
        )
        .unwrap();
        assert_eq!(matched, vec!["java-analyzer"]);
    }

    #[test]
    fn test_unknown_kind_not_supported() {
        let snapshot = testing::snapshot();
        let resolver = AddonResolver::new(&snapshot, "analyze");
        let err = evaluate(&selector("platform:target=x", "", ""), &resolver, &[]);
        assert!(matches!(err, Err(Error::SelectorNotSupported(kind)) if kind == "platform"));
    }
}
