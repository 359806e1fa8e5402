//! Source citation block appended to grounded answers.

use std::collections::HashSet;

use crate::models::RetrievalPair;

/// One line per distinct (source, page), in first-seen order.
pub fn citation_lines(pairs: &[RetrievalPair]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut lines = Vec::new();
    for pair in pairs {
        let page = pair.chunk.page;
        if !seen.insert((pair.chunk.source.as_str(), page)) {
            continue;
        }
        let name = pair.chunk.source_name();
        lines.push(match page {
            Some(p) => format!("- **{}**, page {}", name, p),
            None => format!("- **{}**", name),
        });
    }
    lines
}

/// Markdown block listing the sources, or an empty string when there are none.
pub fn sources_block(pairs: &[RetrievalPair]) -> String {
    let lines = citation_lines(pairs);
    if lines.is_empty() {
        return String::new();
    }
    format!("\n\n---\n**Sources (guidelines)**\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn pair(source: &str, page: Option<u32>) -> RetrievalPair {
        RetrievalPair {
            chunk: Chunk {
                id: String::new(),
                source: source.into(),
                page,
                chunk_index: 0,
                text: "t".into(),
                hash: String::new(),
            },
            distance: 0.1,
        }
    }

    #[test]
    fn dedups_in_first_seen_order() {
        let pairs = vec![
            pair("b.pdf", Some(2)),
            pair("a.pdf", Some(1)),
            pair("b.pdf", Some(2)),
            pair("b.pdf", Some(3)),
            pair("notes/c.md", None),
        ];
        assert_eq!(
            citation_lines(&pairs),
            vec![
                "- **b.pdf**, page 2",
                "- **a.pdf**, page 1",
                "- **b.pdf**, page 3",
                "- **c.md**",
            ]
        );
    }

    #[test]
    fn empty_pairs_give_empty_block() {
        assert_eq!(sources_block(&[]), "");
        assert!(sources_block(&[pair("a.pdf", Some(1))]).starts_with("\n\n---\n**Sources"));
    }
}
