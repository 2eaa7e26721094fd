//! Entity to Markdown conversion.
//!
//! Output is a YAML front-matter header followed by the Markdown body:
//!
//! ```text
//! ---
//! id: 1a2b...
//! kind: page
//! title: Release notes
//! ...
//! ---
//!
//! # Release notes
//!
//! body
//! ```
//!
//! Rendering is a pure function of its inputs. The header is what
//! reindex reads back to rebuild registries.

use crate::error::{CoreError, CoreResult};
use crate::id::{self, EntityId};
use crate::remote::{Block, BlockKind, Entity, UserRef};
use crate::types::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

const DELIMITER: &str = "---";

/// Metadata header of a markup file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontMatter {
    /// Entity id.
    pub id: EntityId,
    /// Page or database.
    pub kind: EntityKind,
    /// Display title.
    pub title: String,
    /// Content folder.
    pub folder: String,
    /// Parent entity.
    #[serde(default, with = "id::optional")]
    pub parent_id: Option<EntityId>,
    /// True for configured roots.
    #[serde(default)]
    pub is_root: bool,
    /// Remote edit time.
    pub last_edited: DateTime<Utc>,
    /// Author display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Last editor display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edited_by: Option<String>,
}

/// Context the converter needs beyond the entity itself.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Content folder.
    pub folder: String,
    /// True for configured roots.
    pub is_root: bool,
    /// Parent recorded in the header; the entity's own parent when `None`.
    pub parent_id: Option<EntityId>,
    /// Local links replacing remote asset URLs.
    pub assets: BTreeMap<String, String>,
}

impl RenderOptions {
    /// Creates options for `folder`.
    #[must_use]
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            ..Self::default()
        }
    }

    /// Marks the entity as a root.
    #[must_use]
    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Sets the recorded parent.
    #[must_use]
    pub fn with_parent(mut self, parent: Option<EntityId>) -> Self {
        self.parent_id = parent;
        self
    }

    /// Maps a remote asset URL to a local link.
    #[must_use]
    pub fn with_asset(mut self, url: impl Into<String>, link: impl Into<String>) -> Self {
        self.assets.insert(url.into(), link.into());
        self
    }
}

/// Renders `entity` and its content tree.
pub fn render(entity: &Entity, blocks: &[Block], options: &RenderOptions) -> CoreResult<Vec<u8>> {
    let header = FrontMatter {
        id: entity.id.clone(),
        kind: entity.kind,
        title: entity.title.clone(),
        folder: options.folder.clone(),
        parent_id: options.parent_id.clone().or_else(|| entity.parent_id.clone()),
        is_root: options.is_root,
        last_edited: entity.last_edited,
        created_by: display_name(entity.created_by.as_ref()),
        last_edited_by: display_name(entity.last_edited_by.as_ref()),
    };
    let yaml = serde_yaml::to_string(&header).map_err(CoreError::encode)?;

    let mut out = String::new();
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(DELIMITER);
    out.push_str("\n\n");

    if !entity.title.is_empty() {
        let _ = writeln!(out, "# {}\n", entity.title);
    }
    render_blocks(&mut out, blocks, 0, options);

    while out.ends_with("\n\n") {
        out.pop();
    }
    Ok(out.into_bytes())
}

/// Parses the front-matter header of a rendered file.
pub fn parse_front_matter(bytes: &[u8]) -> CoreResult<FrontMatter> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| CoreError::missing_front_matter("file is not UTF-8"))?;
    let text = text.replace("\r\n", "\n");

    let rest = text
        .strip_prefix("---\n")
        .ok_or_else(|| CoreError::missing_front_matter("no opening delimiter"))?;
    let end = rest
        .find("\n---\n")
        .or_else(|| rest.strip_suffix("\n---").map(str::len))
        .ok_or_else(|| CoreError::missing_front_matter("no closing delimiter"))?;

    serde_yaml::from_str(&rest[..end]).map_err(|e| CoreError::missing_front_matter(e.to_string()))
}

fn display_name(user: Option<&UserRef>) -> Option<String> {
    user.and_then(|u| u.name.clone())
}

fn is_list_item(block: &Block) -> bool {
    matches!(
        block.kind,
        BlockKind::BulletedItem | BlockKind::NumberedItem | BlockKind::ToDo { .. }
    )
}

fn render_blocks(out: &mut String, blocks: &[Block], indent: usize, options: &RenderOptions) {
    let pad = " ".repeat(indent);
    let mut number = 0;

    for (index, block) in blocks.iter().enumerate() {
        number = if block.kind == BlockKind::NumberedItem {
            number + 1
        } else {
            0
        };

        let child_indent = match &block.kind {
            BlockKind::BulletedItem | BlockKind::ToDo { .. } => indent + 2,
            BlockKind::NumberedItem => indent + 3,
            _ => indent + 2,
        };

        render_block(out, block, &pad, number, options);

        if !block.children.is_empty() {
            if !is_list_item(block) {
                out.push('\n');
            }
            render_blocks(out, &block.children, child_indent, options);
        }

        // Nested runs end without a blank line; the parent decides.
        let last = index + 1 == blocks.len();
        if indent > 0 && last {
            continue;
        }
        let next_is_item = blocks.get(index + 1).is_some_and(is_list_item);
        if !(is_list_item(block) && next_is_item) && !out.ends_with("\n\n") {
            out.push('\n');
        }
    }
}

fn render_block(out: &mut String, block: &Block, pad: &str, number: usize, options: &RenderOptions) {
    let text = block.text.as_str();
    let link = |url: &str| options.assets.get(url).cloned().unwrap_or_else(|| url.to_string());

    let _ = match &block.kind {
        BlockKind::Paragraph => writeln!(out, "{pad}{text}"),
        BlockKind::Heading(level) => {
            let level = (*level).clamp(1, 3) as usize + 1;
            writeln!(out, "{pad}{} {text}", "#".repeat(level))
        }
        BlockKind::BulletedItem => writeln!(out, "{pad}- {text}"),
        BlockKind::NumberedItem => writeln!(out, "{pad}{number}. {text}"),
        BlockKind::ToDo { checked } => {
            let mark = if *checked { 'x' } else { ' ' };
            writeln!(out, "{pad}- [{mark}] {text}")
        }
        BlockKind::Quote => {
            for line in text.lines() {
                let _ = writeln!(out, "{pad}> {line}");
            }
            Ok(())
        }
        BlockKind::Code { language } => {
            let _ = writeln!(out, "{pad}```{language}");
            for line in text.lines() {
                let _ = writeln!(out, "{pad}{line}");
            }
            writeln!(out, "{pad}```")
        }
        BlockKind::Divider => writeln!(out, "{pad}---"),
        BlockKind::Image { url } => writeln!(out, "{pad}![{text}]({})", link(url)),
        BlockKind::File { url, name } => writeln!(out, "{pad}[{name}]({})", link(url)),
        BlockKind::ChildPage | BlockKind::ChildDatabase => {
            writeln!(out, "{pad}[{text}]({})", block.id)
        }
        BlockKind::Unsupported(kind) => writeln!(out, "{pad}<!-- unsupported block: {kind} -->"),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entity() -> Entity {
        let mut entity = Entity::page(
            "P-1",
            "Release notes",
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
        )
        .with_parent("root1");
        entity.created_by = Some(UserRef {
            name: Some("Ada".into()),
            ..UserRef::new("u1")
        });
        entity
    }

    fn text(id: &str, kind: BlockKind, text: &str) -> Block {
        Block::new(id, kind, text)
    }

    #[test]
    fn header_round_trips() {
        let options = RenderOptions::new("wiki");
        let bytes = render(&entity(), &[], &options).unwrap();
        let header = parse_front_matter(&bytes).unwrap();

        assert_eq!(header.id, EntityId::new("p1"));
        assert_eq!(header.title, "Release notes");
        assert_eq!(header.folder, "wiki");
        assert_eq!(header.parent_id, Some(EntityId::new("root1")));
        assert_eq!(header.created_by.as_deref(), Some("Ada"));
        assert_eq!(header.last_edited_by, None);
        assert!(!header.is_root);
    }

    #[test]
    fn options_override_parent() {
        let options = RenderOptions::new("wiki")
            .with_root(true)
            .with_parent(None);
        let mut root = entity();
        root.parent_id = None;
        let header = parse_front_matter(&render(&root, &[], &options).unwrap()).unwrap();
        assert!(header.is_root);
        assert_eq!(header.parent_id, None);
    }

    #[test]
    fn renders_nested_lists() {
        let blocks = vec![
            text("b1", BlockKind::Heading(1), "Changes"),
            text("b2", BlockKind::BulletedItem, "one")
                .with_children(vec![text("b3", BlockKind::BulletedItem, "nested")]),
            text("b4", BlockKind::BulletedItem, "two"),
            text("b5", BlockKind::NumberedItem, "first"),
            text("b6", BlockKind::NumberedItem, "second"),
            text("b7", BlockKind::ToDo { checked: true }, "done"),
            text("b8", BlockKind::Paragraph, "The end."),
        ];
        let bytes = render(&entity(), &blocks, &RenderOptions::new("wiki")).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let body = text.split("---\n\n").nth(1).unwrap();

        assert_eq!(
            body,
            "# Release notes\n\n\
             ## Changes\n\n\
             - one\n  - nested\n- two\n1. first\n2. second\n- [x] done\n\n\
             The end.\n"
        );
    }

    #[test]
    fn renders_code_quote_and_assets() {
        let blocks = vec![
            text("c1", BlockKind::Code { language: "rust".into() }, "fn main() {}"),
            text("q1", BlockKind::Quote, "quoted\ntwice"),
            text("i1", BlockKind::Image { url: "https://cdn/x.png".into() }, "diagram"),
            text("d1", BlockKind::Divider, ""),
            text("s1", BlockKind::ChildPage, "Subpage"),
            text("u1", BlockKind::Unsupported("embed".into()), ""),
        ];
        let options = RenderOptions::new("wiki").with_asset("https://cdn/x.png", "assets/i1.png");
        let text = String::from_utf8(render(&entity(), &blocks, &options).unwrap()).unwrap();

        assert!(text.contains("```rust\nfn main() {}\n```\n"));
        assert!(text.contains("> quoted\n> twice\n"));
        assert!(text.contains("![diagram](assets/i1.png)"));
        assert!(text.contains("[Subpage](s1)"));
        assert!(text.contains("<!-- unsupported block: embed -->"));
        assert!(text.ends_with("-->\n"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let blocks = vec![text("b1", BlockKind::Paragraph, "same")];
        let options = RenderOptions::new("wiki");
        assert_eq!(
            render(&entity(), &blocks, &options).unwrap(),
            render(&entity(), &blocks, &options).unwrap()
        );
    }

    #[test]
    fn missing_header_is_rejected() {
        assert!(matches!(
            parse_front_matter(b"# no header\n"),
            Err(CoreError::MissingFrontMatter { .. })
        ));
        assert!(matches!(
            parse_front_matter(b"---\nid: x\n"),
            Err(CoreError::MissingFrontMatter { .. })
        ));
    }
}
