//! Recursive content tree retrieval.

use docsync_core::{Block, BlockKind, Entity, EntityId, RemoteResult, RemoteSource};

/// Fetches the full content tree below `id`.
///
/// Children are paginated until exhausted. Recursion stops at
/// `max_depth` (0 fetches only the direct children), and never descends
/// into child pages or databases, which are entities of their own. A
/// failure below the top level is logged and the affected subtree is
/// left empty; a failure fetching the top level is returned.
pub fn fetch_tree(
    remote: &dyn RemoteSource,
    id: &EntityId,
    max_depth: Option<usize>,
) -> RemoteResult<Vec<Block>> {
    let mut blocks = fetch_children(remote, id)?;
    fill_children(remote, &mut blocks, 1, max_depth);
    Ok(blocks)
}

/// Fetches every row of a database.
pub fn fetch_rows(remote: &dyn RemoteSource, id: &EntityId) -> RemoteResult<Vec<Entity>> {
    let mut rows = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = remote.query_database(id, cursor.as_deref())?;
        rows.extend(page.entities);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(rows)
}

/// Collects the child entity ids linked from a tree, in document order.
pub fn child_entities(blocks: &[Block]) -> Vec<EntityId> {
    let mut ids = Vec::new();
    collect_children(blocks, &mut ids);
    ids
}

fn collect_children(blocks: &[Block], ids: &mut Vec<EntityId>) {
    for block in blocks {
        match block.kind {
            BlockKind::ChildPage | BlockKind::ChildDatabase => {
                if !ids.contains(&block.id) {
                    ids.push(block.id.clone());
                }
            }
            _ => collect_children(&block.children, ids),
        }
    }
}

fn fetch_children(remote: &dyn RemoteSource, id: &EntityId) -> RemoteResult<Vec<Block>> {
    let mut blocks = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = remote.fetch_block_children(id, cursor.as_deref())?;
        blocks.extend(page.blocks);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(blocks)
}

fn fill_children(
    remote: &dyn RemoteSource,
    blocks: &mut [Block],
    depth: usize,
    max_depth: Option<usize>,
) {
    if max_depth.is_some_and(|max| depth > max) {
        return;
    }

    let mut fetched = 0usize;
    for block in blocks.iter_mut() {
        let is_entity = matches!(block.kind, BlockKind::ChildPage | BlockKind::ChildDatabase);
        if !block.has_children || is_entity || !block.children.is_empty() {
            continue;
        }
        match fetch_children(remote, &block.id) {
            Ok(children) => {
                fetched += 1;
                block.children = children;
                fill_children(remote, &mut block.children, depth + 1, max_depth);
            }
            Err(e) => {
                tracing::warn!(block = %block.id, depth, error = %e, "omitting children that failed to load");
            }
        }
    }
    if fetched > 0 {
        tracing::debug!(depth, blocks = fetched, "fetched nested blocks");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_core::{BlockPage, EntityPage, RemoteError, SearchControl, User};
    use std::collections::HashMap;

    /// Serves block children from a map, two blocks per page.
    #[derive(Default)]
    struct Blocks {
        children: HashMap<String, Vec<Block>>,
        broken: Vec<String>,
    }

    impl RemoteSource for Blocks {
        fn fetch_entity(&self, id: &EntityId) -> RemoteResult<Entity> {
            Err(RemoteError::not_found(id.as_str()))
        }
        fn fetch_block_children(&self, id: &EntityId, cursor: Option<&str>) -> RemoteResult<BlockPage> {
            if self.broken.iter().any(|b| b == id.as_str()) {
                return Err(RemoteError::server(500, "boom"));
            }
            let all = self.children.get(id.as_str()).cloned().unwrap_or_default();
            let start: usize = cursor.map_or(0, |c| c.parse().unwrap());
            let end = (start + 2).min(all.len());
            Ok(BlockPage {
                blocks: all[start..end].to_vec(),
                next_cursor: (end < all.len()).then(|| end.to_string()),
            })
        }
        fn query_database(&self, _: &EntityId, _: Option<&str>) -> RemoteResult<EntityPage> {
            Ok(EntityPage::default())
        }
        fn search(&self, _: &str, _: &mut dyn FnMut(Entity) -> SearchControl) -> RemoteResult<()> {
            Ok(())
        }
        fn fetch_user(&self, id: &EntityId) -> RemoteResult<User> {
            Err(RemoteError::not_found(id.as_str()))
        }
        fn download(&self, _: &str) -> RemoteResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn parent(id: &str) -> Block {
        let mut block = Block::new(id, BlockKind::BulletedItem, id);
        block.has_children = true;
        block
    }

    fn leaf(id: &str) -> Block {
        Block::new(id, BlockKind::Paragraph, id)
    }

    #[test]
    fn paginates_and_recurses() {
        let mut remote = Blocks::default();
        remote
            .children
            .insert("p".into(), vec![leaf("a"), parent("b"), leaf("c")]);
        remote.children.insert("b".into(), vec![parent("d")]);
        remote.children.insert("d".into(), vec![leaf("e")]);

        let tree = fetch_tree(&remote, &EntityId::new("p"), None).unwrap();

        assert_eq!(tree.len(), 3);
        assert_eq!(tree[1].children[0].id.as_str(), "d");
        assert_eq!(tree[1].children[0].children[0].id.as_str(), "e");
    }

    #[test]
    fn depth_cap_stops_recursion() {
        let mut remote = Blocks::default();
        remote.children.insert("p".into(), vec![parent("b")]);
        remote.children.insert("b".into(), vec![parent("d")]);
        remote.children.insert("d".into(), vec![leaf("e")]);

        let tree = fetch_tree(&remote, &EntityId::new("p"), Some(1)).unwrap();
        assert_eq!(tree[0].children.len(), 1);
        assert!(tree[0].children[0].children.is_empty());

        let top = fetch_tree(&remote, &EntityId::new("p"), Some(0)).unwrap();
        assert!(top[0].children.is_empty());
    }

    #[test]
    fn failing_subtree_is_omitted() {
        let mut remote = Blocks::default();
        remote
            .children
            .insert("p".into(), vec![parent("b"), parent("x")]);
        remote.children.insert("x".into(), vec![leaf("y")]);
        remote.broken.push("b".into());

        let tree = fetch_tree(&remote, &EntityId::new("p"), None).unwrap();
        assert!(tree[0].children.is_empty());
        assert_eq!(tree[1].children.len(), 1);

        remote.broken.push("p".into());
        assert!(fetch_tree(&remote, &EntityId::new("p"), None).is_err());
    }

    #[test]
    fn child_entities_in_document_order() {
        let tree = vec![
            Block::new("c2", BlockKind::ChildPage, "Two"),
            leaf("x").with_children(vec![Block::new("c1", BlockKind::ChildDatabase, "One")]),
            Block::new("c2", BlockKind::ChildPage, "Two again"),
        ];
        let ids: Vec<_> = child_entities(&tree).into_iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec!["c2", "c1"]);
    }
}
