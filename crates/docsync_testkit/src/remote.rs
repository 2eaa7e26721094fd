//! In-memory remote workspace.

use docsync_core::{
    Block, BlockPage, Entity, EntityId, EntityPage, RemoteError, RemoteResult, RemoteSource,
    SearchControl, User,
};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

#[derive(Default)]
struct Workspace {
    entities: HashMap<EntityId, Entity>,
    /// Direct children of entities and blocks, nested children stripped.
    children: HashMap<EntityId, Vec<Block>>,
    rows: HashMap<EntityId, Vec<EntityId>>,
    users: HashMap<EntityId, User>,
    assets: HashMap<String, Vec<u8>>,
    failures: HashMap<String, RemoteError>,
    transient: VecDeque<RemoteError>,
    search_interrupt: Option<(usize, RemoteError)>,
    fetches: HashMap<EntityId, u64>,
    downloads: u64,
    searches: u64,
}

/// A scripted remote source for tests.
///
/// Pages, databases, users and assets are registered up front and can be
/// edited between runs. Block children and database rows are served in
/// pages of `page_size` to exercise pagination.
pub struct MockRemote {
    page_size: usize,
    workspace: RwLock<Workspace>,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    /// Creates an empty workspace serving two items per page.
    pub fn new() -> Self {
        Self::with_page_size(2)
    }

    /// Creates an empty workspace with the given page size.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            workspace: RwLock::new(Workspace::default()),
        }
    }

    /// Adds or replaces a page and its content tree.
    pub fn add_page(&self, entity: Entity, blocks: Vec<Block>) {
        let mut ws = self.workspace.write();
        index_blocks(&mut ws.children, &entity.id, blocks);
        ws.entities.insert(entity.id.clone(), entity);
    }

    /// Adds or replaces a database and its rows.
    ///
    /// Rows are registered as pages without content unless added
    /// separately with [`MockRemote::add_page`].
    pub fn add_database(&self, entity: Entity, rows: Vec<Entity>) {
        let mut ws = self.workspace.write();
        let ids = rows.iter().map(|r| r.id.clone()).collect();
        for row in rows {
            ws.entities.entry(row.id.clone()).or_insert(row);
        }
        ws.rows.insert(entity.id.clone(), ids);
        ws.entities.insert(entity.id.clone(), entity);
    }

    /// Adds a user.
    pub fn add_user(&self, user: User) {
        self.workspace.write().users.insert(user.id.clone(), user);
    }

    /// Makes `url` downloadable.
    pub fn add_asset(&self, url: &str, bytes: impl Into<Vec<u8>>) {
        self.workspace.write().assets.insert(url.to_string(), bytes.into());
    }

    /// Changes an entity's title and edit time.
    pub fn edit(&self, id: &str, title: &str, last_edited: chrono::DateTime<chrono::Utc>) {
        let mut ws = self.workspace.write();
        if let Some(entity) = ws.entities.get_mut(&EntityId::new(id)) {
            entity.title = title.to_string();
            entity.last_edited = last_edited;
        }
    }

    /// Removes an entity, as if it was deleted or unshared.
    pub fn remove(&self, id: &str) {
        let mut ws = self.workspace.write();
        let id = EntityId::new(id);
        ws.entities.remove(&id);
        ws.children.remove(&id);
        ws.rows.remove(&id);
    }

    /// Makes every call naming `key` (an entity id or asset URL) fail.
    pub fn fail(&self, key: &str, error: RemoteError) {
        let key = if key.contains("://") {
            key.to_string()
        } else {
            EntityId::new(key).to_string()
        };
        self.workspace.write().failures.insert(key, error);
    }

    /// Clears every scripted failure.
    pub fn clear_failures(&self) {
        let mut ws = self.workspace.write();
        ws.failures.clear();
        ws.transient.clear();
        ws.search_interrupt = None;
    }

    /// Fails the next calls, of any kind, with these errors in order.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.workspace.write().transient.extend(errors);
    }

    /// Makes the next search fail with `error` after visiting `after`
    /// results.
    pub fn interrupt_search(&self, after: usize, error: RemoteError) {
        self.workspace.write().search_interrupt = Some((after, error));
    }

    /// Times `fetch_entity` was called for `id`.
    pub fn fetches(&self, id: &str) -> u64 {
        self.workspace
            .read()
            .fetches
            .get(&EntityId::new(id))
            .copied()
            .unwrap_or(0)
    }

    /// Total `fetch_entity` calls.
    pub fn total_fetches(&self) -> u64 {
        self.workspace.read().fetches.values().sum()
    }

    /// Total downloads served.
    pub fn downloads(&self) -> u64 {
        self.workspace.read().downloads
    }

    /// Total searches started.
    pub fn searches(&self) -> u64 {
        self.workspace.read().searches
    }

    fn check(&self, key: &str) -> RemoteResult<()> {
        let mut ws = self.workspace.write();
        if let Some(error) = ws.transient.pop_front() {
            return Err(error);
        }
        match ws.failures.get(key) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn page_of<T: Clone>(&self, items: &[T], cursor: Option<&str>) -> RemoteResult<(Vec<T>, Option<String>)> {
        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| RemoteError::Validation {
                    message: format!("bad cursor {c:?}"),
                })?,
            None => 0,
        };
        let end = (start + self.page_size).min(items.len());
        let page = items.get(start..end).unwrap_or_default().to_vec();
        Ok((page, (end < items.len()).then(|| end.to_string())))
    }
}

fn index_blocks(index: &mut HashMap<EntityId, Vec<Block>>, parent: &EntityId, blocks: Vec<Block>) {
    let mut direct = Vec::with_capacity(blocks.len());
    for mut block in blocks {
        let nested = std::mem::take(&mut block.children);
        if !nested.is_empty() {
            block.has_children = true;
            index_blocks(index, &block.id, nested);
        }
        direct.push(block);
    }
    index.insert(parent.clone(), direct);
}

impl RemoteSource for MockRemote {
    fn fetch_entity(&self, id: &EntityId) -> RemoteResult<Entity> {
        self.check(id.as_str())?;
        let mut ws = self.workspace.write();
        *ws.fetches.entry(id.clone()).or_default() += 1;
        ws.entities
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(id.as_str()))
    }

    fn fetch_block_children(&self, id: &EntityId, cursor: Option<&str>) -> RemoteResult<BlockPage> {
        self.check(id.as_str())?;
        let children = self
            .workspace
            .read()
            .children
            .get(id)
            .cloned()
            .unwrap_or_default();
        let (blocks, next_cursor) = self.page_of(&children, cursor)?;
        Ok(BlockPage {
            blocks,
            next_cursor,
        })
    }

    fn query_database(&self, id: &EntityId, cursor: Option<&str>) -> RemoteResult<EntityPage> {
        self.check(id.as_str())?;
        let rows: Vec<Entity> = {
            let ws = self.workspace.read();
            let ids = ws
                .rows
                .get(id)
                .ok_or_else(|| RemoteError::not_found(id.as_str()))?;
            ids.iter().filter_map(|r| ws.entities.get(r).cloned()).collect()
        };
        let (entities, next_cursor) = self.page_of(&rows, cursor)?;
        Ok(EntityPage {
            entities,
            next_cursor,
        })
    }

    fn search(
        &self,
        _query: &str,
        visit: &mut dyn FnMut(Entity) -> SearchControl,
    ) -> RemoteResult<()> {
        self.check("search")?;
        let (mut all, interrupt) = {
            let mut ws = self.workspace.write();
            ws.searches += 1;
            let all: Vec<Entity> = ws.entities.values().cloned().collect();
            (all, ws.search_interrupt.take())
        };
        all.sort_by(|a, b| b.last_edited.cmp(&a.last_edited).then_with(|| a.id.cmp(&b.id)));

        for (n, entity) in all.into_iter().enumerate() {
            if let Some((after, error)) = &interrupt {
                if n == *after {
                    return Err(error.clone());
                }
            }
            if visit(entity) == SearchControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn fetch_user(&self, id: &EntityId) -> RemoteResult<User> {
        self.check(id.as_str())?;
        self.workspace
            .read()
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(id.as_str()))
    }

    fn download(&self, url: &str) -> RemoteResult<Vec<u8>> {
        self.check(url)?;
        let mut ws = self.workspace.write();
        ws.downloads += 1;
        ws.assets
            .get(url)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(url))
    }
}
