//! Property-based test generators using proptest.

use chrono::{DateTime, TimeZone, Utc};
use docsync_core::{Block, BlockKind, EntityId, QueueItem};
use proptest::prelude::*;

/// Strategy for generating entity ids in compact form.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    prop::string::string_regex("[0-9a-f]{32}")
        .expect("Invalid regex")
        .prop_map(|s| EntityId::new(&s))
}

/// Strategy for generating titles, including awkward punctuation.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9 ,.!?:/'-]{0,40}").expect("Invalid regex")
}

/// Strategy for generating edit times within 2024.
pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..366 * 24 * 3600).prop_map(|secs| {
        Utc.timestamp_opt(1_704_067_200 + secs, 0)
            .single()
            .expect("valid timestamp")
    })
}

/// Strategy for generating leaf block kinds that render as text.
pub fn text_kind_strategy() -> impl Strategy<Value = BlockKind> {
    prop_oneof![
        Just(BlockKind::Paragraph),
        (1u8..=3).prop_map(BlockKind::Heading),
        Just(BlockKind::BulletedItem),
        Just(BlockKind::NumberedItem),
        any::<bool>().prop_map(|checked| BlockKind::ToDo { checked }),
        Just(BlockKind::Quote),
        Just(BlockKind::Divider),
    ]
}

/// Strategy for generating block trees up to three levels deep.
pub fn block_tree_strategy() -> impl Strategy<Value = Vec<Block>> {
    let leaf = (
        entity_id_strategy(),
        text_kind_strategy(),
        prop::string::string_regex("[a-z ]{1,20}").expect("Invalid regex"),
    )
        .prop_map(|(id, kind, text)| Block::new(id, kind, text));

    let tree = leaf.prop_recursive(3, 24, 4, |inner| {
        (
            entity_id_strategy(),
            prop::string::string_regex("[a-z ]{1,20}").expect("Invalid regex"),
            prop::collection::vec(inner, 1..4),
        )
            .prop_map(|(id, text, children)| {
                Block::new(id, BlockKind::BulletedItem, text).with_children(children)
            })
    });
    prop::collection::vec(tree, 0..6)
}

/// Strategy for generating queue items with distinct ids.
pub fn queue_items_strategy(max: usize) -> impl Strategy<Value = Vec<QueueItem>> {
    prop::collection::btree_set(entity_id_strategy(), 1..=max.max(1)).prop_map(|ids| {
        ids.into_iter()
            .map(|id| QueueItem::new(id, None))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_ids_are_normalized(id in entity_id_strategy()) {
            prop_assert_eq!(id.as_str().len(), 32);
            prop_assert_eq!(EntityId::new(id.as_str()), id);
        }

        #[test]
        fn queue_items_are_distinct(items in queue_items_strategy(20)) {
            let mut ids: Vec<_> = items.iter().map(|i| i.id.clone()).collect();
            ids.dedup();
            prop_assert_eq!(ids.len(), items.len());
        }
    }
}
