//! Grouping of a batch into independently processed units

use std::collections::HashMap;

use crate::domain::events::NormalizedEvent;

/// Why a set of events was grouped together
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// Events sharing a thread
    Thread(String),
    /// Unthreaded events sharing their first file reference
    File(String),
    /// An event with neither
    Single(String),
}

/// Events extracted as one unit
#[derive(Debug, Clone)]
pub struct EventGroup<'a> {
    pub key: GroupKey,
    pub events: Vec<&'a NormalizedEvent>,
}

impl EventGroup<'_> {
    pub fn thread_id(&self) -> Option<&str> {
        match &self.key {
            GroupKey::Thread(id) => Some(id),
            _ => None,
        }
    }

    /// Unique authors in order of first appearance
    pub fn participants(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for event in &self.events {
            crate::domain::knowledge::push_unique(&mut out, &event.author);
        }
        out
    }
}

/// Partition events into groups
///
/// Events are grouped by thread first, then remaining events by their first
/// file reference, and anything left becomes a singleton. Groups are returned
/// in order of their first event; events keep their input order.
pub fn group_events(events: &[NormalizedEvent]) -> Vec<EventGroup<'_>> {
    let mut groups: Vec<EventGroup<'_>> = Vec::new();
    let mut index: HashMap<GroupKey, usize> = HashMap::new();

    for event in events {
        let key = match (event.thread_id.as_deref(), event.file_refs.first()) {
            (Some(thread), _) if !thread.is_empty() => GroupKey::Thread(thread.to_string()),
            (_, Some(file)) if !file.is_empty() => GroupKey::File(file.clone()),
            _ => GroupKey::Single(event.platform_id.clone()),
        };

        match index.get(&key) {
            Some(&i) if !matches!(key, GroupKey::Single(_)) => groups[i].events.push(event),
            _ => {
                index.insert(key.clone(), groups.len());
                groups.push(EventGroup {
                    key,
                    events: vec![event],
                });
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::EventType;
    use chrono::Utc;

    fn event(id: &str) -> NormalizedEvent {
        NormalizedEvent::new(id, "slack", EventType::Message, "alice", "hello", Utc::now())
    }

    #[test]
    fn test_grouping_precedence() {
        let events = vec![
            event("1").with_thread("t1"),
            event("2").with_files(vec!["src/lib.rs".into()]),
            event("3").with_thread("t1").with_files(vec!["src/lib.rs".into()]),
            event("4"),
            event("5").with_files(vec!["src/lib.rs".into(), "README.md".into()]),
            event("6"),
        ];
        let groups = group_events(&events);

        let keys: Vec<_> = groups.iter().map(|g| g.key.clone()).collect();
        assert_eq!(
            keys,
            vec![
                GroupKey::Thread("t1".into()),
                GroupKey::File("src/lib.rs".into()),
                GroupKey::Single("4".into()),
                GroupKey::Single("6".into()),
            ]
        );
        let ids = |g: &EventGroup<'_>| {
            g.events
                .iter()
                .map(|e| e.platform_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&groups[0]), vec!["1", "3"]);
        assert_eq!(ids(&groups[1]), vec!["2", "5"]);
    }

    #[test]
    fn test_every_event_lands_in_exactly_one_group() {
        let events: Vec<_> = (0..10)
            .map(|i| {
                let e = event(&i.to_string());
                if i % 3 == 0 { e.with_thread("t") } else { e }
            })
            .collect();
        let total: usize = group_events(&events).iter().map(|g| g.events.len()).sum();
        assert_eq!(total, events.len());
    }

    #[test]
    fn test_participants_are_unique() {
        let events = vec![
            event("1").with_thread("t"),
            NormalizedEvent::new("2", "slack", EventType::Message, "bob", "hi", Utc::now())
                .with_thread("t"),
            event("3").with_thread("t"),
        ];
        let groups = group_events(&events);
        assert_eq!(groups[0].participants(), vec!["alice", "bob"]);
    }
}
