use std::sync::{Arc, Mutex};
use std::thread;

use super::filter::{TopicFilter, validate_topic};
use super::message::Message;
use super::registry::SubscriptionRegistry;
use crate::utils::Error;

fn ok(_: &Message) -> Result<(), crate::utils::HandlerError> {
    Ok(())
}

fn matched_filters(registry: &SubscriptionRegistry, topic: &str) -> Vec<String> {
    registry
        .matches(topic)
        .into_iter()
        .map(|m| m.filter.to_string())
        .collect()
}

#[test]
fn test_filter_matching_table() {
    let cases = [
        ("a/+/c", "a/b/c", true),
        ("a/+/c", "a/b/c/d", false),
        ("a/+/c", "a/c", false),
        ("a/#", "a", true),
        ("a/#", "a/b", true),
        ("a/#", "a/b/c", true),
        ("a/#", "b/a", false),
        ("#", "anything/at/all", true),
        ("+", "a", true),
        ("+", "a/b", false),
        ("+/+", "a/b", true),
        ("a/b", "a/b", true),
        ("a/b", "a/bc", false),
        ("a/b", "a/b/c", false),
        ("a/+/#", "a/b", true),
        ("a/+/#", "a", false),
        ("emqx/test", "emqx/test", true),
    ];

    for (filter, topic, expected) in cases {
        let parsed = TopicFilter::new(filter).unwrap();
        assert_eq!(
            parsed.matches(topic),
            expected,
            "filter {filter} against topic {topic}"
        );

        let registry = SubscriptionRegistry::new();
        registry.add(filter, ok).unwrap();
        assert_eq!(
            !registry.matches(topic).is_empty(),
            expected,
            "registry lookup of {filter} against topic {topic}"
        );
    }
}

#[test]
fn test_hash_in_non_final_level_is_rejected() {
    let registry = SubscriptionRegistry::new();
    for filter in ["a/#/c", "#/a", "a/b#", "a/#b/c"] {
        let err = registry.add(filter, ok).unwrap_err();
        assert!(
            matches!(err, Error::InvalidFilter { .. }),
            "{filter} should be rejected"
        );
    }
    assert!(registry.is_empty());
}

#[test]
fn test_empty_filter_is_rejected() {
    let err = TopicFilter::new("").unwrap_err();
    assert!(matches!(err, Error::InvalidFilter { .. }));
}

#[test]
fn test_plus_must_fill_level() {
    assert!(TopicFilter::new("a/b+/c").is_err());
    assert!(TopicFilter::new("a/+/c").is_ok());
    assert!(TopicFilter::new("+/+/#").is_ok());
}

#[test]
fn test_validate_topic() {
    assert!(validate_topic("emqx/test").is_ok());
    assert!(matches!(
        validate_topic(""),
        Err(Error::InvalidTopic { .. })
    ));
    assert!(validate_topic("a/+").is_err());
    assert!(validate_topic("a/#").is_err());
}

#[test]
fn test_matches_in_registration_order() {
    let registry = SubscriptionRegistry::new();
    let first = registry.add("a/#", ok).unwrap();
    let second = registry.add("a/b", ok).unwrap();
    let third = registry.add("+/b", ok).unwrap();
    let fourth = registry.add("a/b", ok).unwrap();

    let ids: Vec<_> = registry.matches("a/b").into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![first, second, third, fourth]);
}

#[test]
fn test_remove_and_noop_remove() {
    let registry = SubscriptionRegistry::new();
    let id = registry.add("a/+/c", ok).unwrap();
    let other = registry.add("a/+/c", ok).unwrap();
    assert_eq!(registry.len(), 2);

    assert!(registry.remove("a/+/c", id));
    assert!(!registry.remove("a/+/c", id));
    assert!(!registry.remove("x/y", other));
    assert!(!registry.remove("a/#/c", other));

    let ids: Vec<_> = registry.matches("a/b/c").into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![other]);

    assert!(registry.remove("a/+/c", other));
    assert!(registry.is_empty());
    assert!(registry.matches("a/b/c").is_empty());
    assert!(registry.filters().is_empty());
}

#[test]
fn test_filters_and_contains_filter() {
    let registry = SubscriptionRegistry::new();
    registry.add("emqx/test", ok).unwrap();
    registry.add("emqx/test", ok).unwrap();
    registry.add("emqx/#", ok).unwrap();
    registry.add("#", ok).unwrap();
    registry.add("a/+/c", ok).unwrap();

    assert_eq!(
        registry.filters(),
        vec!["#", "a/+/c", "emqx/#", "emqx/test"]
    );
    assert!(registry.contains_filter("emqx/#"));
    assert!(registry.contains_filter("#"));
    assert!(!registry.contains_filter("emqx"));
    assert!(!registry.contains_filter("a/+"));
}

#[test]
fn test_catch_all_receives_everything() {
    let registry = SubscriptionRegistry::new();
    registry.add("#", ok).unwrap();
    registry.add("sensors/+", ok).unwrap();

    assert_eq!(matched_filters(&registry, "sensors/kitchen"), vec!["#", "sensors/+"]);
    assert_eq!(matched_filters(&registry, "other"), vec!["#"]);
}

#[test]
fn test_handlers_are_invocable_from_snapshot() {
    let registry = SubscriptionRegistry::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    registry
        .add("a/b", move |msg| {
            sink.lock().unwrap().push(msg.payload_str().unwrap().to_string());
            Ok(())
        })
        .unwrap();

    let snapshot = registry.matches("a/b");
    // a registration made after the lookup is not part of the snapshot
    registry.add("a/b", ok).unwrap();
    assert_eq!(snapshot.len(), 1);

    let message = Message::new("a/b", "hello");
    for m in &snapshot {
        (m.handler)(&message).unwrap();
    }
    assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
}

#[test]
fn test_concurrent_add_and_match() {
    let registry = Arc::new(SubscriptionRegistry::new());
    registry.add("load/#", ok).unwrap();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let registry = registry.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let filter = format!("load/{t}/{i}");
                    let id = registry.add(&filter, ok).unwrap();
                    if i % 2 == 0 {
                        assert!(registry.remove(&filter, id));
                    }
                }
            })
        })
        .collect();

    let reader = {
        let registry = registry.clone();
        thread::spawn(move || {
            for _ in 0..500 {
                let found = registry.matches("load/1/3");
                // the catch-all is always there and always first
                assert!(!found.is_empty());
                assert_eq!(&*found[0].filter, "load/#");
                assert!(found.windows(2).all(|w| w[0].id < w[1].id));
            }
        })
    };

    for w in writers {
        w.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(registry.len(), 1 + 4 * 100);
    assert_eq!(registry.matches("load/2/1").len(), 2);
    assert_eq!(registry.matches("load/2/0").len(), 1);
}
