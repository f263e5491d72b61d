use super::*;
use chrono::TimeZone;

fn inst(id: &str, key: &str, day: u32, status: TaskStatus) -> TaskInstance {
    let starts_at = Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap();
    TaskInstance {
        id: id.into(),
        user_id: "u1".into(),
        routine_id: "r1".into(),
        key: key.into(),
        name: key.to_uppercase(),
        icon: String::new(),
        color: String::new(),
        part: "face".into(),
        concern: "acne".into(),
        description: String::new(),
        instruction: String::new(),
        status,
        starts_at,
        expires_at: starts_at + chrono::Duration::days(1),
        completed_at: None,
        deleted_on: None,
        next_can_start_date: None,
        proof_id: None,
        created_at: starts_at,
    }
}

#[test]
fn groups_by_key_in_first_seen_order() {
    let rows = vec![
        inst("b1", "mask", 3, TaskStatus::Active),
        inst("a1", "cleanse", 1, TaskStatus::Active),
        inst("b2", "mask", 1, TaskStatus::Completed),
    ];
    let all = build_all_tasks(&rows);
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].key, "mask");
    assert_eq!(all[0].total, 2);
    assert_eq!(all[0].completed, 1);
    // ids sorted by date after recount
    assert_eq!(all[0].ids[0].id, "b2");
    assert_eq!(all[1].name, "CLEANSE");
}

#[test]
fn counters_skip_deleted_and_count_expired_as_unknown() {
    let mut gone = inst("x3", "walk", 3, TaskStatus::Completed);
    gone.deleted_on = Some(Utc::now());
    let rows = vec![
        inst("x1", "walk", 1, TaskStatus::Expired),
        inst("x2", "walk", 2, TaskStatus::Completed),
        gone,
    ];
    let all = build_all_tasks(&rows);
    assert_eq!(all[0].ids.len(), 3);
    assert_eq!(all[0].total, 2);
    assert_eq!(all[0].completed, 1);
    assert_eq!(all[0].unknown, 1);
}

#[test]
fn combine_dedupes_ids_and_keeps_empty_entries() {
    let old = vec![
        AllTaskAggregate::empty("stale"),
        build_all_tasks(&[inst("a1", "cleanse", 1, TaskStatus::Active)]).remove(0),
    ];
    let new = build_all_tasks(&[
        inst("a1", "cleanse", 1, TaskStatus::Active),
        inst("a2", "cleanse", 2, TaskStatus::Active),
        inst("m1", "mask", 2, TaskStatus::Active),
    ]);
    let merged = combine_all_tasks(old, new);
    let keys: Vec<_> = merged.iter().map(|a| a.key.as_str()).collect();
    assert_eq!(keys, vec!["stale", "cleanse", "mask"]);
    assert!(merged[0].ids.is_empty());
    assert_eq!(merged[1].ids.len(), 2);
    assert_eq!(merged[1].total, 2);
}

#[test]
fn patch_updates_one_tuple_and_recounts() {
    let mut all = build_all_tasks(&[
        inst("a1", "cleanse", 1, TaskStatus::Active),
        inst("a2", "cleanse", 2, TaskStatus::Active),
    ]);
    let done = InstancePatch { status: Some(TaskStatus::Completed), ..Default::default() };
    assert!(patch_instance(&mut all, "cleanse", "a2", &done));
    assert_eq!(all[0].completed, 1);

    let deleted = InstancePatch { deleted_on: Some(Utc::now()), ..Default::default() };
    assert!(patch_instance(&mut all, "cleanse", "a1", &deleted));
    assert_eq!(all[0].total, 1);
    assert_eq!(all[0].ids.len(), 2);

    assert!(!patch_instance(&mut all, "cleanse", "nope", &done));
    assert!(!patch_instance(&mut all, "mask", "a1", &done));
}

#[test]
fn remove_drops_entry_when_last_id_leaves() {
    let mut all = build_all_tasks(&[
        inst("a1", "cleanse", 1, TaskStatus::Active),
        inst("m1", "mask", 1, TaskStatus::Active),
        inst("m2", "mask", 2, TaskStatus::Active),
    ]);
    assert!(remove_instance(&mut all, "mask", "m1"));
    assert_eq!(all[1].total, 1);
    assert!(remove_instance(&mut all, "cleanse", "a1"));
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].key, "mask");
    assert!(!remove_instance(&mut all, "cleanse", "a1"));
}
