//! Date-keyed "what's due when" index embedded in each routine.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::aggregate::IdEntry;
use crate::dates::date_key;
use crate::db::TaskInstance;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub key: String,
    pub concern: String,
    pub task_id: String,
}

/// Ordered by calendar date. Serialized as `{"YYYY-MM-DD": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleMap(BTreeMap<NaiveDate, Vec<ScheduleEntry>>);

/// Empty buckets are not significant: an emptied day equals a missing one.
impl PartialEq for ScheduleMap {
    fn eq(&self, other: &Self) -> bool {
        let filled = |m: &'_ Self| {
            m.0.iter().filter(|(_, v)| !v.is_empty()).map(|(d, v)| (*d, v.clone())).collect::<Vec<_>>()
        };
        filled(self) == filled(other)
    }
}

impl ScheduleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries due on `date`. A missing bucket and an empty one read the same.
    pub fn due_on(&self, date: NaiveDate) -> &[ScheduleEntry] {
        self.0.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn push(&mut self, date: NaiveDate, entry: ScheduleEntry) {
        self.0.entry(date).or_default().push(entry);
    }

    pub fn dates(&self) -> impl Iterator<Item = &NaiveDate> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &Vec<ScheduleEntry>)> {
        self.0.iter()
    }

    pub fn keys_on(&self, date: NaiveDate) -> BTreeSet<&str> {
        self.due_on(date).iter().map(|e| e.key.as_str()).collect()
    }

    pub fn entry_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn bucket_count(&self) -> usize {
        self.0.len()
    }
}

/// One entry per live id tuple, bucketed by its calendar day in `tz`.
pub fn add_task_to_schedule(
    schedule: &mut ScheduleMap,
    key: &str,
    concern: &str,
    id_entries: &[IdEntry],
    tz: Tz,
) {
    for e in id_entries.iter().filter(|e| e.is_live()) {
        schedule.push(
            date_key(e.starts_at, tz),
            ScheduleEntry {
                key: key.to_string(),
                concern: concern.to_string(),
                task_id: e.id.clone(),
            },
        );
    }
}

/// Drop every entry for `key`. Emptied buckets stay as empty lists.
pub fn remove_task_from_schedule(key: &str, schedule: &mut ScheduleMap) {
    for entries in schedule.0.values_mut() {
        entries.retain(|e| e.key != key);
    }
}

/// Drop the entry of one instance. Emptied buckets stay as empty lists.
pub fn remove_instance(schedule: &mut ScheduleMap, task_id: &str) -> bool {
    let mut removed = false;
    for entries in schedule.0.values_mut() {
        let before = entries.len();
        entries.retain(|e| e.task_id != task_id);
        removed |= entries.len() != before;
    }
    removed
}

/// Normalize after incremental edits: chronological buckets (guaranteed by
/// the map) and a stable entry order inside each bucket.
pub fn sort_tasks_in_schedule_by_date(mut schedule: ScheduleMap) -> ScheduleMap {
    for entries in schedule.0.values_mut() {
        entries.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.task_id.cmp(&b.task_id)));
    }
    schedule
}

/// Union of several routines' schedules restricted to `[from, to]`, the
/// "what's due" view across a user's routines. Empty buckets are dropped.
pub fn merge_schedules<'a>(
    schedules: impl IntoIterator<Item = &'a ScheduleMap>,
    from: NaiveDate,
    to: NaiveDate,
) -> ScheduleMap {
    let mut merged = ScheduleMap::new();
    for s in schedules {
        for (date, entries) in s.0.range(from..=to) {
            for e in entries {
                merged.push(*date, e.clone());
            }
        }
    }
    sort_tasks_in_schedule_by_date(merged)
}

/// Full rebuild from task rows; soft-deleted rows are skipped.
pub fn build_schedule(instances: &[TaskInstance], tz: Tz) -> ScheduleMap {
    let mut schedule = ScheduleMap::new();
    for t in instances.iter().filter(|t| t.deleted_on.is_none()) {
        schedule.push(
            date_key(t.starts_at, tz),
            ScheduleEntry {
                key: t.key.clone(),
                concern: t.concern.clone(),
                task_id: t.id.clone(),
            },
        );
    }
    sort_tasks_in_schedule_by_date(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TaskStatus;
    use chrono::{DateTime, Utc};

    fn entry(id: &str, at: &str) -> IdEntry {
        IdEntry {
            id: id.into(),
            starts_at: DateTime::parse_from_rfc3339(at).unwrap().with_timezone(&Utc),
            status: TaskStatus::Active,
            deleted_on: None,
        }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn add_creates_buckets_in_date_order() {
        let mut s = ScheduleMap::new();
        add_task_to_schedule(
            &mut s,
            "walk",
            "posture",
            &[entry("b", "2024-01-05T00:00:00Z"), entry("a", "2024-01-02T00:00:00Z")],
            chrono_tz::UTC,
        );
        add_task_to_schedule(&mut s, "stretch", "posture", &[entry("c", "2024-01-02T00:00:00Z")], chrono_tz::UTC);
        let s = sort_tasks_in_schedule_by_date(s);
        let dates: Vec<_> = s.dates().copied().collect();
        assert_eq!(dates, vec![day("2024-01-02"), day("2024-01-05")]);
        let keys: Vec<_> = s.due_on(day("2024-01-02")).iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["stretch", "walk"]);
    }

    #[test]
    fn remove_key_keeps_empty_buckets() {
        let mut s = ScheduleMap::new();
        add_task_to_schedule(&mut s, "walk", "posture", &[entry("a", "2024-01-02T00:00:00Z")], chrono_tz::UTC);
        remove_task_from_schedule("walk", &mut s);
        assert_eq!(s.bucket_count(), 1);
        assert!(s.due_on(day("2024-01-02")).is_empty());
        assert!(s.due_on(day("2024-02-02")).is_empty());
    }

    #[test]
    fn emptied_bucket_equals_missing_one() {
        let mut edited = ScheduleMap::new();
        add_task_to_schedule(
            &mut edited,
            "walk",
            "posture",
            &[entry("a", "2024-01-02T00:00:00Z"), entry("b", "2024-01-03T00:00:00Z")],
            chrono_tz::UTC,
        );
        remove_instance(&mut edited, "a");
        let mut rebuilt = ScheduleMap::new();
        add_task_to_schedule(&mut rebuilt, "walk", "posture", &[entry("b", "2024-01-03T00:00:00Z")], chrono_tz::UTC);
        assert_eq!(edited.bucket_count(), 2);
        assert_eq!(edited, rebuilt);
    }

    #[test]
    fn remove_single_instance() {
        let mut s = ScheduleMap::new();
        add_task_to_schedule(
            &mut s,
            "walk",
            "posture",
            &[entry("a", "2024-01-02T00:00:00Z"), entry("b", "2024-01-03T00:00:00Z")],
            chrono_tz::UTC,
        );
        assert!(remove_instance(&mut s, "a"));
        assert!(!remove_instance(&mut s, "a"));
        assert_eq!(s.entry_count(), 1);
    }

    #[test]
    fn bucket_follows_user_zone() {
        let mut s = ScheduleMap::new();
        // 16:00 UTC is already the next day in Tokyo
        add_task_to_schedule(&mut s, "walk", "posture", &[entry("a", "2024-01-02T16:00:00Z")], chrono_tz::Asia::Tokyo);
        assert_eq!(s.due_on(day("2024-01-03")).len(), 1);
    }

    #[test]
    fn serializes_with_date_string_keys() {
        let mut s = ScheduleMap::new();
        add_task_to_schedule(&mut s, "walk", "posture", &[entry("a", "2024-01-02T00:00:00Z")], chrono_tz::UTC);
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["2024-01-02"][0]["key"], "walk");
        let back: ScheduleMap = serde_json::from_value(v).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn merge_clips_to_range_and_drops_empty_buckets() {
        let mut a = ScheduleMap::new();
        let mut b = ScheduleMap::new();
        add_task_to_schedule(&mut a, "walk", "posture", &[entry("a1", "2024-01-01T00:00:00Z"), entry("a2", "2024-01-03T00:00:00Z")], chrono_tz::UTC);
        add_task_to_schedule(&mut b, "cleanse", "acne", &[entry("b1", "2024-01-03T00:00:00Z")], chrono_tz::UTC);
        add_task_to_schedule(&mut b, "mask", "acne", &[entry("b2", "2024-01-04T00:00:00Z")], chrono_tz::UTC);
        remove_instance(&mut b, "b2");

        let m = merge_schedules([&a, &b], day("2024-01-02"), day("2024-01-04"));
        assert_eq!(m.dates().copied().collect::<Vec<_>>(), vec![day("2024-01-03")]);
        let keys: Vec<_> = m.due_on(day("2024-01-03")).iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["cleanse", "walk"]);
    }
}
