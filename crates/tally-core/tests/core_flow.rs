use std::fs;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tally_core::datastore::{FileStorage, STORAGE_KEY, Storage};
use tally_core::filter::{Filter, count_by_status, partition};
use tally_core::progress::semester_progress_in;
use tally_core::settings::{SemesterDates, SettingsPatch, Theme};
use tally_core::store::TaskStore;
use tally_core::task::NewTask;
use tempfile::tempdir;

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .expect("valid now")
}

#[test]
fn file_store_roundtrip_and_partition() {
    let temp = tempdir().expect("tempdir");
    let now = fixed_now();

    let storage = FileStorage::open(temp.path()).expect("open storage");
    let mut store = TaskStore::hydrate(storage, now);
    assert!(store.tasks().is_empty());

    let hw1 = store.add_task(
        NewTask {
            title: "HW1".to_string(),
            tags: vec!["math".to_string()],
            deadline: now - Duration::days(1),
            ..NewTask::default()
        },
        now,
    );
    let essay = store.add_task(
        NewTask {
            title: "Essay".to_string(),
            description: Some("2000 words".to_string()),
            tags: vec!["english".to_string()],
            deadline: now + Duration::days(3),
        },
        now,
    );
    let lab = store.add_task(
        NewTask {
            title: "Lab".to_string(),
            tags: vec!["chem".to_string(), "math".to_string()],
            deadline: now + Duration::days(1),
            ..NewTask::default()
        },
        now,
    );
    assert!(hw1.missed);
    assert!(store.complete_task(lab.id));
    store.update_settings(SettingsPatch {
        theme: Some(Theme::Dark),
        semester_dates: None,
    });
    assert_eq!(store.persist_failures(), 0);

    let on_disk = temp.path().join(format!("{STORAGE_KEY}.json"));
    let raw = fs::read_to_string(&on_disk).expect("state file written");
    assert!(raw.contains("\"version\":0"));
    assert!(raw.contains("\"semesterDates\""));

    let reopened = FileStorage::open(temp.path()).expect("reopen storage");
    let store = TaskStore::hydrate(reopened, now + Duration::days(30));
    assert_eq!(store.tasks().len(), 3);
    assert_eq!(store.settings().theme, Theme::Dark);
    assert_eq!(
        store.get(essay.id).map(|t| t.description.as_str()),
        Some("2000 words")
    );

    let buckets = partition(store.tasks());
    assert_eq!(buckets.completed.len(), 1);
    assert_eq!(buckets.pending.len(), 1);
    assert_eq!(buckets.missed.len(), 1);
    assert_eq!(buckets.missed[0].id, hw1.id);

    let counts = count_by_status(store.tasks());
    assert_eq!(counts.total(), store.tasks().len());

    let math = Filter::parse(&["+math".to_string()]).expect("parse filter");
    let titles: Vec<&str> = math
        .select(store.tasks())
        .into_iter()
        .map(|t| t.title.as_str())
        .collect();
    assert_eq!(titles, vec!["HW1", "Lab"]);
}

#[test]
fn corrupt_state_file_is_set_aside() {
    let temp = tempdir().expect("tempdir");
    let storage = FileStorage::open(temp.path()).expect("open storage");
    fs::write(storage.path_for(STORAGE_KEY), "{not json").expect("write garbage");

    let store = TaskStore::hydrate(storage, fixed_now());
    assert!(store.tasks().is_empty());
    assert!(
        temp.path()
            .join(format!("{STORAGE_KEY}.json.corrupt"))
            .exists()
    );
    assert_eq!(
        store.storage().load(STORAGE_KEY).expect("load after quarantine"),
        None
    );
}

#[test]
fn non_utf8_state_file_survives_a_session() {
    let temp = tempdir().expect("tempdir");
    let now = fixed_now();
    let original: &[u8] = b"{\"state\":{\"tasks\":[\xff\xfe]}}";

    let storage = FileStorage::open(temp.path()).expect("open storage");
    fs::write(storage.path_for(STORAGE_KEY), original).expect("write bytes");

    let mut store = TaskStore::hydrate(storage, now);
    assert!(store.tasks().is_empty());
    assert!(!store.is_read_only());

    store.add_task(
        NewTask {
            title: "HW1".to_string(),
            deadline: now + Duration::days(1),
            ..NewTask::default()
        },
        now,
    );
    store.flush().expect("flush");

    let kept = fs::read(temp.path().join(format!("{STORAGE_KEY}.json.corrupt")))
        .expect("quarantined copy");
    assert_eq!(kept, original);

    let reopened = FileStorage::open(temp.path()).expect("reopen storage");
    let store = TaskStore::hydrate(reopened, now);
    assert_eq!(store.tasks().len(), 1);
}

#[test]
fn semester_settings_drive_progress() {
    let temp = tempdir().expect("tempdir");
    let now = fixed_now();
    let storage = FileStorage::open(temp.path()).expect("open storage");
    let mut store = TaskStore::hydrate(storage, now);

    store.update_settings(SettingsPatch {
        theme: None,
        semester_dates: Some(SemesterDates {
            start_date: now - Duration::days(10),
            end_date: now + Duration::days(10),
        }),
    });

    let progress =
        semester_progress_in(&chrono_tz::UTC, &store.settings().semester_dates, now);
    assert!((progress - 50.0).abs() < f64::EPSILON);
}
