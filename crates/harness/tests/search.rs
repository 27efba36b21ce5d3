use jans_orm_core::{AttributeValue, BatchHandler, Filter, PersistenceError, SortOrder};
use jans_orm_engine::EntryManager;
use jans_orm_harness::TestDatabase;
use jans_orm_harness::entities::{PEOPLE_BASE, Person};
use jans_orm_sql::SqlOperationService;

fn seed(manager: &EntryManager<SqlOperationService>, count: usize) -> Result<(), PersistenceError> {
    for i in 0..count {
        let mut person = Person::new(&format!("user{i:03}"));
        person.active = Some(i % 2 == 0);
        person.login_count = Some(i as i32);
        manager.persist(&person)?;
    }
    Ok(())
}

#[derive(Default)]
struct PageRecorder {
    keep: bool,
    pages: Vec<usize>,
    uids: Vec<String>,
}

impl PageRecorder {
    fn keeping() -> Self {
        Self {
            keep: true,
            ..Self::default()
        }
    }
}

impl BatchHandler<Person> for PageRecorder {
    fn collect_search_result(&mut self, _page_len: usize) -> bool {
        self.keep
    }

    fn perform_action(&mut self, entries: &[Person]) -> Result<(), PersistenceError> {
        self.pages.push(entries.len());
        self.uids.extend(entries.iter().filter_map(|p| p.uid.clone()));
        Ok(())
    }
}

struct FailAfterFirstPage {
    calls: usize,
}

impl BatchHandler<Person> for FailAfterFirstPage {
    fn perform_action(&mut self, _entries: &[Person]) -> Result<(), PersistenceError> {
        self.calls += 1;
        if self.calls > 1 {
            return Err(PersistenceError::Search("consumer gave up".into()));
        }
        Ok(())
    }
}

fn uids(people: &[Person]) -> Vec<String> {
    people.iter().filter_map(|p| p.uid.clone()).collect()
}

// ============================================================================
// Batched search
// ============================================================================

#[test]
fn batches_follow_page_size() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let manager = db.manager()?;
    seed(&manager, 250)?;

    let mut recorder = PageRecorder::keeping();
    let collected = manager.find_entries_batched::<Person>(PEOPLE_BASE, None, 100, 0, &mut recorder)?;
    assert_eq!(recorder.pages, vec![100, 100, 50]);
    assert_eq!(collected.len(), 250);

    let total = manager.count_entries::<Person>(PEOPLE_BASE, None)?;
    assert_eq!(total, 250);
    assert_eq!(db.row_count("jansPerson")?, 250);

    let mut distinct = recorder.uids.clone();
    distinct.sort();
    distinct.dedup();
    assert_eq!(distinct.len(), 250);
    Ok(())
}

#[test]
fn handler_can_decline_collection() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let manager = db.manager()?;
    seed(&manager, 40)?;

    let mut recorder = PageRecorder::default();
    let collected = manager.find_entries_batched::<Person>(PEOPLE_BASE, None, 15, 0, &mut recorder)?;
    assert!(collected.is_empty());
    assert_eq!(recorder.pages, vec![15, 15, 10]);
    assert_eq!(recorder.uids.len(), 40);
    Ok(())
}

#[test]
fn count_caps_a_paged_search() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let manager = db.manager()?;
    seed(&manager, 40)?;

    let mut recorder = PageRecorder::keeping();
    let collected = manager.find_entries_batched::<Person>(PEOPLE_BASE, None, 10, 25, &mut recorder)?;
    assert_eq!(recorder.pages, vec![10, 10, 5]);
    assert_eq!(collected.len(), 25);
    Ok(())
}

#[test]
fn exact_multiple_of_page_size_ends_without_an_empty_page() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let manager = db.manager()?;
    seed(&manager, 40)?;

    let mut recorder = PageRecorder::keeping();
    manager.find_entries_batched::<Person>(PEOPLE_BASE, None, 20, 0, &mut recorder)?;
    assert_eq!(recorder.pages, vec![20, 20]);
    Ok(())
}

#[test]
fn handler_failure_stops_the_search() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let manager = db.manager()?;
    seed(&manager, 40)?;

    let mut handler = FailAfterFirstPage { calls: 0 };
    let result = manager.find_entries_batched::<Person>(PEOPLE_BASE, None, 10, 0, &mut handler);
    assert!(matches!(result, Err(PersistenceError::Search(_))));
    assert_eq!(handler.calls, 2);
    Ok(())
}

// ============================================================================
// Windows, ordering and filters
// ============================================================================

#[test]
fn paged_window_reports_the_total() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let manager = db.manager()?;
    seed(&manager, 40)?;

    let page = manager.find_paged_entries::<Person>(PEOPLE_BASE, None, &[SortOrder::ascending("uid")], 10, 5)?;
    assert_eq!(page.start, 10);
    assert_eq!(page.entries_count, 5);
    assert_eq!(page.total_entries_count, 40);
    assert_eq!(uids(&page.entries), vec!["user010", "user011", "user012", "user013", "user014"]);

    let active = Filter::equality("jansActive", true);
    let page = manager.find_paged_entries::<Person>(PEOPLE_BASE, Some(active), &[SortOrder::ascending("uid")], 0, 3)?;
    assert_eq!(page.total_entries_count, 20);
    assert_eq!(uids(&page.entries), vec!["user000", "user002", "user004"]);
    Ok(())
}

#[test]
fn descending_order_and_ranges() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let manager = db.manager()?;
    seed(&manager, 40)?;

    let page = manager.find_paged_entries::<Person>(
        PEOPLE_BASE,
        Some(Filter::greater_or_equal("jansLoginCount", AttributeValue::Integer(35))),
        &[SortOrder::descending("jansLoginCount")],
        0,
        3,
    )?;
    assert_eq!(page.total_entries_count, 5);
    let counts: Vec<Option<i32>> = page.entries.iter().map(|p| p.login_count).collect();
    assert_eq!(counts, vec![Some(39), Some(38), Some(37)]);
    Ok(())
}

#[test]
fn filters_translate_to_sql() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let manager = db.manager()?;
    seed(&manager, 40)?;

    let prefix = Filter::substring("uid", Some("user00"), &[], None);
    assert_eq!(manager.find_entries::<Person>(PEOPLE_BASE, Some(prefix), 0)?.len(), 10);

    let either = Filter::or(vec![Filter::equality("uid", "user001"), Filter::equality("uid", "user007")]);
    let mut found = uids(&manager.find_entries::<Person>(PEOPLE_BASE, Some(either), 0)?);
    found.sort();
    assert_eq!(found, vec!["user001", "user007"]);

    let inactive_low = Filter::and(vec![
        Filter::negate(Filter::equality("jansActive", true)),
        Filter::less_or_equal("jansLoginCount", AttributeValue::Integer(9)),
    ]);
    assert_eq!(manager.count_entries::<Person>(PEOPLE_BASE, Some(inactive_low))?, 5);

    assert_eq!(manager.find_entries::<Person>(PEOPLE_BASE, None, 7)?.len(), 7);
    Ok(())
}

#[test]
fn multivalued_json_columns_are_searchable() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let manager = db.manager()?;
    let mut admin = Person::new("admin");
    admin.member_of = vec!["inum=admins,ou=groups,o=jans".into(), "inum=staff,ou=groups,o=jans".into()];
    let mut guest = Person::new("guest");
    guest.member_of = vec!["inum=guests,ou=groups,o=jans".into()];
    manager.persist(&admin)?;
    manager.persist(&guest)?;
    manager.persist(&Person::new("loner"))?;

    let staff = Filter::equality("memberOf", "inum=staff,ou=groups,o=jans");
    assert_eq!(uids(&manager.find_entries::<Person>(PEOPLE_BASE, Some(staff), 0)?), vec!["admin"]);
    assert_eq!(manager.count_entries::<Person>(PEOPLE_BASE, Some(Filter::presence("memberOf")))?, 2);
    Ok(())
}

#[test]
fn unknown_sort_attribute_is_a_search_error() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let manager = db.manager()?;
    seed(&manager, 3)?;

    let result = manager.find_paged_entries::<Person>(PEOPLE_BASE, None, &[SortOrder::ascending("shoeSize")], 0, 10);
    assert!(matches!(result, Err(PersistenceError::Search(_))));
    Ok(())
}
