//! Integration tests for the record binder
//!
//! These tests run against real SQLite database files and cover:
//! - Connector primitives and transaction handling
//! - Registry lifecycle and pool capacity
//! - Optimistic concurrency (snapshot, conflicts, write-back)
//! - Editing locks between independent binders

#[cfg(feature = "sqlite")]
mod sqlite_tests {
    use chrono::{DateTime, Utc};
    use rust_record_binder::backends::{
        EditingTable, SqliteConnector, SqliteEditingBinder, SqliteIsolation, SqliteRecordBinder,
        SqliteRegistry, SqliteSingleEditingBinder,
    };
    use rust_record_binder::core::value::RowAccess;
    use rust_record_binder::core::{
        make_case_clause_from_map, ConnectionParameters, DatabaseError, DatabaseRow, DatabaseValue,
        PoolConfig, Record, RecordBinder, RecordBinding, Result, SingleRecordBinder, Table, WhereSet,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::time::Duration;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Item {
        id: i64,
        name: String,
        updated_at: Option<DateTime<Utc>>,
    }

    impl Item {
        fn new(id: i64, name: &str) -> Self {
            Self {
                id,
                name: name.to_string(),
                updated_at: Some(Utc::now()),
            }
        }
    }

    impl Record for Item {
        fn from_row(row: &DatabaseRow) -> Result<Self> {
            Ok(Self {
                id: row.require_long("id")?,
                name: row.require_string("name")?,
                updated_at: row.optional_datetime("updated_at")?,
            })
        }

        fn to_row(&self) -> DatabaseRow {
            let mut row = DatabaseRow::new();
            row.insert("id".to_string(), DatabaseValue::Long(self.id));
            row.insert("name".to_string(), DatabaseValue::from(self.name.as_str()));
            row.insert(
                "updated_at".to_string(),
                self.updated_at
                    .map(DatabaseValue::from)
                    .unwrap_or(DatabaseValue::Null),
            );
            row
        }
    }

    struct Items {
        table: Table,
        allow_unscoped: bool,
    }

    impl Items {
        fn new() -> Self {
            Self {
                table: Table::new("items", &["id", "name", "updated_at"]),
                allow_unscoped: false,
            }
        }

        fn unscoped() -> Self {
            Self {
                allow_unscoped: true,
                ..Self::new()
            }
        }
    }

    impl RecordBinding for Items {
        type Record = Item;

        fn table(&self) -> &Table {
            &self.table
        }

        fn identifier(&self, record: &Item) -> String {
            record.id.to_string()
        }

        fn last_update_time(&self, record: &Item) -> Option<DateTime<Utc>> {
            record.updated_at
        }

        fn order_by_columns_for_edit(&self) -> Vec<String> {
            vec!["id".to_string()]
        }

        fn is_permitted_update_when_empty_search_condition(&self) -> bool {
            self.allow_unscoped
        }

        fn value_validate(&self, column: &str, value: &DatabaseValue) -> std::result::Result<(), String> {
            match column {
                "name" if value.as_str().map_or(true, str::is_empty) => Err("name is required".to_string()),
                "id" if value.as_long().map_or(true, |id| id <= 0) => Err("id must be positive".to_string()),
                _ => Ok(()),
            }
        }
    }

    /// Untyped binding over `(id, name)` rows
    struct Plain {
        table: Table,
    }

    impl RecordBinding for Plain {
        type Record = DatabaseRow;

        fn table(&self) -> &Table {
            &self.table
        }

        fn identifier(&self, record: &DatabaseRow) -> String {
            record.get("id").map(|v| v.as_string()).unwrap_or_default()
        }

        fn is_permitted_update_when_empty_search_condition(&self) -> bool {
            true
        }
    }

    struct Fixture {
        _dir: TempDir,
        registry: Arc<SqliteRegistry>,
        parameters: ConnectionParameters,
    }

    impl Fixture {
        async fn new() -> Self {
            Self::with_config(PoolConfig::new().with_max_connections(4)).await
        }

        async fn with_config(config: PoolConfig) -> Self {
            let dir = TempDir::new().expect("Failed to create temp dir");
            let path = dir.path().join("binder.db");
            let registry = Arc::new(SqliteRegistry::new());
            registry.start_with_config(config);

            let fixture = Self {
                _dir: dir,
                registry,
                parameters: ConnectionParameters::sqlite(path.to_string_lossy()),
            };

            let mut connector = fixture.connector().await;
            connector
                .execute(
                    "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL, updated_at TEXT)",
                    &[],
                )
                .await
                .expect("Failed to create table");
            for item in [Item::new(1, "a"), Item::new(2, "b")] {
                connector
                    .insert(&item.to_row(), &Items::new().table)
                    .await
                    .expect("Failed to seed");
            }
            EditingTable::default()
                .ensure_schema(&mut connector)
                .await
                .expect("Failed to create marker table");
            connector.release().await.expect("Failed to release");
            fixture
        }

        async fn connector(&self) -> SqliteConnector {
            let mut connector = SqliteConnector::new(Arc::clone(&self.registry), self.parameters.clone());
            connector.connect().await.expect("Failed to connect");
            connector
        }

        async fn stored(&self) -> Vec<(i64, String)> {
            let mut connector = self.connector().await;
            let rows = connector
                .fetch_records("SELECT id, name FROM items ORDER BY id", &[])
                .await
                .expect("Failed to read items");
            connector.release().await.expect("Failed to release");
            rows.iter()
                .map(|row| (row["id"].as_long().unwrap(), row["name"].as_string()))
                .collect()
        }
    }

    fn binder(where_set: Option<WhereSet>) -> RecordBinder<Items> {
        let mut binder = RecordBinder::new(Items::new());
        binder.set_where_set(where_set);
        binder
    }

    // ------------------------------------------------------------------
    // Connector
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_fetch_record_on_empty_result_is_not_found() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;

        let result = connector
            .fetch_record("SELECT * FROM items WHERE id = ?", &[DatabaseValue::Long(99)])
            .await;
        assert!(matches!(result, Err(DatabaseError::NotFound(_))));

        let result = connector
            .fetch_field("SELECT name FROM items WHERE id = ?", &[DatabaseValue::Long(99)])
            .await;
        assert!(result.unwrap_err().is_not_found());

        let name = connector
            .fetch_field("SELECT name, id FROM items WHERE id = ?", &[DatabaseValue::Long(2)])
            .await
            .unwrap();
        assert_eq!(name, DatabaseValue::from("b"));
    }

    #[tokio::test]
    async fn test_unconnected_connector_fails() {
        let fixture = Fixture::new().await;
        let mut connector = SqliteConnector::new(Arc::clone(&fixture.registry), fixture.parameters.clone());
        assert!(!connector.is_connected());

        let result = connector.execute("SELECT 1", &[]).await;
        assert!(matches!(result, Err(DatabaseError::ConnectionError(_))));

        // Releasing without a delegate is a no-op
        connector.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_driver_errors_keep_their_code() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;

        let err = connector
            .execute("INSERT INTO items (id, name) VALUES (1, 'dup')", &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("ConstraintViolation"));

        // The connector is still usable after a statement error
        assert!(!connector.error_occurred());
        assert!(connector.execute("SELECT 1", &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_without_match_is_not_found() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        let table = Items::new().table;

        let mut row = DatabaseRow::new();
        row.insert("name".to_string(), DatabaseValue::from("z"));

        let result = connector.update(&row, &table, &WhereSet::new().eq("id", 42)).await;
        assert!(result.unwrap_err().is_not_found());

        let affected = connector.update(&row, &table, &WhereSet::new().eq("id", 1)).await.unwrap();
        assert_eq!(affected, 1);
        connector.release().await.unwrap();
        assert_eq!(fixture.stored().await[0], (1, "z".to_string()));
    }

    #[tokio::test]
    async fn test_transaction_state() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;

        assert!(matches!(
            connector.commit().await,
            Err(DatabaseError::TransactionNotStarted)
        ));

        connector.begin(SqliteIsolation::Immediate).await.unwrap();
        assert!(connector.is_transaction_begun());
        assert_eq!(connector.transaction_option(), Some(&SqliteIsolation::Immediate));
        assert!(matches!(
            connector.begin(SqliteIsolation::Deferred).await,
            Err(DatabaseError::TransactionError(_))
        ));

        connector
            .execute("DELETE FROM items WHERE id = ?", &[DatabaseValue::Long(2)])
            .await
            .unwrap();
        connector.rollback().await.unwrap();
        assert!(!connector.is_transaction_begun());
        connector.release().await.unwrap();

        assert_eq!(fixture.stored().await.len(), 2);
    }

    #[tokio::test]
    async fn test_release_rolls_back_open_transaction() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;

        connector.begin(SqliteIsolation::Immediate).await.unwrap();
        connector.execute("DELETE FROM items", &[]).await.unwrap();
        connector.release().await.unwrap();
        assert!(!connector.is_transaction_begun());

        assert_eq!(fixture.stored().await.len(), 2);
    }

    #[tokio::test]
    async fn test_case_clause_in_query() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;

        let clause = make_case_clause_from_map("id", [(1, "first"), (2, "second")]);
        assert_eq!(clause, " CASE id WHEN 1 THEN 'first' WHEN 2 THEN 'second' END");

        let sql = format!("SELECT{} AS label FROM items ORDER BY id", clause);
        let rows = connector.fetch_records(&sql, &[]).await.unwrap();
        assert_eq!(rows[0]["label"], DatabaseValue::from("first"));
        assert_eq!(rows[1]["label"], DatabaseValue::from("second"));
    }

    #[tokio::test]
    async fn test_bool_and_timestamp_bind_normalization() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;

        let flag = connector
            .fetch_field("SELECT ? AS flag", &[DatabaseValue::Bool(true)])
            .await
            .unwrap();
        assert_eq!(flag, DatabaseValue::Long(1));

        let at = DateTime::parse_from_rfc3339("2024-05-06T07:08:09.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let text = connector
            .fetch_field("SELECT ? AS at", &[DatabaseValue::from(at)])
            .await
            .unwrap();
        assert_eq!(text, DatabaseValue::from("2024-05-06 07:08:09.123456"));
        assert_eq!(text.as_datetime(), Some(at));
    }

    // ------------------------------------------------------------------
    // Registry and pool
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_connect_before_start_fails() {
        let registry = Arc::new(SqliteRegistry::new());
        let mut connector = SqliteConnector::new(registry, ConnectionParameters::sqlite(":memory:"));
        assert!(matches!(
            connector.connect().await,
            Err(DatabaseError::PoolNotStarted)
        ));
    }

    #[tokio::test]
    async fn test_registry_end_closes_pools() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        connector.release().await.unwrap();

        fixture.registry.end().await.unwrap();
        assert!(!fixture.registry.is_started());
        assert!(matches!(
            connector.connect().await,
            Err(DatabaseError::PoolNotStarted)
        ));

        // A second end is a no-op
        fixture.registry.end().await.unwrap();
    }

    #[tokio::test]
    async fn test_connectors_share_one_pool_per_target() {
        let fixture = Fixture::new().await;
        let _a = fixture.connector().await;
        let _b = fixture.connector().await;

        let pool = fixture
            .registry
            .get(&fixture.parameters)
            .unwrap()
            .expect("pool registered on first connect");
        let stats = rust_record_binder::core::Pool::stats(pool.as_ref());
        assert_eq!(stats.borrowed, 2);
    }

    #[tokio::test]
    async fn test_pool_capacity_is_never_exceeded() {
        let fixture = Fixture::with_config(PoolConfig::new().with_max_connections(3)).await;
        let fixture = Arc::new(fixture);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..12 {
            let fixture = Arc::clone(&fixture);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let mut connector = fixture.connector().await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                connector.fetch_field("SELECT COUNT(*) FROM items", &[]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                connector.release().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.expect("Task panicked");
        }

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak of {} concurrent delegates", peak);
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_acquire_timeout_reports_exhaustion() {
        let fixture = Fixture::with_config(
            PoolConfig::new()
                .with_max_connections(1)
                .with_acquire_timeout(Duration::from_millis(50)),
        )
        .await;
        let _held = fixture.connector().await;

        let mut waiting = SqliteConnector::new(Arc::clone(&fixture.registry), fixture.parameters.clone());
        assert!(matches!(
            waiting.connect().await,
            Err(DatabaseError::PoolExhausted { active: 1, max: 1 })
        ));
    }

    // ------------------------------------------------------------------
    // RecordBinder
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_snapshot_is_independent_of_working_set() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        let mut binder = binder(None);

        binder.edit(&mut connector).await.unwrap();
        assert!(binder.is_bound());
        let snapshot: Vec<Item> = binder.pre_edit_records().unwrap().to_vec();
        assert_eq!(snapshot.len(), 2);

        binder.records_mut()[0].name = "changed".to_string();
        binder.records_mut().pop();

        let stored: Vec<Item> = connector
            .fetch_records("SELECT id, name, updated_at FROM items ORDER BY id", &[])
            .await
            .unwrap()
            .iter()
            .map(|row| Item::from_row(row).unwrap())
            .collect();
        assert_eq!(binder.pre_edit_records().unwrap(), stored.as_slice());
        assert_eq!(snapshot, stored);
    }

    #[tokio::test]
    async fn test_update_replaces_rows_without_conflict() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        let mut binder = binder(Some(WhereSet::new().gt("id", 0)));

        binder.edit(&mut connector).await.unwrap();
        binder.records_mut()[1].name = "bb".to_string();
        binder.records_mut().push(Item::new(3, "c"));

        connector.begin(SqliteIsolation::Immediate).await.unwrap();
        binder.update(&mut connector).await.unwrap();
        connector.commit().await.unwrap();
        connector.release().await.unwrap();

        assert_eq!(
            fixture.stored().await,
            vec![
                (1, "a".to_string()),
                (2, "bb".to_string()),
                (3, "c".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_update_requires_transaction() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        let mut binder = binder(Some(WhereSet::new().eq("id", 1)));

        binder.edit(&mut connector).await.unwrap();
        assert!(matches!(
            binder.update(&mut connector).await,
            Err(DatabaseError::TransactionNotStarted)
        ));
    }

    #[tokio::test]
    async fn test_unscoped_update_without_permission_deletes_nothing() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        let mut binder = binder(None);

        binder.edit(&mut connector).await.unwrap();
        binder.records_mut().clear();

        connector.begin(SqliteIsolation::Immediate).await.unwrap();
        assert!(matches!(
            binder.update(&mut connector).await,
            Err(DatabaseError::SearchConditionMissing)
        ));
        connector.commit().await.unwrap();
        connector.release().await.unwrap();

        assert_eq!(fixture.stored().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unscoped_update_removes_dropped_rows() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        let mut binder = RecordBinder::new(Plain {
            table: Table::new("items", &["id", "name"]),
        });

        binder.edit(&mut connector).await.unwrap();
        assert_eq!(binder.records().len(), 2);
        binder.records_mut().retain(|row| row["id"] != DatabaseValue::Long(2));
        binder.records_mut()[0].insert("name".to_string(), DatabaseValue::from("x"));

        connector.begin(SqliteIsolation::Immediate).await.unwrap();
        binder.update(&mut connector).await.unwrap();
        connector.commit().await.unwrap();
        connector.release().await.unwrap();

        assert_eq!(fixture.stored().await, vec![(1, "x".to_string())]);
    }

    #[tokio::test]
    async fn test_permitted_unscoped_update() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        let mut binder = RecordBinder::new(Items::unscoped());

        binder.edit(&mut connector).await.unwrap();
        binder.records_mut().truncate(1);

        connector.begin(SqliteIsolation::Immediate).await.unwrap();
        binder.update(&mut connector).await.unwrap();
        connector.commit().await.unwrap();
        connector.release().await.unwrap();

        assert_eq!(fixture.stored().await, vec![(1, "a".to_string())]);
    }

    #[tokio::test]
    async fn test_concurrent_modification_conflicts() {
        let fixture = Fixture::new().await;
        let mut first = fixture.connector().await;
        let mut second = fixture.connector().await;

        let mut a = binder(Some(WhereSet::new().eq("id", 1)));
        let mut b = binder(Some(WhereSet::new().eq("id", 1)));
        a.edit(&mut first).await.unwrap();
        b.edit(&mut second).await.unwrap();

        a.records_mut()[0].name = "from a".to_string();
        a.records_mut()[0].updated_at = Some(Utc::now());
        first.begin(SqliteIsolation::Immediate).await.unwrap();
        a.update(&mut first).await.unwrap();
        first.commit().await.unwrap();

        b.records_mut()[0].name = "from b".to_string();
        second.begin(SqliteIsolation::Immediate).await.unwrap();
        match b.update(&mut second).await {
            Err(DatabaseError::RecordConflict { records }) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0]["name"], DatabaseValue::from("from a"));
            }
            other => panic!("expected a conflict, got {:?}", other),
        }
        second.rollback().await.unwrap();

        assert_eq!(fixture.stored().await[0], (1, "from a".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_insert_conflicts() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        let mut binder = binder(Some(WhereSet::new().gt("id", 0)));
        binder.edit(&mut connector).await.unwrap();

        let mut other = fixture.connector().await;
        other
            .insert(&Item::new(5, "e").to_row(), &Items::new().table)
            .await
            .unwrap();

        let err = binder.detect_conflict(&mut connector).await.unwrap_err();
        match err {
            DatabaseError::RecordConflict { records } => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0]["id"], DatabaseValue::Long(5));
            }
            other => panic!("expected a conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_delete_conflicts_while_row_is_held() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        let mut binder = binder(Some(WhereSet::new().gt("id", 0)));
        binder.edit(&mut connector).await.unwrap();

        let mut other = fixture.connector().await;
        other
            .execute("DELETE FROM items WHERE id = ?", &[DatabaseValue::Long(2)])
            .await
            .unwrap();

        connector.begin(SqliteIsolation::Immediate).await.unwrap();
        match binder.update(&mut connector).await {
            Err(DatabaseError::RecordDeleted { records }) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0]["id"], DatabaseValue::Long(2));
            }
            other => panic!("expected a deletion conflict, got {:?}", other),
        }
        connector.rollback().await.unwrap();

        // Once the caller drops the deleted row too, the write goes through
        binder.records_mut().retain(|item| item.id != 2);
        connector.begin(SqliteIsolation::Immediate).await.unwrap();
        binder.update(&mut connector).await.unwrap();
        connector.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_conflict_ignored() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        let mut binder = binder(Some(WhereSet::new().eq("id", 1)));
        binder.edit(&mut connector).await.unwrap();

        let mut other = fixture.connector().await;
        other
            .execute("INSERT INTO items (id, name) VALUES (1000, 'ignored')", &[])
            .await
            .unwrap();
        other
            .execute(
                "UPDATE items SET name = 'other', updated_at = ? WHERE id = 1",
                &[DatabaseValue::from(Utc::now())],
            )
            .await
            .unwrap();

        binder.set_conflict_ignored(true);
        binder.records_mut()[0].name = "mine".to_string();
        connector.begin(SqliteIsolation::Immediate).await.unwrap();
        binder.update(&mut connector).await.unwrap();
        connector.commit().await.unwrap();
        connector.release().await.unwrap();

        assert_eq!(fixture.stored().await[0], (1, "mine".to_string()));
    }

    #[tokio::test]
    async fn test_exists() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;

        assert!(matches!(
            binder(None).exists(&mut connector).await,
            Err(DatabaseError::SearchConditionMissing)
        ));
        assert!(binder(Some(WhereSet::new().eq("id", 2)))
            .exists(&mut connector)
            .await
            .unwrap());
        assert!(!binder(Some(WhereSet::new().eq("id", 3)))
            .exists(&mut connector)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_validate_aggregates_columns() {
        let mut binder = binder(None);
        binder.records_mut().push(Item {
            id: 0,
            name: String::new(),
            updated_at: None,
        });

        match binder.validate() {
            Err(DatabaseError::RecordMapValidation { messages }) => {
                assert_eq!(messages.len(), 2);
                assert_eq!(messages["id"], "id must be positive");
                assert_eq!(messages["name"], "name is required");
            }
            other => panic!("expected validation failure, got {:?}", other),
        }

        binder.records_mut()[0] = Item::new(4, "ok");
        assert!(binder.validate().is_ok());
    }

    // ------------------------------------------------------------------
    // SingleRecordBinder
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_single_binder_edit_counts_rows() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;

        let mut one = SingleRecordBinder::new(Items::new()).with_where_set(WhereSet::new().eq("id", 1));
        one.edit(&mut connector).await.unwrap();
        assert_eq!(one.record().unwrap().name, "a");

        let mut none = SingleRecordBinder::new(Items::new()).with_where_set(WhereSet::new().eq("id", 9));
        assert!(none.edit(&mut connector).await.unwrap_err().is_not_found());
        assert!(none.record().is_none());

        let mut many = SingleRecordBinder::new(Items::new()).with_where_set(WhereSet::new().gt("id", 0));
        assert!(matches!(
            many.edit(&mut connector).await,
            Err(DatabaseError::MultipleRecordsFound(2))
        ));
        assert!(!many.binder().is_bound());
    }

    #[tokio::test]
    async fn test_single_binder_insert_update_delete() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;

        let mut binder = SingleRecordBinder::new(Items::new()).with_where_set(WhereSet::new().eq("id", 7));
        assert!(!binder.exists(&mut connector).await.unwrap());
        *binder.record_mut() = Item::new(7, "g");
        binder.insert(&mut connector).await.unwrap();
        assert!(binder.exists(&mut connector).await.unwrap());

        binder.edit(&mut connector).await.unwrap();
        binder.record_mut().name = "seven".to_string();
        connector.begin(SqliteIsolation::Immediate).await.unwrap();
        binder.update(&mut connector).await.unwrap();
        connector.commit().await.unwrap();

        let name = connector
            .fetch_field("SELECT name FROM items WHERE id = 7", &[])
            .await
            .unwrap();
        assert_eq!(name, DatabaseValue::from("seven"));

        assert_eq!(binder.physical_delete(&mut connector).await.unwrap(), 1);
        assert!(!binder.exists(&mut connector).await.unwrap());

        let mut unscoped = SingleRecordBinder::new(Items::new());
        assert!(matches!(
            unscoped.physical_delete(&mut connector).await,
            Err(DatabaseError::SearchConditionMissing)
        ));
    }

    // ------------------------------------------------------------------
    // SQLite editing locks
    // ------------------------------------------------------------------

    fn locking(where_set: WhereSet) -> SqliteRecordBinder<Items> {
        SqliteEditingBinder::new(binder(Some(where_set)))
    }

    #[tokio::test]
    async fn test_edit_is_idempotent_while_editing() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        let mut binder = locking(WhereSet::new().eq("id", 1));

        binder.edit(&mut connector).await.unwrap();
        binder.target_mut().records_mut()[0].name = "kept".to_string();
        binder.edit(&mut connector).await.unwrap();

        assert!(binder.is_editing());
        assert_eq!(binder.target().records()[0].name, "kept");
        binder.close(&connector).await.unwrap();
    }

    #[tokio::test]
    async fn test_second_editor_is_refused_until_close() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        let mut first = locking(WhereSet::new().eq("id", 1));
        let mut second = locking(WhereSet::new().eq("id", 1));
        let mut unrelated = locking(WhereSet::new().eq("id", 2));

        first.edit(&mut connector).await.unwrap();

        assert!(matches!(
            second.edit(&mut connector).await,
            Err(DatabaseError::EditingByAnother(_))
        ));
        assert!(!second.is_editing());
        assert!(second.target().records().is_empty());

        unrelated.edit(&mut connector).await.unwrap();

        first.close(&connector).await.unwrap();
        second.edit(&mut connector).await.unwrap();
        assert!(second.is_editing());
    }

    #[tokio::test]
    async fn test_locked_update_round_trip() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        let mut binder = locking(WhereSet::new().eq("id", 2));

        binder.edit(&mut connector).await.unwrap();
        binder.target_mut().records_mut()[0].name = "locked".to_string();

        connector.begin(SqliteIsolation::Immediate).await.unwrap();
        binder.update(&mut connector).await.unwrap();
        connector.commit().await.unwrap();
        binder.close(&connector).await.unwrap();
        connector.release().await.unwrap();

        assert_eq!(fixture.stored().await[1], (2, "locked".to_string()));
    }

    #[tokio::test]
    async fn test_single_editing_binder() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;

        let single = || {
            SqliteSingleEditingBinder::<Items>::new(
                SingleRecordBinder::new(Items::new()).with_where_set(WhereSet::new().eq("id", 1)),
            )
        };
        let mut first = single();
        let mut second = single();

        first.edit(&mut connector).await.unwrap();
        assert_eq!(first.target().record().unwrap().id, 1);
        assert!(second.edit(&mut connector).await.is_err());

        second.forcibly_close(&connector).await.unwrap();
        assert!(second.edit(&mut connector).await.is_ok());
    }

    #[tokio::test]
    async fn test_shared_exclusive_transaction() {
        let fixture = Fixture::new().await;
        let mut connector = fixture.connector().await;
        let mut a = locking(WhereSet::new().eq("id", 1));
        let mut b = locking(WhereSet::new().eq("id", 2));

        connector.begin(SqliteIsolation::Exclusive).await.unwrap();
        a.edit_by_connector(&mut connector).await.unwrap();
        b.edit_by_connector(&mut connector).await.unwrap();
        connector.commit().await.unwrap();

        let markers = connector
            .fetch_field("SELECT COUNT(*) FROM record_editing", &[])
            .await
            .unwrap();
        assert_eq!(markers, DatabaseValue::Long(2));

        connector.begin(SqliteIsolation::Exclusive).await.unwrap();
        a.close_by_connector(&mut connector).await.unwrap();
        b.forcibly_close_by_connector(&mut connector).await.unwrap();
        connector.commit().await.unwrap();

        let markers = connector
            .fetch_field("SELECT COUNT(*) FROM record_editing", &[])
            .await
            .unwrap();
        assert_eq!(markers, DatabaseValue::Long(0));
    }
}
