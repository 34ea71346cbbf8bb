mod common;

use common::{count, rows, Fixture};
use pretty_assertions::assert_eq;
use rusqlite::types::Value as Sql;
use sqled::db::schema;
use sqled::import::{self, CsvOptions};
use sqled::staging::ColumnMapping;
use sqled::types::Value;
use std::collections::HashMap;

fn same(names: &[&str]) -> Vec<ColumnMapping> {
    names.iter().map(|n| ColumnMapping::Same(n.to_string())).collect()
}

#[test]
fn renaming_a_table_keeps_rows_verbatim() {
    let fixture = Fixture::new();
    let mut manager = fixture.open();
    let session = manager.session_mut().unwrap();
    session.open_editor("Tags").unwrap();
    session
        .stage_new_rows(
            "Tags",
            &["name".to_string()],
            &[vec![Value::Text("indie".into())], vec![Value::Text("roguelike".into())]],
        )
        .unwrap();
    let before = rows(session.preview().connection(), "Tags");

    session
        .stage_schema_change(
            "Tags",
            "CREATE TABLE Tags (name TEXT PRIMARY KEY, note TEXT NOT NULL DEFAULT 'none') WITHOUT ROWID",
            "Labels",
            &same(&["name", "note"]),
            &HashMap::new(),
        )
        .unwrap();

    assert_eq!(rows(session.preview().connection(), "Labels"), before);
    assert_eq!(session.editing_table(), Some("Labels"));
    for conn in [
        session.preview().connection(),
        session.authoritative().unwrap().connection(),
    ] {
        assert!(!schema::table_exists(conn, "Tags").unwrap());
        assert!(schema::describe_table(conn, "Labels").unwrap().without_rowid);
    }
}

#[test]
fn defaults_fill_new_and_newly_required_columns_only() {
    let fixture = Fixture::new();
    let mut manager = fixture.open();
    let session = manager.session_mut().unwrap();

    let mut defaults = HashMap::new();
    defaults.insert("game_id".to_string(), Value::Integer(1));
    defaults.insert("verified".to_string(), Value::Integer(0));
    session
        .stage_schema_change(
            "Reviews",
            "CREATE TABLE Reviews (
                id INTEGER PRIMARY KEY,
                game_id INTEGER REFERENCES Games(id),
                rating INTEGER,
                verified INTEGER
            )",
            "Reviews",
            &[
                ColumnMapping::Same("id".into()),
                ColumnMapping::Same("game_id".into()),
                ColumnMapping::Renamed {
                    name: "rating".into(),
                    from: "score".into(),
                },
                ColumnMapping::Same("verified".into()),
            ],
            &defaults,
        )
        .unwrap();

    // game_id stays nullable, so the NULL survives
    assert_eq!(
        rows(session.authoritative().unwrap().connection(), "Reviews"),
        vec![
            vec![Sql::Integer(1), Sql::Integer(1), Sql::Integer(9), Sql::Integer(0)],
            vec![Sql::Integer(2), Sql::Integer(2), Sql::Integer(10), Sql::Integer(0)],
            vec![Sql::Integer(3), Sql::Null, Sql::Integer(5), Sql::Integer(0)],
        ]
    );

    let mut defaults = HashMap::new();
    defaults.insert("game_id".to_string(), Value::Integer(2));
    session
        .stage_schema_change(
            "Reviews",
            "CREATE TABLE Reviews (id INTEGER PRIMARY KEY, game_id INTEGER NOT NULL REFERENCES Games(id))",
            "Reviews",
            &same(&["id", "game_id"]),
            &defaults,
        )
        .unwrap();
    assert_eq!(
        rows(session.preview().connection(), "Reviews"),
        vec![
            vec![Sql::Integer(1), Sql::Integer(1)],
            vec![Sql::Integer(2), Sql::Integer(2)],
            vec![Sql::Integer(3), Sql::Integer(2)],
        ]
    );
}

#[test]
fn breaking_references_rolls_back_both_handles() {
    let fixture = Fixture::new();
    let mut manager = fixture.open();
    let session = manager.session_mut().unwrap();

    // Reviews still points at "Games"
    let err = session
        .stage_schema_change(
            "Games",
            "CREATE TABLE Titles (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL)",
            "Titles",
            &same(&["id", "title"]),
            &HashMap::new(),
        )
        .unwrap_err();
    assert_eq!(err.detail(), "UNRESOLVED_VIOLATIONS");
    assert!(err.violations().unwrap().iter().all(|v| v.table == "Reviews"));

    for conn in [
        session.preview().connection(),
        session.authoritative().unwrap().connection(),
    ] {
        assert_eq!(schema::list_tables(conn).unwrap(), vec!["Games", "Reviews", "Tags"]);
        assert_eq!(count(conn, "Games"), 3);
    }

    // Enforcement is back on for the real file
    let err = session
        .authoritative()
        .unwrap()
        .connection()
        .execute("INSERT INTO Reviews (game_id) VALUES (404)", [])
        .unwrap_err();
    assert!(err.to_string().contains("FOREIGN KEY"));
}

#[test]
fn unknown_target_columns_are_rejected() {
    let fixture = Fixture::new();
    let mut manager = fixture.open();
    let session = manager.session_mut().unwrap();

    let err = session
        .stage_schema_change(
            "Games",
            "CREATE TABLE Games (id INTEGER PRIMARY KEY, title TEXT)",
            "Games",
            &same(&["id", "name"]),
            &HashMap::new(),
        )
        .unwrap_err();
    assert_eq!(err.detail(), "NOT_FOUND");
    assert_eq!(count(session.preview().connection(), "Games"), 3);
}

#[test]
fn tables_and_columns_are_created_and_dropped_on_both_handles() {
    let fixture = Fixture::new();
    let mut manager = fixture.open();
    let session = manager.session_mut().unwrap();

    let name = session
        .stage_table_create("CREATE TABLE IF NOT EXISTS \"Play Log\" (id INTEGER PRIMARY KEY, minutes INTEGER, note TEXT)")
        .unwrap();
    assert_eq!(name, "Play Log");

    session.stage_column_drop("Play Log", "note").unwrap();
    for conn in [
        session.preview().connection(),
        session.authoritative().unwrap().connection(),
    ] {
        let table = schema::describe_table(conn, "Play Log").unwrap();
        assert_eq!(table.column_names(), vec!["id", "minutes"]);
    }

    let err = session.stage_column_drop("Play Log", "note").unwrap_err();
    assert_eq!(err.detail(), "NOT_FOUND");

    session.stage_table_drop("Play Log").unwrap();
    assert!(!schema::table_exists(session.authoritative().unwrap().connection(), "Play Log").unwrap());
    assert!(!schema::table_exists(session.preview().connection(), "Play Log").unwrap());

    let err = session.stage_table_create("CREATE INDEX i ON Games(title)").unwrap_err();
    assert_eq!(err.detail(), "SQL");
}

#[test]
fn csv_import_creates_a_text_table() {
    let fixture = Fixture::new();
    let csv_path = fixture.dir.path().join("scores.csv");
    std::fs::write(&csv_path, "player\tpoints\nada\t12\nlin\t7\n").unwrap();

    let mut manager = fixture.open();
    let session = manager.session_mut().unwrap();
    let options = CsvOptions {
        delimiter: b'\t',
        ..CsvOptions::default()
    };
    let data = import::read_csv(&csv_path, &options).unwrap();
    assert_eq!(session.stage_csv_table("Scores", &data).unwrap(), 2);

    for conn in [
        session.preview().connection(),
        session.authoritative().unwrap().connection(),
    ] {
        let table = schema::describe_table(conn, "Scores").unwrap();
        assert!(table
            .columns
            .iter()
            .all(|c| c.declared_type.eq_ignore_ascii_case("TEXT")));
        assert_eq!(
            rows(conn, "Scores"),
            vec![
                vec![Sql::Text("ada".into()), Sql::Text("12".into())],
                vec![Sql::Text("lin".into()), Sql::Text("7".into())],
            ]
        );
    }

    let err = session.stage_csv_table("Scores", &data).unwrap_err();
    assert_eq!(err.detail(), "SQL");
}

#[test]
fn existing_dangling_references_do_not_block_a_rebuild() {
    let fixture = Fixture::with_schema(
        "CREATE TABLE parent (id INTEGER PRIMARY KEY);
         CREATE TABLE child (ref INTEGER REFERENCES parent(id), note TEXT);
         INSERT INTO parent VALUES (1);
         INSERT INTO child VALUES (1, 'kept'), (1, 'gone'), (99, 'dangling');
         DELETE FROM child WHERE rowid = 2;",
    );
    let mut manager = fixture.open();
    let session = manager.session_mut().unwrap();

    let before = session.check_foreign_key_violations(None).unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].rowid, Some(3));

    session
        .stage_schema_change(
            "child",
            "CREATE TABLE child (ref INTEGER REFERENCES parent(id), note TEXT, extra TEXT)",
            "child",
            &same(&["ref", "note", "extra"]),
            &HashMap::new(),
        )
        .unwrap();

    // Rowids survive the rebuild, gap included
    let rowids: Vec<i64> = {
        let conn = session.authoritative().unwrap().connection();
        let mut stmt = conn.prepare("SELECT rowid FROM child ORDER BY rowid").unwrap();
        let ids = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        ids
    };
    assert_eq!(rowids, vec![1, 3]);

    session
        .stage_schema_change(
            "child",
            "CREATE TABLE links (target INTEGER REFERENCES parent(id), note TEXT, extra TEXT)",
            "links",
            &[
                ColumnMapping::Renamed {
                    name: "target".into(),
                    from: "ref".into(),
                },
                ColumnMapping::Same("note".into()),
                ColumnMapping::Same("extra".into()),
            ],
            &HashMap::new(),
        )
        .unwrap();

    let after = session.check_foreign_key_violations(None).unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].table, "links");
    assert_eq!(after[0].rowid, Some(3));
    assert_eq!(after[0].column, "target");

    // Renaming the parent strands row 1 as well; only that one is new
    let err = session
        .stage_schema_change(
            "parent",
            "CREATE TABLE roots (id INTEGER PRIMARY KEY)",
            "roots",
            &same(&["id"]),
            &HashMap::new(),
        )
        .unwrap_err();
    assert_eq!(err.detail(), "UNRESOLVED_VIOLATIONS");
    let introduced: Vec<(&str, Option<i64>)> = err
        .violations()
        .unwrap()
        .iter()
        .map(|v| (v.table.as_str(), v.rowid))
        .collect();
    assert_eq!(introduced, vec![("links", Some(1))]);
}
