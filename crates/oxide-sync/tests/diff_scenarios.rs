//! End-to-end diff and DDL scenarios rendered for PostgreSQL.
//!
//! These run without a server: both snapshots are built in memory and
//! the plan is checked statement by statement.

use oxide_sync::prelude::*;

fn plan_for(desired: Option<&Table>, live: Option<&Table>) -> Plan {
    let dialect = PostgresDialect::new();
    let differ = Differ::new(DiffOptions::for_dialect(&dialect.capabilities()));
    let diff = differ.diff_table(desired, live).unwrap();
    DdlGenerator::new(&dialect).generate(diff).unwrap()
}

fn post(title: Column) -> Table {
    Table::new("post")
        .column(Column::new("id", "integer").primary().increment())
        .column(title)
        .column(Column::new("count", "integer").not_null().default("0"))
}

fn rich_table() -> Table {
    Table::new(TablePath::qualified("blog", "event"))
        .column(Column::new("id", "bigint").primary().generation(Generation::Identity))
        .column(Column::new("author_id", "integer").not_null())
        .column(Column::new("slug", "varchar").length(80).not_null())
        .column(Column::new("price", "numeric").precision(10, 2))
        .column(Column::new("tags", "text").array())
        .column(Column::new("happened_at", "timestamptz").not_null().default("now()"))
        .column(Column::new("slug_upper", "text").generated_as("upper(slug)"))
        .index(Index::new("idx_event_tags", vec!["tags".into()]).method(IndexMethod::Gin))
        .index(
            Index::new("idx_event_slug", vec!["slug".into()])
                .unique()
                .where_clause("price > 0"),
        )
        .foreign_key(
            ForeignKey::new("fk_event_author", vec!["author_id".into()], "author", vec!["id".into()])
                .on_delete(ForeignKeyAction::Cascade),
        )
        .unique(Unique::new("uq_event_slug_time", vec!["slug".into(), "happened_at".into()]))
        .check(Check::new("ck_event_price", "price >= 0"))
        .partition_by(
            PartitionSpec::by_columns(PartitionStrategy::Range, vec!["happened_at".into()])
                .partition(PartitionDefinition::new(
                    "event_2025",
                    PartitionBound::Range {
                        from: vec!["'2025-01-01'".into()],
                        to: vec!["'2026-01-01'".into()],
                    },
                )),
        )
}

#[test]
fn diff_of_table_with_its_clone_is_empty() {
    let table = rich_table();
    let copy = table.clone();
    let plan = plan_for(Some(&table), Some(&copy));
    assert!(plan.is_empty());
    assert!(plan.warnings.is_empty());
}

#[test]
fn widening_varchar_alters_in_place() {
    let desired = post(Column::new("title", "varchar").length(100).not_null());
    let live = post(Column::new("title", "varchar").length(50).not_null());

    let dialect = PostgresDialect::new();
    let diff = Differ::new(DiffOptions::for_dialect(&dialect.capabilities()))
        .diff_table(Some(&desired), Some(&live))
        .unwrap();
    assert_eq!(diff.len(), 1);
    assert!(matches!(diff.deltas[0], Delta::AlterColumn { .. }));

    let plan = DdlGenerator::new(&dialect).generate(diff).unwrap();
    assert_eq!(plan.steps[0].alteration, Some(Alteration::SafeWiden));
    assert_eq!(
        plan.up_queries(),
        vec![r#"ALTER TABLE "post" ALTER COLUMN "title" TYPE varchar(100)"#.to_string()]
    );
    assert!(!plan
        .up_queries()
        .iter()
        .any(|q| q.contains("DROP COLUMN") && q.contains("\"title\"")));
    assert!(!plan.has_unsafe_changes());
}

#[test]
fn integer_to_bigint_casts() {
    let desired = Table::new("post").column(Column::new("count", "bigint"));
    let live = Table::new("post").column(Column::new("count", "integer"));
    let plan = plan_for(Some(&desired), Some(&live));

    assert_eq!(plan.steps[0].alteration, Some(Alteration::SafeRetype));
    assert_eq!(
        plan.up_queries(),
        vec![r#"ALTER TABLE "post" ALTER COLUMN "count" TYPE bigint USING "count"::bigint"#.to_string()]
    );
}

#[test]
fn missing_table_is_created_whole() {
    let category = Table::new("category")
        .column(Column::new("id", "int").primary())
        .column(Column::new("name", "varchar"));
    let plan = plan_for(Some(&category), None);

    assert_eq!(plan.steps.len(), 1);
    assert!(matches!(plan.steps[0].delta, Delta::AddTable(_)));
    assert!(plan.steps.iter().all(|s| !matches!(
        s.delta,
        Delta::AlterColumn { .. } | Delta::DropColumn { .. }
    )));
    assert_eq!(plan.down_queries(), vec![r#"DROP TABLE "category""#.to_string()]);
}

#[test]
fn renamed_index_with_same_structure_is_ignored() {
    let base = Table::new("post")
        .column(Column::new("id", "integer").primary())
        .column(Column::new("title", "text"));
    let desired = base
        .clone()
        .index(Index::new("idx_post_title", vec!["title".into()]));
    let live = base.index(Index::new("post_title_idx", vec!["title".into()]));

    assert!(plan_for(Some(&desired), Some(&live)).is_empty());
}

#[test]
fn foreign_key_dropped_before_its_column() {
    let desired = Table::new("comment")
        .column(Column::new("id", "integer").primary())
        .column(Column::new("body", "text"));
    let live = desired
        .clone()
        .column(Column::new("post_id", "integer"))
        .foreign_key(ForeignKey::new(
            "fk_comment_post",
            vec!["post_id".into()],
            "post",
            vec!["id".into()],
        ));

    let plan = plan_for(Some(&desired), Some(&live));
    let position = |pred: fn(&Delta) -> bool| plan.steps.iter().position(|s| pred(&s.delta));
    let drop_fk = position(|d| matches!(d, Delta::DropForeignKey { .. })).unwrap();
    let drop_column = position(|d| matches!(d, Delta::DropColumn { .. })).unwrap();
    assert!(drop_fk < drop_column);

    // The inverse recreates the column before the constraint.
    let down = plan.down_queries();
    let add_column = down.iter().position(|q| q.contains("ADD COLUMN")).unwrap();
    let add_fk = down.iter().position(|q| q.contains("FOREIGN KEY")).unwrap();
    assert!(add_column < add_fk);
    assert!(plan.has_unsafe_changes());
}

#[test]
fn rebuilt_referenced_column_moves_foreign_key_around_it() {
    let author = |id_type: &str| Table::new("author").column(Column::new("id", id_type).primary());
    let post = |author_type: &str| {
        Table::new("post")
            .column(Column::new("id", "integer").primary())
            .column(Column::new("author_id", author_type))
            .foreign_key(ForeignKey::new(
                "fk_post_author",
                vec!["author_id".into()],
                "author",
                vec!["id".into()],
            ))
    };

    let dialect = PostgresDialect::new();
    let diff = Differ::new(DiffOptions::for_dialect(&dialect.capabilities()))
        .diff_schema(&[author("uuid"), post("uuid")], &[author("integer"), post("integer")])
        .unwrap();
    let plan = DdlGenerator::new(&dialect).generate(diff).unwrap();

    let up = plan.up_queries();
    assert_eq!(up[0], r#"ALTER TABLE "post" DROP CONSTRAINT "fk_post_author""#);
    assert_eq!(
        up.last().map(String::as_str),
        Some(r#"ALTER TABLE "post" ADD CONSTRAINT "fk_post_author" FOREIGN KEY ("author_id") REFERENCES "author" ("id")"#)
    );
    assert!(up.contains(&r#"ALTER TABLE "author" DROP COLUMN "id""#.to_string()));
    assert!(up.contains(&r#"ALTER TABLE "author" ADD COLUMN "id" uuid PRIMARY KEY"#.to_string()));
    assert_eq!(up.iter().filter(|q| q.contains("fk_post_author")).count(), 2);

    // The way back releases the constraint first and restores it last.
    let down = plan.down_queries();
    assert_eq!(down[0], r#"ALTER TABLE "post" DROP CONSTRAINT "fk_post_author""#);
    assert!(down.last().is_some_and(|q| q.contains("ADD CONSTRAINT \"fk_post_author\"")));
}

#[test]
fn widening_classification_is_monotonic() {
    let caps = PostgresDialect::new().capabilities();
    let short = Column::new("title", "varchar").length(50);
    let long = Column::new("title", "varchar").length(100);

    assert_eq!(
        AlterationPolicy::classify(&short, &long, &caps),
        Alteration::SafeWiden
    );
    assert_ne!(
        AlterationPolicy::classify(&long, &short, &caps),
        Alteration::SafeWiden
    );
}

#[test]
fn shrinking_varchar_truncates_with_warning() {
    let desired = post(Column::new("title", "varchar").length(50).not_null());
    let live = post(Column::new("title", "varchar").length(100).not_null());
    let plan = plan_for(Some(&desired), Some(&live));

    assert_eq!(
        plan.up_queries(),
        vec![r#"ALTER TABLE "post" ALTER COLUMN "title" TYPE varchar(50) USING substring("title", 1, 50)"#.to_string()]
    );
    assert!(plan.has_unsafe_changes());
    assert!(plan.warnings[0].to_string().contains("post.title"));
}

#[test]
fn malformed_partition_spec_is_ambiguous() {
    let mut spec = PartitionSpec::by_columns(PartitionStrategy::List, vec!["kind".into()]);
    spec.expression = Some("lower(kind)".into());
    let table = Table::new("item")
        .column(Column::new("kind", "text"))
        .partition_by(spec);

    let err = Differ::default().diff_table(Some(&table), None).unwrap_err();
    assert!(matches!(err, SyncError::DiffAmbiguity(_)));
}

#[test]
fn mysql_renders_generation_only() {
    let dialect = MySqlDialect::new();
    let desired = Table::new("post").column(Column::new("title", "varchar").length(100));
    let live = Table::new("post").column(Column::new("title", "varchar").length(50));
    let diff = Differ::new(DiffOptions::for_dialect(&dialect.capabilities()))
        .diff_table(Some(&desired), Some(&live))
        .unwrap();
    let plan = DdlGenerator::new(&dialect).generate(diff).unwrap();
    assert!(plan.up_queries()[0].starts_with("ALTER TABLE `post` MODIFY COLUMN `title`"));
}
