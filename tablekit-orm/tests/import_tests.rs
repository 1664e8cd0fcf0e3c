mod support;

use pretty_assertions::assert_eq;
use serde_json::json;
use support::{config, harness, harness_with, schema};
use tablekit_client::MemoryBackend;
use tablekit_import::{DelimitedSource, JsonExportSource, SqlDumpSource};
use tablekit_orm::TableSchema;
use tablekit_types::{AttributeKind, DocumentId, TableId};

fn posts_csv(count: usize, blank_titles: &[usize]) -> String {
    let mut csv = String::from("title,views\n");
    for i in 0..count {
        if blank_titles.contains(&i) {
            csv.push_str(&format!(",{i}\n"));
        } else {
            csv.push_str(&format!("post {i},{i}\n"));
        }
    }
    csv
}

#[tokio::test]
async fn invalid_records_are_reported_by_index() -> anyhow::Result<()> {
    let h = harness().await;
    let posts = h.orm.table("posts")?;

    let summary = posts
        .import(&DelimitedSource::new(posts_csv(50, &[10, 37])))
        .await?;

    assert_eq!(summary.created, 48);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.failed_indices(), vec![10, 37]);
    assert_eq!(h.backend.document_count(&support::posts_id()), 48);
    assert_eq!(posts.all().await?.total, 48);
    Ok(())
}

#[tokio::test]
async fn backend_failures_do_not_stop_later_batches() -> anyhow::Result<()> {
    let mut cfg = config();
    cfg.import_batch_size = 25;
    let backend = MemoryBackend::new();
    backend.reject_documents_where("title", json!("post 3"));
    backend.reject_documents_where("title", json!("post 40"));
    let h = harness_with(backend, schema(), cfg).await;
    let posts = h.orm.table("posts")?;

    let summary = posts.import(&DelimitedSource::new(posts_csv(60, &[]))).await?;

    assert_eq!(summary.batches, 3);
    assert_eq!(summary.created, 58);
    assert_eq!(summary.failed_indices(), vec![3, 40]);
    assert!(summary.failures[0].reason.contains("invalid value"));
    Ok(())
}

#[tokio::test]
async fn import_refreshes_cached_lists() -> anyhow::Result<()> {
    let h = harness().await;
    let posts = h.orm.table("posts")?;
    assert_eq!(posts.all().await?.total, 0);

    posts.import(&DelimitedSource::new(posts_csv(5, &[]))).await?;

    assert_eq!(posts.all().await?.total, 5);
    Ok(())
}

#[tokio::test]
async fn exported_ids_are_kept() -> anyhow::Result<()> {
    let h = harness().await;
    let posts = h.orm.table("posts")?;
    let export = r#"{"total": 2, "documents": [
        {"$id": "a1", "$createdAt": "2024-01-01T00:00:00.000+00:00", "title": "first"},
        {"$id": "a2", "title": "second", "status": "live"}
    ]}"#;

    let summary = posts.import(&JsonExportSource::new(export)?).await?;

    assert!(summary.is_clean());
    let doc = posts.get(&DocumentId::new("a2")).await?;
    assert_eq!(doc.get("status"), Some(&json!("live")));
    assert!(posts.get(&DocumentId::new("a1")).await?.get("$createdAt").is_none());
    Ok(())
}

#[tokio::test]
async fn values_are_shaped_to_declared_kinds() -> anyhow::Result<()> {
    // `title` holds digits in the file but is declared as a string.
    let h = harness().await;
    let posts = h.orm.table("posts")?;

    let summary = posts
        .import(&DelimitedSource::new("title,views\n2024,1\n"))
        .await?;

    assert!(summary.is_clean());
    assert_eq!(posts.all().await?.documents[0].get("title"), Some(&json!("2024")));
    Ok(())
}

#[tokio::test]
async fn undeclared_table_from_a_sql_dump() -> anyhow::Result<()> {
    let h = harness().await;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("legacy.sql");
    std::fs::write(
        &path,
        "CREATE TABLE accounts (\n  email VARCHAR(120) NOT NULL,\n  active TINYINT(1),\n  joined DATETIME\n);\n\
         INSERT INTO accounts VALUES ('a@example.com', 1, '2023-05-01 08:00:00'),\n\
         ('b@example.com', 0, NULL);\n",
    )?;
    let source = SqlDumpSource::from_path(&path)?;

    let schema = TableSchema::inferred("accounts", &source);
    assert_eq!(schema.attributes.len(), 3);
    assert_eq!(schema.attribute_named("active").unwrap().kind, AttributeKind::Boolean);

    let report = h.orm.declare_table(schema).await?;
    assert!(report.created);
    let accounts = h.orm.table("accounts")?;
    let summary = accounts.import(&source).await?;

    assert_eq!(summary.created, 2);
    assert_eq!(h.backend.document_count(&TableId::new("accounts")), 2);
    Ok(())
}

#[tokio::test]
async fn inferred_schema_from_delimited_text() -> anyhow::Result<()> {
    let h = harness().await;
    let source = DelimitedSource::new("name,age,score\nAda,36,9.5\nBob,41,7\n");

    let schema = TableSchema::inferred("people", &source);
    let kinds: Vec<_> = schema.attributes.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![AttributeKind::String, AttributeKind::Integer, AttributeKind::Float]
    );

    h.orm.declare_table(schema).await?;
    let summary = h.orm.table("people")?.import(&source).await?;
    assert_eq!(summary.created, 2);
    Ok(())
}
