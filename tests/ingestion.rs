use anyhow::Result;
use ducklens::ingest::{CsvOptions, JsonFormat, JsonOptions};
use ducklens::{
    ClientError, DuckDbClient, FieldType, FileBuffer, FileLocation, OpenOptions, Source,
    SourceMap, SourceOptions, Value,
};

const PEOPLE_CSV: &str = "id,name,age\n1,Ada,36\n2,Grace,45\n3,Linus,28\n";

async fn open() -> Result<DuckDbClient> {
    Ok(DuckDbClient::create(SourceMap::new(), OpenOptions::default()).await?)
}

fn csv(name: &str, contents: &str) -> FileBuffer {
    FileBuffer::new(name, contents).with_media_type("text/csv")
}

async fn count(client: &DuckDbClient, table: &str) -> Result<i64> {
    let value = client
        .query_scalar(&format!("SELECT count(*) FROM \"{table}\""), &[])
        .await?;
    Ok(value.as_i64().unwrap_or_default())
}

#[tokio::test]
async fn raw_files_are_addressable_by_name() -> Result<()> {
    let client = open().await?;
    let name = client
        .import_source(Source::file(FileBuffer::new("people.csv", PEOPLE_CSV)))
        .await?;
    assert_eq!(name, "people.csv");
    assert!(matches!(
        client.resolve_file("people.csv"),
        Some(FileLocation::Local(_))
    ));
    assert!(client.list_tables().await?.is_empty());

    let total = client
        .query_scalar("SELECT sum(age) FROM read_csv_auto('people.csv')", &[])
        .await?;
    assert_eq!(total.as_i64(), Some(109));
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn typed_csv_keeps_inferred_types() -> Result<()> {
    let client = open().await?;
    let name = client
        .import_source(Source::table(csv("people.csv", PEOPLE_CSV), "people"))
        .await?;
    assert_eq!(name, "people");

    let columns = client.describe_columns("people").await?;
    let types = columns
        .iter()
        .map(|c| (c.name.as_str(), c.field_type))
        .collect::<Vec<_>>();
    assert_eq!(types[1], ("name", FieldType::String));
    assert_ne!(types[0].1, FieldType::String);
    assert_ne!(types[2].1, FieldType::String);
    assert_eq!(count(&client, "people").await?, 3);
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn csv_conversion_failure_falls_back_to_text() -> Result<()> {
    let client = open().await?;
    let mut options = SourceOptions::default();
    options
        .csv
        .column_types
        .insert("amount".to_string(), "INTEGER".to_string());
    let file = csv("amounts.csv", "id;amount\n1;10\n2;n/a\n3;30\n");

    client
        .import_source(Source::table(file, "amounts").with_options(options))
        .await?;

    let columns = client.describe_columns("amounts").await?;
    assert_eq!(columns.len(), 2);
    assert!(columns
        .iter()
        .all(|column| column.database_type == "VARCHAR"));
    let amount = client
        .query_scalar("SELECT amount FROM amounts WHERE id = '2'", &[])
        .await?;
    assert_eq!(amount, Value::from("n/a"));
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn tab_separated_files_use_tab_delimiter() -> Result<()> {
    let client = open().await?;
    let file = FileBuffer::new("scores.tsv", "player\tscore\nann\t3\nbob\t5\n");
    client.import_source(Source::table(file, "scores")).await?;
    let total = client
        .query_scalar("SELECT sum(score) FROM scores", &[])
        .await?;
    assert_eq!(total.as_i64(), Some(8));
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn csv_options_are_applied() -> Result<()> {
    let client = open().await?;
    let options = SourceOptions {
        csv: CsvOptions {
            delimiter: Some("|".to_string()),
            skip: Some(1),
            ..CsvOptions::default()
        },
        ..SourceOptions::default()
    };
    let file = csv("piped.csv", "exported by tool\nk|v\na|1\nb|2\n");
    client
        .import_source(Source::table(file, "piped").with_options(options))
        .await?;
    let columns = client.describe_columns("piped").await?;
    let names = columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["k", "v"]);
    assert_eq!(count(&client, "piped").await?, 2);
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn json_loads_into_a_table() -> Result<()> {
    let client = open().await?;
    let file = FileBuffer::new("events.json", r#"[{"id": 1, "kind": "a"}, {"id": 2, "kind": "b"}]"#)
        .with_media_type("application/json");
    client.import_source(Source::table(file, "events")).await?;

    let tables = client.list_tables().await?;
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "events");
    assert_eq!(tables[0].table_type, "BASE TABLE");
    assert_eq!(count(&client, "events").await?, 2);
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn json_failure_falls_back_to_view() -> Result<()> {
    let client = open().await?;
    let options = SourceOptions {
        json: JsonOptions {
            format: JsonFormat::Array,
            ..JsonOptions::default()
        },
        ..SourceOptions::default()
    };
    // Newline-delimited records declared as an array fail the typed load.
    let file = FileBuffer::new("lines.json", "{\"id\": 1}\n{\"id\": 2}\n")
        .with_media_type("application/json");
    client
        .import_source(Source::table(file, "lines").with_options(options))
        .await?;

    let tables = client.list_tables().await?;
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].table_type, "VIEW");
    assert_eq!(count(&client, "lines").await?, 2);
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn parquet_files_become_views() -> Result<()> {
    let client = open().await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nums.parquet");
    client
        .execute_batch(&[format!(
            "COPY (SELECT range AS n FROM range(10)) TO '{}' (FORMAT PARQUET)",
            path.display()
        )])
        .await?;

    let file = FileBuffer::from_path(&path)?;
    client.import_source(Source::table(file, "nums")).await?;
    let tables = client.list_tables().await?;
    assert_eq!(tables[0].name, "nums");
    assert_eq!(tables[0].table_type, "VIEW");
    assert_eq!(count(&client, "nums").await?, 10);
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn target_schema_is_honored() -> Result<()> {
    let client = open().await?;
    client.execute_batch(&["CREATE SCHEMA staging"]).await?;
    let options = SourceOptions {
        schema: Some("staging".to_string()),
        ..SourceOptions::default()
    };
    client
        .import_source(Source::table(csv("people.csv", PEOPLE_CSV), "people").with_options(options))
        .await?;
    let rows = client
        .query_scalar("SELECT count(*) FROM staging.people", &[])
        .await?;
    assert_eq!(rows.as_i64(), Some(3));
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn unsupported_files_are_rejected() -> Result<()> {
    let client = open().await?;
    let file = FileBuffer::new("blob.bin", vec![0u8, 1, 2]).with_media_type("application/octet-stream");
    let err = client
        .import_source(Source::table(file, "blob"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::UnsupportedSource(_)));
    // The handle is registered before the format is checked.
    assert!(matches!(
        client.resolve_file("blob.bin"),
        Some(FileLocation::Local(_))
    ));
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn urls_register_without_download() -> Result<()> {
    let client = open().await?;
    let name = client
        .import_source(Source::url("https://example.invalid/data/trips.parquet?token=x"))
        .await?;
    assert_eq!(name, "trips.parquet");
    assert_eq!(
        client.resolve_file("trips.parquet"),
        Some(FileLocation::Remote(
            "https://example.invalid/data/trips.parquet?token=x".to_string()
        ))
    );
    assert!(client.list_tables().await?.is_empty());
    assert_eq!(
        client
            .resolve_file(&name)
            .map(|location| location.as_reader_path()),
        Some("https://example.invalid/data/trips.parquet?token=x".to_string())
    );

    let err = client
        .import_source(Source::url_named("https://example.invalid/notes.txt", "notes"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::UnsupportedSource(_)));
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn aggregate_failure_names_only_the_bad_source() -> Result<()> {
    let client = open().await?;
    let mut sources = SourceMap::new();
    sources.insert(
        "people".to_string(),
        Source::table(csv("people.csv", PEOPLE_CSV), "people"),
    );
    sources.insert(
        "events".to_string(),
        Source::table(
            FileBuffer::new("events.json", r#"[{"id": 1}]"#).with_media_type("application/json"),
            "events",
        ),
    );
    sources.insert(
        "broken".to_string(),
        Source::table(
            FileBuffer::new("broken.dat", "???").with_media_type("application/x-unknown"),
            "broken",
        ),
    );

    let err = client.import_sources(sources).await.unwrap_err();
    let ClientError::AggregateIngestion(errors) = &err else {
        panic!("expected aggregate error, got {err:?}");
    };
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        ClientError::Ingestion { source_name, .. } if source_name == "broken"
    ));
    let message = err.to_string();
    assert!(message.contains("broken"));
    assert!(!message.contains("people"));

    assert_eq!(count(&client, "people").await?, 3);
    assert_eq!(count(&client, "events").await?, 1);
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn create_with_sources_loads_them() -> Result<()> {
    let mut sources = SourceMap::new();
    sources.insert(
        "people".to_string(),
        Source::table(csv("people.csv", PEOPLE_CSV), "people"),
    );
    let client = DuckDbClient::create(sources, OpenOptions::default()).await?;
    assert_eq!(count(&client, "people").await?, 3);
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn create_fails_when_a_source_fails() {
    let mut sources = SourceMap::new();
    sources.insert(
        "bad".to_string(),
        Source::table(FileBuffer::new("bad.xyz", "x"), "bad"),
    );
    let err = DuckDbClient::create(sources, OpenOptions::default())
        .await
        .err()
        .expect("creation should fail");
    assert!(matches!(err, ClientError::AggregateIngestion(_)));
}

#[tokio::test]
async fn import_after_close_is_rejected() -> Result<()> {
    let client = open().await?;
    client.close().await?;
    let err = client
        .import_source(Source::file(FileBuffer::new("a.csv", "x\n1\n")))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Closed));
    Ok(())
}
