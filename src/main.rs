use std::sync::Arc;

use clap::Parser;
use entsearch::{
    DataDir,
    EntitySchema,
    Record,
    RecordStore,
    SearchClient,
    SearchConfig,
    TaskStatus,
    cli::{self, Cli, Command, TypeAction},
    error::{self, Error},
    projector,
    schema::{FieldDef, SearchableAttribute},
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("ENTSEARCH_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let store = Arc::new(RecordStore::open(&data_dir.records_db())?);

    match cli.command {
        Command::Type { action } => match action {
            TypeAction::Add {
                name,
                fields,
                searchable,
                not_indexable,
            } => {
                type_add(
                    &store,
                    &data_dir,
                    name,
                    fields,
                    searchable,
                    not_indexable,
                )?;
            }
            TypeAction::Remove { name } => {
                type_remove(&store, &data_dir, &name)?;
            }
            TypeAction::List { json } => {
                type_list(&store, json)?;
            }
        },
        Command::Put(args) => {
            cmd_put(&store, &data_dir, &args)?;
        }
        Command::Remove(args) => {
            cmd_remove(&store, &data_dir, &args)?;
        }
        Command::Search(args) => {
            cmd_search(&store, &data_dir, &args)?;
        }
        Command::Rebuild(args) => {
            cmd_rebuild(&store, &data_dir, &args)?;
        }
        Command::Status(args) => {
            cmd_status(&store, &data_dir, args.json)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn open_client(
    store: &Arc<RecordStore>,
    data_dir: &DataDir,
) -> error::Result<SearchClient> {
    SearchClient::open(
        SearchConfig::from_env(data_dir)?,
        store.list_schemas()?,
        store,
    )
}

fn type_add(
    store: &RecordStore,
    data_dir: &DataDir,
    name: String,
    fields: Vec<FieldDef>,
    searchable: Vec<SearchableAttribute>,
    not_indexable: bool,
) -> error::Result<()> {
    let mut schema = EntitySchema::new(name);
    schema.fields = fields;
    if !searchable.is_empty() {
        schema.searchable_attributes = Some(searchable);
    }
    if not_indexable {
        schema = schema.not_indexable();
    }

    // Reject field sets that could never be indexed before storing them.
    let searchable = projector::searchable_fields(&schema)?;
    let replaced = store.get_schema(&schema.name)?.is_some();
    store.set_schema(&schema)?;

    println!(
        "{} type '{}' (searchable: {})",
        if replaced { "Updated" } else { "Added" },
        schema.name,
        searchable.join(", ")
    );

    let index_path =
        SearchConfig::from_env(data_dir)?.index_path(&schema.name);
    if replaced && index_path.exists() {
        eprintln!(
            "Run 'entsearch rebuild {}' to apply the new schema to its index.",
            schema.name
        );
    }
    Ok(())
}

fn type_remove(
    store: &Arc<RecordStore>,
    data_dir: &DataDir,
    name: &str,
) -> error::Result<()> {
    if store.get_schema(name)?.is_none() {
        return Err(Error::NotFound {
            kind: "type",
            name: name.to_string(),
        });
    }

    open_client(store, data_dir)?.remove_index(name)?;
    store.remove_schema(name)?;

    println!("Removed type '{name}'");
    Ok(())
}

fn type_list(store: &RecordStore, json: bool) -> error::Result<()> {
    let schemas = store.list_schemas()?;

    if json {
        println!("{}", serde_json::to_string(&schemas)?);
    } else if schemas.is_empty() {
        println!("No types registered.");
    } else {
        for schema in &schemas {
            let fields: Vec<_> = schema
                .fields
                .iter()
                .map(|f| format!("{}:{}", f.name, f.kind))
                .collect();
            let marker = if schema.indexable { "" } else { " (not indexed)" };
            println!("{}\t{}{marker}", schema.name, fields.join(" "));
        }
    }
    Ok(())
}

fn cmd_put(
    store: &Arc<RecordStore>,
    data_dir: &DataDir,
    args: &cli::PutArgs,
) -> error::Result<()> {
    let record = Record::from_json(&args.entity, &args.id, &args.fields)?;
    store.put(&record)?;

    let client = open_client(store, data_dir)?;
    client.update(&record.id, &record)?;
    client.close()?;

    println!("Stored {}:{}", record.entity, record.id);
    Ok(())
}

fn cmd_remove(
    store: &Arc<RecordStore>,
    data_dir: &DataDir,
    args: &cli::RemoveArgs,
) -> error::Result<()> {
    if !store.remove(&args.entity, &args.id)? {
        return Err(Error::NotFound {
            kind: "record",
            name: format!("{}:{}", args.entity, args.id),
        });
    }

    let client = open_client(store, data_dir)?;
    client.delete(&args.entity, &args.id)?;
    client.close()?;

    println!("Removed {}:{}", args.entity, args.id);
    Ok(())
}

fn cmd_search(
    store: &Arc<RecordStore>,
    data_dir: &DataDir,
    args: &cli::SearchArgs,
) -> error::Result<()> {
    let client = open_client(store, data_dir)?;
    let page = client.search_with_pagination(
        &args.entity,
        &args.query,
        args.count,
        args.offset,
    )?;
    let records: Vec<&Record> = page
        .entities
        .iter()
        .filter_map(|entity| entity.downcast_ref::<Record>())
        .collect();

    if args.json {
        let output = json!({
            "query": args.query,
            "entity": args.entity,
            "total": page.total,
            "offset": args.offset,
            "results": records,
        });
        println!("{output}");
    } else if records.is_empty() {
        println!("No results.");
    } else {
        for (i, record) in records.iter().enumerate() {
            let rank = args.offset + i + 1;
            println!(
                "{rank:>3}. {}\t{}",
                record.id,
                serde_json::Value::Object(record.fields.clone())
            );
        }
        eprintln!("{} of {} matches", records.len(), page.total);
    }
    Ok(())
}

fn cmd_rebuild(
    store: &Arc<RecordStore>,
    data_dir: &DataDir,
    args: &cli::RebuildArgs,
) -> error::Result<()> {
    let client = open_client(store, data_dir)?;

    let entities: Vec<String> = match &args.entity {
        Some(name) => vec![name.clone()],
        None => client
            .entity_names()
            .into_iter()
            .filter(|name| {
                client.schema(name).is_some_and(|schema| schema.indexable)
            })
            .map(str::to_string)
            .collect(),
    };

    if entities.is_empty() {
        eprintln!("No types to rebuild.");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    let failed = runtime.block_on(async {
        let mut failed = 0;
        for name in &entities {
            eprintln!("Rebuilding '{name}'...");
            let mut task = client.update_index_schema(name)?;
            match task.wait().await {
                TaskStatus::Succeeded { indexed, skipped } => {
                    eprintln!(
                        "  Indexed {indexed} records ({skipped} skipped)"
                    );
                }
                TaskStatus::Failed(message) => {
                    eprintln!("  Failed: {message}");
                    failed += 1;
                }
                status => {
                    eprintln!("  Stopped: {status:?}");
                    failed += 1;
                }
            }
        }
        error::Result::Ok(failed)
    })?;

    client.close()?;

    if failed > 0 {
        return Err(Error::Reindex(format!("{failed} rebuild(s) failed")));
    }
    eprintln!("Rebuild complete.");
    Ok(())
}

fn cmd_status(
    store: &Arc<RecordStore>,
    data_dir: &DataDir,
    json: bool,
) -> error::Result<()> {
    let client = open_client(store, data_dir)?;
    let indexes = client.list_indexes()?;

    let mut types = Vec::new();
    for name in client.entity_names() {
        let records = store.list(name)?.len();
        let index = match indexes.get(name) {
            Some(index) => Some((
                index.num_docs()?,
                index.searchable_fields().to_vec(),
            )),
            None => None,
        };
        types.push((name, records, index));
    }

    if json {
        let types: Vec<_> = types
            .iter()
            .map(|(name, records, index)| {
                json!({
                    "name": name,
                    "records": records,
                    "indexed": index.as_ref().map(|(docs, _)| docs),
                    "fields": index.as_ref().map(|(_, fields)| fields),
                })
            })
            .collect();
        let output = json!({
            "data_dir": data_dir.root().display().to_string(),
            "search_dir": client.config().search_dir().display().to_string(),
            "types": types,
        });
        println!("{output}");
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Types: {}", types.len());
        for (name, records, index) in &types {
            match index {
                Some((docs, fields)) => println!(
                    "  {name}: {records} records, {docs} indexed [{}]",
                    fields.join(", ")
                ),
                None => println!("  {name}: {records} records, no index"),
            }
        }
    }
    Ok(())
}
