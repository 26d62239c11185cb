use clap::{Parser, Subcommand};
use recordbase::schema::parse_schema;
use recordbase::{Record, RuleContext, Store};
use std::path::PathBuf;
use std::process;

/// recordbase CLI — interact with a recordbase data directory
#[derive(Parser)]
#[command(name = "recordbase", version, about)]
struct Cli {
    /// Path to the data directory holding schema.yaml and records.db
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Get a single record by ID
    Get {
        /// Collection name
        collection: String,
        /// Record ID
        id: String,
    },

    /// List records in a collection
    List {
        /// Collection name
        collection: String,
        /// Filter expression (e.g. --filter "status = 'published'")
        #[arg(long, default_value = "")]
        filter: String,
    },

    /// Insert a new record
    Insert {
        /// Collection name
        collection: String,
        /// Field values (e.g. --field title="Hello")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Update an existing record
    Update {
        /// Collection name
        collection: String,
        /// Record ID
        id: String,
        /// Field values to update (e.g. --field status=published)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Delete a record (cascades per schema, or fails on blocking references)
    Delete {
        /// Collection name
        collection: String,
        /// Record ID
        id: String,
    },

    /// Show collection stats
    Status,

    /// Create a physical index over logical fields (maintenance operation)
    IndexCreate {
        /// Collection name
        collection: String,
        /// Fields to index
        #[arg(long = "field", required = true)]
        fields: Vec<String>,
        /// Enforce uniqueness
        #[arg(long)]
        unique: bool,
    },

    /// Drop a physical index
    IndexDrop {
        /// Collection name
        collection: String,
        /// Index name
        name: String,
    },

    /// Check that an index exists both physically and in the tracking table
    IndexCheck {
        /// Index name
        name: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let schema = parse_schema(&cli.data_dir.join("schema.yaml"))?;
    let mut store = Store::open(&cli.data_dir.join("records.db"), schema)?;
    let ctx = RuleContext::superuser();

    match cli.command {
        Command::Get { collection, id } => {
            let record = store.record(&collection, &id)?;
            print_record(&record);
        }

        Command::List { collection, filter } => {
            let records = store.query_records(&collection, &ctx, &filter)?;
            let items: Vec<serde_json::Value> = records
                .iter()
                .map(|r| serde_json::Value::Object(r.data.clone()))
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }

        Command::Insert { collection, fields } => {
            let record = store.create_record(&collection, fields_to_map(&fields))?;
            print_record(&record);
        }

        Command::Update {
            collection,
            id,
            fields,
        } => {
            let record = store.update_record(&collection, &id, fields_to_map(&fields))?;
            print_record(&record);
        }

        Command::Delete { collection, id } => {
            store.delete_record(&collection, &id)?;
            println!("{}", serde_json::json!({ "ok": true, "deleted": id }));
        }

        Command::Status => {
            let mut collections = serde_json::Map::new();
            let mut names: Vec<String> = store
                .schema()
                .collections()
                .map(|c| c.name.clone())
                .collect();
            names.sort();
            for name in names {
                let count = store.records(&name)?.len();
                collections.insert(name, serde_json::json!({ "count": count }));
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "collections": collections }))?
            );
        }

        Command::IndexCreate {
            collection,
            fields,
            unique,
        } => {
            let field_refs: Vec<&str> = fields.iter().map(String::as_str).collect();
            let name = store.create_column_index(&collection, &field_refs, unique)?;
            println!("{}", serde_json::json!({ "ok": true, "index": name }));
        }

        Command::IndexDrop { collection, name } => {
            store.drop_column_index(&collection, &name)?;
            println!("{}", serde_json::json!({ "ok": true, "dropped": name }));
        }

        Command::IndexCheck { name } => {
            let present = store.has_column_index(&name)?;
            println!("{}", serde_json::json!({ "index": name, "present": present }));
        }
    }

    Ok(())
}

fn print_record(record: &Record) {
    let value = serde_json::Value::Object(record.data.clone());
    println!(
        "{}",
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".into())
    );
}

/// Parse --field values as JSON where possible (numbers, booleans,
/// arrays), falling back to plain strings.
fn fields_to_map(fields: &[(String, String)]) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    for (key, val) in fields {
        let json_val =
            serde_json::from_str(val).unwrap_or(serde_json::Value::String(val.clone()));
        map.insert(key.clone(), json_val);
    }
    map
}
