use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::schema::{Alias, FieldDef, FieldKind, SearchableAttribute};

#[derive(Debug, Parser)]
#[command(
    name = "entsearch",
    about = "Full-text search over typed entity records"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage entity types
    Type {
        #[command(subcommand)]
        action: TypeAction,
    },
    /// Store a record and index it
    Put(PutArgs),
    /// Delete a record and its index entry
    Remove(RemoveArgs),
    /// Search the records of one type
    Search(SearchArgs),
    /// Recreate a type's index and reindex all of its records
    Rebuild(RebuildArgs),
    /// Show registered types and their indexes
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Type subcommands --

#[derive(Debug, Subcommand)]
pub enum TypeAction {
    /// Register or replace an entity type
    Add {
        /// Type name
        name: String,
        /// Structural field as NAME:KIND, NAME:KIND:ALIAS, or NAME:KIND:-
        /// to suppress serialization
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<FieldDef>,
        /// Declared searchable attribute as NAME:KIND (replaces inference)
        #[arg(short, long = "searchable", value_parser = parse_attribute)]
        searchable: Vec<SearchableAttribute>,
        /// Store records of this type without indexing them
        #[arg(long)]
        not_indexable: bool,
    },
    /// Remove a type, its records and its index
    Remove {
        /// Type name
        name: String,
    },
    /// List registered types
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Records --

#[derive(Debug, Parser)]
pub struct PutArgs {
    /// Entity type
    pub entity: String,
    /// Record id
    pub id: String,
    /// Field values as a JSON object
    pub fields: String,
}

#[derive(Debug, Parser)]
pub struct RemoveArgs {
    /// Entity type
    pub entity: String,
    /// Record id
    pub id: String,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Entity type to search
    pub entity: String,

    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Number of results to skip
    #[arg(long, default_value = "0")]
    pub offset: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Rebuild --

#[derive(Debug, Parser)]
pub struct RebuildArgs {
    /// Rebuild only this type (default: every indexable type)
    pub entity: Option<String>,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "entsearch",
            &mut std::io::stdout(),
        );
    }
}

fn parse_kind(kind: &str) -> Result<FieldKind, String> {
    FieldKind::parse(kind).ok_or_else(|| format!("unknown field kind {kind:?}"))
}

fn parse_field(arg: &str) -> Result<FieldDef, String> {
    let mut parts = arg.splitn(3, ':');
    let name = parts.next().unwrap_or_default();
    let kind = parts
        .next()
        .ok_or_else(|| format!("expected NAME:KIND, got {arg:?}"))?;
    if name.is_empty() {
        return Err(format!("missing field name in {arg:?}"));
    }

    let alias = match parts.next() {
        None => Alias::None,
        Some("-") => Alias::Suppressed,
        Some("") => return Err(format!("empty alias in {arg:?}")),
        Some(alias) => Alias::Rename(alias.to_string()),
    };

    Ok(FieldDef {
        name: name.to_string(),
        kind: parse_kind(kind)?,
        alias,
    })
}

fn parse_attribute(arg: &str) -> Result<SearchableAttribute, String> {
    let (name, kind) = arg
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:KIND, got {arg:?}"))?;
    Ok(SearchableAttribute {
        name: name.to_string(),
        kind: parse_kind(kind)?,
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli =
            Cli::parse_from(["entsearch", "search", "Article", "Title:rust"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.entity, "Article");
                assert_eq!(args.query, "Title:rust");
                assert_eq!(args.count, 10);
                assert_eq!(args.offset, 0);
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_type_add() {
        let cli = Cli::parse_from([
            "entsearch",
            "type",
            "add",
            "Article",
            "-f",
            "Title:string",
            "-f",
            "Body:string:content",
            "-f",
            "Draft:bool:-",
            "--searchable",
            "Title:string",
        ]);
        let Command::Type {
            action:
                TypeAction::Add {
                    name,
                    fields,
                    searchable,
                    not_indexable,
                },
        } = cli.command
        else {
            panic!("expected type add command");
        };

        assert_eq!(name, "Article");
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1].alias, Alias::Rename("content".into()));
        assert_eq!(fields[2].kind, FieldKind::Bool);
        assert_eq!(fields[2].alias, Alias::Suppressed);
        assert_eq!(searchable[0].name, "Title");
        assert!(!not_indexable);
    }

    #[test]
    fn rejects_malformed_fields() {
        assert!(parse_field("Title").is_err());
        assert!(parse_field(":string").is_err());
        assert!(parse_field("Title:blob").is_err());
        assert!(parse_field("Title:string:").is_err());
        assert!(parse_attribute("Title").is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["entsearch", "status", "-vv", "--json"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Command::Status(StatusArgs { json: true })
        ));
    }
}
