use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docdex",
    about = "A keyword search index for documentation trees"
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
    /// Search the index with explicit keywords
    Search(SearchArgs),
    /// Search the index with a natural-language question
    Query(QueryArgs),
    /// Retrieve a document's content by doc id
    Get(GetArgs),
    /// Reconcile the index against the docs tree (and remote sources)
    Reconcile(ReconcileArgs),
    /// Manage the derived search cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// List indexed documents
    List(ListArgs),
    /// Permanently remove stale or old entries
    Prune(PruneArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Search terms (each matched independently)
    #[arg(required = true)]
    pub terms: Vec<String>,

    /// Only match documents carrying all of these tags
    #[arg(short, long)]
    pub tag: Vec<String>,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,

    /// Minimum score threshold
    #[arg(long, default_value = "0.0")]
    pub min_score: f32,

    /// Include numeric scores in the output
    #[arg(long)]
    pub scores: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Query --

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The question, tokenized into search terms
    pub question: String,

    /// Only match documents carrying all of these tags
    #[arg(short, long)]
    pub tag: Vec<String>,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,

    /// Minimum score threshold
    #[arg(long, default_value = "0.0")]
    pub min_score: f32,

    /// Include numeric scores in the output
    #[arg(long)]
    pub scores: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Get --

#[derive(Debug, Parser)]
pub struct GetArgs {
    /// Document id (aliases are resolved)
    pub doc_id: String,

    /// Return only this section (fuzzy-matched against headings)
    #[arg(short, long)]
    pub section: Option<String>,

    /// Output as JSON with metadata
    #[arg(long)]
    pub json: bool,
}

// -- Reconcile --

#[derive(Debug, Parser)]
pub struct ReconcileArgs {
    /// Also probe each entry's remote source URL
    #[arg(long)]
    pub remote: bool,

    /// Output the summary as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Cache --

#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show cache validity, format version, and age
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the cache from the index unconditionally
    Rebuild,
    /// Delete the cache files
    Clear,
}

// -- List --

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Glob pattern applied to doc ids and paths
    pub pattern: Option<String>,

    /// Only list entries flagged stale
    #[arg(long)]
    pub stale: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Prune --

#[derive(Debug, Parser)]
pub struct PruneArgs {
    /// Remove entries flagged stale
    #[arg(long)]
    pub stale: bool,

    /// Remove entries last indexed more than this many days ago
    #[arg(long, value_name = "DAYS")]
    pub older_than: Option<u64>,

    /// Print what would be removed without removing it
    #[arg(long)]
    pub dry_run: bool,
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
            "docdex",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["docdex", "search", "hooks"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.terms, vec!["hooks"]);
                assert_eq!(args.limit, 10);
                assert_eq!(args.min_score, 0.0);
                assert!(args.tag.is_empty());
                assert!(!args.scores);
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_search_with_tags_and_limit() {
        let cli = Cli::parse_from([
            "docdex", "search", "hooks", "matchers", "-t", "en", "-t",
            "agents", "-n", "3",
        ]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.terms, vec!["hooks", "matchers"]);
                assert_eq!(args.tag, vec!["en", "agents"]);
                assert_eq!(args.limit, 3);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_get_with_section() {
        let cli = Cli::parse_from([
            "docdex", "get", "en-hooks", "--section", "PreToolUse",
        ]);
        match cli.command {
            Command::Get(args) => {
                assert_eq!(args.doc_id, "en-hooks");
                assert_eq!(args.section.as_deref(), Some("PreToolUse"));
            }
            _ => panic!("expected get command"),
        }
    }

    #[test]
    fn parse_reconcile_remote() {
        let cli = Cli::parse_from(["docdex", "reconcile", "--remote"]);
        match cli.command {
            Command::Reconcile(args) => assert!(args.remote),
            _ => panic!("expected reconcile command"),
        }
    }

    #[test]
    fn parse_prune_older_than() {
        let cli = Cli::parse_from([
            "docdex", "prune", "--older-than", "30", "--dry-run",
        ]);
        match cli.command {
            Command::Prune(args) => {
                assert_eq!(args.older_than, Some(30));
                assert!(args.dry_run);
                assert!(!args.stale);
            }
            _ => panic!("expected prune command"),
        }
    }

    #[test]
    fn search_requires_terms() {
        assert!(Cli::try_parse_from(["docdex", "search"]).is_err());
    }
}
