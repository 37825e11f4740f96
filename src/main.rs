use clap::Parser;
use tracing_subscriber::EnvFilter;

pub mod cache;
pub mod cli;
pub mod config;
pub mod content;
pub mod data_dir;
pub mod doc_id;
pub mod entry;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod lock;
pub mod query;
pub mod reconcile;
pub mod search;
pub mod store;
pub mod walker;

use cache::SearchCache;
use cli::{CacheAction, Cli, Command};
use config::Config;
use data_dir::DataDir;
use entry::IndexEntry;
use extract::MarkdownExtractor;
use fetch::HttpFetcher;
use reconcile::Reconciler;
use search::{SearchEngine, SearchHit, SearchParams};
use store::IndexStore;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCDEX_LOG") {
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
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config = Config::from_data_dir(&data_dir)?;
    let store = IndexStore::new(
        &config.index_path,
        &config.lock_path,
        config.lock_timeout,
    );
    let cache = SearchCache::new(&config.cache_dir);

    match cli.command {
        Command::Search(args) => {
            let engine = SearchEngine::new(&store, &cache, &config);
            let hits = engine.search_by_keyword(&SearchParams {
                terms: args.terms,
                tags: args.tag,
                limit: args.limit,
                min_score: args.min_score,
                with_scores: args.scores,
            })?;
            print_hits(&hits, args.json)?;
        }
        Command::Query(args) => {
            let engine = SearchEngine::new(&store, &cache, &config);
            let hits = if args.tag.is_empty() && !args.scores {
                engine
                    .search_by_natural_language(&args.question, args.limit)?
            } else {
                let terms = query::tokenize(
                    &args.question,
                    config.min_token_len,
                );
                engine.search_by_keyword(&SearchParams {
                    terms,
                    tags: args.tag,
                    limit: args.limit,
                    min_score: args.min_score,
                    with_scores: args.scores,
                })?
            };
            print_hits(&hits, args.json)?;
        }
        Command::Get(args) => {
            cmd_get(&store, &config, &args)?;
        }
        Command::Reconcile(args) => {
            cmd_reconcile(&store, &config, &args)?;
        }
        Command::Cache { action } => {
            cmd_cache(&store, &cache, action)?;
        }
        Command::List(args) => {
            cmd_list(&store, &args)?;
        }
        Command::Prune(args) => {
            cmd_prune(&store, &cache, &args)?;
        }
        Command::Completions(args) => {
            args.generate();
        }
    }

    Ok(())
}

fn print_hits(hits: &[SearchHit], json: bool) -> error::Result<()> {
    if json {
        println!("{}", serde_json::to_string(hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for hit in hits {
        let mut line = format!("{}\t{}", hit.doc_id, hit.title);
        if let Some(section) = &hit.section {
            line.push_str(&format!("\t#{}", section.anchor));
        }
        if let Some(score) = hit.score {
            line.push_str(&format!("\t(score: {score:.1})"));
        }
        if hit.stale {
            line.push_str("\t[stale]");
        }
        println!("{line}");
    }
    Ok(())
}

fn cmd_get(
    store: &IndexStore,
    config: &Config,
    args: &cli::GetArgs,
) -> error::Result<()> {
    let doc = content::get_content(
        store,
        config,
        &args.doc_id,
        args.section.as_deref(),
    )?;

    if args.json {
        println!("{}", serde_json::to_string(&doc)?);
        return Ok(());
    }

    if let Some(matched) = &doc.matched_section
        && doc.fuzzy_matched
    {
        eprintln!("(matched section: {matched})");
    }
    print!("{}", doc.content);
    if !doc.suggestions.is_empty() {
        eprintln!("\nRelated sections:");
        for heading in &doc.suggestions {
            eprintln!("  {heading}");
        }
    }
    Ok(())
}

fn cmd_reconcile(
    store: &IndexStore,
    config: &Config,
    args: &cli::ReconcileArgs,
) -> error::Result<()> {
    let extractor = MarkdownExtractor;
    let reconciler = Reconciler::new(store, config, &extractor);

    let mut summary = reconciler.run_local()?;
    if args.remote {
        let fetcher = HttpFetcher::new(config.probe_timeout);
        let remote = reconciler.run_remote(&fetcher)?;
        summary.remote_stale = remote.remote_stale;
        summary.probe_failures = remote.probe_failures;
        summary.updated += remote.updated;
    }

    if args.json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        println!(
            "new: {}, updated: {}, renamed: {}, unchanged: {}, missing: {}",
            summary.new,
            summary.updated,
            summary.renamed,
            summary.unchanged,
            summary.missing,
        );
        if args.remote {
            println!(
                "remote stale: {}, probe failures: {}",
                summary.remote_stale, summary.probe_failures,
            );
        }
    }
    Ok(())
}

fn cmd_cache(
    store: &IndexStore,
    cache: &SearchCache,
    action: CacheAction,
) -> error::Result<()> {
    match action {
        CacheAction::Status { json } => {
            let status = cache.status(store)?;
            if json {
                println!("{}", serde_json::to_string(&status)?);
            } else {
                println!(
                    "valid: {}",
                    if status.valid { "yes" } else { "no" }
                );
                if let Some(version) = status.format_version {
                    println!("format version: {version}");
                }
                if let Some(age) = status.age_secs {
                    println!("age: {age}s");
                }
            }
        }
        CacheAction::Rebuild => {
            cache.rebuild(store)?;
            println!("Cache rebuilt.");
        }
        CacheAction::Clear => {
            cache.clear()?;
            println!("Cache cleared.");
        }
    }
    Ok(())
}

fn cmd_list(
    store: &IndexStore,
    args: &cli::ListArgs,
) -> error::Result<()> {
    let matcher = match &args.pattern {
        Some(pattern) => Some(
            globset::Glob::new(pattern)
                .map_err(|e| {
                    error::Error::Config(format!(
                        "invalid glob pattern: {e}"
                    ))
                })?
                .compile_matcher(),
        ),
        None => None,
    };

    let entries = store.load_all()?;
    let selected: Vec<(&String, &IndexEntry)> = entries
        .iter()
        .filter(|(id, entry)| {
            if args.stale && !entry.stale {
                return false;
            }
            match &matcher {
                Some(glob) => {
                    glob.is_match(id.as_str()) || glob.is_match(&entry.path)
                }
                None => true,
            }
        })
        .collect();

    if args.json {
        let rows: Vec<serde_json::Value> = selected
            .iter()
            .map(|(id, entry)| {
                serde_json::json!({
                    "doc_id": id,
                    "path": entry.path,
                    "title": entry.title,
                    "stale": entry.stale,
                })
            })
            .collect();
        println!("{}", serde_json::to_string(&rows)?);
    } else if selected.is_empty() {
        println!("No documents.");
    } else {
        for (id, entry) in &selected {
            if entry.stale {
                println!("{id}\t{}\t[stale]", entry.path);
            } else {
                println!("{id}\t{}", entry.path);
            }
        }
    }
    Ok(())
}

fn cmd_prune(
    store: &IndexStore,
    cache: &SearchCache,
    args: &cli::PruneArgs,
) -> error::Result<()> {
    if !args.stale && args.older_than.is_none() {
        return Err(error::Error::Config(
            "nothing to prune: pass --stale and/or --older-than".into(),
        ));
    }

    let cutoff = args.older_than.map(|days| {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now.saturating_sub(days * 24 * 60 * 60)
    });

    let matches = move |entry: &IndexEntry| -> bool {
        if args.stale && entry.stale {
            return true;
        }
        if let Some(cutoff) = cutoff
            && let Some(indexed_at) = entry.indexed_at
            && indexed_at < cutoff
        {
            return true;
        }
        false
    };

    if args.dry_run {
        let entries = store.load_all()?;
        let doomed: Vec<&String> = entries
            .iter()
            .filter(|(_, entry)| matches(entry))
            .map(|(id, _)| id)
            .collect();
        if doomed.is_empty() {
            println!("Nothing to prune.");
        } else {
            for id in doomed {
                println!("{id}");
            }
        }
        return Ok(());
    }

    let removed = store.remove_where(|_, entry| matches(entry))?;
    if removed > 0 {
        // The index changed under the cache; drop it rather than serve
        // postings for deleted entries.
        cache.clear()?;
    }
    println!("Pruned {removed} entries.");
    Ok(())
}
