use std::collections::HashSet;
use std::io::Write;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use kira_taxonomy::config::ConfigLoader;
use kira_taxonomy::domain::{Rank, Taxon, TaxonId};
use kira_taxonomy::error::KiraError;
use kira_taxonomy::gbif::GbifHttpClient;
use kira_taxonomy::resolve::Resolver;
use kira_taxonomy::store::TaxonomyFile;
use kira_taxonomy::taxonomy::{PruneMode, Taxonomy};

#[derive(Parser)]
#[command(name = "kira-tax")]
#[command(about = "GBIF-backed taxonomy tables")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Add taxa by GBIF ID or name, with their parents up to a rank")]
    Add(AddArgs),
    #[command(about = "Add GBIF children and synonyms of the taxa in a taxonomy")]
    Fill(FillArgs),
    #[command(about = "Attach GBIF IDs whose synonym chain reaches a known taxon")]
    Match(MatchArgs),
    #[command(about = "Keep (or delete with --del) taxa by name")]
    Filter(FilterArgs),
    #[command(about = "Show the taxa with a given name")]
    Show(ShowArgs),
}

#[derive(Args)]
struct AddArgs {
    /// GBIF IDs or taxon names
    #[arg(required = true)]
    taxa: Vec<String>,

    #[arg(long)]
    file: String,

    #[arg(long, value_enum, default_value_t = Rank::Genus)]
    rank: Rank,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct FillArgs {
    #[arg(long)]
    file: String,

    #[arg(long, value_enum, default_value_t = Rank::Species)]
    rank: Rank,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct MatchArgs {
    #[arg(required = true)]
    ids: Vec<TaxonId>,

    #[arg(long)]
    file: String,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct FilterArgs {
    #[arg(required = true)]
    names: Vec<String>,

    #[arg(long)]
    file: String,

    #[arg(long)]
    del: bool,
}

#[derive(Args)]
struct ShowArgs {
    name: String,

    #[arg(long)]
    file: String,
}

#[derive(Serialize)]
struct ShowEntry<'a> {
    taxon: &'a Taxon,
    rank: Rank,
    accepted: Option<&'a Taxon>,
    parents: Vec<TaxonId>,
    children: Vec<TaxonId>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::MalformedHeader { .. }
        | KiraError::MalformedRow { .. }
        | KiraError::AmbiguousName { .. }
        | KiraError::InvalidRank(_)
        | KiraError::InvalidQuery(_) => 2,
        KiraError::TransportExhausted { .. }
        | KiraError::NoAnswer { .. }
        | KiraError::GbifHttp(_)
        | KiraError::GbifStatus { .. }
        | KiraError::GbifDecode(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Add(args) => run_add(args),
        Commands::Fill(args) => run_fill(args),
        Commands::Match(args) => run_match(args),
        Commands::Filter(args) => run_filter(args),
        Commands::Show(args) => run_show(args),
    }
}

fn resolver(config: Option<&str>) -> Result<Resolver<GbifHttpClient>, KiraError> {
    let config = ConfigLoader::resolve(config)?;
    Ok(Resolver::new(GbifHttpClient::new(&config)?))
}

fn run_add(args: AddArgs) -> miette::Result<()> {
    let file = TaxonomyFile::new(args.file.as_str());
    let mut tax = file.load_or_default()?;

    // A taxonomy that stops at a more inclusive rank keeps that ceiling.
    let min_rank = tax.min_rank();
    let rank = if min_rank.is_ranked() && min_rank < args.rank {
        min_rank
    } else {
        args.rank
    };

    let resolver = resolver(args.config.as_deref())?;
    for value in &args.taxa {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let result = match value.parse::<TaxonId>() {
            Ok(id) => resolver.add_from_gbif(&mut tax, id, rank),
            Err(_) => resolver.add_name_from_gbif(&mut tax, value, rank),
        };
        match result {
            Ok(()) => {}
            Err(KiraError::AmbiguousName { name, ids }) => {
                eprintln!("# ambiguous taxon name {name:?}");
                for id in ids {
                    eprintln!("# \t{id}");
                }
            }
            Err(err) => return Err(err.into()),
        }
    }

    file.save(&tax)?;
    Ok(())
}

fn run_fill(args: FillArgs) -> miette::Result<()> {
    let file = TaxonomyFile::new(args.file.as_str());
    let mut tax = file.load()?;
    let resolver = resolver(args.config.as_deref())?;
    let inserted = resolver.fill(&mut tax, args.rank)?;
    file.save(&tax)?;
    eprintln!("added {inserted} taxa");
    Ok(())
}

fn run_match(args: MatchArgs) -> miette::Result<()> {
    let file = TaxonomyFile::new(args.file.as_str());
    let mut tax = file.load()?;
    let resolver = resolver(args.config.as_deref())?;
    let mut unmatched = HashSet::new();
    for id in args.ids {
        if !resolver.match_id(&mut tax, id, &mut unmatched)? {
            eprintln!("# unmatched {id}");
        }
    }
    file.save(&tax)?;
    Ok(())
}

fn run_filter(args: FilterArgs) -> miette::Result<()> {
    let file = TaxonomyFile::new(args.file.as_str());
    let mut tax = file.load()?;
    let mode = if args.del {
        PruneMode::Delete
    } else {
        PruneMode::Keep
    };
    let removed = tax.prune(&args.names, mode);
    file.save(&tax)?;
    eprintln!("removed {removed} taxa");
    Ok(())
}

fn run_show(args: ShowArgs) -> miette::Result<()> {
    let tax = TaxonomyFile::new(args.file.as_str()).load()?;
    let entries = show_entries(&tax, &args.name);
    let json = serde_json::to_string_pretty(&entries).into_diagnostic()?;
    let mut stdout = std::io::stdout();
    stdout.write_all(json.as_bytes()).into_diagnostic()?;
    stdout.write_all(b"\n").into_diagnostic()?;
    Ok(())
}

fn show_entries<'a>(tax: &'a Taxonomy, name: &str) -> Vec<ShowEntry<'a>> {
    tax.by_name(name)
        .into_iter()
        .filter_map(|id| {
            let taxon = tax.taxon(id)?;
            Some(ShowEntry {
                taxon,
                rank: tax.rank(id),
                accepted: tax.accepted_and_ranked(id),
                parents: tax.parents(id),
                children: tax.children(id),
            })
        })
        .collect()
}
