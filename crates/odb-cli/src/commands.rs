use std::collections::VecDeque;
use std::io::Write;

use anyhow::{bail, Context};
use colored::Colorize;
use odb_refs::Ref;
use odb_store::parse::parse_tree_buffer;
use odb_store::{
    InfoRequest, ObjectFlags, ObjectInfoFlags, RepositoryObjectStore, StoreConfig,
};
use odb_types::{ObjectId, ObjectKind};
use serde::Serialize;
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let format = cli.format;
    match cli.command {
        Command::Init => cmd_init(config),
        Command::HashObject(args) => cmd_hash_object(config, args),
        Command::CatFile(args) => cmd_cat_file(&mut open(config)?, args),
        Command::Info(args) => cmd_info(&mut open(config)?, args, format),
        Command::CountObjects => cmd_count_objects(&mut open(config)?, format),
        Command::Packs => cmd_packs(&mut open(config)?),
        Command::Alternates(args) => cmd_alternates(&mut open(config)?, args),
        Command::Replace(args) => cmd_replace(&mut open(config)?, args),
        Command::RevList(args) => cmd_rev_list(&mut open(config)?, args),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let config = match &cli.config {
        Some(path) => StoreConfig::from_toml_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => StoreConfig::new(&cli.git_dir),
    };
    Ok(config.with_env_overrides())
}

fn open(config: StoreConfig) -> anyhow::Result<RepositoryObjectStore> {
    let git_dir = config.git_dir.clone();
    let store = RepositoryObjectStore::open(config)
        .with_context(|| format!("opening repository at {}", git_dir.display()))?;
    debug!(objects = %store.objects_dir().display(), algorithm = ?store.algorithm(), "opened repository");
    Ok(store)
}

fn parse_id(store: &RepositoryObjectStore, hex: &str) -> anyhow::Result<ObjectId> {
    ObjectId::from_hex_with(hex, store.algorithm())
        .with_context(|| format!("not a valid object name: {hex}"))
}

fn cmd_init(config: StoreConfig) -> anyhow::Result<()> {
    let store = RepositoryObjectStore::init(config)?;
    println!(
        "{} Initialized object database in {}",
        "✓".green().bold(),
        store.objects_dir().display().to_string().bold()
    );
    Ok(())
}

fn cmd_hash_object(config: StoreConfig, args: HashObjectArgs) -> anyhow::Result<()> {
    let kind: ObjectKind = args.kind.parse()?;
    let data = std::fs::read(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let id = if args.write {
        open(config)?.write_object(kind, &data)?
    } else {
        config.hash_algorithm.hash_object(kind, &data)
    };
    println!("{id}");
    Ok(())
}

fn cmd_cat_file(store: &mut RepositoryObjectStore, args: CatFileArgs) -> anyhow::Result<()> {
    let id = parse_id(store, &args.object)?;
    let mut flags = ObjectInfoFlags::empty();
    if !args.no_replace {
        flags |= ObjectInfoFlags::LOOKUP_REPLACE;
    }
    if args.allow_unknown_type {
        flags |= ObjectInfoFlags::ALLOW_UNKNOWN_TYPE;
    }
    let want = if args.kind || args.size {
        InfoRequest::HEADER
    } else {
        InfoRequest::CONTENT
    };
    let info = store.locate(&id, flags, want)?;

    if args.kind {
        println!("{}", info.kind);
        return Ok(());
    }
    if args.size {
        println!("{}", info.size);
        return Ok(());
    }
    let content = info.content.unwrap_or_default();
    match info.kind.known() {
        Some(ObjectKind::Tree) if args.pretty => {
            for entry in parse_tree_buffer(store.algorithm(), &info.id, &content)? {
                let kind = if entry.is_tree() { "tree" } else { "blob" };
                println!("{:06o} {kind} {}\t{}", entry.mode, entry.id, entry.name_lossy());
            }
        }
        _ => std::io::stdout().write_all(&content)?,
    }
    Ok(())
}

#[derive(Serialize)]
struct InfoView {
    id: String,
    requested: String,
    #[serde(rename = "type")]
    kind: String,
    size: u64,
    disk_size: Option<u64>,
    tier: String,
}

fn cmd_info(
    store: &mut RepositoryObjectStore,
    args: InfoArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let id = parse_id(store, &args.object)?;
    let mut flags = ObjectInfoFlags::ALLOW_UNKNOWN_TYPE;
    if !args.no_replace {
        flags |= ObjectInfoFlags::LOOKUP_REPLACE;
    }
    if args.quick {
        flags |= ObjectInfoFlags::QUICK;
    }
    let info = match store.locate(&id, flags, InfoRequest::HEADER.with_disk_size()) {
        Ok(info) => info,
        Err(e) if e.is_missing() => bail!("{} {}", "missing".red().bold(), id),
        Err(e) if e.is_corrupt() => bail!("{} {}: {}", "corrupt".red().bold(), id, e),
        Err(e) => return Err(e.into()),
    };
    let view = InfoView {
        id: info.id.to_hex(),
        requested: id.to_hex(),
        kind: info.kind.to_string(),
        size: info.size,
        disk_size: info.disk_size,
        tier: info.tier.to_string(),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
        OutputFormat::Text => {
            println!("{}  {}", view.id.yellow(), view.kind.bold());
            if view.requested != view.id {
                println!("  replaces: {}", view.requested.dimmed());
            }
            println!("  size: {}", view.size);
            if let Some(disk) = view.disk_size {
                println!("  disk: {disk}");
            }
            println!("  tier: {}", view.tier.cyan());
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct CountView {
    loose: usize,
    packed: u64,
    packs: usize,
    alternates: usize,
}

fn cmd_count_objects(store: &mut RepositoryObjectStore, format: OutputFormat) -> anyhow::Result<()> {
    let view = CountView {
        loose: store.loose_objects()?.len(),
        packed: store.approximate_object_count(),
        packs: store.packs().len(),
        alternates: store.alternates().len(),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
        OutputFormat::Text => {
            println!("loose: {}", view.loose.to_string().bold());
            println!("in-pack: {}", view.packed.to_string().bold());
            println!("packs: {}", view.packs);
            println!("alternates: {}", view.alternates);
        }
    }
    Ok(())
}

fn cmd_packs(store: &mut RepositoryObjectStore) -> anyhow::Result<()> {
    let packs = store.packs();
    if packs.is_empty() {
        println!("No packs.");
        return Ok(());
    }
    for (_, pack) in packs.packs_in_search_order() {
        let mut marks = Vec::new();
        if pack.is_keep() {
            marks.push("keep");
        }
        if pack.is_promisor() {
            marks.push("promisor");
        }
        println!(
            "{}  {} objects {}",
            pack.path().display().to_string().bold(),
            pack.object_count(),
            marks.join(",").dimmed()
        );
    }
    Ok(())
}

fn cmd_alternates(store: &mut RepositoryObjectStore, args: AlternatesArgs) -> anyhow::Result<()> {
    match args.action {
        Some(AlternatesAction::Add { dir }) => {
            store.add_to_alternates_file(&dir)?;
            println!("Added alternate {}", dir.display().to_string().bold());
        }
        None => {
            let alternates = store.alternates();
            if alternates.is_empty() {
                println!("No alternates.");
            }
            for alt in alternates.iter() {
                println!("{}", alt.path().display());
            }
        }
    }
    Ok(())
}

fn cmd_replace(store: &mut RepositoryObjectStore, args: ReplaceArgs) -> anyhow::Result<()> {
    let original = parse_id(store, &args.original)?;
    let replacement = parse_id(store, &args.replacement)?;
    if original == replacement {
        bail!("new object is the same as the old one: {original}");
    }
    let (original_kind, replacement_kind) = (
        store.object_header(&original)?.kind,
        store.object_header(&replacement)?.kind,
    );
    if original_kind != replacement_kind && !args.force {
        bail!("objects have different types ({original_kind} vs {replacement_kind}); use --force");
    }

    let name = format!("{}{}", store.config().replace_ref_base, original);
    if store.refs().read_ref(&name)?.is_some() && !args.force {
        bail!("replace ref {name} already exists; use --force");
    }
    store.refs().write_ref(&name, &Ref::Direct(replacement))?;
    println!("{} {} → {}", "✓".green(), original.short_hex().yellow(), replacement.short_hex().yellow());
    Ok(())
}

fn cmd_rev_list(store: &mut RepositoryObjectStore, args: RevListArgs) -> anyhow::Result<()> {
    let seen = ObjectFlags::bit(0);
    let start = parse_id(store, &args.commit)?;
    let start = store.parse_object(&start)?;
    if store.object(start).as_commit().is_none() {
        bail!("{} is not a commit", store.object(start).id());
    }

    store.object_mut(start).set_flags(seen);
    let mut queue = VecDeque::from([start]);
    let mut shown = 0;
    while let Some(handle) = queue.pop_front() {
        if args.limit.is_some_and(|limit| shown >= limit) {
            break;
        }
        let id = *store.object(handle).id();
        let handle = store.parse_object(&id)?;
        println!("{id}");
        shown += 1;

        let parents = store
            .object(handle)
            .as_commit()
            .map(|c| c.parents.clone())
            .unwrap_or_default();
        for parent in parents {
            let node = store.object_mut(parent);
            if !node.has_flags(seen) {
                node.set_flags(seen);
                queue.push_back(parent);
            }
        }
    }
    store.clear_object_flags(seen);

    if args.alloc_stats {
        eprint!("{}", store.alloc_report());
    }
    Ok(())
}
