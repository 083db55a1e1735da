use anyhow::{bail, Context as _, Result};
use notebase_core::changes::ChangeSet;
use notebase_core::engine::Engine;
use notebase_core::history::NoHistory;
use notebase_core::note_config::{generate_stable_id, NoteConfig};
use notebase_core::paths::{note_folder_name, note_link};
use notebase_core::settings::EngineSettings;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use sysinfo::{Pid, System};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(cmd) = args.next() else {
        print_help();
        return Ok(());
    };

    match cmd.as_str() {
        "gen-kb" => cmd_gen_kb(args.collect()),
        "perf" => cmd_perf(args.collect()),
        "help" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        other => {
            print_help();
            bail!("unknown xtask command: {other}");
        }
    }
}

fn print_help() {
    eprintln!(
        r#"xtask (notebase)

Commands:
  gen-kb   Generate a synthetic knowledge base
  perf     Time index load, full rebuild and local updates

Examples:
  cargo run -p xtask -- gen-kb --path ./kb --notes 2000 --clean
  cargo run -p xtask -- perf --path ./kb --iterations 20
"#
    );
}

#[derive(Clone)]
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u64(&mut self) -> u64 {
        // splitmix64
        self.0 = self.0.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }

    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    fn gen_range_usize(&mut self, max_exclusive: usize) -> usize {
        if max_exclusive == 0 {
            return 0;
        }
        (self.next_u64() as usize) % max_exclusive
    }

    fn gen_bool_percent(&mut self, percent: u32) -> bool {
        (self.next_u32() % 100) < percent
    }
}

struct GenKbArgs {
    path: PathBuf,
    notes: usize,
    sections: usize,
    seed: u64,
    clean: bool,
    ref_percent: u32,
    unlisted_percent: u32,
}

fn cmd_gen_kb(args: Vec<String>) -> Result<()> {
    let args = parse_gen_kb_args(args)?;
    if args.notes == 0 || args.notes > 9999 {
        bail!("--notes must be between 1 and 9999");
    }

    if args.clean && args.path.exists() {
        fs::remove_dir_all(&args.path)
            .with_context(|| format!("remove_dir_all: {}", args.path.display()))?;
    }

    let settings = EngineSettings::default();
    let notes_root = settings.notes_root(&args.path);
    fs::create_dir_all(&notes_root)
        .with_context(|| format!("create_dir_all: {}", notes_root.display()))?;

    let mut rng = Rng::new(args.seed);
    let started = Instant::now();
    let mut sections: Vec<Vec<String>> = vec![Vec::new(); args.sections.max(1)];

    for i in 1..=args.notes {
        let id = format!("{i:04}");
        let title = gen_title(&mut rng);
        let folder = note_folder_name(&id, &title);
        let dir = notes_root.join(&folder);
        fs::create_dir_all(&dir).with_context(|| format!("create_dir_all: {}", dir.display()))?;

        let doc = gen_note_document(&mut rng, &folder, &settings);
        fs::write(dir.join(&settings.layout.note_doc_file), doc)
            .with_context(|| format!("write document for {folder}"))?;

        let mut config = NoteConfig::new(generate_stable_id(), 0);
        config.created_at = None;
        config.updated_at = None;
        config.done = rng.gen_bool_percent(40);
        if rng.gen_bool_percent(args.ref_percent) {
            config.video_refs.push(format!("https://video.example.com/{id}"));
        }
        if rng.gen_bool_percent(args.ref_percent) {
            config.article_refs.push(format!("https://blog.example.com/{id}"));
        }
        fs::write(dir.join(&settings.layout.note_meta_file), config.canonical_json()?)
            .with_context(|| format!("write metadata for {folder}"))?;

        if !rng.gen_bool_percent(args.unlisted_percent) {
            let section = rng.gen_range_usize(sections.len());
            let mark = if config.done { 'x' } else { ' ' };
            let link = note_link(
                &settings.layout.notes_dir,
                &folder,
                &settings.layout.note_doc_file,
            );
            sections[section].push(format!("- [{mark}] [{folder}]({link})"));
        }

        if i % 1_000 == 0 {
            eprintln!("gen-kb: wrote {i} notes...");
        }
    }

    let mut index = format!(
        "# Notes\n\n{}\n{}\n",
        settings.toc.start_marker, settings.toc.end_marker
    );
    for (ix, lines) in sections.iter().enumerate() {
        index.push_str(&format!("\n## Topic {ix}\n\n"));
        for line in lines {
            index.push_str(line);
            index.push('\n');
        }
    }
    fs::write(settings.index_path(&args.path), index).with_context(|| "write master index")?;

    eprintln!(
        "gen-kb: done\n  path: {}\n  notes: {}\n  sections: {}\n  time_ms: {}",
        args.path.display(),
        args.notes,
        sections.len(),
        started.elapsed().as_millis()
    );
    Ok(())
}

fn parse_gen_kb_args(args: Vec<String>) -> Result<GenKbArgs> {
    let mut path: Option<PathBuf> = None;
    let mut notes: usize = 1_000;
    let mut sections: usize = 12;
    let mut seed: u64 = 1;
    let mut clean = false;
    let mut ref_percent: u32 = 30;
    let mut unlisted_percent: u32 = 5;

    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--path" => path = Some(PathBuf::from(it.next().context("--path requires a value")?)),
            "--notes" => notes = it.next().context("--notes requires a value")?.parse()?,
            "--sections" => {
                sections = it.next().context("--sections requires a value")?.parse()?
            }
            "--seed" => seed = it.next().context("--seed requires a value")?.parse()?,
            "--clean" => clean = true,
            "--ref-percent" => {
                ref_percent = it
                    .next()
                    .context("--ref-percent requires a value")?
                    .parse()?
            }
            "--unlisted-percent" => {
                unlisted_percent = it
                    .next()
                    .context("--unlisted-percent requires a value")?
                    .parse()?
            }
            other => bail!("unknown gen-kb arg: {other}"),
        }
    }

    Ok(GenKbArgs {
        path: path.unwrap_or_else(|| PathBuf::from("kb")),
        notes,
        sections,
        seed,
        clean,
        ref_percent,
        unlisted_percent,
    })
}

fn gen_title(rng: &mut Rng) -> String {
    const WORDS: &[&str] = &[
        "Array", "Graph", "Tree", "Heap", "Stack", "Queue", "Trie", "Matrix", "String",
        "Interval", "Window", "Path", "Sum", "Search", "Merge", "Cache",
    ];
    let len = 2 + rng.gen_range_usize(3);
    (0..len)
        .map(|_| WORDS[rng.gen_range_usize(WORDS.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

fn gen_note_document(rng: &mut Rng, folder: &str, settings: &EngineSettings) -> String {
    let mut s = format!(
        "# {folder}\n\n{}\n{}\n",
        settings.toc.start_marker, settings.toc.end_marker
    );
    let sections = 1 + rng.gen_range_usize(4);
    for section in 0..sections {
        s.push_str(&format!("\n## Part {section}\n\nLorem ipsum dolor sit amet.\n"));
        for sub in 0..rng.gen_range_usize(3) {
            s.push_str(&format!("\n### Detail {sub}\n\n```rust\n// ## not a heading\n```\n"));
        }
    }
    s
}

struct PerfArgs {
    path: PathBuf,
    iterations: usize,
}

fn cmd_perf(args: Vec<String>) -> Result<()> {
    let args = parse_perf_args(args)?;
    let settings = EngineSettings::default();

    let open_start = Instant::now();
    let mut engine = Engine::open(&args.path, settings, Box::new(NoHistory))?;
    let open_ms = open_start.elapsed().as_millis();
    let notes = engine.index().note_count();
    if notes == 0 {
        bail!("no notes under {}", args.path.display());
    }

    let full_start = Instant::now();
    let full = engine.full_rebuild("perf")?;
    let full_ms = full_start.elapsed().as_millis();

    let ids = engine.index().ids_sorted();
    let mut local_samples = Vec::with_capacity(args.iterations);
    for i in 0..args.iterations {
        let id = &ids[i % ids.len()];
        let Some(record) = engine.index().get_by_id(id).cloned() else {
            continue;
        };
        let Some(mut config) = record.config.clone() else {
            continue;
        };
        config.article_refs.push(format!("https://perf.example.com/{i}"));
        fs::write(&record.metadata_path, config.canonical_json()?)
            .with_context(|| format!("write {}", record.metadata_path.display()))?;

        let started = Instant::now();
        engine.apply_changes(&ChangeSet::from_paths([record.metadata_path.clone()]))?;
        local_samples.push(started.elapsed().as_millis());
    }

    println!("perf:");
    println!("  notes: {notes}");
    println!("  open_ms: {open_ms}");
    println!("  full_rebuild_ms: {full_ms}");
    println!("  full_rebuild_written: {}", full.written.len());
    if !local_samples.is_empty() {
        println!("  local_samples: {}", local_samples.len());
        println!("  local_p50_ms: {}", percentile_ms(&local_samples, 50.0));
        println!("  local_p95_ms: {}", percentile_ms(&local_samples, 95.0));
    }
    if let Some((rss_kb, vmem_kb)) = current_process_memory_kb() {
        println!("  rss_kb: {rss_kb}");
        println!("  vmem_kb: {vmem_kb}");
    } else {
        println!("  rss_kb: N/A");
        println!("  vmem_kb: N/A");
    }
    Ok(())
}

fn parse_perf_args(args: Vec<String>) -> Result<PerfArgs> {
    let mut path: Option<PathBuf> = None;
    let mut iterations: usize = 10;

    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--path" => path = Some(PathBuf::from(it.next().context("--path requires a value")?)),
            "--iterations" => {
                iterations = it
                    .next()
                    .context("--iterations requires a value")?
                    .parse()?
            }
            other => bail!("unknown perf arg: {other}"),
        }
    }

    Ok(PerfArgs {
        path: path.unwrap_or_else(|| PathBuf::from("kb")),
        iterations,
    })
}

fn percentile_ms(samples: &[u128], percentile: f64) -> u128 {
    if samples.is_empty() {
        return 0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let rank = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn current_process_memory_kb() -> Option<(u64, u64)> {
    let mut system = System::new();
    system.refresh_processes();
    let pid = Pid::from_u32(std::process::id());
    let process = system.process(pid)?;
    Some((process.memory(), process.virtual_memory()))
}
