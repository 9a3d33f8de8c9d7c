use clap::{Args, Parser, Subcommand};
use cdires::batch::{self, ItemFailure};
use cdires::disc::{DiscFileSystem, DiscOptions};
use cdires::image::DiscImage;
use cdires::resource::{MediaKind, ResourceFileSystem, ResourceTree, TreeDecodePolicy};
use cdires::sector::TimeCode;
use cdires::ByteCursor;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cdires", about = "Inspect CD-I disc captures and their resource containers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DiscArgs {
    /// Disc-image capture file
    image: PathBuf,
    /// Time code of the disc label sector
    #[arg(long, default_value = "00:02:16")]
    volume_address: TimeCode,
    /// Blocks between the declared path table address and the root directory
    #[arg(long, default_value_t = 1)]
    directory_bias: usize,
    /// System identifier the disc label must carry
    #[arg(long, default_value = "CD-RTOS")]
    system_id: String,
}

#[derive(Args)]
struct MapArgs {
    /// File holding the resource map, e.g. zelda.mapres
    #[arg(long)]
    map: String,
    /// File holding the folder sectors, e.g. zelda.rtf
    #[arg(long)]
    payload: String,
    /// Read this folder of the map as the map of --nested-payload
    #[arg(long, requires = "nested_payload")]
    nested: Option<String>,
    /// Payload file of the nested map, e.g. over.rtf
    #[arg(long, requires = "nested")]
    nested_payload: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the disc label
    Info {
        #[command(flatten)]
        disc: DiscArgs,
    },
    /// List the files in the root directory
    Files {
        #[command(flatten)]
        disc: DiscArgs,
    },
    /// List captured sectors, or the sectors of one file
    Sectors {
        #[command(flatten)]
        disc: DiscArgs,
        #[arg(short, long)]
        file: Option<String>,
        /// Print at most this many sectors
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List the OS-9 modules of the cdi_ program files
    Modules {
        #[command(flatten)]
        disc: DiscArgs,
    },
    /// Write one file's bytes to disk
    Dump {
        #[command(flatten)]
        disc: DiscArgs,
        file: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Decode a resource tree and print it as JSON
    Tree {
        #[command(flatten)]
        disc: DiscArgs,
        /// File to decode; with --payload, the resource map instead
        file: String,
        /// Decode a folder of the resource file system mapped by FILE
        #[arg(long, requires = "payload")]
        folder: Option<String>,
        #[arg(long)]
        payload: Option<String>,
        /// Decode one record of the folder rather than the whole folder
        #[arg(long, requires = "folder")]
        record: Option<usize>,
        #[arg(long, default_value = "data")]
        kind: MediaKind,
        /// Leave out corrupt subtrees instead of failing
        #[arg(long)]
        skip_corrupt: bool,
    },
    /// List the folders of a resource file system
    Folders {
        #[command(flatten)]
        disc: DiscArgs,
        #[command(flatten)]
        map: MapArgs,
        /// Assemble every record and report the ones that fail
        #[arg(long)]
        check: bool,
    },
    /// Write one folder record to disk
    Record {
        #[command(flatten)]
        disc: DiscArgs,
        #[command(flatten)]
        map: MapArgs,
        folder: String,
        index: usize,
        #[arg(long, default_value = "data")]
        kind: MediaKind,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { disc } => {
            let image = DiscImage::open(&disc.image)?;
            let store = image.sectors()?;
            let first = store.first_address().map(|a| a.to_string()).unwrap_or_else(|| "-".into());
            let fs = disc.open(&image)?;
            let v = fs.volume();

            println!("── CD-I Disc ────────────────────────────────────────────");
            println!("  Path            {}", disc.image.display());
            println!("  Sectors         {} (first {})", store.len(), first);
            println!("  Volume          {}", v.volume_name);
            println!("  Album           {} ({}/{})", v.album, v.sequence_number, v.volumes_in_album);
            println!("  Publisher       {}", v.publisher);
            println!("  Data preparer   {}", v.data_preparer);
            println!("  Application     {}", v.application);
            println!("  Block size      {} B", v.block_size);
            println!("  Volume space    {} block(s)", v.volume_space_size);
            println!("  Path table      {} B at block {}", v.path_table_size, v.path_table_address);
            println!("  Copyright file  {}", v.copyright_file);
            println!("  Abstract file   {}", v.abstract_file);
            println!("  Biblio file     {}", v.bibliographic_file);
            println!("  Files           {}", fs.len());
            print_failures("directory entries", fs.failures());
        }

        // ── Files ────────────────────────────────────────────────────────────
        Commands::Files { disc } => {
            let image = DiscImage::open(&disc.image)?;
            let fs = disc.open(&image)?;
            println!("{:<24} {:>8} {:>10}  {:<14} {:<19}  Owner", "Name", "Block", "Size", "Attributes", "Recorded");
            for file in fs.files() {
                let r = &file.record;
                println!("{:<24} {:>8} {:>10}  {:<14} {:<19}  {}.{}{}",
                    r.name, r.start_block, r.size, r.attributes.to_string(), r.recorded.to_string(),
                    r.owner_group, r.owner_user, if r.hidden { "  hidden" } else { "" });
            }
            print_failures("directory entries", fs.failures());
        }

        // ── Sectors ──────────────────────────────────────────────────────────
        Commands::Sectors { disc, file, limit } => {
            let image = DiscImage::open(&disc.image)?;
            let store = image.sectors()?;
            let limit = limit.unwrap_or(usize::MAX);
            match file {
                Some(name) => {
                    let fs = disc.open(&image)?;
                    for sector in fs.file(&name)?.sectors().iter().take(limit) {
                        println!("{sector}");
                    }
                }
                None => {
                    for sector in store.sectors().iter().take(limit) {
                        println!("{sector}");
                    }
                }
            }
        }

        // ── Modules ──────────────────────────────────────────────────────────
        Commands::Modules { disc } => {
            let image = DiscImage::open(&disc.image)?;
            let fs = disc.open(&image)?;
            let table = fs.modules();
            println!("{:<32} {:<16} {:>10} {:>8}", "Module", "File", "Offset", "Size");
            for (key, module) in &table.modules {
                println!("{:<32} {:<16} {:>10} {:>8}",
                    key, module.parent_file, module.range.start, module.range.len());
            }
            for (file, range) in &table.unused {
                println!("  {} unused byte(s) at the end of {}", range.len(), file);
            }
            for (old, new) in &table.renamed {
                println!("  renamed {old} → {new}");
            }
            print_failures("module files", &table.failures);
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { disc, file, output } => {
            let image = DiscImage::open(&disc.image)?;
            let fs = disc.open(&image)?;
            let bytes = fs.file(&file)?.bytes();
            std::fs::write(&output, bytes)?;
            println!("Wrote {} byte(s) → {}", bytes.len(), output.display());
        }

        // ── Tree ─────────────────────────────────────────────────────────────
        Commands::Tree { disc, file, folder, payload, record, kind, skip_corrupt } => {
            let image = DiscImage::open(&disc.image)?;
            let fs = disc.open(&image)?;
            let bytes: Vec<u8> = match (folder, payload) {
                (Some(folder), Some(payload)) => {
                    let rfs = ResourceFileSystem::open(&fs, &file, &payload)?;
                    let folder = rfs.lookup(&folder)?;
                    match record {
                        Some(index) => folder.record(index, kind)?.to_vec(),
                        None        => folder.all_bytes(),
                    }
                }
                _ => fs.file(&file)?.bytes().to_vec(),
            };
            let policy = if skip_corrupt { TreeDecodePolicy::SkipCorrupt } else { TreeDecodePolicy::Strict };
            let decoded = ResourceTree::decode_with(ByteCursor::big_endian(&bytes), policy)?;
            println!("{}", serde_json::to_string_pretty(&decoded.tree.simplify())?);
            for skipped in &decoded.skipped {
                eprintln!("  skipped {}: {}", skipped.path, skipped.error);
            }
        }

        // ── Folders ──────────────────────────────────────────────────────────
        Commands::Folders { disc, map, check } => {
            let image = DiscImage::open(&disc.image)?;
            let fs = disc.open(&image)?;
            let rfs = map.open(&fs)?;
            print!("{}", rfs.summary());
            if check {
                let report = batch::decode_folders(&rfs, |folder| {
                    let mut bytes = 0;
                    for kind in MediaKind::ALL {
                        for index in 0..folder.record_count(kind) {
                            bytes += folder.record(index, kind)?.len();
                        }
                    }
                    Ok(bytes)
                });
                let total: usize = report.decoded.iter().map(|(_, b)| b).sum();
                println!("{} ({} record byte(s))", report.summary(), total);
                print_failures("folders", &report.failures);
            }
        }

        // ── Record ───────────────────────────────────────────────────────────
        Commands::Record { disc, map, folder, index, kind, output } => {
            let image = DiscImage::open(&disc.image)?;
            let fs = disc.open(&image)?;
            let rfs = map.open(&fs)?;
            let data = rfs.lookup(&folder)?.record(index, kind)?;
            std::fs::write(&output, &data[..])?;
            println!("Wrote {} {} record {} of {} ({} byte(s)) → {}",
                kind, folder, index, map.payload, data.len(), output.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

impl DiscArgs {
    fn options(&self) -> DiscOptions {
        DiscOptions {
            volume_address:    self.volume_address,
            directory_bias:    self.directory_bias,
            system_identifier: self.system_id.clone(),
        }
    }

    fn open<'a>(&self, image: &'a DiscImage) -> Result<DiscFileSystem<'a>, Box<dyn std::error::Error>> {
        Ok(DiscFileSystem::open(image.sectors()?, &self.options())?)
    }
}

impl MapArgs {
    fn open<'a>(&self, fs: &DiscFileSystem<'a>) -> Result<ResourceFileSystem<'a>, Box<dyn std::error::Error>> {
        let rfs = ResourceFileSystem::open(fs, &self.map, &self.payload)?;
        Ok(match (&self.nested, &self.nested_payload) {
            (Some(folder), Some(payload)) => ResourceFileSystem::nested(&rfs, folder, fs, payload)?,
            _ => rfs,
        })
    }
}

fn print_failures(what: &str, failures: &[ItemFailure]) {
    if failures.is_empty() {
        return;
    }
    eprintln!("{} of {} failed:", failures.len(), what);
    for failure in failures {
        eprintln!("  {failure}");
    }
}
