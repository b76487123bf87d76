#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::env;
use std::io::Write;
use std::path::Path;
use t2fs::{
    ByteSectorDevice, DirEntry, FileByteDevice, FormatOptions, Geometry, SECTOR_SIZE, Superblock,
    T2fs, T2fsError, format,
};

type ImageFs = T2fs<ByteSectorDevice<FileByteDevice>>;

#[derive(Debug, Serialize)]
struct InspectOutput {
    identify: &'static str,
    id: String,
    writable: bool,
    superblock: Superblock,
    geometry: Geometry,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        print_usage();
        return Ok(());
    };
    let json = args.iter().any(|arg| arg == "--json");
    let positional: Vec<&str> = positional_args(&args[1..]);

    match command.as_str() {
        "mkfs" => {
            let [image, sectors, ..] = positional.as_slice() else {
                bail!("mkfs requires <image-path> <sector-count>");
            };
            let sectors: u32 = sectors
                .parse()
                .with_context(|| format!("invalid sector count: {sectors}"))?;
            let options = FormatOptions {
                sector_count: Some(sectors),
                sectors_per_cluster: flag_value(&args, "--sectors-per-cluster")?
                    .unwrap_or(FormatOptions::default().sectors_per_cluster),
                fat_sectors: flag_value(&args, "--fat-sectors")?,
            };
            mkfs(Path::new(image), &options, json)
        }
        "inspect" => {
            let [image, ..] = positional.as_slice() else {
                bail!("inspect requires an image path");
            };
            inspect(Path::new(image), json)
        }
        "ls" => {
            let [image, rest @ ..] = positional.as_slice() else {
                bail!("ls requires an image path");
            };
            ls(Path::new(image), rest.first().copied().unwrap_or("/"), json)
        }
        "cat" => {
            let [image, path, ..] = positional.as_slice() else {
                bail!("cat requires <image-path> <file-path>");
            };
            cat(Path::new(image), path)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("t2fs\n");
    println!("USAGE:");
    println!(
        "  t2fs mkfs <image-path> <sector-count> [--sectors-per-cluster N] [--fat-sectors N] [--json]"
    );
    println!("  t2fs inspect <image-path> [--json]");
    println!("  t2fs ls <image-path> [dir-path] [--json]");
    println!("  t2fs cat <image-path> <file-path>");
}

/// Arguments that are neither flags nor flag values.
fn positional_args(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args {
        match arg.as_str() {
            _ if skip_next => skip_next = false,
            "--json" => {}
            flag if flag.starts_with("--") => skip_next = true,
            value => out.push(value),
        }
    }
    out
}

fn flag_value(args: &[String], name: &str) -> Result<Option<u32>> {
    let Some(pos) = args.iter().position(|arg| arg == name) else {
        return Ok(None);
    };
    let Some(raw) = args.get(pos + 1) else {
        bail!("{name} requires a value");
    };
    let value = raw
        .parse()
        .with_context(|| format!("invalid value for {name}: {raw}"))?;
    Ok(Some(value))
}

fn open_image(path: &Path) -> Result<ImageFs> {
    let file = FileByteDevice::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?;
    let dev = ByteSectorDevice::new(file)?;
    T2fs::mount(dev).with_context(|| format!("failed to mount {}", path.display()))
}

fn mkfs(path: &Path, options: &FormatOptions, json: bool) -> Result<()> {
    let sectors = options.sector_count.unwrap_or(0);
    let file = FileByteDevice::create(path, u64::from(sectors) * SECTOR_SIZE as u64)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let dev = ByteSectorDevice::new(file)?;
    let sb = format(&dev, options).context("format failed")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&sb).context("serialize output")?
        );
    } else {
        println!("formatted {}", path.display());
        println!("sectors: {}", sb.sector_count);
        println!("sectors_per_cluster: {}", sb.sectors_per_cluster);
        println!("fat_sectors: {}", sb.fat_sector_count());
        println!("clusters: {}", sb.cluster_count());
    }
    Ok(())
}

fn inspect(path: &Path, json: bool) -> Result<()> {
    let fs = open_image(path)?;
    let sb = fs.superblock().clone();
    let output = InspectOutput {
        identify: t2fs::identify(),
        id: sb.id_str(),
        writable: fs.device().inner().is_writable(),
        geometry: fs.geometry(),
        superblock: sb,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
    } else {
        let g = &output.geometry;
        println!("T2FS Inspector");
        println!("id: {} version: {:#06x}", output.id, output.superblock.version);
        println!("sectors: {}", output.superblock.sector_count);
        if !output.writable {
            println!("image is read-only");
        }
        println!("cluster_size: {} ({} sectors)", g.cluster_size, g.sectors_per_cluster);
        println!("fat: sectors {}..{}", g.fat_sector_start, g.data_sector_start);
        println!("clusters: {} ({} free)", g.cluster_count, g.free_clusters);
        println!("records_per_cluster: {}", g.records_per_cluster);
        println!("root_cluster: {}", g.root_cluster);
    }
    Ok(())
}

fn ls(path: &Path, dir: &str, json: bool) -> Result<()> {
    let mut fs = open_image(path)?;
    let handle = fs
        .opendir(dir)
        .with_context(|| format!("cannot open directory {dir}"))?;
    let mut entries: Vec<DirEntry> = Vec::new();
    loop {
        match fs.readdir(handle) {
            Ok(entry) => entries.push(entry),
            Err(T2fsError::EndOfDirectory) => break,
            Err(err) => return Err(err).context("readdir failed"),
        }
    }
    fs.closedir(handle)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("serialize output")?
        );
    } else {
        for entry in &entries {
            println!(
                "{:<10} {:>10} {:>4}  {}",
                format!("{:?}", entry.kind).to_lowercase(),
                entry.size,
                entry.clusters,
                entry.name
            );
        }
    }
    Ok(())
}

fn cat(path: &Path, file: &str) -> Result<()> {
    let mut fs = open_image(path)?;
    let handle = fs
        .open(file)
        .with_context(|| format!("cannot open {file}"))?;
    let mut stdout = std::io::stdout().lock();
    let mut buf = vec![0_u8; 4096];
    loop {
        let n = fs.read(handle, &mut buf)?;
        if n == 0 {
            break;
        }
        stdout.write_all(&buf[..n]).context("write to stdout")?;
    }
    fs.close(handle)?;
    Ok(())
}
