use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use clap_num::maybe_hex;
use log::{debug, error};
use ntfs_carve::device::SeekDevice;
use ntfs_carve::mft::{AttributeType, RecordRef};
use ntfs_carve::pbs::{BOOT_SECTOR_SIZE, PartitionBootSector};
use ntfs_carve::stream::ReadStream;
use ntfs_carve::{Ntfs, VolumeOptions};
use prettytable::{Table, row};
use serde_json::{Value, json};
use std::error::Error;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

fn main() {
    let matches = Command::new("ntfs_carve")
        .version("0.1.0")
        .author("ForensicXlab")
        .about("Decode the metadata of an NTFS volume: records, streams, directory indexes.")
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .value_parser(value_parser!(String))
                .required(true)
                .help("The path to the raw image to read."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .default_value("0")
                .help("The NTFS partition starts at this byte address (decimal or hex)."),
        )
        .arg(
            Arg::new("pbs")
                .long("pbs")
                .action(ArgAction::SetTrue)
                .help("Display the partition boot sector information."),
        )
        .arg(
            Arg::new("file_id")
                .long("file")
                .value_parser(maybe_hex::<u64>)
                .help("Display the metadata about a specific MFT record."),
        )
        .arg(
            Arg::new("dir_entry")
                .short('d')
                .long("dir_entry")
                .requires("file_id")
                .action(ArgAction::SetTrue)
                .help("If --file is a directory, list its index entries."),
        )
        .arg(
            Arg::new("name")
                .short('n')
                .long("name")
                .requires("dir_entry")
                .value_parser(value_parser!(String))
                .help("Only list directory entries with this name (case-insensitive)."),
        )
        .arg(
            Arg::new("dump")
                .long("dump")
                .action(ArgAction::SetTrue)
                .requires("file_id")
                .help("Dump the unnamed $DATA content to file_<ID>.bin (requires --file)."),
        )
        .arg(
            Arg::new("slack")
                .long("slack")
                .action(ArgAction::SetTrue)
                .requires("dump")
                .help("With --dump, write the slack of the attribute instead of its content."),
        )
        .arg(
            Arg::new("path")
                .long("path")
                .action(ArgAction::SetTrue)
                .requires("file_id")
                .help("Print the full path of the record given with --file."),
        )
        .arg(
            Arg::new("mft")
                .long("mft")
                .action(ArgAction::SetTrue)
                .help("Display the volume and master file table usage."),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output structures (pbs, file, mft, entries) in JSON format."),
        )
        .arg(
            Arg::new("log_level")
                .short('l')
                .long("log-level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .help("Set the log verbosity level"),
        )
        .get_matches();

    let level_filter = match matches.get_one::<String>("log_level").map(String::as_str) {
        Some("error") => log::LevelFilter::Error,
        Some("warn") => log::LevelFilter::Warn,
        Some("debug") => log::LevelFilter::Debug,
        Some("trace") => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new().filter_level(level_filter).init();

    if let Err(e) = run(&matches) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn print_json(value: &Value) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let path = matches
        .get_one::<String>("body")
        .ok_or("missing --body")?;
    let offset = matches.get_one::<u64>("offset").copied().unwrap_or(0);
    let json_output = matches.get_flag("json");

    // The boot sector gives the sector size the device must expose.
    let mut file = File::open(path)?;
    let mut raw = vec![0u8; BOOT_SECTOR_SIZE];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut raw)?;
    let sector_size = PartitionBootSector::from_bytes(&raw)?.bytes_per_sector;
    debug!("Opened '{}', partition at 0x{:X}, {} byte sectors.", path, offset, sector_size);

    let device = SeekDevice::with_window(file, u32::from(sector_size), offset, None)?;
    let ntfs = Ntfs::mount(Arc::new(device), VolumeOptions::default())?;

    if matches.get_flag("pbs") {
        if json_output {
            print_json(&ntfs.pbs.to_json())?;
        } else {
            println!("{}", ntfs.pbs.to_string());
        }
    }

    if matches.get_flag("mft") {
        show_usage(&ntfs, json_output)?;
    }

    let Some(record_id) = matches.get_one::<u64>("file_id").copied() else {
        return Ok(());
    };
    let reference = RecordRef::any(record_id);

    if matches.get_flag("dir_entry") {
        let name = matches.get_one::<String>("name").map_or("", String::as_str);
        let entries = ntfs.list_directory(reference, name)?;
        if json_output {
            let arr: Vec<Value> = entries.iter().map(|e| e.to_json()).collect();
            print_json(&json!({ "dir_entries": arr }))?;
        } else {
            for entry in entries {
                println!("{}  {}", entry.file_ref.number(), entry.name().unwrap_or(""));
            }
        }
    } else if matches.get_flag("dump") {
        let slack = matches.get_flag("slack");
        let record = ntfs.open_record(reference)?;
        let index = record
            .find_attribute(Some(AttributeType::Data), Some(""), None, None)
            .ok_or_else(|| format!("record {record_id} has no unnamed $DATA"))?;
        let data = record.open_attribute(index, slack)?.read_all()?;
        let suffix = if slack { "_slack" } else { "" };
        let out_name = format!("file_{:X}{}.bin", record_id, suffix);
        std::fs::write(&out_name, &data)?;
        println!("Dumped {} bytes to {}", data.len(), out_name);
    } else if matches.get_flag("path") {
        let full = ntfs.record_path(reference)?;
        if json_output {
            print_json(&json!({ "record": record_id, "path": full }))?;
        } else {
            println!("{}", full);
        }
    } else {
        let record = ntfs.open_record(reference)?;
        if json_output {
            print_json(&record.to_json())?;
        } else {
            println!("{}", record.to_string());
        }
    }
    Ok(())
}

fn show_usage(ntfs: &Ntfs, json_output: bool) -> Result<(), Box<dyn Error>> {
    let name = ntfs.volume_name().unwrap_or_default();
    let mft_used = ntfs.mft_allocated_records()?;
    let mft_free = ntfs.mft_free_records()?;
    if json_output {
        return print_json(&json!({
            "volume_name": name,
            "serial_number": format!("{:016X}", ntfs.serial_number()),
            "cluster_size": ntfs.cluster_size(),
            "cluster_count": ntfs.cluster_count(),
            "used_clusters": ntfs.used_clusters(),
            "free_clusters": ntfs.free_clusters(),
            "mft_record_size": ntfs.mft().record_size(),
            "mft_records": ntfs.mft().record_count(),
            "mft_allocated_records": mft_used,
            "mft_free_records": mft_free,
            "root": ntfs.root_ufid().to_string(),
        }));
    }
    let mut t = Table::new();
    t.add_row(row!["Volume"]);
    t.add_row(row![b -> "Name", name]);
    t.add_row(row![b -> "Serial Number", format!("{:016X}", ntfs.serial_number())]);
    t.add_row(row![b -> "Cluster Size", ntfs.cluster_size()]);
    t.add_row(row![b -> "Clusters", ntfs.cluster_count()]);
    t.add_row(row![b -> "Used Clusters", ntfs.used_clusters()]);
    t.add_row(row![b -> "Free Clusters", ntfs.free_clusters()]);
    t.add_row(row![b -> "MFT Record Size", ntfs.mft().record_size()]);
    t.add_row(row![b -> "MFT Records", ntfs.mft().record_count()]);
    t.add_row(row![b -> "MFT Allocated", mft_used]);
    t.add_row(row![b -> "MFT Free", mft_free]);
    t.add_row(row![b -> "Root UFID", ntfs.root_ufid()]);
    println!("{}", t);
    Ok(())
}
