use std::error::Error;

use clap::{command, Arg, ArgMatches, Command};

use nbd_store::{BlockPlugin, Plugin};

fn parse_param(param: &str) -> Result<(&str, &str), Box<dyn Error>> {
    match param.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => Err(format!("expected key=value, got {:?}", param).into()),
    }
}

fn dump() {
    let info = BlockPlugin::info();
    println!("name={}", info.name);
    println!("version={}", info.version);
    println!("thread_model={}", info.thread_model);
    println!("{}", info.config_help);
}

/// Runs the whole lifecycle against the given parameters and reports what a
/// client would be offered.
fn check<'a>(params: impl Iterator<Item = &'a str>, readonly: bool) -> Result<(), Box<dyn Error>> {
    let plugin = BlockPlugin::new();
    plugin.load();
    for param in params {
        let (key, value) = parse_param(param)?;
        plugin.config(key, value)?;
    }
    plugin.config_complete()?;
    plugin.get_ready()?;

    if !plugin.pre_connect(readonly)? {
        plugin.unload();
        return Err("connection refused by pre_connect".into());
    }
    let handle = plugin.open(readonly)?;
    let connection = plugin.export()?.connection(handle)?;
    println!("size={}", plugin.get_size(handle)?);
    println!("{}", connection.capabilities().summary());
    println!("transmission_flags={:#06x}", connection.capabilities().transmission_flags());
    plugin.close(handle);
    plugin.unload();
    Ok(())
}

fn init(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let plugin = BlockPlugin::new();
    plugin.load();
    for key in ["driver", "location", "size", "shard-size"] {
        if let Some(value) = matches.value_of(key) {
            plugin.config(key, value)?;
        }
    }
    plugin.config("create", "true")?;
    plugin.config_complete()?;
    plugin.get_ready()?;
    let export = plugin.export()?;
    println!(
        "initialized {} store at {}",
        export.config().driver,
        matches.value_of("location").unwrap_or_default()
    );
    plugin.unload();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let matches = command!()
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .multiple_occurrences(true)
                .global(true)
                .help("Increase log verbosity"),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("dump").about("Print plugin metadata and parameters"))
        .subcommand(
            Command::new("check")
                .about("Configure the plugin, open one connection and print its capabilities")
                .arg(
                    Arg::new("readonly")
                        .short('r')
                        .long("readonly")
                        .help("Open the connection read-only"),
                )
                .arg(
                    Arg::new("params")
                        .help("key=value configuration parameters")
                        .multiple_values(true),
                ),
        )
        .subcommand(
            Command::new("init")
                .about("Create a new raw image or sharded volume")
                .arg(
                    Arg::new("size")
                        .long("size")
                        .takes_value(true)
                        .required(true)
                        .help("Volume size, e.g. 64M"),
                )
                .arg(
                    Arg::new("driver")
                        .long("driver")
                        .takes_value(true)
                        .possible_values(["raw", "sharded"])
                        .default_value("raw"),
                )
                .arg(
                    Arg::new("shard-size")
                        .long("shard-size")
                        .takes_value(true)
                        .help("Shard size for the sharded driver"),
                )
                .arg(Arg::new("location").required(true).help("Absolute path or file:// URL")),
        )
        .get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match matches.subcommand() {
        Some(("dump", _)) => {
            dump();
            Ok(())
        }
        Some(("check", sub)) => check(
            sub.values_of("params").into_iter().flatten(),
            sub.is_present("readonly"),
        ),
        Some(("init", sub)) => init(sub),
        _ => Ok(()),
    }
}
